//! `fledge script` — not yet implemented.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use crate::error::FledgeError;

/// Generate a static site from a user-supplied rendering script instead of crawling a server.
#[derive(Clone, Debug, Args)]
#[command(name = "script")]
pub struct Script {
    /// Path to the rendering script.
    pub script: Option<PathBuf>,
}

impl Script {
    pub async fn run(self) -> Result<ExitCode> {
        Err(FledgeError::NotImplemented("script").into())
    }
}

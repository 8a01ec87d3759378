//! `fledge binary` — not yet implemented.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use crate::error::FledgeError;

/// Generate a static site by running a user-supplied binary that emits pages directly.
#[derive(Clone, Debug, Args)]
#[command(name = "binary")]
pub struct Binary {
    /// Path to the binary to run.
    pub binary: Option<PathBuf>,
}

impl Binary {
    pub async fn run(self) -> Result<ExitCode> {
        Err(FledgeError::NotImplemented("binary").into())
    }
}

//! `fledge static` — boot the user's server, crawl it, and materialize a deployable static site.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::config::{self, CliOverrides, RtcStatic};
use crate::coordinator::Coordinator;
use crate::error::FledgeError;

/// Build a static site by crawling a running (or supervisor-spawned) HTTP server.
#[derive(Clone, Debug, Args)]
#[command(name = "static")]
#[command(next_help_heading = "Static")]
pub struct Static {
    /// Path to the project config file. Defaults to `Fledge.toml` in the current directory, or
    /// to a JSON document piped on stdin.
    pub config: Option<PathBuf>,

    /// A pre-existing server origin to crawl, overriding `server` in the config file.
    #[arg(long)]
    pub server: Option<String>,

    /// Override `outputDir`.
    #[arg(long = "out")]
    pub out: Option<PathBuf>,

    /// Override `basePath`.
    #[arg(long = "base")]
    pub base: Option<String>,

    /// Validate the resolved configuration and print it, without running a build.
    #[arg(long)]
    pub validate: bool,
}

impl Static {
    pub async fn run(self) -> Result<ExitCode> {
        let file = config::load(self.config.clone())?;
        let overrides = CliOverrides {
            server: self.server,
            out: self.out,
            base: self.base,
        };

        let rtc = match RtcStatic::build(file, overrides) {
            Ok(rtc) => rtc,
            Err(err) => {
                tracing::error!("{err}");
                return Ok(ExitCode::from(1));
            }
        };

        if self.validate {
            println!("{rtc:#?}");
            return Ok(ExitCode::SUCCESS);
        }

        let cancellation = CancellationToken::new();
        let ctrl_c = cancellation.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, aborting build");
                ctrl_c.cancel();
            }
        });

        match Coordinator::new(rtc, cancellation).run().await {
            Ok(summary) => {
                tracing::info!(
                    fetched = summary.count(crate::crawl::Outcome::Fetched),
                    redirected = summary.count(crate::crawl::Outcome::Redirected),
                    failed = summary.count(crate::crawl::Outcome::FailedPermanent) + summary.count(crate::crawl::Outcome::FailedNetwork),
                    duration_ms = summary.duration.as_millis() as u64,
                    "build finished"
                );
                Ok(ExitCode::from(summary.exit_code()))
            }
            Err(FledgeError::Boot(err)) => {
                tracing::error!("server failed to start: {err}");
                Ok(ExitCode::from(2))
            }
            Err(FledgeError::Aborted) => Ok(ExitCode::from(130)),
            Err(err) => {
                tracing::error!("{err}");
                Ok(ExitCode::from(1))
            }
        }
    }
}

#![deny(clippy::expect_used)]
#![deny(clippy::unwrap_used)]

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use fledge::cmd;
use fledge::common::STARTING;
use std::io::IsTerminal;
use std::process::ExitCode;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Fledge::parse();

    let colored = init_color(&cli);

    tracing_subscriber::registry()
        .with(eval_logging(&cli))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(colored)
                .with_target(false)
                .with_level(true)
                .compact(),
        )
        .try_init()
        .context("error initializing logging")?;

    tracing::info!(
        "{}Starting {} {}",
        STARTING,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    match cli.run().await {
        Ok(code) => Ok(code),
        Err(err) => {
            tracing::error!("{err}");
            for (n, cause) in err.chain().enumerate().skip(1) {
                tracing::info!("  {n}: {cause}");
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn init_color(cli: &Fledge) -> bool {
    if cli.no_color {
        return false;
    }

    let colored = match cli.color {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => std::io::stdout().is_terminal(),
    };

    #[cfg(windows)]
    if colored {
        if let Err(err) = nu_ansi_term::enable_ansi_support() {
            eprintln!("error enabling ANSI support: {:?}", err);
        }
    }

    #[allow(clippy::let_and_return)]
    colored
}

fn eval_logging(cli: &Fledge) -> tracing_subscriber::EnvFilter {
    // allow overriding everything with RUST_LOG or --log
    if let Some(directives) = &cli.log {
        return tracing_subscriber::EnvFilter::new(directives);
    }

    let directives = match (cli.verbose, cli.quiet) {
        (_, true) => "error,fledge=warn",
        (0, false) => "error,fledge=info",
        (1, false) => "error,fledge=debug",
        (_, false) => "error,fledge=trace",
    };

    tracing_subscriber::EnvFilter::new(directives)
}

/// Turn a running HTTP application into a deployable static site.
#[derive(Parser)]
#[command(about, author, version)]
struct Fledge {
    #[command(subcommand)]
    action: FledgeSubcommands,

    /// Enable verbose logging.
    #[arg(short, long, global(true), action = ArgAction::Count)]
    pub verbose: u8,
    /// Be more quiet, conflicts with --verbose
    #[arg(short, long, global(true), conflicts_with("verbose"))]
    pub quiet: bool,
    /// Provide a RUST_LOG filter, conflicts with --verbose and --quiet
    #[arg(long, global(true), conflicts_with_all(["verbose", "quiet"]), env("RUST_LOG"))]
    pub log: Option<String>,

    /// Color mode
    #[arg(long, env = "FLEDGE_COLOR", global(true), value_enum, conflicts_with = "no_color", default_value_t = ColorMode::Auto)]
    pub color: ColorMode,
    /// Support for the `NO_COLOR` environment variable
    #[arg(long, env = "NO_COLOR", global(true))]
    pub no_color: bool,
}

impl Fledge {
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn run(self) -> Result<ExitCode> {
        match self.action {
            FledgeSubcommands::Static(inner) => inner.run().await,
            FledgeSubcommands::Script(inner) => inner.run().await,
            FledgeSubcommands::Binary(inner) => inner.run().await,
        }
    }
}

#[derive(Clone, Debug, Default, ValueEnum)]
#[value(rename_all = "lower")]
enum ColorMode {
    /// Enable color when running on a TTY
    #[default]
    Auto,
    /// Always enable color
    Always,
    /// Never enable color
    Never,
}

#[derive(Subcommand)]
enum FledgeSubcommands {
    /// Crawl a running (or supervised) HTTP server and materialize it as a static site.
    Static(cmd::static_cmd::Static),
    /// Generate a static site from a rendering script. Not yet implemented.
    Script(cmd::script::Script),
    /// Generate a static site by running a binary that emits pages directly. Not yet implemented.
    Binary(cmd::binary::Binary),
}

//! Configuration loading for `fledge static`.
//!
//! A static build's configuration comes from exactly one source, in priority order: a JSON
//! document piped on stdin, a `Fledge.toml` project file, or CLI flags alone. Whichever source is
//! selected is then layered with the small set of CLI overrides (`--server`, `--out`, `--base`)
//! before [`rt::RtcStatic::build`] validates the result.
//!
//! ```text
//! stdin (JSON)  ─┐
//! Fledge.toml   ─┼─▶ StaticConfigFile ─▶ + CLI overrides ─▶ RtcStatic::build ─▶ RtcStatic
//! flags only    ─┘
//! ```

pub mod models;
pub mod rt;

use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub use models::{ConfigFile, DiscoverFile, ServerFile, StaticConfigFile};
pub use rt::{CliOverrides, Discover, RtcStatic};

/// Project file names searched for in the current directory when `--config` is not given.
const DEFAULT_FILE_NAMES: &[&str] = &["Fledge.toml", "fledge.toml"];

/// Resolve the `[static]` configuration per the documented source precedence. Exactly one source
/// is selected; the others are ignored with a warning on stderr.
pub fn load(config_path: Option<PathBuf>) -> Result<StaticConfigFile> {
    let stdin_piped = !std::io::stdin().is_terminal();

    if stdin_piped {
        if config_path.is_some() {
            eprintln!(
                "warning: both piped stdin and --config were given; using piped stdin, ignoring the config file"
            );
        }
        return load_stdin();
    }

    match config_path.or_else(find_default_file) {
        Some(path) => load_file(&path),
        None => Ok(StaticConfigFile::default()),
    }
}

fn load_stdin() -> Result<StaticConfigFile> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("reading piped configuration from stdin")?;
    let file: ConfigFile = serde_json::from_str(&buf).context("parsing piped JSON configuration")?;
    Ok(file.static_)
}

fn load_file(path: &Path) -> Result<StaticConfigFile> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
    let file: ConfigFile = toml::from_str(&raw).with_context(|| format!("parsing config file {path:?}"))?;
    Ok(file.static_)
}

fn find_default_file() -> Option<PathBuf> {
    DEFAULT_FILE_NAMES
        .iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.is_file())
}

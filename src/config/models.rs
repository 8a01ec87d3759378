//! The static-build configuration model as it is deserialized from a `Fledge.toml` project file
//! or a JSON document piped on stdin, before CLI flags are merged in and the result is validated
//! into [`crate::config::rt::RtcStatic`].

use std::path::PathBuf;

use serde::Deserialize;

/// `server` as it appears in the config file: either a pre-existing origin URL, or a spawn spec
/// for a child process the supervisor should boot.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ServerFile {
    Origin(String),
    Spawn {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// `discover` as it appears in the config file: `false`, `true`, or a scoped policy.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum DiscoverFile {
    Bool(bool),
    Scoped {
        depth: u32,
        #[serde(default)]
        ignore: Vec<String>,
    },
}

/// The `[static]` section of a project config file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticConfigFile {
    pub server: Option<ServerFile>,
    #[serde(default)]
    pub routes: Vec<String>,
    pub routes_file: Option<PathBuf>,
    pub discover: Option<DiscoverFile>,
    pub base_path: Option<String>,
    pub assets_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub max_concurrency: Option<usize>,
    #[serde(default, with = "humantime_serde::option")]
    pub request_timeout: Option<std::time::Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub readiness_timeout: Option<std::time::Duration>,
}

/// The top-level project file. Only `[static]` is implemented; `[script]`/`[binary]` sections
/// are accepted and ignored, pending those modes' implementation.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(rename = "static", default)]
    pub static_: StaticConfigFile,
}

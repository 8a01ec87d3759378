//! The validated, ready-to-run configuration for a static build: the result of merging CLI
//! overrides onto a [`StaticConfigFile`] and checking the invariants the coordinator relies on.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::config::models::{DiscoverFile, ServerFile, StaticConfigFile};
use crate::error::FledgeError;
use crate::supervisor::{ServerSpec, SupervisorConfig};
use crate::url_normalize::IgnoreSet;

/// The `discover` policy in its validated, ready-to-match form.
#[derive(Debug)]
pub enum Discover {
    Disabled,
    Unlimited,
    Scoped { depth: u32, ignore: IgnoreSet },
}

impl std::fmt::Debug for IgnoreSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IgnoreSet(..)")
    }
}

/// A fully validated static-build configuration, ready to hand to [`crate::coordinator::Coordinator`].
#[derive(Debug)]
pub struct RtcStatic {
    pub server: ServerSpec,
    pub routes: Vec<String>,
    pub discover: Discover,
    pub base_path: String,
    pub assets_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub max_concurrency: usize,
    pub request_timeout: Duration,
    pub supervisor: SupervisorConfig,
}

/// CLI-level overrides applied on top of the file-sourced model, per the `fledge static` flags
/// `--server`, `--out`, `--base`.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub server: Option<String>,
    pub out: Option<PathBuf>,
    pub base: Option<String>,
}

impl RtcStatic {
    /// Merge `cli` onto `file` and validate the result.
    pub fn build(file: StaticConfigFile, cli: CliOverrides) -> Result<Self, FledgeError> {
        let server = Self::resolve_server(file.server, cli.server)?;

        let mut routes = file.routes;
        if let Some(routes_file) = &file.routes_file {
            let contents = std::fs::read_to_string(routes_file)
                .map_err(|source| FledgeError::Config(format!("reading routesFile {routes_file:?}: {source}")))?;
            routes.extend(
                contents
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(String::from),
            );
        }

        let discover = Self::resolve_discover(file.discover)?;

        let base_path = cli.base.or(file.base_path).unwrap_or_else(|| "/".to_string());
        if !base_path.starts_with('/') {
            return Err(FledgeError::Config(format!(
                "basePath {base_path:?} must be site-absolute (start with '/')"
            )));
        }

        let output_dir = cli.out.or(file.output_dir).unwrap_or_else(|| PathBuf::from("dist"));

        let max_concurrency = file.max_concurrency.unwrap_or(4);
        if max_concurrency == 0 {
            return Err(FledgeError::Config("maxConcurrency must be at least 1".to_string()));
        }

        let mut supervisor = SupervisorConfig::default();
        if let Some(timeout) = file.readiness_timeout {
            supervisor.readiness_timeout = timeout;
        }

        let request_timeout = file.request_timeout.unwrap_or(crate::crawl::DEFAULT_REQUEST_TIMEOUT);

        Ok(Self {
            server,
            routes,
            discover,
            base_path,
            assets_dir: file.assets_dir,
            output_dir,
            max_concurrency,
            request_timeout,
            supervisor,
        })
    }

    fn resolve_server(file: Option<ServerFile>, cli: Option<String>) -> Result<ServerSpec, FledgeError> {
        match (file, cli) {
            (Some(ServerFile::Origin(url)), _) => {
                let url = Url::parse(&url)
                    .map_err(|source| FledgeError::Config(format!("invalid server origin {url:?}: {source}")))?;
                Ok(ServerSpec::Origin(url))
            }
            (Some(ServerFile::Spawn { program, args }), _) => Ok(ServerSpec::Spawn { program, args }),
            (None, Some(url)) => {
                let url = Url::parse(&url)
                    .map_err(|source| FledgeError::Config(format!("invalid --server {url:?}: {source}")))?;
                Ok(ServerSpec::Origin(url))
            }
            (None, None) => Err(FledgeError::Config(
                "no server configured: set `server` in the config file or pass --server".to_string(),
            )),
        }
    }

    fn resolve_discover(file: Option<DiscoverFile>) -> Result<Discover, FledgeError> {
        match file {
            None | Some(DiscoverFile::Bool(false)) => Ok(Discover::Disabled),
            Some(DiscoverFile::Bool(true)) => Ok(Discover::Unlimited),
            Some(DiscoverFile::Scoped { depth, ignore }) => {
                let ignore = IgnoreSet::compile(&ignore)
                    .map_err(|source| FledgeError::Config(format!("invalid ignore pattern: {source}")))?;
                Ok(Discover::Scoped { depth, ignore })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::ConfigFile;

    fn parse(toml_src: &str) -> StaticConfigFile {
        toml::from_str::<ConfigFile>(toml_src).unwrap().static_
    }

    #[test]
    fn requires_a_server() {
        let file = parse("[static]\nroutes = [\"/\"]\n");
        let err = RtcStatic::build(file, CliOverrides::default()).unwrap_err();
        assert!(matches!(err, FledgeError::Config(_)));
    }

    #[test]
    fn cli_server_overrides_when_file_omits_it() {
        let file = parse("[static]\nroutes = [\"/\"]\n");
        let rtc = RtcStatic::build(
            file,
            CliOverrides {
                server: Some("http://127.0.0.1:9000/".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(matches!(rtc.server, ServerSpec::Origin(_)));
    }

    #[test]
    fn rejects_relative_base_path() {
        let file = parse(r#"[static]
server = "http://127.0.0.1:9000/"
routes = ["/"]
basePath = "app"
"#);
        let err = RtcStatic::build(file, CliOverrides::default()).unwrap_err();
        assert!(matches!(err, FledgeError::Config(_)));
    }

    #[test]
    fn empty_routes_with_discovery_disabled_is_a_valid_no_op_build() {
        let file = parse(r#"[static]
server = "http://127.0.0.1:9000/"
"#);
        let rtc = RtcStatic::build(file, CliOverrides::default()).unwrap();
        assert!(rtc.routes.is_empty());
        assert!(matches!(rtc.discover, Discover::Disabled));
    }

    #[test]
    fn discovery_enabled_permits_empty_routes() {
        let file = parse(r#"[static]
server = "http://127.0.0.1:9000/"
discover = true
"#);
        assert!(RtcStatic::build(file, CliOverrides::default()).is_ok());
    }

    #[test]
    fn request_timeout_falls_back_to_the_default_when_unset() {
        let file = parse(r#"[static]
server = "http://127.0.0.1:9000/"
routes = ["/"]
"#);
        let rtc = RtcStatic::build(file, CliOverrides::default()).unwrap();
        assert_eq!(rtc.request_timeout, crate::crawl::DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn request_timeout_is_threaded_from_the_config_file() {
        let file = parse(r#"[static]
server = "http://127.0.0.1:9000/"
routes = ["/"]
requestTimeout = "15s"
"#);
        let rtc = RtcStatic::build(file, CliOverrides::default()).unwrap();
        assert_eq!(rtc.request_timeout, Duration::from_secs(15));
    }

    #[test]
    fn routes_file_lines_are_appended_to_inline_routes() {
        let dir = tempfile::tempdir().unwrap();
        let routes_file = dir.path().join("routes.txt");
        std::fs::write(&routes_file, "/a\n# a comment\n\n/b\n").unwrap();

        let mut file = parse(r#"[static]
server = "http://127.0.0.1:9000/"
routes = ["/"]
"#);
        file.routes_file = Some(routes_file);

        let rtc = RtcStatic::build(file, CliOverrides::default()).unwrap();
        assert_eq!(rtc.routes, vec!["/".to_string(), "/a".to_string(), "/b".to_string()]);
    }
}

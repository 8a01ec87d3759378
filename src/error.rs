//! The error taxonomy for a static build.
//!
//! Per-URL errors ([`FetchError`]) are local: they populate a [`crate::crawl::UrlRecord`] and
//! never abort the build. The variants in [`FledgeError`] are the ones that can abort a build
//! outright, plus the CLI-facing `NotImplemented` used by the stubbed Script/Binary modes.

use std::path::PathBuf;

use thiserror::Error;
use url::Url;

/// Errors that can abort an in-progress build.
#[derive(Debug, Error)]
pub enum FledgeError {
    /// Static validation of a [`crate::config::models::StaticConfigFile`] failed before any
    /// side effects took place.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The supervisor could not bring the child process to the `Ready` state.
    #[error("server failed to start: {0}")]
    Boot(#[from] BootError),

    /// A destination path was about to be overwritten by a response from a *different*
    /// canonical URL than the one that produced the file already on disk.
    #[error("output collision: {path} was already written by {existing}, but {incoming} also maps to it")]
    OutputCollision {
        path: PathBuf,
        existing: Url,
        incoming: Url,
    },

    /// Cancellation was observed (e.g. Ctrl-C) before the build completed.
    #[error("build aborted")]
    Aborted,

    /// `fledge script` / `fledge binary` — not yet implemented upstream.
    #[error("`fledge {0}` is not implemented yet")]
    NotImplemented(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A fatal, non-per-URL failure outside the taxonomy above: asset copying, HTTP client
    /// construction, and similar build-wide setup steps.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

/// Why the [`crate::supervisor::ServerSupervisor`] failed to reach `Ready`.
#[derive(Debug, Error)]
pub enum BootError {
    #[error("child process exited during startup with status {status:?}; stderr tail:\n{stderr_tail}")]
    ChildExited {
        status: Option<i32>,
        stderr_tail: String,
    },

    #[error("timed out after {0:?} waiting for the child to start listening")]
    ReadinessTimeout(std::time::Duration),

    #[error("could not allocate a free TCP port after {0} attempts")]
    PortAllocation(u32),

    #[error("failed to spawn child process {}: {source}", dunce::simplified(program).display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("boot cancelled before the server became ready")]
    Cancelled,
}

/// Why a single fetch attempt failed. Retriable errors are folded into [`crate::crawl::Outcome`]
/// only once the retry policy is exhausted.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("non-retriable HTTP status {status} for {url}")]
    Http { status: u16, url: Url },

    #[error("network error fetching {url}: {source}")]
    Network {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("redirect to {url} has no usable Location header")]
    BadRedirect { url: Url },

    #[error("redirect target is cross-origin: {url}")]
    CrossOriginRedirect { url: Url },
}

/// A discovered URL that could not be parsed as an absolute URL against the crawl origin.
/// Skipped with a warning; never recorded as a [`crate::crawl::UrlRecord`].
#[derive(Debug, Error)]
#[error("invalid URL {raw:?} discovered in {source_attr} of {referrer}: {cause}")]
pub struct InvalidUrlError {
    pub raw: String,
    pub source_attr: &'static str,
    pub referrer: Url,
    pub cause: String,
}

/// An HTML body that could not be decoded as UTF-8. Skipped with a warning; the URL is still
/// recorded, with outcome `failed-permanent`.
#[derive(Debug, Error)]
#[error("could not decode HTML body of {url} as UTF-8: {source}")]
pub struct HtmlParseError {
    pub url: Url,
    #[source]
    pub source: std::str::Utf8Error,
}

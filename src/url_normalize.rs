//! Component A: URL canonicalization, origin comparison, and ignore-glob matching.
//!
//! Canonicalization is the crawler's dedup key. Two [`crate::crawl::CrawlTarget`]s that
//! canonicalize to the same [`CanonicalUrl`] are the same unit of work.

use std::fmt;

use globset::{Glob, GlobSetBuilder};
use url::Url;

/// A canonical, deduplication-ready form of a URL.
///
/// Canonicalization lowercases scheme and host, strips the default port for the scheme, drops
/// the fragment, preserves the query string, and resolves `.`/`..` path segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalUrl(Url);

impl CanonicalUrl {
    /// Resolve `raw` (absolute or relative) against `origin` and canonicalize the result.
    ///
    /// Fails for non-`http(s)` schemes or input `url` crate cannot parse even when joined to
    /// `origin`.
    pub fn resolve(raw: &str, origin: &Url) -> Result<Self, InvalidUrl> {
        let joined = origin.join(raw).map_err(|source| InvalidUrl {
            raw: raw.to_string(),
            cause: source.to_string(),
        })?;
        Self::canonicalize(joined)
    }

    /// Canonicalize an already-parsed, absolute URL.
    pub fn canonicalize(mut url: Url) -> Result<Self, InvalidUrl> {
        let scheme = url.scheme().to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(InvalidUrl {
                raw: url.to_string(),
                cause: format!("unsupported scheme {scheme:?}, only http/https are crawlable"),
            });
        }

        url.set_fragment(None);

        // Strip the default port for the scheme so that `http://x:80/` and `http://x/`
        // canonicalize identically.
        if let Some(port) = url.port() {
            let default = match scheme.as_str() {
                "http" => Some(80),
                "https" => Some(443),
                _ => None,
            };
            if Some(port) == default {
                let _ = url.set_port(None);
            }
        }

        url.set_scheme(&scheme).map_err(|()| InvalidUrl {
            raw: url.to_string(),
            cause: "failed to normalize scheme casing".to_string(),
        })?;
        if let Some(host) = url.host_str() {
            let lower = host.to_ascii_lowercase();
            if lower != host {
                let _ = url.set_host(Some(&lower));
            }
        }

        let collapsed = collapse_and_resolve_path(url.path());
        url.set_path(&collapsed);

        Ok(Self(url))
    }

    /// Exact scheme+host+port match between `self` and `origin` after canonicalizing both.
    pub fn is_same_origin(&self, origin: &Url) -> bool {
        let Ok(origin) = Self::canonicalize(origin.clone()) else {
            return false;
        };
        self.0.scheme() == origin.0.scheme()
            && self.0.host_str() == origin.0.host_str()
            && self.0.port_or_known_default() == origin.0.port_or_known_default()
    }

    /// The site-absolute path (and `?query` if present) relative to the URL's own origin.
    ///
    /// This is what ignore-glob matching and filesystem path mapping operate on.
    pub fn site_path(&self) -> String {
        match self.0.query() {
            Some(q) => format!("{}?{q}", self.0.path()),
            None => self.0.path().to_string(),
        }
    }

    /// The underlying, fully-qualified URL.
    pub fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn into_url(self) -> Url {
        self.0
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl AsRef<Url> for CanonicalUrl {
    fn as_ref(&self) -> &Url {
        &self.0
    }
}

/// A discovered or configured URL that could not be resolved to an absolute, crawlable URL.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid URL {raw:?}: {cause}")]
pub struct InvalidUrl {
    pub raw: String,
    pub cause: String,
}

/// Resolve `..`/`.` segments without ever escaping above the root, and collapse `//` runs.
///
/// Unlike [`Url::join`]'s own dot-segment handling (which trusts the input not to contain an
/// excess of `..`), this clamps: extra `..` segments past the root are simply dropped, never
/// producing a path outside of `/`.
fn collapse_and_resolve_path(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            seg => stack.push(seg),
        }
    }
    let mut out = String::from("/");
    out.push_str(&stack.join("/"));
    if path.ends_with('/') && !out.ends_with('/') && out != "/" {
        out.push('/');
    }
    out
}

/// Compile a set of ignore-glob patterns as described in §4.A of the spec.
///
/// `*` matches a run of non-`/` characters, `**` matches any run (including `/`), all other
/// characters are literal. A pattern not starting with `/` is implicitly prefixed with `**/`.
pub struct IgnoreSet {
    set: globset::GlobSet,
}

impl IgnoreSet {
    pub fn compile(patterns: &[String]) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            // Patterns and the paths they're matched against are both treated relative to the
            // site root, with the leading `/` stripped, to sidestep glob libraries' differing
            // treatment of a leading empty path component.
            let relative = pattern.strip_prefix('/').unwrap_or(pattern);
            let anchored = if pattern.starts_with('/') {
                relative.to_string()
            } else {
                format!("**/{relative}")
            };
            builder.add(Glob::new(&anchored)?);
        }
        Ok(Self {
            set: builder.build()?,
        })
    }

    /// `true` if `path_query` (e.g. `/admin/foo?x=1`) matches any compiled pattern.
    pub fn matches(&self, path_query: &str) -> bool {
        let relative = path_query.strip_prefix('/').unwrap_or(path_query);
        self.set.is_match(relative)
    }
}

/// Convenience one-shot form of [`IgnoreSet::compile`] + [`IgnoreSet::matches`] for call sites
/// (e.g. tests) that don't want to hold onto the compiled set.
pub fn matches_ignore(path_query: &str, patterns: &[String]) -> bool {
    match IgnoreSet::compile(patterns) {
        Ok(set) => set.matches(path_query),
        Err(_) => false,
    }
}

//! Component C: maps crawled responses onto the output directory tree.
//!
//! The Materializer owns `outputDir` for the duration of a build: it decides the destination
//! path for a response, rewrites same-origin link spans when `basePath` is not `/`, and commits
//! bytes to disk with a temp-then-rename so a reader never observes a half-written file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use url::Url;

use crate::common;
use crate::error::FledgeError;
use crate::html_extract::{self, LinkSpan};
use crate::url_normalize::CanonicalUrl;

/// A non-fatal event surfaced by a single [`Materializer::materialize`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterializeEvent {
    /// A crawled response overwrote a file that was copied in verbatim from `assetsDir`.
    AssetOverwrite { path: PathBuf },
    /// Two distinct site-paths would collide on a case-insensitive filesystem, even though
    /// they're distinct here. Warn-only; see the Open Questions note on filesystem case.
    CaseCollision { path: PathBuf, other: PathBuf },
}

/// The outcome of materializing one response.
#[derive(Debug, Clone)]
pub struct MaterializeOutcome {
    pub path: PathBuf,
    pub events: Vec<MaterializeEvent>,
}

/// Maps URL site-paths onto `outputDir`, tracking which canonical URL wrote each destination so
/// that a later, different URL mapping onto the same path is caught as an [`FledgeError::OutputCollision`].
pub struct Materializer {
    output_dir: PathBuf,
    base_path: String,
    origin: Url,
    written: HashMap<PathBuf, Url>,
    lowercase_index: HashMap<String, PathBuf>,
    asset_paths: std::collections::HashSet<PathBuf>,
}

/// Copy `assetsDir`'s contents verbatim into `outputDir` before the crawl begins. Returns the set
/// of destination paths written, handed to [`Materializer::new`] once the crawl origin is known.
pub async fn copy_assets_into(
    output_dir: &Path,
    assets_dir: &Path,
) -> Result<std::collections::HashSet<PathBuf>> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("creating output directory {output_dir:?}"))?;
    common::copy_dir_recursive(assets_dir.to_path_buf(), output_dir.to_path_buf())
        .await
        .with_context(|| format!("copying assets from {assets_dir:?}"))
}

impl Materializer {
    /// `asset_paths` is the set of destination paths already written by a prior
    /// [`copy_assets_into`] call, so the first crawled response landing on one of them is
    /// reported as an `AssetOverwrite` event rather than silently accepted.
    pub fn new(output_dir: PathBuf, base_path: String, origin: Url, asset_paths: std::collections::HashSet<PathBuf>) -> Self {
        Self {
            output_dir,
            base_path,
            origin,
            written: HashMap::new(),
            lowercase_index: HashMap::new(),
            asset_paths,
        }
    }

    /// Decide the destination for `canonical`'s response and persist `body`.
    ///
    /// `content_type` drives whether base-path rewriting is attempted; only responses whose
    /// media type is `text/html` are rewritten.
    pub async fn materialize(
        &mut self,
        canonical: &CanonicalUrl,
        content_type: &str,
        body: &[u8],
    ) -> Result<MaterializeOutcome> {
        let site_path = canonical.site_path();
        let rel = site_path_to_relative_fs_path(&site_path);
        let dest = self.output_dir.join(&rel);

        let mut events = Vec::new();

        if let Some(existing) = self.written.get(&dest) {
            if existing != canonical.as_url() {
                return Err(FledgeError::OutputCollision {
                    path: dest,
                    existing: existing.clone(),
                    incoming: canonical.as_url().clone(),
                }
                .into());
            }
        } else if self.asset_paths.contains(&dest) {
            events.push(MaterializeEvent::AssetOverwrite { path: dest.clone() });
        }

        let lower_key = dest.to_string_lossy().to_ascii_lowercase();
        if let Some(other) = self.lowercase_index.get(&lower_key) {
            if other != &dest {
                events.push(MaterializeEvent::CaseCollision {
                    path: dest.clone(),
                    other: other.clone(),
                });
            }
        } else {
            self.lowercase_index.insert(lower_key, dest.clone());
        }

        let is_html = html_extract::is_html(content_type, body);

        let final_body = if is_html && self.base_path != "/" {
            self.rewrite_base_path(body)?
        } else {
            body.to_vec()
        };

        write_atomic(&dest, &final_body)
            .await
            .with_context(|| format!("writing {dest:?}"))?;

        self.written.insert(dest.clone(), canonical.as_url().clone());
        self.asset_paths.remove(&dest);

        Ok(MaterializeOutcome { path: dest, events })
    }

    /// Splice every same-origin link span in `body` to point under `self.base_path`.
    fn rewrite_base_path(&self, body: &[u8]) -> Result<Vec<u8>> {
        let spans = match html_extract::extract(body) {
            Ok(spans) => spans,
            Err(_) => return Ok(body.to_vec()),
        };

        let mut replacements = Vec::new();
        for span in &spans {
            if let Some(replacement) = self.rewrite_span(span) {
                replacements.push((span.start, span.len, replacement));
            }
        }
        Ok(splice(body, replacements))
    }

    fn rewrite_span(&self, span: &LinkSpan) -> Option<String> {
        let canonical = CanonicalUrl::resolve(&span.raw, &self.origin).ok()?;
        if !canonical.is_same_origin(&self.origin) {
            return None;
        }
        Some(join_base_path(&self.base_path, &canonical.site_path()))
    }
}

/// Join a `basePath` (e.g. `/app`) with a site-path (e.g. `/x?y=1`), collapsing the boundary
/// slash so the result never contains `//`.
fn join_base_path(base_path: &str, site_path: &str) -> String {
    let trimmed_base = base_path.trim_end_matches('/');
    if site_path.starts_with('/') {
        format!("{trimmed_base}{site_path}")
    } else {
        format!("{trimmed_base}/{site_path}")
    }
}

/// Splice non-overlapping `(start, len, replacement)` edits into `body`, assumed sorted by
/// ascending `start` (the extractor always reports spans in document order).
fn splice(body: &[u8], replacements: Vec<(usize, usize, String)>) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let mut cursor = 0usize;
    for (start, len, replacement) in replacements {
        if start < cursor {
            // Overlapping edit (shouldn't happen with a well-formed extractor output); skip it
            // rather than corrupt the buffer.
            continue;
        }
        out.extend_from_slice(&body[cursor..start]);
        out.extend_from_slice(replacement.as_bytes());
        cursor = start + len;
    }
    out.extend_from_slice(&body[cursor..]);
    out
}

/// Map a site-path (`/path?query`) onto a path relative to `outputDir`, per the directory-index
/// convention: a trailing slash or an extension-less final segment maps to `index.html`.
fn site_path_to_relative_fs_path(site_path: &str) -> PathBuf {
    let path_only = site_path.split('?').next().unwrap_or(site_path);
    let trimmed = path_only.trim_start_matches('/');

    let final_segment = trimmed.rsplit('/').next().unwrap_or("");
    let is_directory_style = path_only.ends_with('/') || !final_segment.contains('.');

    if is_directory_style {
        if trimmed.is_empty() {
            PathBuf::from("index.html")
        } else {
            Path::new(trimmed).join("index.html")
        }
    } else {
        PathBuf::from(trimmed)
    }
}

/// Write `body` to `dest` via a same-directory temp file, then rename into place.
async fn write_atomic(dest: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating directory {parent:?}"))?;
    }
    let tmp_name = match dest.file_name().and_then(|n| n.to_str()) {
        Some(name) => format!("{name}.fledge-tmp"),
        None => "fledge-tmp".to_string(),
    };
    let tmp = dest.with_file_name(tmp_name);
    tokio::fs::write(&tmp, body)
        .await
        .with_context(|| format!("writing temp file {tmp:?}"))?;
    tokio::fs::rename(&tmp, dest)
        .await
        .with_context(|| format!("renaming {tmp:?} to {dest:?}"))?;
    Ok(())
}

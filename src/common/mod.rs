//! Common functionality and types shared across the static-generation pipeline.

use anyhow::{anyhow, Context, Result};
use console::Emoji;
use std::collections::HashSet;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

pub static BUILDING: Emoji = Emoji("📦 ", "");
pub static SUCCESS: Emoji = Emoji("✅ ", "");
pub static ERROR: Emoji = Emoji("❌ ", "");
pub static STARTING: Emoji = Emoji("🚀 ", "");

/// A utility function to recursively copy a directory.
///
/// Used by the Output Materializer to seed `outputDir` from `assetsDir` before the crawl begins.
/// Returns the set of destination paths written, so a later crawled response landing on the same
/// path can be told apart from a fresh path and reported as an `AssetOverwrite` event rather than
/// an `OutputCollision`.
pub async fn copy_dir_recursive<F, T>(from_dir: F, to_dir: T) -> Result<HashSet<PathBuf>>
where
    F: AsRef<Path> + Debug + Send + 'static,
    T: AsRef<Path> + Send + 'static,
{
    let from = from_dir.as_ref();
    let to: &Path = to_dir.as_ref();

    // Source must exist and be a directory.
    let from_metadata = tokio::fs::metadata(from).await.with_context(|| {
        format!("unable to retrieve metadata of {from:?}; does it exist?")
    })?;
    if !from_metadata.is_dir() {
        return Err(anyhow!("path {from:?} can not be copied as it is not a directory"));
    }

    // Target is created if missing.
    if tokio::fs::metadata(to).await.is_err() {
        tokio::fs::create_dir_all(to)
            .await
            .with_context(|| format!("unable to create target directory {to:?}"))?;
    }

    let mut collector = HashSet::new();

    // Copy files and recursively handle nested directories.
    let mut read_dir = tokio::fs::read_dir(from)
        .await
        .with_context(|| format!("unable to read directory {from:?}"))?;
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .context("unable to read next directory entry")?
    {
        if entry.file_type().await?.is_dir() {
            let dest = to.join(entry.file_name());
            let nested = Box::pin(copy_dir_recursive(entry.path(), dest)).await?;
            collector.extend(nested);
        } else {
            let dest = to.join(entry.file_name());
            // Does overwrite!
            tokio::fs::copy(entry.path(), &dest)
                .await
                .with_context(|| format!("unable to copy {:?} to {dest:?}", entry.path()))?;
            collector.insert(dest);
        }
    }

    Ok(collector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copies_nested_directories() -> Result<()> {
        let src = tempfile::tempdir()?;
        tokio::fs::write(src.path().join("a.txt"), b"a").await?;
        tokio::fs::create_dir(src.path().join("nested")).await?;
        tokio::fs::write(src.path().join("nested/b.txt"), b"b").await?;

        let dst = tempfile::tempdir()?;
        let copied = copy_dir_recursive(src.path().to_path_buf(), dst.path().to_path_buf()).await?;

        assert_eq!(copied.len(), 2);
        assert_eq!(tokio::fs::read(dst.path().join("a.txt")).await?, b"a");
        assert_eq!(tokio::fs::read(dst.path().join("nested/b.txt")).await?, b"b");
        Ok(())
    }

    #[tokio::test]
    async fn errors_when_source_is_not_a_directory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let result = copy_dir_recursive(file.path().to_path_buf(), dst.path().to_path_buf()).await;
        assert!(result.is_err());
    }
}

//! External collaborators of the ingestion pipeline, each behind a trait so
//! the pipeline can run against local directories, Supabase, or test fakes.

pub mod archive_source;
pub mod chapter_sink;
pub mod metadata_store;
pub mod object_store;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tokio::fs;

pub use archive_source::{ArchiveSource, HttpArchiveSource, LocalFsArchiveSource};
pub use chapter_sink::{ChapterSink, DiscardChapters, LocalFsChapterSink};
pub use metadata_store::{LocalFsMetadataStore, MetadataStore, SupabaseMetadataStore};
pub use object_store::{LocalFsObjectStore, ObjectStore, StoredObject, SupabaseObjectStore};

/// Join a `/`-separated key under `base`, refusing `..` segments.
pub(crate) fn safe_join(base: &Path, key: &str) -> anyhow::Result<PathBuf> {
    let mut path = base.to_path_buf();
    let mut pushed = false;
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment == ".." {
            anyhow::bail!("key must not contain '..': {key}");
        }
        path.push(segment);
        pushed = true;
    }
    if !pushed {
        anyhow::bail!("key is empty: {key:?}");
    }
    Ok(path)
}

pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

pub(crate) async fn write_json_atomic<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

use std::path::PathBuf;

use anyhow::Context as _;
use async_trait::async_trait;

use crate::formats::Chapter;

/// Receives a publication's chapters, in spine order, once extraction is done.
#[async_trait]
pub trait ChapterSink: Send + Sync {
    async fn store(&self, identifier: &str, chapters: &[Chapter]) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardChapters;

#[async_trait]
impl ChapterSink for DiscardChapters {
    async fn store(&self, _identifier: &str, _chapters: &[Chapter]) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One `<identifier>.json` file per publication.
#[derive(Debug, Clone)]
pub struct LocalFsChapterSink {
    dir: PathBuf,
}

impl LocalFsChapterSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn chapters_path(&self, identifier: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem_for(identifier)))
    }
}

#[async_trait]
impl ChapterSink for LocalFsChapterSink {
    async fn store(&self, identifier: &str, chapters: &[Chapter]) -> anyhow::Result<()> {
        let path = self.chapters_path(identifier);
        super::write_json_atomic(&path, &chapters)
            .await
            .with_context(|| format!("write chapters: {}", path.display()))
    }
}

fn file_stem_for(identifier: &str) -> String {
    identifier
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

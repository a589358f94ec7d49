use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Property names of the Standard Ebooks extensions flattened into [`BookRecord`].
pub const WORD_COUNT_PROPERTY: &str = "se:word-count";
pub const READING_EASE_PROPERTY: &str = "se:reading-ease.flesch";
pub const SUBJECT_PROPERTY: &str = "se:subject";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedMetadata {
    pub extensions: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
}

impl ExtendedMetadata {
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty() && self.subjects.is_empty()
    }

    pub fn extension(&self, property: &str) -> Option<&str> {
        self.extensions.get(property).map(String::as_str)
    }
}

/// Baseline Dublin Core metadata read from the package document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Row written to the metadata store, keyed by `identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    pub identifier: String,
    pub title: Option<String>,
    pub creator: Option<String>,
    pub description: Option<String>,
    pub publisher: Option<String>,
    pub language: Option<String>,
    pub cover_url: String,
    /// Public URL of the uploaded archive copy.
    #[serde(rename = "path")]
    pub archive_url: String,
    pub word_count: Option<String>,
    pub reading_ease: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subjects: Option<Vec<String>>,
    pub subject: Option<String>,
}

impl BookRecord {
    pub fn compose(
        package: &PackageMetadata,
        extended: &ExtendedMetadata,
        cover_url: String,
        archive_url: String,
    ) -> anyhow::Result<Self> {
        let identifier = package
            .identifier
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow::anyhow!("book record requires an identifier"))?
            .to_owned();

        let subjects = if extended.subjects.is_empty() {
            None
        } else {
            Some(extended.subjects.clone())
        };

        Ok(Self {
            identifier,
            title: package.title.clone(),
            creator: package.creator.clone(),
            description: package.description.clone(),
            publisher: package.publisher.clone(),
            language: package.language.clone(),
            cover_url,
            archive_url,
            word_count: extended.extension(WORD_COUNT_PROPERTY).map(str::to_owned),
            reading_ease: extended.extension(READING_EASE_PROPERTY).map(str::to_owned),
            subjects,
            subject: extended.extension(SUBJECT_PROPERTY).map(str::to_owned),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Fetch,
    Open,
    UploadCover,
    UploadArchive,
    Upsert,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntryStatus {
    Ingested {
        chapters: usize,
        cover_url: String,
        archive_url: String,
    },
    Skipped {
        reason: String,
    },
    Failed {
        stage: IngestStage,
        error: String,
    },
}

/// Per-entry result of an ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOutcome {
    pub name: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(flatten)]
    pub status: EntryStatus,
    pub finished_at: DateTime<Utc>,
}

impl EntryOutcome {
    pub fn is_ingested(&self) -> bool {
        matches!(self.status, EntryStatus::Ingested { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, EntryStatus::Failed { .. })
    }
}

use crate::formats::IngestStage;

/// Failures that end the processing of a single catalog entry.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("fetch archive {path}")]
    Fetch {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("open archive {path}")]
    ArchiveOpen {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("package metadata has no identifier")]
    MissingIdentifier,
    #[error("no cover image found")]
    MissingCover,
    #[error("upload {key}")]
    Upload {
        stage: IngestStage,
        key: String,
        #[source]
        source: UploadError,
    },
    #[error("upsert book record {identifier}")]
    Persistence {
        identifier: String,
        #[source]
        source: anyhow::Error,
    },
}

impl IngestError {
    /// `None` for policy skips that are not faults.
    pub fn stage(&self) -> Option<IngestStage> {
        match self {
            Self::Fetch { .. } => Some(IngestStage::Fetch),
            Self::ArchiveOpen { .. } => Some(IngestStage::Open),
            Self::MissingIdentifier | Self::MissingCover => None,
            Self::Upload { stage, .. } => Some(*stage),
            Self::Persistence { .. } => Some(IngestStage::Upsert),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("object already exists: {bucket}/{key}")]
    AlreadyExists { bucket: String, key: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum PackageDocumentError {
    #[error("package document not readable: {path}")]
    Unreadable {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("package document is not well-formed xml")]
    Malformed(#[from] roxmltree::Error),
}

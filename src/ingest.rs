use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;

use crate::chapters::extract_chapters;
use crate::cli::IngestArgs;
use crate::config::{StoreBackend, SupabaseConfig};
use crate::container::Publication;
use crate::error::{IngestError, UploadError};
use crate::formats::{BookRecord, CatalogEntry, EntryOutcome, EntryStatus, IngestStage};
use crate::metadata::scrape_extended_metadata;
use crate::store::{
    ArchiveSource, ChapterSink, DiscardChapters, HttpArchiveSource, LocalFsArchiveSource,
    LocalFsChapterSink, LocalFsMetadataStore, LocalFsObjectStore, MetadataStore, ObjectStore,
    SupabaseMetadataStore, SupabaseObjectStore,
};

pub const DEFAULT_COVERS_BUCKET: &str = "epub-covers";
pub const DEFAULT_FILES_BUCKET: &str = "epub-files";

const EPUB_MEDIA_TYPE: &str = "application/epub+zip";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    pub covers_bucket: String,
    pub files_bucket: String,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            covers_bucket: DEFAULT_COVERS_BUCKET.to_string(),
            files_bucket: DEFAULT_FILES_BUCKET.to_string(),
        }
    }
}

pub fn cover_key(identifier: &str) -> String {
    format!("{identifier}_cover.jpg")
}

pub fn archive_key(identifier: &str) -> String {
    format!("{identifier}.epub")
}

/// Turns catalog entries into stored assets and book records, one entry at
/// a time. A failing entry is recorded in its [`EntryOutcome`] and never
/// stops the run.
pub struct Ingestor {
    archives: Arc<dyn ArchiveSource>,
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn MetadataStore>,
    chapters: Arc<dyn ChapterSink>,
    options: IngestOptions,
}

#[derive(Debug)]
struct Ingested {
    chapters: usize,
    cover_url: String,
    archive_url: String,
}

impl Ingestor {
    pub fn new(
        archives: Arc<dyn ArchiveSource>,
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            archives,
            objects,
            records,
            chapters: Arc::new(DiscardChapters),
            options: IngestOptions::default(),
        }
    }

    pub fn with_chapter_sink(mut self, sink: Arc<dyn ChapterSink>) -> Self {
        self.chapters = sink;
        self
    }

    pub fn with_options(mut self, options: IngestOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn ingest_catalog(&self, entries: &[CatalogEntry]) -> Vec<EntryOutcome> {
        tracing::info!(entries = entries.len(), "processing catalog");

        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            outcomes.push(self.ingest_entry(entry).await);
        }

        let ingested = outcomes.iter().filter(|o| o.is_ingested()).count();
        let failed = outcomes.iter().filter(|o| o.is_failed()).count();
        tracing::info!(
            ingested,
            skipped = outcomes.len() - ingested - failed,
            failed,
            "catalog processed"
        );
        outcomes
    }

    pub async fn ingest_entry(&self, entry: &CatalogEntry) -> EntryOutcome {
        tracing::info!(entry = %entry.name, path = %entry.path, "ingesting");

        let mut identifier = None;
        let status = match self.try_ingest(entry, &mut identifier).await {
            Ok(ingested) => {
                tracing::info!(
                    entry = %entry.name,
                    chapters = ingested.chapters,
                    "book ingested"
                );
                EntryStatus::Ingested {
                    chapters: ingested.chapters,
                    cover_url: ingested.cover_url,
                    archive_url: ingested.archive_url,
                }
            }
            Err(err) => match err.stage() {
                None => {
                    tracing::info!(entry = %entry.name, reason = %err, "skipping entry");
                    EntryStatus::Skipped {
                        reason: err.to_string(),
                    }
                }
                Some(stage) => {
                    let err = anyhow::Error::new(err);
                    tracing::error!(entry = %entry.name, ?stage, "entry failed: {err:#}");
                    EntryStatus::Failed {
                        stage,
                        error: format!("{err:#}"),
                    }
                }
            },
        };

        EntryOutcome {
            name: entry.name.clone(),
            path: entry.path.clone(),
            identifier,
            status,
            finished_at: Utc::now(),
        }
    }

    async fn try_ingest(
        &self,
        entry: &CatalogEntry,
        identifier_out: &mut Option<String>,
    ) -> Result<Ingested, IngestError> {
        let bytes = self
            .archives
            .fetch(&entry.path)
            .await
            .map_err(|source| IngestError::Fetch {
                path: entry.path.clone(),
                source,
            })?;

        let publication = Publication::open(bytes)
            .await
            .map_err(|source| IngestError::ArchiveOpen {
                path: entry.path.clone(),
                source,
            })?;
        *identifier_out = publication.metadata().identifier.clone();

        let extended = scrape_extended_metadata(&publication).await;
        let publication = Arc::new(publication);
        let chapters = extract_chapters(Arc::clone(&publication)).await;
        tracing::debug!(
            entry = %entry.name,
            spine = publication.spine().len(),
            chapters = chapters.len(),
            "extracted chapters"
        );

        let identifier = identifier_out
            .clone()
            .ok_or(IngestError::MissingIdentifier)?;

        let cover = match publication.cover_image().await {
            Ok(Some(cover)) => cover,
            Ok(None) => return Err(IngestError::MissingCover),
            Err(err) => {
                tracing::warn!(entry = %entry.name, ?err, "cover image unreadable");
                return Err(IngestError::MissingCover);
            }
        };

        let cover_url = self
            .upload_or_reuse(
                IngestStage::UploadCover,
                &self.options.covers_bucket,
                &cover_key(&identifier),
                cover.bytes,
                &cover.media_type,
            )
            .await?;

        let archive_url = self
            .upload_or_reuse(
                IngestStage::UploadArchive,
                &self.options.files_bucket,
                &archive_key(&identifier),
                publication.bytes().to_vec(),
                EPUB_MEDIA_TYPE,
            )
            .await?;

        let record = BookRecord::compose(
            publication.metadata(),
            &extended,
            cover_url.clone(),
            archive_url.clone(),
        )
        .map_err(|_| IngestError::MissingIdentifier)?;

        // Uploaded assets stay in place when this fails.
        self.records
            .upsert(&record)
            .await
            .map_err(|source| IngestError::Persistence {
                identifier: identifier.clone(),
                source,
            })?;

        // Only books that made it into the metadata store get their chapters.
        if let Err(err) = self.chapters.store(&identifier, &chapters).await {
            tracing::warn!(entry = %entry.name, ?err, "chapter hand-off failed");
        }

        Ok(Ingested {
            chapters: chapters.len(),
            cover_url,
            archive_url,
        })
    }

    /// A key that already exists counts as uploaded; its public URL is reused.
    async fn upload_or_reuse(
        &self,
        stage: IngestStage,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, IngestError> {
        match self.objects.upload(bucket, key, bytes, content_type).await {
            Ok(stored) => Ok(stored.public_url),
            Err(UploadError::AlreadyExists { .. }) => {
                tracing::info!(bucket, key, "object already exists; using existing");
                Ok(self.objects.public_url(bucket, key))
            }
            Err(source) => Err(IngestError::Upload {
                stage,
                key: key.to_owned(),
                source,
            }),
        }
    }
}

pub async fn run(args: IngestArgs) -> anyhow::Result<()> {
    let entries = crate::catalog::read_catalog(Path::new(&args.catalog))?;

    let archives: Arc<dyn ArchiveSource> = match (&args.root, &args.base_url) {
        (Some(root), None) => Arc::new(LocalFsArchiveSource::new(root)),
        (None, Some(base_url)) => Arc::new(HttpArchiveSource::new(base_url)?),
        _ => anyhow::bail!("exactly one of --root or --base-url is required"),
    };

    let out_dir = PathBuf::from(&args.out);
    let backend = StoreBackend::from_env()?;
    tracing::info!(?backend, "store backend");
    let (objects, records): (Arc<dyn ObjectStore>, Arc<dyn MetadataStore>) = match backend {
        StoreBackend::Local => {
            let mut objects = LocalFsObjectStore::new(out_dir.join("objects"));
            if let Some(base_url) = &args.public_base_url {
                objects = objects.with_public_base_url(base_url);
            }
            let objects: Arc<dyn ObjectStore> = Arc::new(objects);
            let records: Arc<dyn MetadataStore> = Arc::new(LocalFsMetadataStore::new(
                out_dir.join(format!("{}.json", args.table)),
            ));
            (objects, records)
        }
        StoreBackend::Supabase => {
            let config = SupabaseConfig::from_env()?;
            let objects: Arc<dyn ObjectStore> = Arc::new(SupabaseObjectStore::new(&config)?);
            let records: Arc<dyn MetadataStore> =
                Arc::new(SupabaseMetadataStore::new(&config, &args.table)?);
            (objects, records)
        }
    };

    let mut ingestor = Ingestor::new(archives, objects, records).with_options(IngestOptions {
        covers_bucket: args.covers_bucket.clone(),
        files_bucket: args.files_bucket.clone(),
    });
    if let Some(dir) = &args.chapters_out {
        ingestor = ingestor.with_chapter_sink(Arc::new(LocalFsChapterSink::new(dir)));
    }

    let outcomes = ingestor.ingest_catalog(&entries).await;

    if let Some(report) = &args.report {
        let report_path = PathBuf::from(report);
        let data = serde_json::to_vec_pretty(&outcomes).context("serialize ingest report")?;
        tokio::fs::write(&report_path, data)
            .await
            .with_context(|| format!("write ingest report: {}", report_path.display()))?;
    }

    let failed = outcomes.iter().filter(|o| o.is_failed()).count();
    if args.fail_on_error && failed > 0 {
        anyhow::bail!("{failed} of {} catalog entries failed", outcomes.len());
    }
    Ok(())
}

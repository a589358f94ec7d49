//! Scrapes the extension properties and subjects that the container parser
//! does not surface, straight from the raw package document.

use std::io::Write as _;
use std::path::PathBuf;

use anyhow::Context as _;
use serde::Serialize;

use crate::cli::MetadataArgs;
use crate::container::Publication;
use crate::error::PackageDocumentError;
use crate::formats::{ExtendedMetadata, PackageMetadata};
use crate::xhtml;

#[derive(Debug, Serialize)]
struct MetadataReport<'a> {
    package_path: &'a str,
    package: &'a PackageMetadata,
    extended: ExtendedMetadata,
    spine: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cover: Option<&'a str>,
}

pub async fn run(args: MetadataArgs) -> anyhow::Result<()> {
    let epub_path = PathBuf::from(&args.epub);
    let bytes = tokio::fs::read(&epub_path)
        .await
        .with_context(|| format!("read epub: {}", epub_path.display()))?;
    let publication = Publication::open(bytes)
        .await
        .with_context(|| format!("open epub: {}", epub_path.display()))?;

    let report = MetadataReport {
        package_path: publication.package_path(),
        package: publication.metadata(),
        extended: scrape_extended_metadata(&publication).await,
        spine: publication
            .spine()
            .iter()
            .map(|item| item.href.as_str())
            .collect(),
        cover: publication.cover_item().map(|item| item.href.as_str()),
    };

    let json = serde_json::to_string_pretty(&report).context("serialize metadata")?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{json}").context("write metadata to stdout")?;
    Ok(())
}

/// Never fails: extended metadata is optional enrichment, so any problem is
/// logged and yields an empty result.
pub async fn scrape_extended_metadata(publication: &Publication) -> ExtendedMetadata {
    match try_scrape(publication).await {
        Ok(extended) => {
            tracing::debug!(
                extensions = extended.extensions.len(),
                subjects = extended.subjects.len(),
                "scraped extended metadata"
            );
            extended
        }
        Err(err) => {
            tracing::warn!(err = %err, "extended metadata unavailable; using empty metadata");
            ExtendedMetadata::default()
        }
    }
}

async fn try_scrape(publication: &Publication) -> Result<ExtendedMetadata, PackageDocumentError> {
    let path = publication.package_path();
    let raw = publication
        .read_entry_text(path)
        .await
        .map_err(|source| PackageDocumentError::Unreadable {
            path: path.to_owned(),
            source,
        })?;

    parse_package_document(&raw)
}

/// Pure function of the package document text.
pub fn parse_package_document(raw: &str) -> Result<ExtendedMetadata, PackageDocumentError> {
    let normalized = xhtml::normalize_entities(raw);
    let doc = xhtml::parse_document(&normalized)?;

    let mut extended = ExtendedMetadata::default();
    let Some(metadata) = xhtml::first_descendant(doc.root_element(), "metadata") else {
        return Ok(extended);
    };

    for node in metadata.descendants().filter(|n| n.is_element()) {
        match node.tag_name().name() {
            "meta" => {
                let Some(property) = node.attribute("property").map(str::trim) else {
                    continue;
                };
                let value = xhtml::text_content(node);
                let value = value.trim();
                if property.is_empty() || value.is_empty() {
                    continue;
                }
                extended
                    .extensions
                    .insert(property.to_owned(), value.to_owned());
            }
            "subject" => {
                extended
                    .subjects
                    .push(xhtml::text_content(node).trim().to_owned());
            }
            _ => {}
        }
    }

    Ok(extended)
}

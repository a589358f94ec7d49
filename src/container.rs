//! Opens an EPUB archive held in memory and exposes its spine, manifest,
//! package metadata and section loader.

use std::collections::HashMap;
use std::io::{Cursor, Read as _};
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use roxmltree::Node;

use crate::formats::PackageMetadata;
use crate::xhtml;

const CONTAINER_PATH: &str = "META-INF/container.xml";
const PACKAGE_MEDIA_TYPE: &str = "application/oebps-package+xml";

type Archive = zip::ZipArchive<Cursor<Arc<[u8]>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    pub idref: String,
    /// Relative to the package document's directory, as written in the manifest.
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub properties: Vec<String>,
}

/// What `META-INF/container.xml` says about the archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDescriptor {
    rootfile_path: Option<String>,
}

impl ContainerDescriptor {
    pub fn rootfile_path(&self) -> Option<&str> {
        self.rootfile_path.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct CoverImage {
    pub href: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

/// Anything with a spine whose sections can be loaded independently.
#[async_trait]
pub trait SectionSource: Send + Sync {
    fn spine_hrefs(&self) -> Vec<String>;
    async fn load_section(&self, href: &str) -> anyhow::Result<String>;
}

/// An opened EPUB. Cloning is cheap; the archive bytes are shared.
#[derive(Debug, Clone)]
pub struct Publication {
    bytes: Arc<[u8]>,
    archive: Archive,
    container: ContainerDescriptor,
    package_path: String,
    package_dir: String,
    metadata: PackageMetadata,
    manifest: Vec<ManifestItem>,
    spine: Vec<SpineItem>,
    cover_id: Option<String>,
}

impl Publication {
    pub async fn open(bytes: Vec<u8>) -> anyhow::Result<Self> {
        tokio::task::spawn_blocking(move || Self::open_blocking(bytes))
            .await
            .context("join open task")?
    }

    pub fn open_blocking(bytes: Vec<u8>) -> anyhow::Result<Self> {
        let bytes: Arc<[u8]> = Arc::from(bytes);
        let mut archive =
            zip::ZipArchive::new(Cursor::new(Arc::clone(&bytes))).context("read zip archive")?;

        let container_xml =
            read_entry_text(&mut archive, CONTAINER_PATH).context("read container.xml")?;
        let container = parse_container(&container_xml).context("parse container.xml")?;
        let package_path = match container.rootfile_path() {
            Some(path) => path.to_owned(),
            None => {
                let found = find_package_entry(&archive).ok_or_else(|| {
                    anyhow::anyhow!("container.xml names no package document")
                })?;
                tracing::debug!(
                    path = %found,
                    "container.xml names no rootfile; using archive scan"
                );
                found
            }
        };

        let package_xml = read_entry_text(&mut archive, &package_path)
            .with_context(|| format!("read package document: {package_path}"))?;
        let package = parse_package(&package_xml)
            .with_context(|| format!("parse package document: {package_path}"))?;
        if package.spine.is_empty() {
            anyhow::bail!("package document has an empty spine: {package_path}");
        }

        let package_dir = match package_path.rfind('/') {
            Some(idx) => package_path[..idx].to_owned(),
            None => String::new(),
        };

        Ok(Self {
            bytes,
            archive,
            container,
            package_path,
            package_dir,
            metadata: package.metadata,
            manifest: package.manifest,
            spine: package.spine,
            cover_id: package.cover_id,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn metadata(&self) -> &PackageMetadata {
        &self.metadata
    }

    pub fn spine(&self) -> &[SpineItem] {
        &self.spine
    }

    pub fn manifest(&self) -> &[ManifestItem] {
        &self.manifest
    }

    pub fn container(&self) -> &ContainerDescriptor {
        &self.container
    }

    /// Archive path the package document was parsed from. Usually the
    /// container's rootfile; an archive scan when the container names none.
    pub fn package_path(&self) -> &str {
        &self.package_path
    }

    /// Read any archive entry by its full path inside the zip.
    pub async fn read_entry(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        let mut archive = self.archive.clone();
        let path = path.to_owned();
        tokio::task::spawn_blocking(move || read_entry_bytes(&mut archive, &path))
            .await
            .context("join read task")?
    }

    pub async fn read_entry_text(&self, path: &str) -> anyhow::Result<String> {
        let bytes = self.read_entry(path).await?;
        decode_entry_text(bytes).with_context(|| format!("entry is not utf-8 or utf-16: {path}"))
    }

    /// Full archive path of a manifest-relative href.
    pub fn resolve_href(&self, href: &str) -> anyhow::Result<String> {
        resolve_href(&self.package_dir, href)
    }

    /// The manifest item declared as cover image, EPUB 3 `cover-image`
    /// property first, then the EPUB 2 `<meta name="cover">` reference.
    pub fn cover_item(&self) -> Option<&ManifestItem> {
        self.manifest
            .iter()
            .find(|item| item.properties.iter().any(|p| p == "cover-image"))
            .or_else(|| {
                let cover_id = self.cover_id.as_deref()?;
                self.manifest.iter().find(|item| item.id == cover_id)
            })
            .filter(|item| item.media_type.starts_with("image/"))
    }

    pub async fn cover_image(&self) -> anyhow::Result<Option<CoverImage>> {
        let Some(item) = self.cover_item() else {
            return Ok(None);
        };
        let path = self.resolve_href(&item.href)?;
        let bytes = self
            .read_entry(&path)
            .await
            .with_context(|| format!("read cover image: {path}"))?;
        Ok(Some(CoverImage {
            href: item.href.clone(),
            media_type: item.media_type.clone(),
            bytes,
        }))
    }
}

#[async_trait]
impl SectionSource for Publication {
    fn spine_hrefs(&self) -> Vec<String> {
        self.spine.iter().map(|item| item.href.clone()).collect()
    }

    async fn load_section(&self, href: &str) -> anyhow::Result<String> {
        let path = self.resolve_href(href)?;
        self.read_entry_text(&path).await
    }
}

fn read_entry_bytes(archive: &mut Archive, path: &str) -> anyhow::Result<Vec<u8>> {
    let mut file = archive
        .by_name(path)
        .with_context(|| format!("archive entry not found: {path}"))?;
    let mut buf = Vec::with_capacity(file.size().min(64 * 1024 * 1024) as usize);
    file.read_to_end(&mut buf)
        .with_context(|| format!("decompress archive entry: {path}"))?;
    Ok(buf)
}

/// Lexicographically first `.opf` entry.
fn find_package_entry(archive: &Archive) -> Option<String> {
    archive
        .file_names()
        .filter(|name| name.to_ascii_lowercase().ends_with(".opf"))
        .min()
        .map(str::to_owned)
}

fn read_entry_text(archive: &mut Archive, path: &str) -> anyhow::Result<String> {
    let bytes = read_entry_bytes(archive, path)?;
    decode_entry_text(bytes).with_context(|| format!("entry is not utf-8 or utf-16: {path}"))
}

/// UTF-8 unless a byte order mark says UTF-16. The mark is dropped.
fn decode_entry_text(bytes: Vec<u8>) -> Option<String> {
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return std::str::from_utf8(rest).ok().map(str::to_owned);
    }
    String::from_utf8(bytes).ok()
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    char::decode_utf16(bytes.chunks_exact(2).map(|pair| unit([pair[0], pair[1]])))
        .collect::<Result<String, _>>()
        .ok()
}

fn parse_container(xml: &str) -> anyhow::Result<ContainerDescriptor> {
    let doc = xhtml::parse_document(xml)?;
    let rootfiles = doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "rootfile")
        .collect::<Vec<_>>();

    let rootfile = rootfiles
        .iter()
        .find(|n| n.attribute("media-type") == Some(PACKAGE_MEDIA_TYPE))
        .or_else(|| rootfiles.first());

    Ok(ContainerDescriptor {
        rootfile_path: rootfile
            .and_then(|n| n.attribute("full-path"))
            .map(str::to_owned),
    })
}

#[derive(Debug, Default)]
struct Package {
    metadata: PackageMetadata,
    manifest: Vec<ManifestItem>,
    spine: Vec<SpineItem>,
    cover_id: Option<String>,
}

fn parse_package(xml: &str) -> anyhow::Result<Package> {
    let normalized = xhtml::normalize_entities(xml);
    let doc = xhtml::parse_document(&normalized)?;
    let root = doc.root_element();
    if root.tag_name().name() != "package" {
        anyhow::bail!("root element is <{}>, not <package>", root.tag_name().name());
    }

    let mut package = Package::default();

    if let Some(metadata) = xhtml::child_elements(root, "metadata").next() {
        let unique_id = root.attribute("unique-identifier");
        package.metadata = parse_package_metadata(metadata, unique_id);
        package.cover_id = metadata
            .descendants()
            .find(|n| {
                n.is_element() && n.tag_name().name() == "meta" && n.attribute("name") == Some("cover")
            })
            .and_then(|n| n.attribute("content"))
            .map(str::to_owned);
    }

    if let Some(manifest) = xhtml::child_elements(root, "manifest").next() {
        package.manifest = xhtml::child_elements(manifest, "item")
            .filter_map(|item| {
                Some(ManifestItem {
                    id: item.attribute("id")?.to_owned(),
                    href: item.attribute("href")?.to_owned(),
                    media_type: item.attribute("media-type").unwrap_or_default().to_owned(),
                    properties: item
                        .attribute("properties")
                        .unwrap_or_default()
                        .split_whitespace()
                        .map(str::to_owned)
                        .collect(),
                })
            })
            .collect();
    }

    let href_by_id = package
        .manifest
        .iter()
        .map(|item| (item.id.as_str(), item.href.as_str()))
        .collect::<HashMap<_, _>>();

    if let Some(spine) = xhtml::child_elements(root, "spine").next() {
        for itemref in xhtml::child_elements(spine, "itemref") {
            let Some(idref) = itemref.attribute("idref") else {
                continue;
            };
            let Some(href) = href_by_id.get(idref) else {
                tracing::debug!(idref, "spine itemref has no manifest item; skipping");
                continue;
            };
            package.spine.push(SpineItem {
                idref: idref.to_owned(),
                href: (*href).to_owned(),
            });
        }
    }

    Ok(package)
}

fn parse_package_metadata(metadata: Node<'_, '_>, unique_id: Option<&str>) -> PackageMetadata {
    let first_text = |local: &str| {
        metadata
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == local)
            .map(|n| xhtml::collapse_whitespace(&xhtml::text_content(n)))
            .find(|text| !text.is_empty())
    };

    let identifiers = metadata
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "identifier")
        .collect::<Vec<_>>();
    let identifier = unique_id
        .and_then(|id| identifiers.iter().find(|n| n.attribute("id") == Some(id)))
        .or_else(|| identifiers.first())
        .map(|n| xhtml::text_content(*n).trim().to_owned())
        .filter(|id| !id.is_empty());

    PackageMetadata {
        identifier,
        title: first_text("title"),
        creator: first_text("creator"),
        description: first_text("description"),
        publisher: first_text("publisher"),
        language: first_text("language"),
    }
}

/// Join `href` onto `base_dir`, dropping any fragment and resolving `.`/`..`.
pub fn resolve_href(base_dir: &str, href: &str) -> anyhow::Result<String> {
    let href = href.split('#').next().unwrap_or_default();
    if href.is_empty() {
        anyhow::bail!("empty href");
    }

    let mut segments: Vec<&str> = if href.starts_with('/') {
        Vec::new()
    } else {
        base_dir.split('/').filter(|s| !s.is_empty()).collect()
    };
    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    anyhow::bail!("href escapes the archive root: {href}");
                }
            }
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write as _;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use epub_ingest::error::UploadError;
use epub_ingest::formats::{BookRecord, Chapter};
use epub_ingest::store::{ArchiveSource, ChapterSink, MetadataStore, ObjectStore, StoredObject};
use zip::write::SimpleFileOptions;

pub static COVER_JPG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0xFF, 0xD9];

/// Builds a small EPUB 3 archive in memory.
#[derive(Debug, Clone)]
pub struct EpubFixture {
    identifier: Option<String>,
    title: String,
    creator: String,
    metadata_xml: Vec<String>,
    sections: Vec<(String, Vec<u8>)>,
    cover: Option<Vec<u8>>,
    rootfile: bool,
}

impl EpubFixture {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: Some(identifier.to_owned()),
            title: "The Raven".to_owned(),
            creator: "Edgar Allan Poe".to_owned(),
            metadata_xml: Vec::new(),
            sections: Vec::new(),
            cover: Some(COVER_JPG.to_vec()),
            rootfile: true,
        }
    }

    pub fn without_identifier(mut self) -> Self {
        self.identifier = None;
        self
    }

    pub fn without_cover(mut self) -> Self {
        self.cover = None;
        self
    }

    /// `container.xml` lists no rootfile.
    pub fn without_rootfile(mut self) -> Self {
        self.rootfile = false;
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_owned();
        self
    }

    pub fn meta(mut self, property: &str, value: &str) -> Self {
        self.metadata_xml.push(format!(
            "<meta property=\"{}\">{}</meta>",
            xml_escape(property),
            xml_escape(value)
        ));
        self
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.metadata_xml
            .push(format!("<dc:subject>{}</dc:subject>", xml_escape(subject)));
        self
    }

    /// `href` is relative to the package document directory.
    pub fn section(mut self, href: &str, body_html: &str) -> Self {
        let doc = wrap_xhtml_document(href, body_html);
        self.sections.push((href.to_owned(), doc.into_bytes()));
        self
    }

    pub fn raw_section(mut self, href: &str, raw: &str) -> Self {
        self.sections.push((href.to_owned(), raw.as_bytes().to_vec()));
        self
    }

    pub fn section_bytes(mut self, href: &str, bytes: Vec<u8>) -> Self {
        self.sections.push((href.to_owned(), bytes));
        self
    }

    /// Section stored as UTF-16 little endian with a byte order mark.
    pub fn utf16_section(mut self, href: &str, body_html: &str) -> Self {
        let doc = wrap_xhtml_document(href, body_html);
        let bytes = [0xFF, 0xFE]
            .into_iter()
            .chain(doc.encode_utf16().flat_map(u16::to_le_bytes))
            .collect();
        self.sections.push((href.to_owned(), bytes));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));

        let stored = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o644);
        let deflated = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);

        zip.start_file("mimetype", stored).expect("start mimetype");
        zip.write_all(b"application/epub+zip").expect("write mimetype");

        zip.start_file("META-INF/container.xml", deflated)
            .expect("start container.xml");
        let container_xml = if self.rootfile {
            CONTAINER_XML
        } else {
            CONTAINER_XML_WITHOUT_ROOTFILE
        };
        zip.write_all(container_xml.as_bytes())
            .expect("write container.xml");

        zip.start_file("epub/content.opf", deflated)
            .expect("start content.opf");
        zip.write_all(self.render_content_opf().as_bytes())
            .expect("write content.opf");

        for (href, doc) in &self.sections {
            zip.start_file(format!("epub/{href}"), deflated)
                .expect("start section");
            zip.write_all(doc).expect("write section");
        }

        if let Some(cover) = &self.cover {
            zip.start_file("epub/images/cover.jpg", stored)
                .expect("start cover");
            zip.write_all(cover).expect("write cover");
        }

        zip.finish().expect("finish zip").into_inner()
    }

    pub fn write_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create fixture dir");
        }
        std::fs::write(path, self.build()).expect("write fixture epub");
    }

    fn render_content_opf(&self) -> String {
        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        out.push_str(
            "<package xmlns=\"http://www.idpf.org/2007/opf\" prefix=\"se: https://standardebooks.org/vocab/1.0\" unique-identifier=\"uid\" version=\"3.0\" xml:lang=\"en-US\">\n",
        );
        out.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n");
        if let Some(identifier) = &self.identifier {
            out.push_str(&format!(
                "    <dc:identifier id=\"uid\">{}</dc:identifier>\n",
                xml_escape(identifier)
            ));
        }
        out.push_str(&format!("    <dc:title>{}</dc:title>\n", xml_escape(&self.title)));
        out.push_str(&format!(
            "    <dc:creator>{}</dc:creator>\n",
            xml_escape(&self.creator)
        ));
        out.push_str("    <dc:language>en-US</dc:language>\n");
        out.push_str("    <dc:publisher>Standard Ebooks</dc:publisher>\n");
        for line in &self.metadata_xml {
            out.push_str(&format!("    {line}\n"));
        }
        out.push_str("  </metadata>\n");

        out.push_str("  <manifest>\n");
        if self.cover.is_some() {
            out.push_str(
                "    <item id=\"cover.jpg\" href=\"images/cover.jpg\" media-type=\"image/jpeg\" properties=\"cover-image\"/>\n",
            );
        }
        for (idx, (href, _)) in self.sections.iter().enumerate() {
            out.push_str(&format!(
                "    <item id=\"s{idx}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
                xml_escape(href)
            ));
        }
        out.push_str("  </manifest>\n");

        out.push_str("  <spine>\n");
        for idx in 0..self.sections.len() {
            out.push_str(&format!("    <itemref idref=\"s{idx}\"/>\n"));
        }
        out.push_str("  </spine>\n");
        out.push_str("</package>\n");
        out
    }
}

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="epub/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

const CONTAINER_XML_WITHOUT_ROOTFILE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles/>
</container>
"#;

fn wrap_xhtml_document(title: &str, body_html: &str) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"en-US\">\n",
    );
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(title)));
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(body_html);
    out.push_str("\n</body>\n");
    out.push_str("</html>\n");
    out
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[derive(Debug, Default)]
pub struct MemoryArchiveSource {
    archives: HashMap<String, Vec<u8>>,
    pub fetched: Mutex<Vec<String>>,
}

impl MemoryArchiveSource {
    pub fn with(mut self, path: &str, bytes: Vec<u8>) -> Self {
        self.archives.insert(path.to_owned(), bytes);
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArchiveSource for MemoryArchiveSource {
    async fn fetch(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        self.fetched.lock().unwrap().push(path.to_owned());
        self.archives
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such archive: {path}"))
    }
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    attempts: Mutex<Vec<String>>,
    failing_keys: HashSet<String>,
}

impl MemoryObjectStore {
    pub fn failing_on(mut self, key: &str) -> Self {
        self.failing_keys.insert(key.to_owned());
        self
    }

    pub fn seed(&self, bucket: &str, key: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_owned(), key.to_owned()), bytes.to_vec());
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_owned(), key.to_owned()))
            .cloned()
    }

    /// Every key an upload was attempted for, in call order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<StoredObject, UploadError> {
        self.attempts.lock().unwrap().push(key.to_owned());
        if self.failing_keys.contains(key) {
            return Err(anyhow::anyhow!("storage unavailable").into());
        }

        let mut objects = self.objects.lock().unwrap();
        let id = (bucket.to_owned(), key.to_owned());
        if objects.contains_key(&id) {
            return Err(UploadError::AlreadyExists {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            });
        }
        objects.insert(id, bytes);
        Ok(StoredObject {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            public_url: self.public_url(bucket, key),
        })
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("mem://{bucket}/{key}")
    }
}

#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    records: Mutex<Vec<BookRecord>>,
    failing_identifiers: HashSet<String>,
}

impl MemoryMetadataStore {
    pub fn failing_on(mut self, identifier: &str) -> Self {
        self.failing_identifiers.insert(identifier.to_owned());
        self
    }

    pub fn records(&self) -> Vec<BookRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn upsert(&self, record: &BookRecord) -> anyhow::Result<()> {
        if self.failing_identifiers.contains(&record.identifier) {
            anyhow::bail!("database unavailable");
        }
        let mut records = self.records.lock().unwrap();
        records.retain(|r| r.identifier != record.identifier);
        records.push(record.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryChapterSink {
    stored: Mutex<Vec<(String, Vec<Chapter>)>>,
}

impl MemoryChapterSink {
    pub fn stored(&self) -> Vec<(String, Vec<Chapter>)> {
        self.stored.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChapterSink for MemoryChapterSink {
    async fn store(&self, identifier: &str, chapters: &[Chapter]) -> anyhow::Result<()> {
        self.stored
            .lock()
            .unwrap()
            .push((identifier.to_owned(), chapters.to_vec()));
        Ok(())
    }
}

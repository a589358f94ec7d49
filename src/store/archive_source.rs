use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use url::Url;

/// Produces the raw bytes of the archive a catalog entry points at.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    async fn fetch(&self, path: &str) -> anyhow::Result<Vec<u8>>;
}

/// Catalog paths such as `/books/poe.epub` resolved under a local root.
#[derive(Debug, Clone)]
pub struct LocalFsArchiveSource {
    root: PathBuf,
}

impl LocalFsArchiveSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArchiveSource for LocalFsArchiveSource {
    async fn fetch(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        let file_path = super::safe_join(&self.root, path)?;
        tokio::fs::read(&file_path)
            .await
            .with_context(|| format!("read archive: {}", file_path.display()))
    }
}

/// Catalog paths fetched relative to a base URL.
#[derive(Debug, Clone)]
pub struct HttpArchiveSource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpArchiveSource {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let mut base_url = Url::parse(base_url).context("parse archive base url")?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            anyhow::bail!("archive base url must be http/https: {base_url}");
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("build archive http client")?;
        Ok(Self { client, base_url })
    }

    pub fn url_for(&self, path: &str) -> anyhow::Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("join archive path: {path}"))
    }
}

#[async_trait]
impl ArchiveSource for HttpArchiveSource {
    async fn fetch(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        let url = self.url_for(path)?;
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        if !resp.status().is_success() {
            anyhow::bail!("archive request failed ({}): {url}", resp.status());
        }
        let bytes = resp
            .bytes()
            .await
            .with_context(|| format!("read archive body: {url}"))?;
        Ok(bytes.to_vec())
    }
}

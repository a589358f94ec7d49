use std::io::Write as _;
use std::path::PathBuf;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

use crate::config::SupabaseConfig;
use crate::error::UploadError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub public_url: String,
}

/// Binary object storage keyed by bucket and filename.
///
/// Uploads never overwrite: an existing key is reported as
/// [`UploadError::AlreadyExists`] so callers can decide to reuse it.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, UploadError>;

    fn public_url(&self, bucket: &str, key: &str) -> String;
}

#[derive(Debug, Clone)]
pub struct LocalFsObjectStore {
    base_dir: PathBuf,
    public_base_url: Option<String>,
}

impl LocalFsObjectStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            public_base_url: None,
        }
    }

    /// Serve public URLs from `base_url` instead of `file://` paths.
    pub fn with_public_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.public_base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn object_path(&self, bucket: &str, key: &str) -> anyhow::Result<PathBuf> {
        super::safe_join(&self.base_dir.join(bucket), key)
    }
}

#[async_trait]
impl ObjectStore for LocalFsObjectStore {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<StoredObject, UploadError> {
        let path = self.object_path(bucket, key)?;
        let path_for_blocking = path.clone();

        let created = tokio::task::spawn_blocking(move || {
            write_new_file_blocking(&path_for_blocking, &bytes)
        })
        .await
        .context("join upload task")??;

        if !created {
            return Err(UploadError::AlreadyExists {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            });
        }

        tracing::debug!(bucket, key, path = %path.display(), "stored object");
        Ok(StoredObject {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            public_url: self.public_url(bucket, key),
        })
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{base}/{bucket}/{}", key.trim_start_matches('/')),
            None => {
                let path = self
                    .object_path(bucket, key)
                    .unwrap_or_else(|_| self.base_dir.join(bucket).join(key));
                format!("file://{}", path.display())
            }
        }
    }
}

/// `Ok(false)` when the file already exists.
fn write_new_file_blocking(path: &std::path::Path, bytes: &[u8]) -> anyhow::Result<bool> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("object path must have parent: {}", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("create object dir: {}", parent.display()))?;

    let mut file = match std::fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => {
            return Err(err).with_context(|| format!("create object: {}", path.display()));
        }
    };
    file.write_all(bytes)
        .with_context(|| format!("write object: {}", path.display()))?;
    file.flush()
        .with_context(|| format!("flush object: {}", path.display()))?;
    Ok(true)
}

/// Supabase Storage over its REST API.
#[derive(Debug, Clone)]
pub struct SupabaseObjectStore {
    client: reqwest::Client,
    base_url: Url,
    key: String,
}

impl SupabaseObjectStore {
    pub fn new(config: &SupabaseConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.url).context("parse supabase url")?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("supabase url cannot be a base: {base_url}");
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            key: config.key.clone(),
        })
    }

    fn endpoint(&self, prefix: &[&str], bucket: &str, key: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(prefix)
                .push(bucket)
                .extend(key.split('/').filter(|s| !s.is_empty()));
        }
        url
    }
}

#[async_trait]
impl ObjectStore for SupabaseObjectStore {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, UploadError> {
        let url = self.endpoint(&["storage", "v1", "object"], bucket, key);
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.key)
            .header("apikey", &self.key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("upload {bucket}/{key}"))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(StoredObject {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                public_url: self.public_url(bucket, key),
            });
        }

        let body = resp.text().await.unwrap_or_default();
        if is_duplicate_response(status, &body) {
            return Err(UploadError::AlreadyExists {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            });
        }
        Err(anyhow::anyhow!("storage upload failed ({status}): {body}").into())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        self.endpoint(&["storage", "v1", "object", "public"], bucket, key)
            .to_string()
    }
}

/// Storage answers duplicates with 409, or 400 carrying a 409 payload.
fn is_duplicate_response(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::CONFLICT {
        return true;
    }
    let lower = body.to_ascii_lowercase();
    lower.contains("already exists") || lower.contains("duplicate")
}

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::sync::Mutex;
use url::Url;

use crate::config::SupabaseConfig;
use crate::formats::BookRecord;

/// Structured record storage with upsert semantics on `identifier`.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn upsert(&self, record: &BookRecord) -> anyhow::Result<()>;
}

/// All records in one JSON object keyed by identifier.
#[derive(Debug)]
pub struct LocalFsMetadataStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LocalFsMetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub async fn load(&self) -> anyhow::Result<BTreeMap<String, BookRecord>> {
        let records = super::read_json(&self.path)
            .await
            .with_context(|| format!("read: {}", self.path.display()))?;
        Ok(records.unwrap_or_default())
    }
}

#[async_trait]
impl MetadataStore for LocalFsMetadataStore {
    async fn upsert(&self, record: &BookRecord) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        records.insert(record.identifier.clone(), record.clone());
        super::write_json_atomic(&self.path, &records)
            .await
            .with_context(|| format!("write: {}", self.path.display()))?;
        Ok(())
    }
}

/// Supabase (PostgREST) table upsert.
#[derive(Debug, Clone)]
pub struct SupabaseMetadataStore {
    client: reqwest::Client,
    endpoint: Url,
    key: String,
}

impl SupabaseMetadataStore {
    pub fn new(config: &SupabaseConfig, table: &str) -> anyhow::Result<Self> {
        let mut endpoint = Url::parse(&config.url).context("parse supabase url")?;
        endpoint
            .path_segments_mut()
            .map_err(|_| anyhow::anyhow!("supabase url cannot be a base: {}", config.url))?
            .pop_if_empty()
            .extend(["rest", "v1", table]);
        endpoint
            .query_pairs_mut()
            .append_pair("on_conflict", "identifier");
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            key: config.key.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl MetadataStore for SupabaseMetadataStore {
    async fn upsert(&self, record: &BookRecord) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.key)
            .header("apikey", &self.key)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[record])
            .send()
            .await
            .context("send upsert request")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("metadata upsert failed ({status}): {body}");
        }
        Ok(())
    }
}

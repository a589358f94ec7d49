use anyhow::Context as _;

pub const BACKEND_ENV: &str = "EPUB_INGEST_BACKEND";
pub const SUPABASE_URL_ENV: &str = "EPUB_INGEST_SUPABASE_URL";
pub const SUPABASE_KEY_ENV: &str = "EPUB_INGEST_SUPABASE_KEY";

/// Where uploads and book records go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Local,
    Supabase,
}

impl StoreBackend {
    pub fn from_env() -> anyhow::Result<Self> {
        let raw = std::env::var(BACKEND_ENV).unwrap_or_else(|_| "local".to_string());
        Self::parse(&raw).with_context(|| {
            format!("invalid {BACKEND_ENV}={raw:?}. expected one of: local, supabase")
        })
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "local" => Ok(Self::Local),
            "supabase" => Ok(Self::Supabase),
            other => anyhow::bail!("unsupported store backend: {other}"),
        }
    }
}

#[derive(Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub key: String,
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl SupabaseConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let url = std::env::var(SUPABASE_URL_ENV)
            .with_context(|| format!("{SUPABASE_URL_ENV} is required for the supabase backend"))?;
        let key = std::env::var(SUPABASE_KEY_ENV)
            .with_context(|| format!("{SUPABASE_KEY_ENV} is required for the supabase backend"))?;
        Self::new(url, key)
    }

    pub fn new(url: impl Into<String>, key: impl Into<String>) -> anyhow::Result<Self> {
        let url = url.into().trim().trim_end_matches('/').to_string();
        if url.is_empty() {
            anyhow::bail!("{SUPABASE_URL_ENV} is empty");
        }
        let key = key.into().trim().to_string();
        if key.is_empty() {
            anyhow::bail!("{SUPABASE_KEY_ENV} is empty");
        }
        Ok(Self { url, key })
    }
}

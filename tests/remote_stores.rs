use std::collections::HashSet;
use std::io::Read as _;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use epub_ingest::config::SupabaseConfig;
use epub_ingest::error::UploadError;
use epub_ingest::formats::BookRecord;
use epub_ingest::store::{
    ArchiveSource, HttpArchiveSource, MetadataStore, ObjectStore, SupabaseMetadataStore,
    SupabaseObjectStore,
};

const SERVICE_KEY: &str = "service-role-key";

#[derive(Debug, Clone)]
struct RecordedRequest {
    method: String,
    url: String,
    authorization: Option<String>,
    apikey: Option<String>,
    prefer: Option<String>,
    content_type: Option<String>,
    body: Vec<u8>,
}

/// Speaks just enough of the Supabase Storage and PostgREST APIs, plus a
/// static file route for archive downloads.
struct SupabaseStub {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SupabaseStub {
    fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start supabase stub server");
        let base_url = format!("http://{}", server.server_addr());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let recorded = Arc::clone(&requests);
        let handle = thread::spawn(move || {
            let mut stored_objects = HashSet::new();
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let header = |name: &'static str| {
                    request
                        .headers()
                        .iter()
                        .find(|h| h.field.equiv(name))
                        .map(|h| h.value.as_str().to_owned())
                };
                let mut entry = RecordedRequest {
                    method: request.method().to_string(),
                    url: request.url().to_string(),
                    authorization: header("Authorization"),
                    apikey: header("apikey"),
                    prefer: header("Prefer"),
                    content_type: header("Content-Type"),
                    body: Vec::new(),
                };
                if request.as_reader().read_to_end(&mut entry.body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }

                let path = entry.url.split('?').next().unwrap_or_default().to_owned();
                let response = if let Some(object) = path.strip_prefix("/storage/v1/object/") {
                    if object.starts_with("failing/") {
                        tiny_http::Response::from_string(r#"{"error":"internal"}"#)
                            .with_status_code(500)
                    } else if stored_objects.insert(object.to_owned()) {
                        tiny_http::Response::from_string(format!(r#"{{"Key":"{object}"}}"#))
                            .with_status_code(200)
                    } else {
                        tiny_http::Response::from_string(
                            r#"{"statusCode":"409","error":"Duplicate","message":"The resource already exists"}"#,
                        )
                        .with_status_code(400)
                    }
                } else if path == "/rest/v1/books" {
                    tiny_http::Response::from_string("").with_status_code(201)
                } else if path.starts_with("/rest/v1/") {
                    tiny_http::Response::from_string(
                        r#"{"code":"42P01","message":"relation does not exist"}"#,
                    )
                    .with_status_code(404)
                } else if path == "/public/books/raven.epub" {
                    tiny_http::Response::from_string("epub bytes").with_status_code(200)
                } else {
                    tiny_http::Response::from_string("not found").with_status_code(404)
                };

                recorded.lock().unwrap().push(entry);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    fn config(&self) -> SupabaseConfig {
        SupabaseConfig::new(format!("{}/", self.base_url), SERVICE_KEY).expect("supabase config")
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for SupabaseStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn record() -> BookRecord {
    BookRecord {
        identifier: "url:https://standardebooks.org/ebooks/edgar-allan-poe/the-raven".into(),
        title: Some("The Raven".into()),
        creator: Some("Edgar Allan Poe".into()),
        description: None,
        publisher: Some("Standard Ebooks".into()),
        language: Some("en-US".into()),
        cover_url: "https://cdn/raven_cover.jpg".into(),
        archive_url: "https://cdn/raven.epub".into(),
        word_count: Some("1100".into()),
        reading_ease: None,
        subjects: Some(vec!["Poetry".into()]),
        subject: Some("Poetry".into()),
    }
}

#[tokio::test]
async fn storage_upload_sends_credentials_and_returns_public_url() -> anyhow::Result<()> {
    let stub = SupabaseStub::spawn();
    let store = SupabaseObjectStore::new(&stub.config())?;

    let stored = store
        .upload("epub-covers", "raven_cover.jpg", b"jpeg".to_vec(), "image/jpeg")
        .await?;

    assert_eq!(
        stored.public_url,
        format!(
            "{}/storage/v1/object/public/epub-covers/raven_cover.jpg",
            stub.base_url
        )
    );
    assert_eq!(stored.public_url, store.public_url("epub-covers", "raven_cover.jpg"));

    let requests = stub.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.url, "/storage/v1/object/epub-covers/raven_cover.jpg");
    assert_eq!(
        request.authorization.as_deref(),
        Some(format!("Bearer {SERVICE_KEY}").as_str())
    );
    assert_eq!(request.apikey.as_deref(), Some(SERVICE_KEY));
    assert_eq!(request.content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(request.body, b"jpeg");
    Ok(())
}

#[tokio::test]
async fn storage_duplicate_is_reported_as_already_exists() -> anyhow::Result<()> {
    let stub = SupabaseStub::spawn();
    let store = SupabaseObjectStore::new(&stub.config())?;

    store
        .upload("epub-files", "raven.epub", b"v1".to_vec(), "application/epub+zip")
        .await?;
    let err = store
        .upload("epub-files", "raven.epub", b"v2".to_vec(), "application/epub+zip")
        .await
        .unwrap_err();

    assert!(
        matches!(&err, UploadError::AlreadyExists { bucket, key } if bucket == "epub-files" && key == "raven.epub"),
        "{err:?}"
    );
    Ok(())
}

#[tokio::test]
async fn storage_server_error_is_not_a_duplicate() -> anyhow::Result<()> {
    let stub = SupabaseStub::spawn();
    let store = SupabaseObjectStore::new(&stub.config())?;

    let err = store
        .upload("failing", "raven.epub", b"v1".to_vec(), "application/epub+zip")
        .await
        .unwrap_err();

    match err {
        UploadError::Other(err) => assert!(err.to_string().contains("500"), "{err:#}"),
        other => panic!("expected a plain upload failure, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn metadata_upsert_merges_on_identifier() -> anyhow::Result<()> {
    let stub = SupabaseStub::spawn();
    let store = SupabaseMetadataStore::new(&stub.config(), "books")?;

    store.upsert(&record()).await?;

    let requests = stub.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.url, "/rest/v1/books?on_conflict=identifier");
    assert_eq!(request.apikey.as_deref(), Some(SERVICE_KEY));
    assert_eq!(
        request.prefer.as_deref(),
        Some("resolution=merge-duplicates,return=minimal")
    );

    let body: serde_json::Value = serde_json::from_slice(&request.body)?;
    let rows = body.as_array().expect("upsert body is an array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["identifier"], record().identifier);
    assert_eq!(rows[0]["path"], "https://cdn/raven.epub");
    assert_eq!(rows[0]["word_count"], "1100");
    Ok(())
}

#[tokio::test]
async fn metadata_upsert_surfaces_rejections() -> anyhow::Result<()> {
    let stub = SupabaseStub::spawn();
    let store = SupabaseMetadataStore::new(&stub.config(), "missing_table")?;

    let err = store.upsert(&record()).await.unwrap_err();
    assert!(err.to_string().contains("404"), "{err:#}");
    assert!(err.to_string().contains("relation does not exist"), "{err:#}");
    Ok(())
}

#[tokio::test]
async fn http_archive_source_fetches_relative_to_base() -> anyhow::Result<()> {
    let stub = SupabaseStub::spawn();
    let source = HttpArchiveSource::new(&format!("{}/public", stub.base_url))?;

    let bytes = source.fetch("/books/raven.epub").await?;
    assert_eq!(bytes, b"epub bytes");

    let err = source.fetch("/books/missing.epub").await.unwrap_err();
    assert!(err.to_string().contains("404"), "{err:#}");
    Ok(())
}

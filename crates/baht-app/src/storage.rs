// Receipt file storage: a local directory or a Supabase Storage bucket.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use baht_core::config::{Config, StorageBackend};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage is not configured: {0}")]
    NotConfigured(String),

    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload rejected ({status}): {message}")]
    Upload { status: u16, message: String },

    #[error("upload failed: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Transport(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredFile {
    pub key: String,
    pub url: String,
    pub size: usize,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store `data` under `key`, returning where it can be fetched from.
    async fn put(&self, key: &str, content_type: &str, data: &[u8]) -> Result<StoredFile, StorageError>;

    /// Delete the object at `key`. Deleting a missing object is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// File extension for an accepted upload type.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        "application/pdf" => Some("pdf"),
        _ => None,
    }
}

/// `{company}/{yyyy}/{mm}/{uuid}.{ext}`
pub fn object_key(company_id: &str, date: NaiveDate, content_type: &str) -> Result<String, StorageError> {
    let ext = extension_for(content_type)
        .ok_or_else(|| StorageError::UnsupportedType(content_type.to_string()))?;
    Ok(format!(
        "{company_id}/{:04}/{:02}/{}.{ext}",
        date.year(),
        date.month(),
        uuid::Uuid::new_v4()
    ))
}

// ---------------------------------------------------------------------------
// Local directory
// ---------------------------------------------------------------------------

pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid storage key {key:?}"),
            )));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn put(&self, key: &str, _content_type: &str, data: &[u8]) -> Result<StoredFile, StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        debug!(path = %path.display(), bytes = data.len(), "receipt stored locally");
        Ok(StoredFile {
            key: key.to_string(),
            url: path.display().to_string(),
            size: data.len(),
        })
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "receipt removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}

// ---------------------------------------------------------------------------
// Supabase Storage
// ---------------------------------------------------------------------------

pub struct SupabaseStore {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
    bucket: String,
}

impl SupabaseStore {
    pub fn new(base_url: &str, service_key: String, bucket: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            bucket,
        }
    }

    pub fn upload_url(&self, key: &str) -> String {
        format!("{}/storage/v1/object/{}/{key}", self.base_url, self.bucket)
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{key}", self.base_url, self.bucket)
    }
}

#[async_trait]
impl FileStore for SupabaseStore {
    async fn put(&self, key: &str, content_type: &str, data: &[u8]) -> Result<StoredFile, StorageError> {
        let response = self
            .http
            .post(self.upload_url(key))
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(data.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StorageError::Upload {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }
        debug!(key, bytes = data.len(), bucket = %self.bucket, "receipt uploaded");
        Ok(StoredFile {
            key: key.to_string(),
            url: self.public_url(key),
            size: data.len(),
        })
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let response = self
            .http
            .delete(self.upload_url(key))
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            let message = response.text().await.unwrap_or_default();
            return Err(StorageError::Upload {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }
        debug!(key, bucket = %self.bucket, "receipt removed");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "supabase"
    }
}

/// Build the configured store.
pub fn store_from_config(config: &Config) -> Result<Arc<dyn FileStore>, StorageError> {
    let store: Arc<dyn FileStore> = match config.storage.backend {
        StorageBackend::Local => Arc::new(LocalFileStore::new(&config.storage.local_dir)),
        StorageBackend::Supabase => {
            let creds = &config.credentials;
            let (Some(url), Some(key)) = (
                creds.supabase_url.as_deref(),
                creds.supabase_service_key.as_ref(),
            ) else {
                return Err(StorageError::NotConfigured(
                    "supabase_url and supabase_service_key are required".into(),
                ));
            };
            Arc::new(SupabaseStore::new(url, key.clone(), config.storage.bucket.clone()))
        }
    };
    info!(backend = store.backend(), "file storage ready");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{date, read_request};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn key_layout() {
        let key = object_key("c-acme", date(2024, 5, 3), "image/jpeg").unwrap();
        let parts: Vec<&str> = key.split('/').collect();
        assert_eq!(&parts[..3], &["c-acme", "2024", "05"]);
        assert!(parts[3].ends_with(".jpg"));
        assert_eq!(parts[3].len(), 36 + 4);
        assert!(matches!(
            object_key("c-acme", date(2024, 5, 3), "text/html"),
            Err(StorageError::UnsupportedType(_))
        ));
    }

    #[tokio::test]
    async fn local_store_writes_file() {
        let root = std::env::temp_dir().join(format!("baht-store-{}", uuid::Uuid::new_v4()));
        let store = LocalFileStore::new(&root);
        let stored = store.put("c1/2024/05/r.png", "image/png", b"png-bytes").await.unwrap();
        assert_eq!(stored.size, 9);
        let on_disk = tokio::fs::read(root.join("c1/2024/05/r.png")).await.unwrap();
        assert_eq!(on_disk, b"png-bytes");
        assert!(store.put("../escape.png", "image/png", b"x").await.is_err());

        store.remove("c1/2024/05/r.png").await.unwrap();
        assert!(!root.join("c1/2024/05/r.png").exists());
        store.remove("c1/2024/05/r.png").await.unwrap();
        assert!(store.remove("../escape.png").await.is_err());
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    /// Accept one upload, reply with `status_line`, and return the raw request.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            request
        });
        (format!("http://{addr}/"), handle)
    }

    #[tokio::test]
    async fn supabase_upload_sends_key_and_returns_public_url() {
        let (url, handle) = serve_once("200 OK", r#"{"Key":"receipts/c1/2024/05/r.pdf"}"#).await;
        let store = SupabaseStore::new(&url, "service-key".into(), "receipts".into());
        let stored = store.put("c1/2024/05/r.pdf", "application/pdf", b"%PDF-1.4").await.unwrap();

        let base = url.trim_end_matches('/');
        assert_eq!(stored.url, format!("{base}/storage/v1/object/public/receipts/c1/2024/05/r.pdf"));
        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /storage/v1/object/receipts/c1/2024/05/r.pdf HTTP/1.1"));
        assert!(request.to_lowercase().contains("authorization: bearer service-key"));
        assert!(request.to_lowercase().contains("content-type: application/pdf"));
        assert!(request.ends_with("%PDF-1.4"));
    }

    #[tokio::test]
    async fn supabase_remove_sends_delete() {
        let (url, handle) = serve_once("200 OK", r#"[]"#).await;
        let store = SupabaseStore::new(&url, "service-key".into(), "receipts".into());
        store.remove("c1/2024/05/r.pdf").await.unwrap();
        let request = handle.await.unwrap();
        assert!(request.starts_with("DELETE /storage/v1/object/receipts/c1/2024/05/r.pdf HTTP/1.1"));
    }

    #[tokio::test]
    async fn supabase_error_status_is_reported() {
        let (url, _handle) = serve_once("403 Forbidden", r#"{"error":"invalid signature"}"#).await;
        let store = SupabaseStore::new(&url, "bad".into(), "receipts".into());
        match store.put("c1/x.png", "image/png", b"x").await {
            Err(StorageError::Upload { status, message }) => {
                assert_eq!(status, 403);
                assert!(message.contains("invalid signature"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}

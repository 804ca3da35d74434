pub mod media;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::generation::types::{MediaPayload, ReferenceImage, ReferenceOrigin, ReferenceRole};
use media::{detect_mime_type, download_media};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Reference storage is not configured")]
    NotConfigured,
    #[error("Failed to fetch '{0}' from reference storage")]
    FetchFailed(String),
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{0}' is empty")]
    Empty(String),
}

/// Where previously uploaded references live.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<MediaPayload, StorageError>;
}

#[derive(Debug, Clone)]
pub struct HttpReferenceStore {
    base_url: String,
}

impl HttpReferenceStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl ReferenceStore for HttpReferenceStore {
    async fn fetch(&self, path: &str) -> Result<MediaPayload, StorageError> {
        if self.base_url.is_empty() {
            return Err(StorageError::NotConfigured);
        }
        let url = self.object_url(path);
        debug!("Fetching reference from {}", url);
        let (bytes, content_type) = download_media(&url)
            .await
            .ok_or_else(|| StorageError::FetchFailed(path.to_string()))?;
        if bytes.is_empty() {
            return Err(StorageError::Empty(path.to_string()));
        }
        let mime_type = detect_mime_type(&bytes)
            .or(content_type)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        Ok(MediaPayload::new(bytes, mime_type))
    }
}

static NEXT_REFERENCE_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_reference_id(prefix: &str) -> String {
    format!("{prefix}-{}", NEXT_REFERENCE_ID.fetch_add(1, Ordering::Relaxed))
}

pub async fn load_reference_file(
    path: &Path,
    role: ReferenceRole,
) -> Result<ReferenceImage, StorageError> {
    let payload = load_media_file(path).await?;
    Ok(ReferenceImage::new(
        next_reference_id("upload"),
        payload,
        role,
        ReferenceOrigin::Uploaded,
    ))
}

pub async fn load_media_file(path: &Path) -> Result<MediaPayload, StorageError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| StorageError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(StorageError::Empty(path.display().to_string()));
    }
    let mime_type =
        detect_mime_type(&bytes).unwrap_or_else(|| "application/octet-stream".to_string());
    Ok(MediaPayload::new(bytes, mime_type))
}

pub async fn fetch_reference(
    store: &dyn ReferenceStore,
    path: &str,
    role: ReferenceRole,
) -> Result<ReferenceImage, StorageError> {
    let payload = store.fetch(path).await?;
    Ok(ReferenceImage::new(
        next_reference_id("stored"),
        payload,
        role,
        ReferenceOrigin::Storage,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::optimize::tests::png_payload;

    #[test]
    fn object_urls_join_cleanly() {
        let store = HttpReferenceStore::new("https://storage.example.com/avatars/");
        assert_eq!(
            store.object_url("/user-1/face.png"),
            "https://storage.example.com/avatars/user-1/face.png"
        );
    }

    #[tokio::test]
    async fn unconfigured_store_refuses() {
        let store = HttpReferenceStore::new("");
        assert!(matches!(
            store.fetch("a.png").await,
            Err(StorageError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn local_files_become_uploaded_references() {
        let dir = std::env::temp_dir().join(format!("avatar-studio-refs-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("face.png");
        tokio::fs::write(&path, &png_payload(8, 8).bytes[..]).await.unwrap();

        let reference = load_reference_file(&path, ReferenceRole::Face).await.unwrap();
        assert_eq!(reference.role, ReferenceRole::Face);
        assert_eq!(reference.origin, ReferenceOrigin::Uploaded);
        assert_eq!(reference.original.mime_type, "image/png");
        assert!(reference.is_loaded());

        let missing = load_reference_file(&dir.join("nope.png"), ReferenceRole::Face).await;
        assert!(matches!(missing, Err(StorageError::Io { .. })));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}

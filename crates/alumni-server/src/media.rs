//! On-disk storage for chat attachments.
//!
//! Each upload is written as `<id>` with its content type alongside in
//! `<id>.type`. The chat core only ever sees the resulting `/media/<id>` URL.

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use alumni_shared::types::{MediaRef, MessageType};

use crate::error::ServerError;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let relative = target.strip_prefix(base).unwrap_or(target);
    let mut resolved = base.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::CurDir => {}
            _ => return Err(ServerError::BadRequest("Path traversal detected".to_string())),
        }
    }
    Ok(resolved)
}

/// A stored upload.
#[derive(Debug, Clone)]
pub struct StoredMedia {
    pub id: Uuid,
    pub content_type: String,
    pub size: usize,
}

impl StoredMedia {
    pub fn url(&self) -> String {
        format!("/media/{}", self.id)
    }

    pub fn media_ref(&self) -> MediaRef {
        MediaRef {
            url: self.url(),
            kind: MessageType::from_mime(&self.content_type),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaStore {
    base_path: PathBuf,
    max_size: usize,
}

impl MediaStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::MediaStorage(format!(
                "Failed to create media directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), max_size, "Media store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub async fn store(&self, data: &[u8], content_type: Option<&str>) -> Result<StoredMedia, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty upload".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::MediaTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let content_type = content_type
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(FALLBACK_CONTENT_TYPE)
            .to_string();

        let id = Uuid::new_v4();
        let (data_path, type_path) = self.paths(&id)?;

        fs::write(&data_path, data)
            .await
            .map_err(|e| ServerError::MediaStorage(format!("Failed to write media {id}: {e}")))?;
        fs::write(&type_path, content_type.as_bytes())
            .await
            .map_err(|e| ServerError::MediaStorage(format!("Failed to write media type {id}: {e}")))?;

        debug!(id = %id, size = data.len(), content_type = %content_type, "Stored media");
        Ok(StoredMedia {
            id,
            content_type,
            size: data.len(),
        })
    }

    /// Contents and content type of an upload.
    pub async fn get(&self, id: Uuid) -> Result<(Vec<u8>, String), ServerError> {
        let (data_path, type_path) = self.paths(&id)?;

        if !data_path.exists() {
            return Err(ServerError::MediaNotFound(id));
        }

        let data = fs::read(&data_path)
            .await
            .map_err(|e| ServerError::MediaStorage(format!("Failed to read media {id}: {e}")))?;
        let content_type = fs::read_to_string(&type_path)
            .await
            .unwrap_or_else(|_| FALLBACK_CONTENT_TYPE.to_string());

        debug!(id = %id, size = data.len(), "Retrieved media");
        Ok((data, content_type))
    }

    fn paths(&self, id: &Uuid) -> Result<(PathBuf, PathBuf), ServerError> {
        let data = ensure_within(&self.base_path, &self.base_path.join(id.to_string()))?;
        let kind = ensure_within(&self.base_path, &self.base_path.join(format!("{id}.type")))?;
        Ok((data, kind))
    }
}

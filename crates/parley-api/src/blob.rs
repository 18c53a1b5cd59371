use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ChatError;

/// 10 MB upload limit for images
pub const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

/// Stores uploaded images on local disk and hands back their public URL.
/// The directory is served under `/uploads`.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    dir: PathBuf,
    public_base: String,
}

impl LocalBlobStore {
    pub fn new(dir: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Accepts a base64 `data:image/...` URL and returns a durable URL.
    /// Already-hosted `http(s)` URLs are passed through untouched.
    pub async fn store_image(&self, image: &str) -> Result<String, ChatError> {
        let image = image.trim();
        if is_hosted(image) {
            return Ok(image.to_string());
        }

        let (ext, bytes) = decode_data_url(image)?;
        let file_name = format!("{}.{}", Uuid::new_v4(), ext);

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            error!("Failed to create upload directory {}: {}", self.dir.display(), e);
            ChatError::TransientStore(e.into())
        })?;

        let path = self.dir.join(&file_name);
        tokio::fs::write(&path, &bytes).await.map_err(|e| {
            error!("Failed to write image {}: {}", path.display(), e);
            ChatError::TransientStore(e.into())
        })?;

        info!("Stored image {} ({} bytes)", file_name, bytes.len());
        Ok(format!("{}/uploads/{}", self.public_base, file_name))
    }
}

impl LocalBlobStore {
    /// Delete an upload this store handed out. URLs it did not issue are
    /// left alone.
    pub async fn discard(&self, url: &str) {
        let prefix = format!("{}/uploads/", self.public_base);
        let Some(name) = url.strip_prefix(&prefix) else {
            return;
        };
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return;
        }

        let path = self.dir.join(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!("Discarded image {}", name),
            Err(e) => warn!("Failed to discard image {}: {}", path.display(), e),
        }
    }
}

/// True for images that already live at an `http(s)` URL.
pub fn is_hosted(image: &str) -> bool {
    let image = image.trim_start();
    image.starts_with("http://") || image.starts_with("https://")
}

fn decode_data_url(image: &str) -> Result<(&'static str, Vec<u8>), ChatError> {
    let invalid = || ChatError::Validation("image must be a base64 data URL".into());

    let rest = image.strip_prefix("data:").ok_or_else(invalid)?;
    let (mime, payload) = rest.split_once(";base64,").ok_or_else(invalid)?;

    let ext = match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        other => {
            return Err(ChatError::Validation(format!("unsupported image type '{}'", other)));
        }
    };

    // Base64 inflates by 4/3; reject before decoding
    if payload.len() / 4 * 3 > MAX_IMAGE_SIZE + 3 {
        return Err(ChatError::Validation("image is larger than 10 MB".into()));
    }

    let bytes = B64.decode(payload).map_err(|_| invalid())?;
    if bytes.is_empty() {
        return Err(ChatError::Validation("image is empty".into()));
    }
    if bytes.len() > MAX_IMAGE_SIZE {
        return Err(ChatError::Validation("image is larger than 10 MB".into()));
    }

    Ok((ext, bytes))
}

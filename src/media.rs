use bytes::Bytes;
use std::path::PathBuf;

use crate::error::{AppError, AppResult};

/// Local image storage. Takes raw upload bytes, validates that they are a
/// recognized image format, and persists them under a generated filename in
/// the uploads directory. The returned URL is stored on posts and profiles
/// as a plain string, the same way the original system stored the URL handed
/// back by its upload service.
pub struct ImageStore {
    dir: PathBuf,
    max_bytes: usize,
}

impl ImageStore {
    pub fn new(dir: PathBuf, max_bytes: usize) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, max_bytes })
    }

    /// Store an uploaded image and return its public URL path.
    pub fn save(&self, data: &Bytes) -> AppResult<String> {
        if data.is_empty() {
            return Err(AppError::BadRequest("Image required".into()));
        }
        if data.len() > self.max_bytes {
            return Err(AppError::BadRequest("Image too large".into()));
        }
        let ext = sniff_image_ext(data)
            .ok_or_else(|| AppError::BadRequest("Unsupported image format".into()))?;

        let filename = format!("{}.{}", uuid::Uuid::now_v7(), ext);
        let path = self.dir.join(&filename);
        std::fs::write(&path, data)?;

        tracing::debug!("Stored image {} ({} bytes)", filename, data.len());
        Ok(format!("/uploads/{}", filename))
    }

    /// Read a stored image back for serving. Rejects anything that is not a
    /// bare filename so a crafted path cannot escape the uploads directory.
    pub fn open(&self, filename: &str) -> Option<(Vec<u8>, String)> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }
        let path = self.dir.join(filename);
        let data = std::fs::read(path).ok()?;
        let mime = mime_guess::from_path(filename)
            .first_or_octet_stream()
            .to_string();
        Some((data, mime))
    }
}

/// Identify the image format from its magic bytes.
fn sniff_image_ext(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpg")
    } else if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("png")
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Some("gif")
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        Some("webp")
    } else {
        None
    }
}

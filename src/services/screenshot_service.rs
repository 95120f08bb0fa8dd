use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::dto::proctor_dto::ScreenshotUpload;

pub const DEFAULT_MIME_TYPE: &str = "image/png";

const MAX_NAME_ATTEMPTS: usize = 64;

const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, PartialEq)]
pub struct StoredScreenshot {
    pub exam_id: Uuid,
    pub student_id: Uuid,
    pub file_path: PathBuf,
    pub url: String,
    pub mime_type: String,
    pub bytes: usize,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// Missing identifiers or an undecodable payload. Nothing was written.
    Ignored,
    Stored(StoredScreenshot),
    /// The artifact could not be written.
    Failed(String),
}

/// Write-once screenshot files under `<root>/<exam_id>/`.
#[derive(Debug, Clone)]
pub struct ScreenshotStore {
    root: PathBuf,
    public_prefix: String,
}

impl ScreenshotStore {
    /// `public_prefix` is the URL path the root directory is served under.
    pub fn new(root: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_prefix: public_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn store(&self, upload: &ScreenshotUpload) -> UploadOutcome {
        let (Some(exam_id), Some(student_id), Some(image_data)) =
            (upload.exam_id, upload.student_id, upload.image_data.as_deref())
        else {
            tracing::debug!("Ignoring screenshot upload with missing identifiers or payload");
            return UploadOutcome::Ignored;
        };

        let (uri_mime, encoded) = split_data_uri(image_data);
        let mime_type = upload
            .mime_type
            .as_deref()
            .or(uri_mime)
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());

        let cleaned: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes = match LENIENT_BASE64.decode(cleaned.as_bytes()) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                tracing::warn!(%exam_id, %student_id, "Ignoring empty screenshot payload");
                return UploadOutcome::Ignored;
            }
            Err(e) => {
                tracing::warn!(error = %e, %exam_id, %student_id, "Ignoring undecodable screenshot payload");
                return UploadOutcome::Ignored;
            }
        };

        let captured_at = Utc::now();
        match self
            .write(exam_id, student_id, captured_at, extension_for(&mime_type), &bytes)
            .await
        {
            Ok(file_path) => {
                let file_name = file_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default();
                let url = format!("{}/{}/{}", self.public_prefix, exam_id, file_name);
                tracing::info!(%exam_id, %student_id, path = %file_path.display(), bytes = bytes.len(), "Screenshot stored");
                UploadOutcome::Stored(StoredScreenshot {
                    exam_id,
                    student_id,
                    file_path,
                    url,
                    mime_type,
                    bytes: bytes.len(),
                    captured_at,
                })
            }
            Err(e) => {
                tracing::error!(error = %e, %exam_id, %student_id, "Failed to store screenshot");
                UploadOutcome::Failed(format!("Failed to store screenshot: {}", e))
            }
        }
    }

    async fn write(
        &self,
        exam_id: Uuid,
        student_id: Uuid,
        captured_at: DateTime<Utc>,
        extension: &str,
        bytes: &[u8],
    ) -> std::io::Result<PathBuf> {
        let dir = self.root.join(exam_id.to_string());
        fs::create_dir_all(&dir).await?;

        let stem = format!("{}_{}", student_id, captured_at.timestamp_micros());
        for n in 0..MAX_NAME_ATTEMPTS {
            let name = if n == 0 {
                format!("{}.{}", stem, extension)
            } else {
                format!("{}-{}.{}", stem, n, extension)
            };
            let path = dir.join(name);
            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            };
            if let Err(e) = write_all(&mut file, bytes).await {
                drop(file);
                let _ = fs::remove_file(&path).await;
                return Err(e);
            }
            return Ok(path);
        }
        Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "no free screenshot file name",
        ))
    }
}

async fn write_all(file: &mut fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Splits `data:<mime>;base64,<payload>` into the media type and payload.
/// Anything else is returned untouched as the payload.
pub fn split_data_uri(data: &str) -> (Option<&str>, &str) {
    let trimmed = data.trim_start();
    let Some(rest) = trimmed.strip_prefix("data:") else {
        return (None, data);
    };
    match rest.split_once(',') {
        Some((header, payload)) => {
            let mime = header.split(';').next().filter(|m| !m.is_empty());
            (mime, payload)
        }
        None => (None, rest),
    }
}

pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "png",
    }
}

use reqwest::multipart::{Form, Part};
use reqwest::Method;
use std::path::Path;
use tracing::info;

use crate::api::models::UploadResponse;
use crate::api::{ApiClient, ApiError, RequestOptions};

/// MIME type for the video containers the backend accepts
pub fn guess_video_mime(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("mp4") => "video/mp4",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

impl ApiClient {
    /// Upload a local video file; returns the server-assigned task id
    pub async fn upload_video(&self, path: &Path) -> Result<UploadResponse, ApiError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ApiError::InvalidInput(format!("not a file path: {:?}", path)))?
            .to_string();

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ApiError::InvalidInput(format!("cannot read {:?}: {}", path, e)))?;

        self.upload_video_bytes(&filename, bytes).await
    }

    pub async fn upload_video_bytes(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadResponse, ApiError> {
        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(guess_video_mime(filename))
            .map_err(|e| ApiError::InvalidInput(e.to_string()))?;
        let form = Form::new().part("file", part);

        let response: UploadResponse = self
            .request(Method::POST, "/api/upload", RequestOptions::new().multipart(form).streaming())
            .await?
            .into_json()?;

        if response.task_id.trim().is_empty() {
            return Err(ApiError::Decode(
                "upload response carried an empty task_id".to_string(),
            ));
        }

        info!("Uploaded {} ({} bytes) as task {}", filename, size, response.task_id);
        Ok(response)
    }
}

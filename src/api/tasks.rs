use reqwest::Method;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{info, warn};

use super::models::{
    DownloadSubmission, DownloadUrlRequest, ExportFormat, ProcessOptions, Task, TaskResults,
    VideoPreview,
};
use super::{require_id, ApiBody, ApiClient, ApiError, RequestOptions};
use crate::gateway::{download_to_file, DownloadProgress};

impl ApiClient {
    /// Kick off the processing pipeline for an uploaded video
    pub async fn start_processing(
        &self,
        task_id: &str,
        options: &ProcessOptions,
    ) -> Result<Value, ApiError> {
        let task_id = require_id("task_id", task_id)?;
        info!("Starting processing for {}", task_id);
        self.post_json(&format!("/api/process/{}", task_id), options)
            .await
    }

    pub async fn task_status(&self, task_id: &str) -> Result<Task, ApiError> {
        let task_id = require_id("task_id", task_id)?;
        self.get_json(&format!("/api/status/{}", task_id)).await
    }

    /// Status of a task created through `submit_url`
    pub async fn download_status(&self, task_id: &str) -> Result<Task, ApiError> {
        let task_id = require_id("task_id", task_id)?;
        self.get_json(&format!("/api/download-status/{}", task_id))
            .await
    }

    pub async fn results(&self, task_id: &str) -> Result<TaskResults, ApiError> {
        let task_id = require_id("task_id", task_id)?;
        self.get_json(&format!("/api/results/{}", task_id)).await
    }

    pub async fn asr_result(&self, task_id: &str) -> Result<Value, ApiError> {
        let task_id = require_id("task_id", task_id)?;
        self.get_json(&format!("/api/results/{}/asr", task_id))
            .await
    }

    /// Markdown notes. Served as text; a JSON `{content}` envelope is unwrapped.
    pub async fn notes(&self, task_id: &str) -> Result<String, ApiError> {
        let task_id = require_id("task_id", task_id)?;
        let body = self
            .request(
                Method::GET,
                &format!("/api/notes/{}", task_id),
                RequestOptions::new(),
            )
            .await?;

        match body {
            ApiBody::Json(Value::Object(map)) => match map.get("content") {
                Some(Value::String(content)) => Ok(content.clone()),
                _ => Err(ApiError::Decode(
                    "notes response has no content field".to_string(),
                )),
            },
            other => Ok(other.into_text()),
        }
    }

    pub async fn save_notes(&self, task_id: &str, markdown: &str) -> Result<(), ApiError> {
        let task_id = require_id("task_id", task_id)?;
        self.request(
            Method::PUT,
            &format!("/api/notes/{}", task_id),
            RequestOptions::new().json(&json!({ "content": markdown }))?,
        )
        .await?;
        info!("Saved notes for {} ({} bytes)", task_id, markdown.len());

        // The agent answers from the notes; a failed reload does not undo the save
        match self.reload_knowledge(task_id).await {
            Ok(reply) if reply.succeeded() => {}
            Ok(reply) => warn!(
                "Knowledge reload for {} reported {}: {}",
                task_id,
                reply.status,
                reply.message.unwrap_or_default()
            ),
            Err(e) => warn!("Knowledge reload for {} failed: {}", task_id, e),
        }
        Ok(())
    }

    pub async fn export<F>(
        &self,
        task_id: &str,
        format: ExportFormat,
        dest: &Path,
        progress_callback: Option<F>,
    ) -> Result<u64, ApiError>
    where
        F: Fn(DownloadProgress) + Send + Sync,
    {
        let task_id = require_id("task_id", task_id)?;
        let path = format!("/api/export/{}/{}", task_id, format.as_str());
        download_to_file(self, &path, dest, progress_callback).await
    }

    /// Platform, title and duration of a video URL, without downloading it
    pub async fn preview_video(&self, request: &DownloadUrlRequest) -> Result<VideoPreview, ApiError> {
        require_id("url", &request.url)?;
        self.post_json("/api/preview-video", request).await
    }

    /// Submit an external video URL for download and processing
    pub async fn submit_url(
        &self,
        request: &DownloadUrlRequest,
    ) -> Result<DownloadSubmission, ApiError> {
        require_id("url", &request.url)?;
        let submission: DownloadSubmission = self.post_json("/api/download-url", request).await?;
        if submission.task_id.trim().is_empty() {
            return Err(ApiError::Decode(
                "download-url response carried an empty task_id".to_string(),
            ));
        }
        info!("Submitted {} as task {}", request.url, submission.task_id);
        Ok(submission)
    }

    pub async fn supported_platforms(&self) -> Result<Value, ApiError> {
        self.get_json("/api/supported-platforms").await
    }
}

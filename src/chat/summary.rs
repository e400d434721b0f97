use futures_util::{Stream, StreamExt};
use reqwest::Method;
use tracing::info;

use super::frames::TextDecoder;
use crate::api::{require_id, ApiClient, ApiError, RequestOptions};

/// Feed a plain-text body to `on_text` as it decodes; returns the full text.
pub async fn consume_text<St, B, E, F>(body: St, mut on_text: F) -> Result<String, ApiError>
where
    St: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<ApiError>,
    F: FnMut(&str),
{
    let mut body = Box::pin(body);
    let mut decoder = TextDecoder::new();
    let mut full = String::new();

    while let Some(item) = body.next().await {
        let chunk = item.map_err(Into::into)?;
        let text = decoder.push(chunk.as_ref());
        if !text.is_empty() {
            on_text(&text);
            full.push_str(&text);
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        on_text(&rest);
        full.push_str(&rest);
    }
    Ok(full)
}

impl ApiClient {
    /// Full-text summary of a transcribed task, generated while it streams
    pub async fn stream_summary<F>(&self, task_id: &str, on_text: F) -> Result<String, ApiError>
    where
        F: FnMut(&str),
    {
        let task_id = require_id("task_id", task_id)?;
        let response = self
            .send_raw(
                Method::GET,
                &format!("/api/stream-summary/{}", task_id),
                RequestOptions::new().streaming(),
            )
            .await?;

        let summary = consume_text(response.bytes_stream(), on_text).await?;
        info!("Summary for {} finished ({} chars)", task_id, summary.chars().count());
        Ok(summary)
    }
}

use futures_util::{Stream, StreamExt};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::frames::{ChatStreamEvent, FrameDecoder};
use crate::api::models::{ChatReply, ChatRequest, KnowledgeReload};
use crate::api::{require_id, ApiClient, ApiError, RequestOptions};

/// User id the agent endpoint assumes when none is given
pub const DEFAULT_USER_ID: &str = "user";

/// Receives decoded chat stream events in arrival order
pub trait ChatSink {
    fn on_delta(&mut self, delta: &str);

    fn on_sources(&mut self, _sources: &[String]) {}

    fn on_error(&mut self, _message: &str) {}

    /// Called exactly once, after the body has ended
    fn on_done(&mut self) {}
}

/// What a finished stream contained
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub deltas: usize,
    pub saw_done: bool,
    pub errors: Vec<String>,
    pub malformed: usize,
}

/// Drive `sink` from a byte stream until it ends.
///
/// `on_done` fires once after the loop exits, also when the body failed
/// part-way; the transport error is returned afterwards.
pub async fn consume_stream<St, B, E, S>(body: St, sink: &mut S) -> Result<StreamSummary, ApiError>
where
    St: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<ApiError>,
    S: ChatSink + ?Sized,
{
    let mut body = Box::pin(body);
    let mut decoder = FrameDecoder::new();
    let mut summary = StreamSummary::default();
    let mut failure: Option<ApiError> = None;

    while let Some(item) = body.next().await {
        match item {
            Ok(chunk) => {
                for payload in decoder.push(chunk.as_ref()) {
                    dispatch(&payload, sink, &mut summary);
                }
            }
            Err(e) => {
                failure = Some(e.into());
                break;
            }
        }
    }

    if failure.is_none() {
        if let Some(payload) = decoder.finish() {
            dispatch(&payload, sink, &mut summary);
        }
    }

    sink.on_done();

    match failure {
        Some(e) => {
            warn!("Chat stream interrupted: {}", e);
            Err(e)
        }
        None => Ok(summary),
    }
}

fn dispatch<S: ChatSink + ?Sized>(payload: &str, sink: &mut S, summary: &mut StreamSummary) {
    match ChatStreamEvent::parse(payload) {
        Some(ChatStreamEvent::Content(delta)) => {
            summary.deltas += 1;
            sink.on_delta(&delta);
        }
        Some(ChatStreamEvent::Sources(sources)) => sink.on_sources(&sources),
        Some(ChatStreamEvent::Done) => summary.saw_done = true,
        Some(ChatStreamEvent::Error(message)) => {
            warn!("Chat stream error frame: {}", message);
            sink.on_error(&message);
            summary.errors.push(message);
        }
        None => {
            debug!("Dropping malformed chat frame: {:?}", payload);
            summary.malformed += 1;
        }
    }
}

impl ApiClient {
    /// Streamed agent turn over `/api/agent/stream`
    pub async fn stream_chat<S>(
        &self,
        task_id: &str,
        message: &str,
        user_id: Option<&str>,
        sink: &mut S,
    ) -> Result<StreamSummary, ApiError>
    where
        S: ChatSink + ?Sized,
    {
        let task_id = require_id("task_id", task_id)?;
        require_id("message", message)?;
        let user_id = user_id.unwrap_or(DEFAULT_USER_ID);

        let form = vec![
            ("message".to_string(), message.to_string()),
            ("task_id".to_string(), task_id.to_string()),
            ("user_id".to_string(), user_id.to_string()),
        ];
        let response = self
            .send_raw(
                Method::POST,
                "/api/agent/stream",
                RequestOptions::new()
                    .form(form)
                    .header("Accept", "text/event-stream")
                    .streaming(),
            )
            .await?;

        let summary = consume_stream(response.bytes_stream(), sink).await?;
        info!(
            "Chat stream for {} finished: {} deltas, {} errors, {} malformed",
            task_id,
            summary.deltas,
            summary.errors.len(),
            summary.malformed
        );
        Ok(summary)
    }

    /// Single-shot chat turn
    pub async fn send_message(&self, request: &ChatRequest) -> Result<ChatReply, ApiError> {
        require_id("task_id", &request.task_id)?;
        require_id("message", &request.message)?;
        self.post_json("/api/chat/send", request).await
    }

    pub async fn chat_history(&self, task_id: &str, user_id: &str) -> Result<Value, ApiError> {
        let task_id = require_id("task_id", task_id)?;
        self.request(
            Method::GET,
            &format!("/api/chat/history/{}", task_id),
            RequestOptions::new().query("user_id", user_id),
        )
        .await?
        .into_json()
    }

    pub async fn clear_agent_session(&self, task_id: &str, user_id: &str) -> Result<(), ApiError> {
        let task_id = require_id("task_id", task_id)?;
        self.request(
            Method::DELETE,
            &format!("/api/agent/sessions/{}", task_id),
            RequestOptions::new().query("user_id", user_id),
        )
        .await?;
        Ok(())
    }

    /// Rebuild the agent's knowledge base for a task after its notes changed
    pub async fn reload_knowledge(&self, task_id: &str) -> Result<KnowledgeReload, ApiError> {
        let task_id = require_id("task_id", task_id)?;
        let reply: KnowledgeReload = self
            .request(
                Method::POST,
                &format!("/api/agent/knowledge/reload/{}", task_id),
                RequestOptions::new(),
            )
            .await?
            .into_json()?;
        debug!("Knowledge reload for {}: {}", task_id, reply.status);
        Ok(reply)
    }
}

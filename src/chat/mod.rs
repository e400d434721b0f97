/**
 * Chat Module
 *
 * Agent chat over processed video content: the incremental frame decoder
 * for `/api/agent/stream`, the single-shot chat endpoints and the streamed
 * plain-text summary.
 */

mod frames;
mod stream;
mod summary;

pub use frames::{ChatStreamEvent, FrameDecoder, TextDecoder};
pub use stream::{consume_stream, ChatSink, StreamSummary, DEFAULT_USER_ID};
pub use summary::consume_text;

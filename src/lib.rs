// HTTP adapter, typed endpoints and error taxonomy
pub mod api;
// Chat stream framing and dispatch
pub mod chat;
// Config file + env overrides
pub mod config;
// Upload / signed URL / streaming download
pub mod gateway;
// Platform app-data paths
pub mod paths;
// Task and payment pollers
pub mod poller;
// Persisted client state
pub mod storage;

pub use api::{ApiBody, ApiClient, ApiError, RequestOptions};
pub use chat::{ChatSink, ChatStreamEvent, FrameDecoder, StreamSummary};
pub use config::Config;
pub use gateway::SignedUrl;
pub use poller::{PollHandle, PollOutcome, PollPolicy, PollState};
pub use storage::LocalStore;

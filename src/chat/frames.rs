use serde_json::Value;

/// Incremental UTF-8 decoding of a chunked body.
///
/// Sequences split across chunks are held back until complete; invalid
/// bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct TextDecoder {
    pending: Vec<u8>,
}

impl TextDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `chunk` (plus held-back bytes) as is complete
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    // valid_up_to bytes are checked UTF-8
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Invalid sequence: replace it and keep going
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        // Truncated sequence: wait for the next chunk
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush held-back bytes at end of stream
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Incremental decoder for `data:` framed event streams.
///
/// Bytes go in as they arrive; payloads come out only for frames closed by a
/// blank line. Split UTF-8 sequences and partial frames stay buffered.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    utf8: TextDecoder,
    text: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning the payloads of every frame it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let decoded = self.utf8.push(chunk);
        self.text.push_str(&decoded);

        if self.text.contains('\r') {
            self.text = self.text.replace("\r\n", "\n");
        }

        let mut payloads = Vec::new();
        while let Some(end) = self.text.find("\n\n") {
            let frame: String = self.text.drain(..end + 2).collect();
            if let Some(payload) = frame_payload(&frame[..end]) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flush an unterminated final frame at end of stream
    pub fn finish(&mut self) -> Option<String> {
        let rest = self.utf8.finish();
        self.text.push_str(&rest);
        let frame = std::mem::take(&mut self.text).replace("\r\n", "\n");
        frame_payload(frame.trim_end_matches(|c: char| c == '\n' || c == '\r'))
    }

    /// Bytes and text not yet part of a complete frame
    pub fn buffered_len(&self) -> usize {
        self.utf8.pending_len() + self.text.len()
    }
}

/// Join the `data:` lines of one frame; `None` if it has none
fn frame_payload(frame: &str) -> Option<String> {
    let mut data: Option<String> = None;
    for line in frame.split('\n') {
        if line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            match data.as_mut() {
                Some(buf) => {
                    buf.push('\n');
                    buf.push_str(rest);
                }
                None => data = Some(rest.to_string()),
            }
        }
    }
    data
}

/// One decoded chat stream envelope
#[derive(Debug, Clone, PartialEq)]
pub enum ChatStreamEvent {
    Content(String),
    Sources(Vec<String>),
    Done,
    Error(String),
}

impl ChatStreamEvent {
    /// Classify a frame payload. When an envelope carries several known
    /// fields the winner is error, then done, then sources, then content.
    /// Returns `None` for anything unrecognised.
    pub fn parse(payload: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(payload).ok()?;
        let obj = value.as_object()?;

        match obj.get("error") {
            None | Some(Value::Null) => {}
            Some(Value::String(message)) => return Some(ChatStreamEvent::Error(message.clone())),
            Some(other) => return Some(ChatStreamEvent::Error(other.to_string())),
        }

        if obj.get("done").and_then(Value::as_bool) == Some(true) {
            return Some(ChatStreamEvent::Done);
        }

        if let Some(Value::Array(items)) = obj.get("sources") {
            let sources = items.iter().map(source_text).collect();
            return Some(ChatStreamEvent::Sources(sources));
        }

        match obj.get("content") {
            Some(Value::String(delta)) => Some(ChatStreamEvent::Content(delta.clone())),
            _ => None,
        }
    }
}

fn source_text(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("content") {
            Some(Value::String(s)) => s.clone(),
            _ => item.to_string(),
        },
        other => other.to_string(),
    }
}

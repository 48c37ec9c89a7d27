//! Server-Sent Events framing.
//!
//! [`SseEvent`] is what the server writes and what [`SseParser`] hands back on
//! the client. The parser is incremental: feed it whatever chunks the body
//! stream yields and it returns every event completed so far.

use std::fmt::Write as _;

/// Event name used for every JSON-RPC payload
pub const MESSAGE_EVENT: &str = "message";

/// One Server-Sent Event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// `id:` field
    pub id: Option<String>,
    /// `event:` field; `None` means the default `message` type
    pub event: Option<String>,
    /// Joined `data:` lines
    pub data: String,
    /// `retry:` reconnection delay in milliseconds
    pub retry: Option<u64>,
}

impl SseEvent {
    /// A `message` event carrying `data`
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: Some(MESSAGE_EVENT.to_string()),
            data: data.into(),
            ..Self::default()
        }
    }

    /// Attach an event id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach a reconnection delay
    #[must_use]
    pub fn with_retry(mut self, retry_ms: u64) -> Self {
        self.retry = Some(retry_ms);
        self
    }

    /// Encode as wire text, including the terminating blank line.
    ///
    /// Multi-line data is split into one `data:` line per line.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if let Some(id) = &self.id {
            let _ = writeln!(out, "id: {id}");
        }
        if let Some(event) = &self.event {
            let _ = writeln!(out, "event: {event}");
        }
        if let Some(retry) = self.retry {
            let _ = writeln!(out, "retry: {retry}");
        }
        for line in self.data.split('\n') {
            let _ = writeln!(out, "data: {}", line.strip_suffix('\r').unwrap_or(line));
        }
        out.push('\n');
        out
    }

    /// Whether this event carries a JSON-RPC payload
    pub fn is_message(&self) -> bool {
        self.event.as_deref().is_none_or(|e| e == MESSAGE_EVENT)
    }
}

impl From<SseEvent> for axum::response::sse::Event {
    fn from(event: SseEvent) -> Self {
        let mut out = Self::default().data(event.data);
        if let Some(name) = event.event {
            out = out.event(name);
        }
        if let Some(id) = event.id {
            out = out.id(id);
        }
        if let Some(retry) = event.retry {
            out = out.retry(std::time::Duration::from_millis(retry));
        }
        out
    }
}

/// Incremental SSE decoder.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    data: Vec<String>,
    event: Option<String>,
    id: Option<String>,
    retry: Option<u64>,
}

impl SseParser {
    /// Create an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return every event it completes.
    ///
    /// Accepts `\n`, `\r\n` and bare `\r` line endings, even when a `\r\n`
    /// pair is split across chunks.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        let mut i = 0;
        while i < self.buffer.len() {
            let end = match self.buffer[i] {
                b'\n' => i + 1,
                b'\r' => {
                    // Need the next byte to know whether this is \r\n
                    if i + 1 == self.buffer.len() {
                        break;
                    }
                    if self.buffer[i + 1] == b'\n' { i + 2 } else { i + 1 }
                }
                _ => {
                    i += 1;
                    continue;
                }
            };
            let line = String::from_utf8_lossy(&self.buffer[start..i]).into_owned();
            self.process_line(&line, &mut events);
            start = end;
            i = end;
        }
        self.buffer.drain(..start);
        events
    }

    /// Bytes held back waiting for a line terminator
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.dispatch(events);
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" if !value.contains('\0') => self.id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse() {
                    self.retry = Some(ms);
                }
            }
            other => tracing::trace!(field = other, "ignoring unknown SSE field"),
        }
    }

    fn dispatch(&mut self, events: &mut Vec<SseEvent>) {
        let event = self.event.take();
        let id = self.id.take();
        let retry = self.retry.take();
        if self.data.is_empty() {
            return;
        }
        events.push(SseEvent {
            id,
            event,
            data: std::mem::take(&mut self.data).join("\n"),
            retry,
        });
    }
}

//! Incremental `text/event-stream` parser.
//!
//! Bytes arrive in arbitrary chunks; complete events are emitted once their
//! terminating blank line has been seen and partial data stays buffered.

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSentEvent {
    /// Event type, `message` when the stream omitted it.
    pub event: String,
    /// Data lines joined with `\n`.
    pub data: String,
}

/// Accumulates chunks and yields complete events.
#[derive(Debug, Default)]
pub struct EventStreamParser {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl EventStreamParser {
    /// Creates an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes (lossy UTF-8) and returns every event completed by
    /// them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ServerSentEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();
        while let Some(position) = self.buffer.find('\n') {
            let raw_line: String = self.buffer.drain(..=position).collect();
            let line = raw_line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Returns the buffered, incomplete line.
    #[must_use]
    pub fn residue(&self) -> &str {
        &self.buffer
    }

    fn process_line(&mut self, line: &str) -> Option<ServerSentEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = line.split_once(':').map_or((line, ""), |(name, rest)| {
            (name, rest.strip_prefix(' ').unwrap_or(rest))
        });
        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<ServerSentEvent> {
        let event_type = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(ServerSentEvent {
            event: event_type.unwrap_or_else(|| "message".to_owned()),
            data,
        })
    }
}

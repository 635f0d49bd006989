// Server-Sent Events line framing
//
// Splits an incoming byte stream into complete "data: {...}" payloads.
// Network chunks do not align with event boundaries, so bytes are
// buffered until a newline appears.

/// One framed SSE payload
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// The JSON text after "data: "
    Data(String),
    /// The "[DONE]" end marker some vendors send
    Done,
}

/// Incremental SSE line splitter
#[derive(Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk, returning every event completed by it
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim();

            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();
            if payload.is_empty() {
                continue;
            }
            if payload == "[DONE]" {
                events.push(SseEvent::Done);
            } else {
                events.push(SseEvent::Data(payload.to_string()));
            }
        }
        events
    }
}

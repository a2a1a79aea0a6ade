//! Line buffer for OpenAI-style SSE byte streams.
//!
//! push raw bytes → extract complete lines → keep the partial tail.

pub(crate) struct SseBuffer {
    buffer: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Append raw bytes (lossy UTF-8).
    pub fn push_bytes(&mut self, chunk: &bytes::Bytes) {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
    }

    /// Every complete `\n`-terminated line, trimmed. Partial data stays buffered.
    pub fn extract_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            lines.push(self.buffer[..pos].trim().to_string());
            self.buffer.drain(..=pos);
        }
        lines
    }

    pub fn residue(&self) -> &str {
        &self.buffer
    }
}

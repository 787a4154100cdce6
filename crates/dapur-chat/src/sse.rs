/// Accumulates a server-sent-events byte stream and splits it into event blocks.
///
/// Bytes are kept raw until a block is complete, so a multi-byte character
/// split across two chunks decodes intact.
pub struct SseBuffer {
    buffer: Vec<u8>,
}

impl SseBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        // A CRLF pair may straddle two chunks, so normalize the whole buffer.
        if self.buffer.windows(2).any(|pair| pair == b"\r\n") {
            let mut normalized = Vec::with_capacity(self.buffer.len());
            let mut bytes = self.buffer.iter().copied().peekable();
            while let Some(byte) = bytes.next() {
                if byte == b'\r' && bytes.peek() == Some(&b'\n') {
                    continue;
                }
                normalized.push(byte);
            }
            self.buffer = normalized;
        }
    }

    pub fn next_event_block(&mut self) -> Option<String> {
        let boundary = self.buffer.windows(2).position(|pair| pair == b"\n\n")?;
        let remaining = self.buffer.split_off(boundary + 2);
        let event_block = std::mem::replace(&mut self.buffer, remaining);
        Some(String::from_utf8_lossy(&event_block).into_owned())
    }

    /// Whatever is left once the byte stream has ended without a final blank line.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest.into_owned())
        }
    }
}

impl Default for SseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn parse_data_lines(event_block: &str) -> Vec<&str> {
    event_block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect()
}

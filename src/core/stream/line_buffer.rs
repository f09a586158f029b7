use memchr::memchr;
use tracing::debug;

/// Reassembles transport chunks into complete `\n`-terminated lines.
///
/// Bytes are held until their terminator arrives, so a multi-byte character
/// split across two chunks is decoded only once it is whole.
#[derive(Debug, Default)]
pub struct EventLineBuffer {
    residual: Vec<u8>,
}

impl EventLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every line it completed, in order and
    /// without the terminator. The unterminated tail stays buffered.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.residual.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(relative) = memchr(b'\n', &self.residual[start..]) {
            let end = start + relative;
            lines.push(decode_line(&self.residual[start..end]));
            start = end + 1;
        }

        if start > 0 {
            self.residual.drain(..start);
        }
        lines
    }

    pub fn feed_str(&mut self, chunk: &str) -> Vec<String> {
        self.feed(chunk.as_bytes())
    }

    /// Number of bytes waiting for a terminator.
    pub fn pending_len(&self) -> usize {
        self.residual.len()
    }

    /// Ends the stream. An unterminated tail is not a frame and is dropped;
    /// the number of discarded bytes is returned.
    pub fn finish(&mut self) -> usize {
        let discarded = self.residual.len();
        if discarded > 0 {
            debug!(bytes = discarded, "discarding unterminated tail at end of stream");
        }
        self.residual.clear();
        discarded
    }
}

fn decode_line(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(err) => {
            debug!("invalid UTF-8 in event stream line: {err}");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

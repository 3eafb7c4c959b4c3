//! Incremental SSE line splitting for upstream response bodies

/// Parsed SSE line types
#[derive(Debug, PartialEq, Eq)]
pub(super) enum SseLine {
    /// `data: [DONE]` stream terminator
    Done,
    /// `data: <payload>`
    Data(String),
    /// Comments, `event:`/`id:`/`retry:` fields and blank lines
    Skip,
}

/// Longest partial line kept while waiting for its newline
pub(super) const MAX_LINE_BYTES: usize = 1024 * 1024;

/// How much non-SSE text is kept for error reporting
const MAX_UNFRAMED_BYTES: usize = 64 * 1024;

/// Accumulates bytes from an HTTP response and yields complete SSE lines.
///
/// Until the first `data:` line arrives the raw text is also retained, so a
/// body that never turns out to be SSE can be reported instead of dropped.
pub(super) struct SseBuffer {
    buf: Vec<u8>,
    scanned: usize,
    framed: bool,
    unframed: String,
}

impl SseBuffer {
    pub(super) fn new() -> Self {
        Self {
            buf: Vec::with_capacity(4096),
            scanned: 0,
            framed: false,
            unframed: String::new(),
        }
    }

    pub(super) fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Extract the next complete line (terminated by `\n`) from the buffer.
    /// Returns `None` when no complete line is available yet.
    ///
    /// Lines are decoded only once complete, so multi-byte characters split
    /// across network chunks are never corrupted.
    pub(super) fn next_line(&mut self) -> Option<SseLine> {
        let Some(pos) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') else {
            self.scanned = self.buf.len();
            return None;
        };
        let end = self.scanned + pos;
        let raw: Vec<u8> = self.buf.drain(..=end).collect();
        self.scanned = 0;
        Some(self.record(&raw))
    }

    /// Parse whatever is left once the body has ended without a final newline
    pub(super) fn finish(&mut self) -> Option<SseLine> {
        self.scanned = 0;
        if self.buf.iter().all(u8::is_ascii_whitespace) {
            self.buf.clear();
            return None;
        }
        let raw = std::mem::take(&mut self.buf);
        Some(self.record(&raw))
    }

    /// Bytes of the incomplete line still waiting for a newline
    pub(super) fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Whether any `data:` line has been seen
    pub(super) fn is_framed(&self) -> bool {
        self.framed
    }

    /// Text received before anything SSE-shaped, capped in size
    pub(super) fn take_unframed(&mut self) -> String {
        std::mem::take(&mut self.unframed)
    }

    fn record(&mut self, raw: &[u8]) -> SseLine {
        let line = parse_line(raw);
        if matches!(line, SseLine::Data(_) | SseLine::Done) {
            self.framed = true;
            self.unframed.clear();
        } else if !self.framed && self.unframed.len() < MAX_UNFRAMED_BYTES {
            self.unframed.push_str(&String::from_utf8_lossy(raw));
        }
        line
    }
}

fn parse_line(raw: &[u8]) -> SseLine {
    let line = match std::str::from_utf8(raw) {
        Ok(s) => s.trim_end_matches(['\r', '\n']),
        Err(_) => {
            tracing::warn!("Dropping SSE line with invalid UTF-8");
            return SseLine::Skip;
        }
    };

    let Some(payload) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload.trim() == "[DONE]" {
        SseLine::Done
    } else if payload.trim().is_empty() {
        SseLine::Skip
    } else {
        SseLine::Data(payload.to_string())
    }
}

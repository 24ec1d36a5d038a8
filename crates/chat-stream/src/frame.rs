//! Server-Sent-Events framing.
//!
//! Bytes arrive in arbitrary chunks. `Utf8ChunkDecoder` turns them into text
//! without splitting a multi-byte character, and `FrameDecoder` cuts that text
//! into complete event blocks on the blank-line separator.

/// Blank-line separator that terminates every event block.
pub const BLOCK_SEPARATOR: &str = "\n\n";

const DATA_PREFIX: &str = "data:";

/// Incremental UTF-8 decoder that carries an incomplete trailing sequence
/// over to the next chunk.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    /// Decodes as much of `pending + chunk` as forms complete characters.
    ///
    /// Invalid sequences become `U+FFFD`; a truncated sequence at the end of the
    /// chunk is held back until more bytes arrive.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        loop {
            let (valid, invalid_len) = match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => (err.valid_up_to(), err.error_len()),
            };

            out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
            match invalid_len {
                Some(len) => {
                    out.push(char::REPLACEMENT_CHARACTER);
                    self.pending.drain(..valid + len);
                }
                None => {
                    self.pending.drain(..valid);
                    return out;
                }
            }
        }
    }

    /// Flushes whatever is still held back, lossily.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }

    /// Number of bytes waiting for the rest of their character.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Splits an append-only text stream into complete event blocks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    /// Appends `text` and returns every block completed by it.
    ///
    /// The unterminated tail stays buffered; whitespace-only blocks are dropped.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);
        let mut blocks = Vec::new();
        let mut start = 0;
        while let Some(idx) = self.buffer[start..].find(BLOCK_SEPARATOR) {
            let block = &self.buffer[start..start + idx];
            if !block.trim().is_empty() {
                blocks.push(block.to_string());
            }
            start += idx + BLOCK_SEPARATOR.len();
        }
        self.buffer.drain(..start);
        blocks
    }

    /// Text received after the last separator.
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

/// Extracts the payload of the first `data:` line in a block.
///
/// Other lines (`event:`, `id:`, comments) are ignored. Returns `None` when the
/// block carries no data line or an empty payload.
pub fn data_payload(block: &str) -> Option<&str> {
    block
        .lines()
        .find_map(|line| line.strip_prefix(DATA_PREFIX))
        .map(str::trim)
        .filter(|payload| !payload.is_empty())
}

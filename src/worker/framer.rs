//! Newline framing for chunked worker output.

/// Splits a chunked byte stream into complete lines.
///
/// Bytes after the last newline are retained until a later chunk terminates
/// them. Whatever is still buffered when the worker exits is discarded with
/// the framer; an unterminated final line is never emitted.
#[derive(Debug, Default)]
pub struct LineFramer {
    fragment: Vec<u8>,
}

impl LineFramer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completed, in order.
    ///
    /// Lines are returned without their terminating `\n`. Invalid UTF-8 is
    /// replaced rather than rejected; a multi-byte character split across two
    /// chunks is reassembled because framing happens on bytes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.fragment.extend_from_slice(chunk);

        let Some(last_newline) = self.fragment.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.fragment.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.fragment, rest);

        complete[..last_newline]
            .split(|&b| b == b'\n')
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// The retained, not yet terminated fragment.
    #[must_use]
    pub fn fragment(&self) -> &[u8] {
        &self.fragment
    }

    /// Drop the retained fragment.
    pub fn reset(&mut self) {
        self.fragment.clear();
    }
}

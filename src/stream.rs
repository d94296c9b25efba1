//! Incremental decoding of the chat response body.
//!
//! The backend streams plain UTF-8 text. A server-side failure partway through
//! is reported in-band: the literal [`ERROR_SENTINEL`] followed by a
//! human-readable message. Everything before the sentinel is discarded.

pub const ERROR_SENTINEL: &str = "***ERROR***:";

#[derive(Debug, PartialEq, Eq)]
pub enum Scan<'a> {
    /// No sentinel so far; the whole decoded buffer.
    Partial(&'a str),
    /// Trimmed text after the first sentinel.
    Errored(String),
}

#[derive(Debug, Default)]
pub struct StreamAccumulator {
    buffer: String,
    // Trailing bytes of a multibyte sequence split across chunks.
    pending: Vec<u8>,
}

impl StreamAccumulator {
    pub fn push(&mut self, chunk: &[u8]) -> Scan<'_> {
        self.decode(chunk);
        self.scan()
    }

    /// Flushes bytes held back at a chunk boundary. Called once the body ends.
    pub fn finish(&mut self) -> Scan<'_> {
        if !self.pending.is_empty() {
            self.pending.clear();
            self.buffer.push(char::REPLACEMENT_CHARACTER);
        }
        self.scan()
    }

    pub fn content(&self) -> &str {
        &self.buffer
    }

    fn scan(&self) -> Scan<'_> {
        match self.buffer.find(ERROR_SENTINEL) {
            Some(idx) => {
                let message = &self.buffer[idx + ERROR_SENTINEL.len()..];
                Scan::Errored(message.trim().to_string())
            }
            None => Scan::Partial(&self.buffer),
        }
    }

    fn decode(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.pending.clear();
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            return;
                        }
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(chunks: &[&[u8]]) -> StreamAccumulator {
        let mut acc = StreamAccumulator::default();
        for chunk in chunks {
            acc.push(chunk);
        }
        acc
    }

    #[test]
    fn concatenates_chunks_in_order() {
        let mut acc = StreamAccumulator::default();
        assert_eq!(acc.push(b"Eat "), Scan::Partial("Eat "));
        assert_eq!(acc.push(b"more "), Scan::Partial("Eat more "));
        assert_eq!(acc.push(b"greens."), Scan::Partial("Eat more greens."));
        assert_eq!(acc.finish(), Scan::Partial("Eat more greens."));
    }

    #[test]
    fn sentinel_discards_preceding_text() {
        let mut acc = StreamAccumulator::default();
        acc.push(b"Partial answer ");
        let scan = acc.push(b"***ERROR***:   Rate limit exceeded. Please try again later.  ");
        assert_eq!(
            scan,
            Scan::Errored("Rate limit exceeded. Please try again later.".to_string())
        );
    }

    #[test]
    fn sentinel_split_across_chunks_is_detected() {
        let mut acc = StreamAccumulator::default();
        assert_eq!(acc.push(b"text ***ERR"), Scan::Partial("text ***ERR"));
        assert_eq!(
            acc.push(b"OR***: upstream down"),
            Scan::Errored("upstream down".to_string())
        );
    }

    #[test]
    fn only_the_first_sentinel_starts_the_message() {
        let mut acc = StreamAccumulator::default();
        let scan = acc.push(b"***ERROR***: first ***ERROR***: second");
        assert_eq!(scan, Scan::Errored("first ***ERROR***: second".to_string()));
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let bytes = "Żółw".as_bytes();
        let acc = feed(&[&bytes[..1], &bytes[1..3], &bytes[3..]]);
        assert_eq!(acc.content(), "Żółw");
    }

    #[test]
    fn incomplete_sequence_is_not_shown_early() {
        let bytes = "é".as_bytes();
        let mut acc = StreamAccumulator::default();
        assert_eq!(acc.push(&bytes[..1]), Scan::Partial(""));
        assert_eq!(acc.push(&bytes[1..]), Scan::Partial("é"));
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let acc = feed(&[b"ok \xff done"]);
        assert_eq!(acc.content(), "ok \u{FFFD} done");
    }

    #[test]
    fn dangling_bytes_are_flushed_on_finish() {
        let bytes = "€".as_bytes();
        let mut acc = StreamAccumulator::default();
        acc.push(b"price ");
        acc.push(&bytes[..2]);
        assert_eq!(acc.finish(), Scan::Partial("price \u{FFFD}"));
    }
}

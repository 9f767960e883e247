// src/gps/framer.rs
//! Splits a chunked byte stream into complete NMEA sentence lines

/// Sentence terminator on the wire.
pub const TERMINATOR: &str = "\r\n";

/// Reassembles sentences from chunks that carry no boundary guarantee.
///
/// Each source connection owns exactly one framer. Whatever follows the last
/// terminator of a chunk is held back and prepended to the next chunk, so a
/// sentence split across any number of reads (even between `\r` and `\n`)
/// comes out exactly once.
#[derive(Debug, Default, Clone)]
pub struct SentenceFramer {
    tail: String,
}

impl SentenceFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a text chunk and return every sentence it completes, in order.
    ///
    /// Segments between terminators are returned as-is, including empty ones.
    /// The trailing segment always becomes the new buffered tail.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.tail.push_str(chunk);

        let mut lines: Vec<String> = self.tail.split(TERMINATOR).map(str::to_string).collect();
        // split() always yields at least one segment
        self.tail = lines.pop().unwrap_or_default();
        lines
    }

    /// Feed raw bytes from a transport. NMEA is ASCII; anything else is
    /// replaced rather than rejected.
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        self.feed(&String::from_utf8_lossy(chunk))
    }

    /// The partial sentence currently held back.
    pub fn pending(&self) -> &str {
        &self.tail
    }

    /// Drop any partial sentence. Called on disconnect; the fragment is
    /// discarded, not flushed, since a partial sentence cannot be parsed.
    pub fn reset(&mut self) {
        self.tail.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = "$GPGGA,092750.000,5321.6802,N,00630.3372,W,1,8,1.03,61.7,M,55.2,M,,*76\r\n\
                          $GPRMC,092750.000,A,5321.6802,N,00630.3372,W,0.02,31.66,280511,,,A*43\r\n\
                          $GPVTG,31.66,T,,M,0.02,N,0.04,K,A*3B\r\n";

    fn feed_all(chunks: &[&str]) -> Vec<String> {
        let mut framer = SentenceFramer::new();
        chunks.iter().flat_map(|c| framer.feed(c)).collect()
    }

    #[test]
    fn test_single_chunk() {
        let lines = feed_all(&[STREAM]);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("$GPGGA"));
        assert!(lines[2].starts_with("$GPVTG"));
    }

    #[test]
    fn test_every_split_point_matches_unsplit() {
        let expected = feed_all(&[STREAM]);
        for i in 0..=STREAM.len() {
            let (a, b) = STREAM.split_at(i);
            assert_eq!(feed_all(&[a, b]), expected, "split at {}", i);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let expected = feed_all(&[STREAM]);
        let chunks: Vec<String> = STREAM.chars().map(|c| c.to_string()).collect();
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        assert_eq!(feed_all(&refs), expected);
    }

    #[test]
    fn test_split_mid_terminator() {
        let mut framer = SentenceFramer::new();
        assert!(framer.feed("$GPVTG,0.0,T*00\r").is_empty());
        assert_eq!(framer.pending(), "$GPVTG,0.0,T*00\r");
        assert_eq!(framer.feed("\n$GP"), vec!["$GPVTG,0.0,T*00".to_string()]);
        assert_eq!(framer.pending(), "$GP");
    }

    #[test]
    fn test_tail_is_kept_without_terminator() {
        let mut framer = SentenceFramer::new();
        assert!(framer.feed("$GPGGA,1,2").is_empty());
        assert_eq!(framer.pending(), "$GPGGA,1,2");
    }

    #[test]
    fn test_empty_segments_are_emitted() {
        let mut framer = SentenceFramer::new();
        assert_eq!(framer.feed("\r\n\r\n"), vec![String::new(), String::new()]);
    }

    #[test]
    fn test_reset_discards_partial() {
        let mut framer = SentenceFramer::new();
        framer.feed("$GPGGA,partial");
        framer.reset();
        assert_eq!(framer.pending(), "");
        assert_eq!(framer.feed("$GPVTG*00\r\n"), vec!["$GPVTG*00".to_string()]);
    }

    #[test]
    fn test_feed_bytes() {
        let mut framer = SentenceFramer::new();
        let lines = framer.feed_bytes(b"$GPVTG*00\r\n$GPG");
        assert_eq!(lines, vec!["$GPVTG*00".to_string()]);
        assert_eq!(framer.pending(), "$GPG");
    }
}

//! Wire-format codec for controller frames.
//!
//! One frame is a comma-separated list of `key:value` entries wrapped in
//! braces and terminated with CRLF:
//!
//! ```text
//! {"UCID":"h12","FLSH":1.00,"SDNM":0.00}\r\n
//! ```
//!
//! Keys are always quoted when encoding; values are quoted only for the
//! two reserved text keys (`UCID`, `FEFT`). Decoding is lenient: the
//! channel is noisy and partial or malformed entries are expected, so bad
//! entries are skipped rather than reported.

use crate::protocol::keys::QUOTED_KEYS;
use crate::types::FieldMap;

/// Frame sent to a device to solicit its state without writing anything.
pub const KEEPALIVE_FRAME: &str = "{}";

/// Strips quote characters and interior spaces from a decoded token.
fn clean(token: &str) -> String {
    token.replace(['"', ' '], "")
}

/// Decodes one frame of text into a field map.
///
/// Braces anywhere in the input are discarded, entries are split on `,`,
/// and each entry is split on the first `:`. Entries without a `:` or
/// with an empty key are skipped. Duplicate keys keep the first value.
#[must_use]
pub fn decode(frame: &str) -> FieldMap {
    let body = frame.replace(['{', '}'], "");
    let mut values = FieldMap::new();

    for entry in body.split(',') {
        let Some((key, value)) = entry.trim().split_once(':') else {
            continue;
        };

        let key = clean(key);
        if key.is_empty() {
            continue;
        }

        values.entry(key).or_insert_with(|| clean(value));
    }

    values
}

/// Encodes field entries into one frame.
///
/// Returns an empty string for an empty entry list; callers that want to
/// solicit a response from an idle device send [`KEEPALIVE_FRAME`]
/// instead.
#[must_use]
pub fn encode<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut result = String::new();

    for (key, value) in entries {
        result.push(if result.is_empty() { '{' } else { ',' });
        if QUOTED_KEYS.contains(&key) {
            result.push_str(&format!("\"{key}\":\"{value}\""));
        } else {
            result.push_str(&format!("\"{key}\":{value}"));
        }
    }

    if result.is_empty() {
        return result;
    }

    result.push_str("}\r\n");
    result
}

/// Accumulates raw inbound text until it holds one complete frame.
///
/// The transport delivers arbitrary chunks; a chunk opening a new frame
/// resets the buffer, and once the buffer contains both braces it is
/// drained and returned as one frame.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buffer: String,
}

impl FrameAccumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a raw chunk, returning a complete frame when one is ready.
    pub fn feed(&mut self, chunk: &str) -> Option<String> {
        if chunk.starts_with('{') {
            self.buffer.clear();
        }

        self.buffer.push_str(chunk);

        if self.buffer.contains('{') && self.buffer.contains('}') {
            return Some(std::mem::take(&mut self.buffer));
        }

        None
    }

    /// Discards any partial data.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_simple_frame() {
        let values = decode("{\"UCID\":\"h12\",\"FLSH\":1.00}");
        assert_eq!(values.get("UCID").map(String::as_str), Some("h12"));
        assert_eq!(values.get("FLSH").map(String::as_str), Some("1.00"));
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_decode_strips_spaces() {
        let values = decode("{ \"SYST\" : 2.00 , \"PGTR\" : 21.5 }");
        assert_eq!(values.get("SYST").map(String::as_str), Some("2.00"));
        assert_eq!(values.get("PGTR").map(String::as_str), Some("21.5"));
    }

    #[test]
    fn test_decode_duplicate_key_first_wins() {
        let values = decode("{\"PGTR\":1.00,\"PGTR\":2.00}");
        assert_eq!(values.get("PGTR").map(String::as_str), Some("1.00"));
    }

    #[test]
    fn test_decode_skips_malformed_entries() {
        let values = decode("{\"PGTR\":1.00,garbage,\"\":5.00,}");
        assert_eq!(values.len(), 1);
        assert_eq!(values.get("PGTR").map(String::as_str), Some("1.00"));
    }

    #[test]
    fn test_decode_never_panics_on_noise() {
        assert!(decode("").is_empty());
        assert!(decode("{{{}}}").is_empty());
        assert!(decode(",,,::,").is_empty());
    }

    #[test]
    fn test_encode_quotes_reserved_values_only() {
        let frame = encode([("UCID", "h12")]);
        assert_eq!(frame, "{\"UCID\":\"h12\"}\r\n");

        let frame = encode([("ZPLJ", "1.00")]);
        assert_eq!(frame, "{\"ZPLJ\":1.00}\r\n");
    }

    #[test]
    fn test_encode_empty_is_empty_string() {
        assert_eq!(encode([]), "");
    }

    #[test]
    fn test_round_trip() {
        let frame = encode([("UCID", "h12"), ("FLSH", "1.00"), ("PGTR", "21.5")]);
        let values = decode(&frame);
        assert_eq!(values.get("UCID").map(String::as_str), Some("h12"));
        assert_eq!(values.get("FLSH").map(String::as_str), Some("1.00"));
        assert_eq!(values.get("PGTR").map(String::as_str), Some("21.5"));
    }

    #[test]
    fn test_accumulator_reassembles_split_frame() {
        let mut acc = FrameAccumulator::new();
        assert_eq!(acc.feed("{\"PGTR\""), None);
        assert_eq!(acc.feed(":21.5"), None);
        let frame = acc.feed("}").unwrap();
        assert_eq!(decode(&frame).get("PGTR").map(String::as_str), Some("21.5"));
    }

    #[test]
    fn test_accumulator_resets_on_new_frame_start() {
        let mut acc = FrameAccumulator::new();
        assert_eq!(acc.feed("{\"PGTR\":21"), None);
        // A fresh opening brace discards the stalled partial frame.
        let frame = acc.feed("{\"SYST\":2.00}").unwrap();
        let values = decode(&frame);
        assert_eq!(values.get("SYST").map(String::as_str), Some("2.00"));
        assert!(!values.contains_key("PGTR"));
    }
}

use serde_json::Value;
use tracing::{instrument, trace};

use crate::error::PayloadError;
use crate::payload::DeviceInfoPayload;
use crate::utils::format_hex;

/// Accumulates notification chunks until they form one complete document.
///
/// Chunk boundaries carry no framing, so the whole buffer is re-parsed after
/// every append. Completion is decided by JSON well-formedness alone; the
/// completed document is then decoded into a [`DeviceInfoPayload`].
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    buffer: Vec<u8>,
    chunks: usize,
}

impl ChunkReassembler {
    /// Creates an empty reassembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one chunk.
    ///
    /// Returns `None` while the buffer is not yet a well-formed JSON
    /// document. Once it is, returns the decoded payload, or the decode
    /// error when the document does not describe a device.
    #[instrument(skip(self, chunk), level = "trace", fields(chunk_len = chunk.len()))]
    pub fn append(&mut self, chunk: &[u8]) -> Option<Result<DeviceInfoPayload, PayloadError>> {
        let document = self.append_document(chunk)?;
        Some(serde_json::from_value(document).map_err(|source| PayloadError::Shape { source }))
    }

    fn append_document(&mut self, chunk: &[u8]) -> Option<Value> {
        self.buffer.extend_from_slice(chunk);
        self.chunks += 1;
        trace!(
            chunk = %format_hex(chunk),
            buffered = self.buffer.len(),
            "appended reply chunk"
        );

        match serde_json::from_slice::<Value>(&self.buffer) {
            Ok(document) => Some(document),
            Err(error) => {
                trace!(%error, "reply buffer is not a complete document yet");
                None
            }
        }
    }

    /// Returns `true` when no bytes have been received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of buffered bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of chunks appended so far.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// Buffered text, lossily decoded as UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    const DOCUMENT: &str = r#"{"device_name":"Café \"bar\"","user_id":"U1","adoption_status":1,"scale":[["temp","°C"]]}"#;

    fn feed_all(chunks: &[&[u8]]) -> Vec<Option<DeviceInfoPayload>> {
        let mut reassembler = ChunkReassembler::new();
        chunks
            .iter()
            .map(|chunk| {
                reassembler
                    .append(chunk)
                    .map(|decoded| decoded.expect("fixture should decode"))
            })
            .collect()
    }

    #[rstest]
    #[case::single_byte(1)]
    #[case::two_bytes(2)]
    #[case::ble_default_mtu(20)]
    #[case::odd_size(7)]
    #[case::whole_document(DOCUMENT.len())]
    fn completes_only_on_the_final_chunk(#[case] chunk_size: usize) {
        let chunks: Vec<&[u8]> = DOCUMENT.as_bytes().chunks(chunk_size).collect();
        let results = feed_all(&chunks);

        let (last, earlier) = results
            .split_last()
            .expect("at least one chunk should be fed");
        assert!(earlier.iter().all(Option::is_none));
        let payload = last.as_ref().expect("final chunk should complete");
        assert_eq!("Café \"bar\"", payload.device_name());
        assert_eq!("°C", payload.scale_rows()[0].unit());
    }

    #[test]
    fn split_inside_escape_sequence_waits_for_completion() {
        let split = DOCUMENT.find('\\').expect("escape should be present") + 1;
        let (head, tail) = DOCUMENT.as_bytes().split_at(split);
        let results = feed_all(&[head, tail]);

        assert!(results[0].is_none());
        assert!(results[1].is_some());
    }

    #[test]
    fn split_inside_multibyte_character_waits_for_completion() {
        let split = DOCUMENT.find('°').expect("degree sign should be present") + 1;
        let (head, tail) = DOCUMENT.as_bytes().split_at(split);
        let results = feed_all(&[head, tail]);

        assert!(results[0].is_none());
        assert!(results[1].is_some());
    }

    #[test]
    fn malformed_input_never_completes_and_keeps_all_bytes() {
        let mut reassembler = ChunkReassembler::new();
        assert!(reassembler.append(br#"{"device_name": "#).is_none());
        assert!(reassembler.append(b"oops}").is_none());

        assert_eq!(2, reassembler.chunk_count());
        assert_eq!(21, reassembler.len());
        assert_eq!(r#"{"device_name": oops}"#, reassembler.text());
    }

    #[test]
    fn trailing_bytes_after_document_are_not_complete() {
        let mut reassembler = ChunkReassembler::new();
        assert!(reassembler.append(b"{}").is_some());
        assert!(reassembler.append(b"{").is_none());
    }

    #[rstest]
    #[case::status_as_string(br#"{"adoption_status":"0","user_id":""}"#, 0)]
    #[case::status_as_float(br#"{"adoption_status":1.0}"#, 1)]
    #[case::null_scale_unit(br#"{"scale":[["t",null]]}"#, 0)]
    fn loosely_typed_document_completes(#[case] document: &[u8], #[case] status: i64) {
        let mut reassembler = ChunkReassembler::new();

        let payload = reassembler
            .append(document)
            .expect("well-formed document should complete")
            .expect("loosely typed document should decode");
        assert_eq!(status, payload.adoption_status_code());
    }

    #[rstest]
    #[case::fractional_status(br#"{"adoption_status":1.5}"#)]
    #[case::array_root(b"[1,2]")]
    #[case::name_as_object(br#"{"device_name":{"first":"a"}}"#)]
    fn well_formed_but_mistyped_document_completes_with_error(#[case] document: &[u8]) {
        let mut reassembler = ChunkReassembler::new();

        assert_matches!(
            reassembler.append(document),
            Some(Err(PayloadError::Shape { .. }))
        );
    }
}

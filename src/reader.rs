//! Framing reader: per-connection streaming extractor of complete JSON
//! top-level values from an arbitrary byte stream (spec.md §4.2).
//!
//! Delegates the actual decode to `serde_json`'s `StreamDeserializer` over
//! `Box<RawValue>`, which gives us two things for free: EOF-vs-syntax-error
//! classification via [`serde_json::Error::is_eof`], and the *exact* source
//! bytes of each value (not a re-serialization), which is the contract
//! spec.md §4.2 calls for.

use std::io::{self, Read};

use serde_json::value::RawValue;

use crate::error::ReadError;

pub struct FramingReader {
    buffer: Vec<u8>,
}

/// Single read-syscall chunk size. Not a protocol limit — the buffer grows
/// unbounded to hold however much of a value is still incomplete.
const CHUNK_SIZE: usize = 64 * 1024;

impl FramingReader {
    pub fn new() -> Self {
        FramingReader { buffer: Vec::new() }
    }

    /// Number of residual bytes held for an as-yet-incomplete value. Used by
    /// tests to assert the boundary cases in spec.md §8.
    pub fn residual_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drains `source` until it reports `WouldBlock` (the edge-triggered
    /// contract in spec.md §4.1 requires the caller, i.e. the event loop, to
    /// call this in a loop that bottoms out here), decoding as many
    /// complete top-level JSON values as are available after each
    /// non-empty read. Returns the values extracted, in arrival order, and
    /// at most one terminal error.
    pub fn read<R: Read>(&mut self, source: &mut R) -> (Vec<Vec<u8>>, Option<ReadError>) {
        let mut values = Vec::new();
        let mut chunk = [0u8; CHUNK_SIZE];

        loop {
            match source.read(&mut chunk) {
                Ok(0) => return (values, Some(ReadError::EndOfStream)),
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    let (extracted, framing_err) = self.drain();
                    values.extend(extracted);
                    if let Some(err) = framing_err {
                        return (values, Some(ReadError::Framing(err)));
                    }
                    // Edge-triggered: keep reading until the fd truly has
                    // no more data rather than returning after one chunk.
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return (values, None),
                Err(err) => return (values, Some(ReadError::Io(err))),
            }
        }
    }

    /// Repeatedly decodes the next JSON value from the front of the
    /// internal buffer, appending its exact source bytes to the output
    /// list and advancing past it, until either the buffer is exhausted
    /// (possibly leaving an incomplete trailing value) or a genuine decode
    /// error is hit.
    fn drain(&mut self) -> (Vec<Vec<u8>>, Option<serde_json::Error>) {
        let mut values = Vec::new();
        let mut offset = 0;

        loop {
            let remaining = &self.buffer[offset..];
            if remaining.is_empty() {
                break;
            }

            let mut stream = serde_json::Deserializer::from_slice(remaining).into_iter::<Box<RawValue>>();

            match stream.next() {
                Some(Ok(raw)) => {
                    values.push(raw.get().as_bytes().to_vec());
                    offset += stream.byte_offset();
                }
                Some(Err(err)) => {
                    if err.is_eof() {
                        // Not enough data yet for this value; keep it (and
                        // anything after) as residual and stop without
                        // error.
                    } else {
                        self.retain_from(offset);
                        return (values, Some(err));
                    }
                    break;
                }
                None => {
                    // Only whitespace remained in this slice.
                    offset += stream.byte_offset();
                    break;
                }
            }
        }

        self.retain_from(offset);
        (values, None)
    }

    fn retain_from(&mut self, offset: usize) {
        let trimmed_start = offset
            + self.buffer[offset..]
                .iter()
                .take_while(|b| b.is_ascii_whitespace())
                .count();
        self.buffer.drain(..trimmed_start);
    }
}

impl Default for FramingReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::min;

    /// A mock connection that yields data in fixed-size chunks and then
    /// reports `WouldBlock`, mirroring `MockChannel` in
    /// `examples/SleepingPills-bushhammer/server/lib/neutronium/src/net/buffer.rs`.
    struct MockSource {
        chunks: Vec<Vec<u8>>,
        pos: usize,
    }

    impl MockSource {
        fn new(chunks: Vec<&[u8]>) -> Self {
            MockSource {
                chunks: chunks.into_iter().map(|c| c.to_vec()).collect(),
                pos: 0,
            }
        }
    }

    impl Read for MockSource {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos >= self.chunks.len() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let chunk = &self.chunks[self.pos];
            let n = min(chunk.len(), buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            self.pos += 1;
            Ok(n)
        }
    }

    #[test]
    fn empty_input_yields_no_values_and_no_residual() {
        let mut reader = FramingReader::new();
        let mut source = MockSource::new(vec![]);
        let (values, err) = reader.read(&mut source);
        assert!(values.is_empty());
        assert!(err.is_none());
        assert_eq!(reader.residual_len(), 0);
    }

    #[test]
    fn split_value_across_two_reads_completes_on_second() {
        let mut reader = FramingReader::new();

        let (values, err) = reader.read(&mut MockSource::new(vec![br#"{"event":"STOP","dat"#]));
        assert!(values.is_empty());
        assert!(err.is_none());
        assert!(reader.residual_len() > 0);

        let (values, err) = reader.read(&mut MockSource::new(vec![
            br#"a":{},"timestamp":{"seconds":1,"microseconds":2}}"#,
        ]));
        assert_eq!(values.len(), 1);
        assert!(err.is_none());
        assert_eq!(reader.residual_len(), 0);

        let parsed: serde_json::Value = serde_json::from_slice(&values[0]).unwrap();
        assert_eq!(parsed["event"], "STOP");
    }

    #[test]
    fn scenario_split_frame_three_reads() {
        let mut reader = FramingReader::new();

        let (v1, e1) = reader.read(&mut MockSource::new(vec![br#"{"event":"STOP","dat"#]));
        assert!(v1.is_empty() && e1.is_none());

        let (v2, e2) = reader.read(&mut MockSource::new(vec![
            br#"a":{},"timestamp":{"seconds":1,"microseconds":2}}{"ret"#,
        ]));
        assert_eq!(v2.len(), 1);
        assert!(e2.is_none());

        let (v3, e3) = reader.read(&mut MockSource::new(vec![br#"urn":{},"id":"x"}"#]));
        assert_eq!(v3.len(), 1);
        assert!(e3.is_none());

        let parsed: serde_json::Value = serde_json::from_slice(&v3[0]).unwrap();
        assert_eq!(parsed["id"], "x");
    }

    #[test]
    fn whitespace_separated_values_in_one_chunk() {
        let mut reader = FramingReader::new();
        let (values, err) = reader.read(&mut MockSource::new(vec![b"{\"a\":1}  \n\t{\"b\":2}"]));
        assert_eq!(values.len(), 2);
        assert!(err.is_none());
        assert_eq!(reader.residual_len(), 0);
    }

    #[test]
    fn braces_in_string_literals_do_not_terminate_early() {
        let mut reader = FramingReader::new();
        let payload = br#"{"event":"X","data":{"msg":"a { b } c \"{}\""},"timestamp":{"seconds":1,"microseconds":0}}"#;
        let (values, err) = reader.read(&mut MockSource::new(vec![payload]));
        assert_eq!(values.len(), 1);
        assert!(err.is_none());
        assert_eq!(values[0], payload);
    }

    #[test]
    fn garbage_after_values_is_reported_but_prior_values_survive() {
        let mut reader = FramingReader::new();
        let (values, err) = reader.read(&mut MockSource::new(vec![b"{\"a\":1}not json"]));
        assert_eq!(values.len(), 1);
        assert!(err.is_some());
        assert!(matches!(err.unwrap(), ReadError::Framing(_)));
        assert!(reader.residual_len() > 0);
    }

    #[test]
    fn zero_byte_read_reports_end_of_stream() {
        let mut reader = FramingReader::new();
        let (values, err) = reader.read(&mut MockSource::new(vec![b""]));
        assert!(values.is_empty());
        assert!(matches!(err, Some(ReadError::EndOfStream)));
    }
}

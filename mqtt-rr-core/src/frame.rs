//! Frame codec for recording files.
//!
//! Each frame is a length prefix followed by one MessagePack-encoded
//! [`RecordedMessage`]. The prefix is a zig-zag varint padded with zeros to
//! [`LENGTH_PREFIX_SIZE`] bytes, the maximum encoded size of a 64-bit varint,
//! so every prefix has the same width.

use std::io::{self, ErrorKind, Read, Write};

use crate::error::FrameError;
use crate::message::RecordedMessage;

/// Bytes in every length prefix (maximum varint length of a 64-bit value)
pub const LENGTH_PREFIX_SIZE: usize = 10;

/// Largest message body written or read (64 MiB)
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Serialize a message to its self-describing body bytes
pub fn encode(message: &RecordedMessage) -> Result<Vec<u8>, FrameError> {
    Ok(rmp_serde::to_vec_named(message)?)
}

/// Parse a message body, failing with [`FrameError::Corrupt`]
pub fn decode(bytes: &[u8]) -> Result<RecordedMessage, FrameError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Write `value` as a zig-zag varint into `buf`, returning the used length.
/// Unused trailing bytes are left untouched.
pub fn put_varint(buf: &mut [u8; LENGTH_PREFIX_SIZE], value: i64) -> usize {
    let mut ux = ((value << 1) ^ (value >> 63)) as u64;
    let mut i = 0;
    while ux >= 0x80 {
        buf[i] = (ux as u8) | 0x80;
        ux >>= 7;
        i += 1;
    }
    buf[i] = ux as u8;
    i + 1
}

/// Read a zig-zag varint from the start of `buf`.
///
/// Returns the value and the number of bytes consumed, or `None` when the
/// buffer ends first or the value overflows 64 bits.
pub fn read_varint(buf: &[u8]) -> Option<(i64, usize)> {
    let mut x: u64 = 0;
    let mut shift: u32 = 0;
    for (i, &b) in buf.iter().enumerate() {
        if i == LENGTH_PREFIX_SIZE {
            return None;
        }
        if b < 0x80 {
            if i == LENGTH_PREFIX_SIZE - 1 && b > 1 {
                return None;
            }
            let ux = x | (u64::from(b) << shift);
            let value = (ux >> 1) as i64 ^ -((ux & 1) as i64);
            return Some((value, i + 1));
        }
        x |= u64::from(b & 0x7f) << shift;
        shift += 7;
    }
    None
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message: RecordedMessage,
    /// Length of the serialized message body (excluding the prefix)
    pub len: usize,
}

/// Build the complete on-disk bytes of one frame.
///
/// Bodies larger than [`MAX_FRAME_LEN`] are refused, since no reader would
/// accept them.
pub fn frame_bytes(message: &RecordedMessage) -> Result<Vec<u8>, FrameError> {
    let body = encode(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(FrameError::Encode(format!(
            "message body of {} bytes exceeds the {} byte frame limit",
            body.len(),
            MAX_FRAME_LEN
        )));
    }
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    put_varint(&mut prefix, body.len() as i64);

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    buf.extend_from_slice(&prefix);
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Appends frames to a recording
pub struct FrameWriter<W: Write> {
    writer: W,
    frame_count: u64,
    bytes_written: u64,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            frame_count: 0,
            bytes_written: 0,
        }
    }

    /// Write one frame, returning the serialized message length.
    ///
    /// Prefix and body go out in a single `write_all`. An oversized message
    /// fails before anything is written.
    pub fn write_message(&mut self, message: &RecordedMessage) -> Result<usize, FrameError> {
        let buf = frame_bytes(message)?;
        self.writer.write_all(&buf)?;

        self.frame_count += 1;
        self.bytes_written += buf.len() as u64;
        Ok(buf.len() - LENGTH_PREFIX_SIZE)
    }

    /// Number of frames written so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Number of bytes written so far, prefixes included
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Flush and hand back the underlying writer
    pub fn finish(mut self) -> io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Strict sequential frame reader.
///
/// Reports malformed and truncated frames as errors; callers that treat them
/// as end-of-stream (playback) do that mapping themselves.
pub struct FrameReader<R: Read> {
    reader: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read the next frame, returns `None` at a clean end of file
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        let n = read_full(&mut self.reader, &mut prefix)?;
        if n == 0 {
            return Ok(None);
        }
        if n < LENGTH_PREFIX_SIZE {
            return Err(FrameError::Truncated {
                expected: LENGTH_PREFIX_SIZE,
                actual: n,
            });
        }

        let (len, _) = read_varint(&prefix)
            .ok_or_else(|| FrameError::Corrupt("invalid length prefix".to_string()))?;
        if len < 0 || len as u64 > MAX_FRAME_LEN as u64 {
            return Err(FrameError::Corrupt(format!("invalid frame length {}", len)));
        }
        let len = len as usize;

        let mut body = vec![0u8; len];
        let n = read_full(&mut self.reader, &mut body)?;
        if n < len {
            return Err(FrameError::Truncated {
                expected: len,
                actual: n,
            });
        }

        let message = decode(&body)?;
        Ok(Some(Frame { message, len }))
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Fill `buf` as far as the reader allows, returning the bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn sample() -> Vec<RecordedMessage> {
        vec![
            RecordedMessage::new(1000, "a", vec![0x01]),
            RecordedMessage::new(1500, "b", vec![]),
            RecordedMessage::new(3000, "a", vec![0xAB, 0xCD]),
        ]
    }

    #[test]
    fn test_message_roundtrip() {
        for message in sample() {
            let bytes = encode(&message).unwrap();
            assert_eq!(decode(&bytes).unwrap(), message);
        }

        let odd = RecordedMessage::new(-42, "sensors/ümlaut/#raw", (0..=255).collect());
        assert_eq!(decode(&encode(&odd).unwrap()).unwrap(), odd);
    }

    #[test]
    fn test_varint_known_values() {
        let cases: [(i64, &[u8]); 5] = [
            (0, &[0x00]),
            (1, &[0x02]),
            (-1, &[0x01]),
            (63, &[0x7e]),
            (300, &[0xd8, 0x04]),
        ];
        for (value, expected) in cases {
            let mut buf = [0u8; LENGTH_PREFIX_SIZE];
            let n = put_varint(&mut buf, value);
            assert_eq!(&buf[..n], expected, "encoding {}", value);
            assert_eq!(read_varint(&buf), Some((value, n)));
        }

        let mut buf = [0u8; LENGTH_PREFIX_SIZE];
        assert_eq!(put_varint(&mut buf, i64::MIN), LENGTH_PREFIX_SIZE);
        assert_eq!(read_varint(&buf), Some((i64::MIN, LENGTH_PREFIX_SIZE)));
    }

    #[test]
    fn test_varint_overflow_rejected() {
        assert_eq!(read_varint(&[0xff; LENGTH_PREFIX_SIZE]), None);
        assert_eq!(read_varint(&[0x80, 0x80]), None);
    }

    #[test]
    fn test_prefix_is_fixed_width() {
        let message = RecordedMessage::new(1000, "a", vec![0x01]);
        let bytes = frame_bytes(&message).unwrap();
        let body_len = encode(&message).unwrap().len();

        assert_eq!(bytes.len(), LENGTH_PREFIX_SIZE + body_len);
        assert_eq!(bytes[0], (body_len as u8) << 1);
        assert!(bytes[1..LENGTH_PREFIX_SIZE].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_wire_format_is_named_map() {
        let bytes = encode(&RecordedMessage::new(1000, "a", vec![1])).unwrap();
        // fixmap with three entries, first key "Millis"
        assert_eq!(bytes[0], 0x83);
        assert_eq!(&bytes[1..8], b"\xa6Millis");
    }

    #[test]
    fn test_decode_fixed_width_millis() {
        // Other writers may encode millis as a full int64
        let mut body = vec![0x83, 0xa6];
        body.extend_from_slice(b"Millis");
        body.push(0xd3);
        body.extend_from_slice(&1_650_000_000_123i64.to_be_bytes());
        body.push(0xa5);
        body.extend_from_slice(b"Topic");
        body.push(0xa3);
        body.extend_from_slice(b"a/b");
        body.push(0xa7);
        body.extend_from_slice(b"Payload");
        body.extend_from_slice(&[0xc4, 0x02, 0xab, 0xcd]);

        let message = decode(&body).unwrap();
        assert_eq!(
            message,
            RecordedMessage::new(1_650_000_000_123, "a/b", vec![0xab, 0xcd])
        );
    }

    #[test]
    fn test_writer_reader_roundtrip() {
        let mut writer = FrameWriter::new(Vec::new());
        for message in sample() {
            writer.write_message(&message).unwrap();
        }
        assert_eq!(writer.frame_count(), 3);
        let buf = writer.finish().unwrap();

        let mut reader = FrameReader::new(Cursor::new(buf));
        for expected in sample() {
            let frame = reader.next_frame().unwrap().unwrap();
            assert_eq!(frame.len, encode(&expected).unwrap().len());
            assert_eq!(frame.message, expected);
        }
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_empty_input_is_clean_end() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_truncated_frames() {
        let bytes = frame_bytes(&RecordedMessage::new(1, "t", vec![9; 20])).unwrap();

        let mut reader = FrameReader::new(Cursor::new(bytes[..4].to_vec()));
        let err = reader.next_frame().unwrap_err();
        assert!(matches!(err, FrameError::Truncated { expected: LENGTH_PREFIX_SIZE, actual: 4 }));
        assert!(err.is_end_of_stream());

        let cut = bytes.len() - 3;
        let mut reader = FrameReader::new(Cursor::new(bytes[..cut].to_vec()));
        assert!(matches!(
            reader.next_frame(),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn test_corrupt_frames() {
        // Negative length
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        put_varint(&mut prefix, -5);
        let mut reader = FrameReader::new(Cursor::new(prefix.to_vec()));
        assert!(matches!(reader.next_frame(), Err(FrameError::Corrupt(_))));

        // Valid length, garbage body
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        put_varint(&mut prefix, 3);
        let mut bytes = prefix.to_vec();
        bytes.extend_from_slice(&[0xc1, 0xc1, 0xc1]);
        let mut reader = FrameReader::new(Cursor::new(bytes));
        let err = reader.next_frame().unwrap_err();
        assert!(matches!(err, FrameError::Corrupt(_)));
        assert!(err.is_end_of_stream());
    }

    #[test]
    fn test_frame_size_limit() {
        // Body bytes around the payload for a 32-bit length binary
        let overhead = encode(&RecordedMessage::new(1, "t", vec![0; 70_000]))
            .unwrap()
            .len()
            - 70_000;

        let largest = RecordedMessage::new(1, "t", vec![0; MAX_FRAME_LEN - overhead]);
        let mut writer = FrameWriter::new(Vec::new());
        assert_eq!(writer.write_message(&largest).unwrap(), MAX_FRAME_LEN);
        let buf = writer.finish().unwrap();
        let frame = FrameReader::new(Cursor::new(buf)).next_frame().unwrap().unwrap();
        assert_eq!(frame.len, MAX_FRAME_LEN);
        assert_eq!(frame.message.payload.len(), MAX_FRAME_LEN - overhead);

        let oversized = RecordedMessage::new(1, "t", vec![0; MAX_FRAME_LEN - overhead + 1]);
        let mut writer = FrameWriter::new(Vec::new());
        assert!(matches!(
            writer.write_message(&oversized),
            Err(FrameError::Encode(_))
        ));
        assert_eq!(writer.frame_count(), 0);
        assert_eq!(writer.bytes_written(), 0);
        assert!(writer.finish().unwrap().is_empty());
    }

    proptest::proptest! {
        #[test]
        fn prop_message_roundtrip(
            millis: i64,
            topic: String,
            payload in proptest::collection::vec(any::<u8>(), 0..1024)
        ) {
            let message = RecordedMessage::new(millis, topic, payload);
            prop_assert_eq!(&decode(&encode(&message).unwrap()).unwrap(), &message);

            let mut writer = FrameWriter::new(Vec::new());
            let len = writer.write_message(&message).unwrap();
            let buf = writer.finish().unwrap();
            prop_assert_eq!(buf.len(), LENGTH_PREFIX_SIZE + len);

            let mut reader = FrameReader::new(Cursor::new(buf));
            let frame = reader.next_frame().unwrap().unwrap();
            prop_assert_eq!(frame.len, len);
            prop_assert_eq!(frame.message, message);
            prop_assert!(reader.next_frame().unwrap().is_none());
        }
    }
}

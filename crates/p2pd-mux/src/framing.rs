//! Length-delimited framing for the daemon connection.
//!
//! Every message on the wire is prefixed by its length encoded as an unsigned
//! LEB128 varint:
//! ```text
//! <varint length><payload>
//! ```
//! The payload is the JSON encoding of a [`p2pd_types::Request`] or
//! [`p2pd_types::Response`]. A stock daemon expects protobuf payloads, so
//! JSON frames only interoperate with peers using this module. Frames longer
//! than the configured maximum are rejected in both directions.

use std::io::{self, BufReader, BufWriter, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Longest varint needed to encode a 64-bit length.
const MAX_VARINT_LEN: usize = 10;

/// Errors raised while reading or writing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame exceeded the configured maximum.
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Declared or actual payload length.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The length prefix was not a valid varint.
    #[error("malformed frame length prefix")]
    MalformedLength,

    /// The payload could not be encoded or decoded.
    #[error("message codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Reads length-delimited frames from a byte stream.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    max_message_size: usize,
}

impl<R: Read> FrameReader<R> {
    /// Wraps `reader`, rejecting frames longer than `max_message_size`.
    pub fn new(reader: R, max_message_size: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_message_size,
        }
    }

    /// Reads one frame payload (blocks until complete).
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between frames.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] for oversized frames,
    /// [`FrameError::MalformedLength`] for a corrupt prefix, and
    /// [`FrameError::Io`] when the stream fails or ends mid-frame.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let Some(length) = self.read_length()? else {
            return Ok(None);
        };
        if length > self.max_message_size {
            return Err(FrameError::TooLarge {
                size: length,
                max: self.max_message_size,
            });
        }
        let mut payload = vec![0_u8; length];
        self.reader.read_exact(&mut payload)?;
        Ok(Some(payload))
    }

    /// Reads and decodes one message.
    ///
    /// # Errors
    ///
    /// Returns any [`FrameError`] from [`Self::read_frame`], or
    /// [`FrameError::Codec`] when the payload does not decode as `T`.
    pub fn read_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>, FrameError> {
        self.read_frame()?
            .map(|payload| serde_json::from_slice(&payload))
            .transpose()
            .map_err(FrameError::from)
    }

    fn read_length(&mut self) -> Result<Option<usize>, FrameError> {
        let mut value: u64 = 0;
        for index in 0..MAX_VARINT_LEN {
            let Some(byte) = self.read_byte()? else {
                if index == 0 {
                    return Ok(None);
                }
                return Err(FrameError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed while reading frame length",
                )));
            };
            if index == MAX_VARINT_LEN - 1 && byte > 1 {
                return Err(FrameError::MalformedLength);
            }
            value |= u64::from(byte & 0x7F) << (index * 7);
            if byte & 0x80 == 0 {
                return usize::try_from(value)
                    .map(Some)
                    .map_err(|_| FrameError::MalformedLength);
            }
        }
        Err(FrameError::MalformedLength)
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut buffer = [0_u8; 1];
        loop {
            match self.reader.read(&mut buffer) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    let [byte] = buffer;
                    return Ok(Some(byte));
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
    }
}

/// Writes length-delimited frames to a byte stream.
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
    max_message_size: usize,
}

impl<W: Write> FrameWriter<W> {
    /// Wraps `writer`, refusing to emit frames longer than `max_message_size`.
    pub fn new(writer: W, max_message_size: usize) -> Self {
        Self {
            writer: BufWriter::new(writer),
            max_message_size,
        }
    }

    /// Writes and flushes one frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] without writing anything when the
    /// payload is oversized, or [`FrameError::Io`] if the stream fails.
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        if payload.len() > self.max_message_size {
            return Err(FrameError::TooLarge {
                size: payload.len(),
                max: self.max_message_size,
            });
        }
        let mut header = Vec::with_capacity(MAX_VARINT_LEN);
        encode_length(payload.len(), &mut header);
        self.writer.write_all(&header)?;
        self.writer.write_all(payload)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Encodes `message` and writes it as one frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Codec`] if encoding fails, otherwise as
    /// [`Self::write_frame`].
    pub fn write_message<T: Serialize>(&mut self, message: &T) -> Result<(), FrameError> {
        let payload = serde_json::to_vec(message)?;
        self.write_frame(&payload)
    }
}

/// Encodes `message` as a complete frame, length prefix included.
///
/// # Errors
///
/// Returns [`FrameError::Codec`] if the message cannot be serialised.
pub fn encode_message<T: Serialize>(message: &T) -> Result<Vec<u8>, FrameError> {
    let payload = serde_json::to_vec(message)?;
    let mut frame = Vec::with_capacity(payload.len() + MAX_VARINT_LEN);
    encode_length(payload.len(), &mut frame);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn encode_length(length: usize, out: &mut Vec<u8>) {
    let mut value = length;
    loop {
        let mut byte = low_seven_bits(value);
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn low_seven_bits(value: usize) -> u8 {
    u8::try_from(value & 0x7F).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use p2pd_types::{ProtocolId, Request, Response};
    use rstest::rstest;

    use super::*;

    fn reader_over(bytes: &[u8], max: usize) -> FrameReader<Cursor<Vec<u8>>> {
        FrameReader::new(Cursor::new(bytes.to_vec()), max)
    }

    #[rstest]
    #[case(0, &[0x00])]
    #[case(1, &[0x01])]
    #[case(127, &[0x7F])]
    #[case(128, &[0x80, 0x01])]
    #[case(300, &[0xAC, 0x02])]
    #[case(16_384, &[0x80, 0x80, 0x01])]
    fn encodes_lengths_as_leb128(#[case] length: usize, #[case] expected: &[u8]) {
        let mut out = Vec::new();
        encode_length(length, &mut out);
        assert_eq!(out, expected);
    }

    #[rstest]
    fn writes_prefix_then_payload() {
        let mut writer = FrameWriter::new(Vec::new(), 1024);
        writer.write_frame(b"hello").expect("write frame");
        let written = writer.writer.into_inner().expect("unwrap buffer");
        assert_eq!(written, b"\x05hello");
    }

    #[rstest]
    fn reads_consecutive_frames_then_clean_eof() {
        let mut reader = reader_over(b"\x02hi\x00\x03abc", 1024);

        assert_eq!(reader.read_frame().expect("first"), Some(b"hi".to_vec()));
        assert_eq!(reader.read_frame().expect("second"), Some(Vec::new()));
        assert_eq!(reader.read_frame().expect("third"), Some(b"abc".to_vec()));
        assert_eq!(reader.read_frame().expect("eof"), None);
    }

    #[rstest]
    fn rejects_oversized_frame_before_reading_payload() {
        let mut reader = reader_over(b"\x80\x01", 64);

        let result = reader.read_frame();

        assert!(matches!(
            result,
            Err(FrameError::TooLarge { size: 128, max: 64 })
        ));
    }

    #[rstest]
    fn refuses_to_write_oversized_frame() {
        let mut writer = FrameWriter::new(Vec::new(), 4);
        let result = writer.write_frame(b"too long");
        assert!(matches!(result, Err(FrameError::TooLarge { size: 8, max: 4 })));
    }

    #[rstest]
    fn eof_inside_length_prefix_is_an_io_error() {
        let mut reader = reader_over(b"\x80", 1024);
        assert!(matches!(reader.read_frame(), Err(FrameError::Io(_))));
    }

    #[rstest]
    fn eof_inside_payload_is_an_io_error() {
        let mut reader = reader_over(b"\x05abc", 1024);
        assert!(matches!(reader.read_frame(), Err(FrameError::Io(_))));
    }

    #[rstest]
    fn overlong_varint_is_malformed() {
        let mut reader = reader_over(&[0xFF; 11], usize::MAX);
        assert!(matches!(reader.read_frame(), Err(FrameError::MalformedLength)));
    }

    #[rstest]
    fn undecodable_payload_is_a_codec_error() {
        let mut reader = reader_over(b"\x03{{{", 1024);
        let result = reader.read_message::<Response>();
        assert!(matches!(result, Err(FrameError::Codec(_))));
    }

    #[rstest]
    fn encoded_message_is_readable_by_frame_reader() {
        let request = Request::add_unary_handler(ProtocolId::from("/echo/1.0.0"));
        let frame = encode_message(&request).expect("encode request");

        let mut reader = reader_over(&frame, 1024);
        let decoded: Request = reader
            .read_message()
            .expect("read request")
            .expect("frame present");

        assert_eq!(decoded, request);
    }

    #[rstest]
    fn payload_after_the_prefix_is_json() {
        let request = Request::add_unary_handler(ProtocolId::from("/echo/1.0.0"));
        let frame = encode_message(&request).expect("encode request");

        let payload = reader_over(&frame, 1024)
            .read_frame()
            .expect("read frame")
            .expect("frame present");
        let value: serde_json::Value = serde_json::from_slice(&payload).expect("JSON payload");

        assert!(value.is_object());
    }

    #[rstest]
    fn protobuf_payload_is_not_understood() {
        // Protobuf field 1 holding varint 10, framed as a daemon would.
        let mut reader = reader_over(&[0x02, 0x08, 0x0A], 1024);

        let result = reader.read_message::<Request>();

        assert!(matches!(result, Err(FrameError::Codec(_))));
    }
}

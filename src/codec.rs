use bytes::{Bytes, BytesMut};
use std::io;
use thiserror::Error as ThisError;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::frame::{self, Frame};

static CRLF: &[u8; 2] = b"\r\n";

/// Default upper bound for a single line or bulk payload.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Most the buffer grows ahead of a bulk payload that has not arrived yet.
const MAX_RESERVE: usize = 64 * 1024;

/// A malformed frame. The decoder drops whatever it had accumulated for the current frame and
/// continues with the next line, so these never end the stream.
#[derive(Debug, ThisError, PartialEq)]
pub enum ProtocolError {
    #[error("line is not terminated by CRLF: '{0}'")]
    MissingCrlf(String),
    #[error("invalid length: '{0}'")]
    InvalidLength(String),
    #[error("invalid integer: '{0}'")]
    InvalidInteger(String),
    #[error("invalid UTF-8 string")]
    InvalidUtf8,
    #[error("frame exceeds {0} bytes")]
    FrameTooLarge(usize),
    #[error("unexpected end of stream")]
    Truncated,
}

/// Terminal failure of the underlying byte source.
#[derive(Debug, ThisError)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Incremental RESP decoder and encoder.
///
/// Decoded items are `Result<Frame, ProtocolError>`: a protocol error is reported as an item and
/// decoding resumes at the next frame boundary, while I/O failures surface as the stream error
/// and end it.
#[derive(Debug)]
pub struct RespCodec {
    state: ReadState,
    max_frame_size: usize,
}

// Progress of the frame currently being read. Reset after every yielded item.
#[derive(Debug, Default)]
struct ReadState {
    reading_multi_line: bool,
    expected: usize,
    msg_type: u8,
    items: Vec<Frame>,
    // Length of the binary payload expected next, if any.
    bulk_len: Option<usize>,
}

enum Line {
    // A CRLF terminated line, terminator stripped.
    Text(Bytes),
    // A length-prefixed payload, terminator stripped.
    Payload(Bytes),
}

impl RespCodec {
    pub fn new(max_frame_size: usize) -> RespCodec {
        RespCodec {
            state: ReadState::default(),
            max_frame_size,
        }
    }

    fn fail(&mut self, err: ProtocolError) -> Result<Frame, ProtocolError> {
        trace!("protocol error: {}", err);
        self.state = ReadState::default();
        Err(err)
    }

    fn read_line(&mut self, src: &mut BytesMut) -> Result<Option<Line>, ProtocolError> {
        if let Some(len) = self.state.bulk_len {
            let needed = len + CRLF.len();
            if src.len() < needed {
                src.reserve((needed - src.len()).min(MAX_RESERVE));
                return Ok(None);
            }

            self.state.bulk_len = None;
            let mut chunk = src.split_to(needed);
            if &chunk[len..] != CRLF {
                return Err(ProtocolError::MissingCrlf(lossy(&chunk)));
            }
            chunk.truncate(len);

            return Ok(Some(Line::Payload(chunk.freeze())));
        }

        let Some(newline) = src.iter().position(|b| *b == b'\n') else {
            if src.len() > self.max_frame_size {
                src.clear();
                return Err(ProtocolError::FrameTooLarge(self.max_frame_size));
            }
            return Ok(None);
        };

        let mut line = src.split_to(newline + 1);
        if line.len() < CRLF.len() || line[line.len() - 2] != b'\r' {
            return Err(ProtocolError::MissingCrlf(lossy(&line)));
        }
        line.truncate(line.len() - CRLF.len());

        Ok(Some(Line::Text(line.freeze())))
    }

    // First line of a frame.
    fn read_header(&mut self, line: Bytes) -> Result<Option<Frame>, ProtocolError> {
        let Some(&marker) = line.first() else {
            // Blank lines between frames are ignored.
            return Ok(None);
        };

        match marker {
            b'*' => {
                let count = parse_length(&line[1..])?;
                match count {
                    0 => Ok(Some(Frame::Array(vec![]))),
                    -1 => Ok(Some(Frame::Null)),
                    n if n < 0 => Err(ProtocolError::InvalidLength(lossy(&line))),
                    n => {
                        let n = n as usize;
                        self.state.reading_multi_line = true;
                        self.state.expected = n;
                        self.state.msg_type = marker;
                        self.state.items = Vec::with_capacity(n.min(1024));
                        Ok(None)
                    }
                }
            }
            b'$' => {
                let len = parse_length(&line[1..])?;
                match len {
                    -1 => Ok(Some(Frame::Null)),
                    n if n < 0 => Err(ProtocolError::InvalidLength(lossy(&line))),
                    n => {
                        self.state.reading_multi_line = true;
                        self.state.expected = 1;
                        self.state.msg_type = marker;
                        self.expect_payload(n as usize)?;
                        Ok(None)
                    }
                }
            }
            b'+' => Ok(Some(Frame::Simple(utf8(&line[1..])?))),
            b'-' => Ok(Some(Frame::Error(utf8(&line[1..])?))),
            b':' => {
                let integer = std::str::from_utf8(&line[1..])
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| ProtocolError::InvalidInteger(lossy(&line)))?;
                Ok(Some(Frame::Integer(integer)))
            }
            // Inline command, e.g. `PING` typed into telnet.
            _ => {
                let args = line
                    .split(|b| *b == b' ')
                    .filter(|part| !part.is_empty())
                    .map(|part| Frame::Bulk(line.slice_ref(part)))
                    .collect();
                Ok(Some(Frame::Array(args)))
            }
        }
    }

    // Any subsequent line of an array or bulk string.
    fn read_body(&mut self, line: Line) -> Result<Option<Frame>, ProtocolError> {
        match line {
            Line::Payload(payload) => self.state.items.push(Frame::Bulk(payload)),
            Line::Text(line) => match line.first() {
                Some(b'$') => match parse_length(&line[1..])? {
                    -1 => self.state.items.push(Frame::Null),
                    n if n < 0 => return Err(ProtocolError::InvalidLength(lossy(&line))),
                    n => {
                        self.expect_payload(n as usize)?;
                        return Ok(None);
                    }
                },
                _ => self.state.items.push(Frame::Bulk(line)),
            },
        }

        if self.state.items.len() < self.state.expected {
            return Ok(None);
        }

        let mut items = std::mem::take(&mut self.state.items);
        let frame = match self.state.msg_type {
            b'$' => items.pop().unwrap_or(Frame::Null),
            _ => Frame::Array(items),
        };

        Ok(Some(frame))
    }

    fn expect_payload(&mut self, len: usize) -> Result<(), ProtocolError> {
        if len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge(self.max_frame_size));
        }
        self.state.bulk_len = Some(len);
        Ok(())
    }
}

impl Default for RespCodec {
    fn default() -> Self {
        RespCodec::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for RespCodec {
    type Item = Result<Frame, ProtocolError>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let line = match self.read_line(src) {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(err) => return Ok(Some(self.fail(err))),
            };

            let parsed = if self.state.reading_multi_line {
                self.read_body(line)
            } else {
                match line {
                    Line::Text(line) => self.read_header(line),
                    Line::Payload(payload) => Ok(Some(Frame::Bulk(payload))),
                }
            };

            match parsed {
                Ok(Some(frame)) => {
                    self.state = ReadState::default();
                    return Ok(Some(Ok(frame)));
                }
                Ok(None) => continue,
                Err(err) => return Ok(Some(self.fail(err))),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }

        let pending = self.state.reading_multi_line || self.state.bulk_len.is_some();
        if src.is_empty() && !pending {
            return Ok(None);
        }

        src.clear();
        Ok(Some(self.fail(ProtocolError::Truncated)))
    }
}

impl Encoder<Frame> for RespCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        frame.write_to(dst);
        Ok(())
    }
}

impl<'a> Encoder<&'a [Bytes]> for RespCodec {
    type Error = CodecError;

    fn encode(&mut self, cmd_line: &'a [Bytes], dst: &mut BytesMut) -> Result<(), Self::Error> {
        frame::write_cmd_line(cmd_line, dst);
        Ok(())
    }
}

fn parse_length(src: &[u8]) -> Result<i64, ProtocolError> {
    std::str::from_utf8(src)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ProtocolError::InvalidLength(lossy(src)))
}

fn utf8(src: &[u8]) -> Result<String, ProtocolError> {
    String::from_utf8(src.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

fn lossy(src: &[u8]) -> String {
    String::from_utf8_lossy(src).trim_end().to_string()
}

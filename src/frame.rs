// https://redis.io/docs/reference/protocol-spec

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

static CRLF: &[u8; 2] = b"\r\n";

/// A command line as it travels through the engine: the command name followed by its arguments.
pub type CmdLine = Vec<Bytes>;

/// Builds a command line out of string parts.
pub fn cmd_line(parts: &[&str]) -> CmdLine {
    parts
        .iter()
        .map(|part| Bytes::copy_from_slice(part.as_bytes()))
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    pub fn ok() -> Frame {
        Frame::Simple("OK".to_string())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Frame {
        Frame::Bulk(data.into())
    }

    /// Wraps a command line into the array of bulk strings clients send.
    pub fn from_cmd_line(cmd_line: &[Bytes]) -> Frame {
        Frame::Array(cmd_line.iter().cloned().map(Frame::Bulk).collect())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }

    /// Converts an array of strings back into a command line. Null elements become empty
    /// arguments; nested frames are rejected.
    pub fn into_cmd_line(self) -> Option<CmdLine> {
        let Frame::Array(items) = self else {
            return None;
        };

        items
            .into_iter()
            .map(|item| match item {
                Frame::Bulk(bytes) => Some(bytes),
                Frame::Simple(s) => Some(Bytes::from(s)),
                Frame::Integer(i) => Some(Bytes::from(i.to_string())),
                Frame::Null => Some(Bytes::new()),
                Frame::Error(_) | Frame::Array(_) => None,
            })
            .collect()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut dst = BytesMut::new();
        self.write_to(&mut dst);
        dst.to_vec()
    }

    /// Appends the wire representation of the frame to `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                dst.put_u8(b'+');
                dst.put_slice(s.as_bytes());
                dst.put_slice(CRLF);
            }
            Frame::Error(s) => {
                dst.put_u8(b'-');
                dst.put_slice(s.as_bytes());
                dst.put_slice(CRLF);
            }
            Frame::Integer(i) => {
                dst.put_u8(b':');
                dst.put_slice(i.to_string().as_bytes());
                dst.put_slice(CRLF);
            }
            Frame::Bulk(bytes) => write_bulk(bytes, dst),
            Frame::Null => dst.put_slice(b"$-1\r\n"),
            Frame::Array(arr) => {
                write_array_len(arr.len(), dst);
                for frame in arr {
                    frame.write_to(dst);
                }
            }
        }
    }
}

/// Encodes a command line as an array of bulk strings without building intermediate frames.
pub fn write_cmd_line(cmd_line: &[Bytes], dst: &mut BytesMut) {
    write_array_len(cmd_line.len(), dst);
    for arg in cmd_line {
        write_bulk(arg, dst);
    }
}

fn write_bulk(bytes: &[u8], dst: &mut BytesMut) {
    let length_str = bytes.len().to_string();
    dst.reserve(1 + length_str.len() + CRLF.len() + bytes.len() + CRLF.len());
    dst.put_u8(b'$');
    dst.put_slice(length_str.as_bytes());
    dst.put_slice(CRLF);
    dst.put_slice(bytes);
    dst.put_slice(CRLF);
}

fn write_array_len(len: usize, dst: &mut BytesMut) {
    dst.put_u8(b'*');
    dst.put_slice(len.to_string().as_bytes());
    dst.put_slice(CRLF);
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

// Used for logging only, binary payloads are rendered lossily.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Null => write!(f, "$-1"),
            Frame::Array(arr) => {
                write!(f, "*{}", arr.len())?;
                for frame in arr {
                    write!(f, " {}", frame)?;
                }
                Ok(())
            }
        }
    }
}

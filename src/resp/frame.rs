//! RESP frame representation and the buffer-level parser (C1).
//!
//! A [`Frame`] is a tagged value mirroring the five wire types: simple
//! string, error, integer, bulk string (possibly null), and array. Parsing
//! works against an in-memory cursor over already-buffered bytes so a
//! connection can tell the difference between "not enough bytes yet" and
//! "this is malformed" without touching the socket.

use bytes::{Buf, Bytes};
use std::convert::TryInto;
use std::fmt;
use std::io::Cursor;

use crate::error::FrameError;

/// Parser limits, independently configurable (spec §4.1).
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_bulk_size: usize,
    pub max_command_size: usize,
    pub max_command_args: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_bulk_size: 8 * 1024 * 1024,
            max_command_size: 1024 * 1024,
            max_command_args: 256,
        }
    }
}

#[derive(Clone, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "Simple({s:?})"),
            Frame::Error(s) => write!(f, "Error({s:?})"),
            Frame::Integer(n) => write!(f, "Integer({n})"),
            Frame::Bulk(b) => write!(f, "Bulk({:?})", String::from_utf8_lossy(b)),
            Frame::Null => write!(f, "Null"),
            Frame::Array(items) => write!(f, "Array({items:?})"),
        }
    }
}

impl Frame {
    pub fn array() -> Frame {
        Frame::Array(Vec::new())
    }

    pub fn push_bulk(&mut self, bytes: Bytes) {
        match self {
            Frame::Array(items) => items.push(Frame::Bulk(bytes)),
            _ => panic!("not an array frame"),
        }
    }

    pub fn push_int(&mut self, value: i64) {
        match self {
            Frame::Array(items) => items.push(Frame::Integer(value)),
            _ => panic!("not an array frame"),
        }
    }

    /// Checks whether a complete frame is present at the cursor's current
    /// position without allocating any of its contents. Advances the
    /// cursor past the frame on success.
    pub fn check(src: &mut Cursor<&[u8]>, limits: &Limits) -> Result<(), FrameError> {
        match get_u8(src)? {
            b'+' | b'-' => {
                get_line(src)?;
                Ok(())
            }
            b':' => {
                get_decimal(src)?;
                Ok(())
            }
            b'$' => {
                let len = get_declared_len(src, limits.max_bulk_size)?;
                match len {
                    None => Ok(()),
                    Some(len) => {
                        if src.remaining() < len + 2 {
                            return Err(FrameError::Incomplete);
                        }
                        skip(src, len + 2)
                    }
                }
            }
            b'*' => {
                let len = get_int(src)?;
                if len < 0 {
                    return Err(FrameError::Malformed("negative array length".into()));
                }
                let len = len as usize;
                if len > limits.max_command_args {
                    return Err(FrameError::ProtocolLimit(format!(
                        "array length {len} exceeds max_command_args"
                    )));
                }
                let mut total_bulk_bytes = 0usize;
                for _ in 0..len {
                    check_element(src, limits, &mut total_bulk_bytes)?;
                }
                Ok(())
            }
            actual => Err(FrameError::Malformed(format!(
                "invalid frame type byte `{}`",
                actual as char
            ))),
        }
    }

    /// Parses a frame at the cursor's current position. Must only be called
    /// after `check` has confirmed a complete, within-limits frame is
    /// present, so no further bounds/limit checking happens here.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Frame, FrameError> {
        match get_u8(src)? {
            b'+' => {
                let line = get_line(src)?;
                let string = String::from_utf8_lossy(line).to_string();
                Ok(Frame::Simple(string))
            }
            b'-' => {
                let line = get_line(src)?;
                let string = String::from_utf8_lossy(line).to_string();
                Ok(Frame::Error(string))
            }
            b':' => Ok(Frame::Integer(get_decimal(src)?)),
            b'$' => {
                let len = get_int(src)?;
                if len == -1 {
                    return Ok(Frame::Null);
                }
                let len = len as usize;
                let n = len + 2;
                if src.remaining() < n {
                    return Err(FrameError::Incomplete);
                }
                let data = Bytes::copy_from_slice(&src.chunk()[..len]);
                skip(src, n)?;
                Ok(Frame::Bulk(data))
            }
            b'*' => {
                let len = get_int(src)?.try_into().unwrap_or(0usize);
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    out.push(Frame::parse(src)?);
                }
                Ok(Frame::Array(out))
            }
            actual => Err(FrameError::Malformed(format!(
                "invalid frame type byte `{}`",
                actual as char
            ))),
        }
    }

    /// Serializes this frame into `buf`, recursing for arrays.
    pub fn serialize(&self, buf: &mut Vec<u8>) {
        match self {
            Frame::Simple(s) => {
                buf.push(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Frame::Error(s) => {
                buf.push(b'-');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Frame::Integer(n) => {
                buf.push(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Frame::Null => buf.extend_from_slice(b"$-1\r\n"),
            Frame::Bulk(data) => {
                buf.push(b'$');
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            Frame::Array(items) => {
                buf.push(b'*');
                buf.extend_from_slice(items.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                for item in items {
                    item.serialize(buf);
                }
            }
        }
    }

    /// Flattens a top-level command array into its bulk-string arguments.
    /// Per spec §4.6, the server only accepts arrays of bulk strings as
    /// inbound commands.
    pub fn into_command_args(self) -> Result<Vec<Bytes>, FrameError> {
        match self {
            Frame::Array(items) => items
                .into_iter()
                .map(|f| match f {
                    Frame::Bulk(b) => Ok(b),
                    other => Err(FrameError::Malformed(format!(
                        "expected bulk string in command array, got {other:?}"
                    ))),
                })
                .collect(),
            other => Err(FrameError::Malformed(format!(
                "expected array frame, got {other:?}"
            ))),
        }
    }
}

fn check_element(
    src: &mut Cursor<&[u8]>,
    limits: &Limits,
    total_bulk_bytes: &mut usize,
) -> Result<(), FrameError> {
    match get_u8(src)? {
        b'$' => {
            let len = get_declared_len(src, limits.max_bulk_size)?;
            if let Some(len) = len {
                *total_bulk_bytes += len;
                if *total_bulk_bytes > limits.max_command_size {
                    return Err(FrameError::ProtocolLimit(format!(
                        "summed bulk body size exceeds max_command_size ({})",
                        limits.max_command_size
                    )));
                }
                if src.remaining() < len + 2 {
                    return Err(FrameError::Incomplete);
                }
                skip(src, len + 2)?;
            }
            Ok(())
        }
        actual => Err(FrameError::Malformed(format!(
            "expected bulk string in command array, got `{}`",
            actual as char
        ))),
    }
}

/// Reads the `$<len>\r\n` header and rejects it against `max_bulk_size`
/// BEFORE any allocation of the declared size (spec §4.1). Returns `None`
/// for the null bulk string (`$-1`).
fn get_declared_len(src: &mut Cursor<&[u8]>, max_bulk_size: usize) -> Result<Option<usize>, FrameError> {
    let len = get_int(src)?;
    if len == -1 {
        return Ok(None);
    }
    if len < 0 {
        return Err(FrameError::Malformed("negative bulk length".into()));
    }
    let len = len as usize;
    if len > max_bulk_size {
        return Err(FrameError::ProtocolLimit(format!(
            "bulk length {len} exceeds max_bulk_size {max_bulk_size}"
        )));
    }
    Ok(Some(len))
}

fn get_u8(src: &mut Cursor<&[u8]>) -> Result<u8, FrameError> {
    if !src.has_remaining() {
        return Err(FrameError::Incomplete);
    }
    Ok(src.get_u8())
}

fn skip(src: &mut Cursor<&[u8]>, n: usize) -> Result<(), FrameError> {
    if src.remaining() < n {
        return Err(FrameError::Incomplete);
    }
    src.advance(n);
    Ok(())
}

fn get_int(src: &mut Cursor<&[u8]>) -> Result<i64, FrameError> {
    let line = get_line(src)?;
    atoi(line)
}

fn get_decimal(src: &mut Cursor<&[u8]>) -> Result<i64, FrameError> {
    get_int(src)
}

fn atoi(line: &[u8]) -> Result<i64, FrameError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| FrameError::Malformed(format!("non-numeric length field {:?}", String::from_utf8_lossy(line))))
}

/// Finds the `\r\n`-terminated line starting at the cursor, without
/// allocating, and advances the cursor past the terminator.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], FrameError> {
    let start = src.position() as usize;
    let data: &'a [u8] = src.get_ref();
    let end = data.len();

    let mut i = start;
    while i + 1 < end {
        if data[i] == b'\r' && data[i + 1] == b'\n' {
            src.set_position((i + 2) as u64);
            return Ok(&data[start..i]);
        }
        i += 1;
    }
    Err(FrameError::Incomplete)
}

//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode outgoing commands and incrementally decode store replies
//! from a growable read buffer.
//!
//! ## Design Principles
//! 1. **Incremental Parsing**: `decode` returns `Ok(None)` until a complete
//!    frame is buffered, and consumes nothing in that case.
//! 2. **Buffer Reuse**: Callers own the read/write buffers.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use bytes::{Buf, Bytes, BytesMut};

use kvb_common::{CommandResult, Value};

use crate::error::{ClientError, ClientResult};

/// RESP response value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style responses.
    Simple(Vec<u8>),
    /// -ERR ... responses.
    Error(Vec<u8>),
    /// :123 responses.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays, with None for the null array.
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Returns true for `-ERR`-style replies.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Error message as text, if this is an error reply.
    pub fn error_message(&self) -> Option<String> {
        match self {
            RespValue::Error(message) => Some(String::from_utf8_lossy(message).into_owned()),
            _ => None,
        }
    }
}

impl From<RespValue> for CommandResult {
    fn from(value: RespValue) -> Self {
        match value {
            RespValue::Simple(text) => {
                CommandResult::Value(Value::Status(String::from_utf8_lossy(&text).into_owned()))
            }
            RespValue::Error(message) => {
                CommandResult::Error(String::from_utf8_lossy(&message).into_owned())
            }
            RespValue::Integer(value) => CommandResult::Value(Value::Integer(value)),
            RespValue::Bulk(Some(data)) => CommandResult::Value(Value::Bytes(Bytes::from(data))),
            RespValue::Bulk(None) | RespValue::Array(None) => CommandResult::Nil,
            RespValue::Array(Some(items)) => CommandResult::Value(Value::Array(
                items.into_iter().map(CommandResult::from).collect(),
            )),
        }
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Decodes one RESP value from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer holds only a partial frame; the buffer
/// is left untouched so more bytes can be appended.
pub fn decode(buf: &mut BytesMut) -> ClientResult<Option<RespValue>> {
    match parse_value(&buf[..], 0)? {
        Some((value, consumed)) => {
            buf.advance(consumed);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn parse_value(data: &[u8], pos: usize) -> ClientResult<Option<(RespValue, usize)>> {
    let (line, next) = match read_line(data, pos) {
        Some(found) => found,
        None => return Ok(None),
    };
    if line.is_empty() {
        return Err(ClientError::Protocol("empty reply line".to_string()));
    }

    match line[0] {
        b'+' => Ok(Some((RespValue::Simple(line[1..].to_vec()), next))),
        b'-' => Ok(Some((RespValue::Error(line[1..].to_vec()), next))),
        b':' => Ok(Some((RespValue::Integer(parse_i64(&line[1..])?), next))),
        b'$' => {
            let len = parse_i64(&line[1..])?;
            parse_bulk(data, next, len)
        }
        b'*' => {
            let len = parse_i64(&line[1..])?;
            parse_array(data, next, len)
        }
        other => Err(ClientError::Protocol(format!(
            "unexpected reply type byte 0x{:02x}",
            other
        ))),
    }
}

fn parse_bulk(data: &[u8], start: usize, len: i64) -> ClientResult<Option<(RespValue, usize)>> {
    if len < 0 {
        return Ok(Some((RespValue::Bulk(None), start)));
    }
    let end = start
        .checked_add(len as usize)
        .ok_or_else(|| ClientError::Protocol("bulk length overflow".to_string()))?;
    if data.len() < end.saturating_add(2) {
        return Ok(None);
    }
    if &data[end..end + 2] != b"\r\n" {
        return Err(ClientError::Protocol("bulk string missing CRLF".to_string()));
    }
    Ok(Some((RespValue::Bulk(Some(data[start..end].to_vec())), end + 2)))
}

fn parse_array(data: &[u8], start: usize, len: i64) -> ClientResult<Option<(RespValue, usize)>> {
    if len < 0 {
        return Ok(Some((RespValue::Array(None), start)));
    }

    let mut items = Vec::with_capacity(len.min(1024) as usize);
    let mut pos = start;
    for _ in 0..len {
        match parse_value(data, pos)? {
            Some((item, next)) => {
                items.push(item);
                pos = next;
            }
            None => return Ok(None),
        }
    }
    Ok(Some((RespValue::Array(Some(items)), pos)))
}

/// Finds the CRLF-terminated line starting at `pos`.
///
/// Returns the line without its terminator and the offset just past it.
fn read_line(data: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = data.get(pos..)?;
    let idx = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..idx], pos + idx + 2))
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    let (negative, digits) = match data.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, data),
        None => return Err(ClientError::Protocol("empty integer".to_string())),
    };
    if digits.is_empty() {
        return Err(ClientError::Protocol("invalid integer".to_string()));
    }

    // Accumulate as a negative number so i64::MIN is representable.
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ClientError::Protocol("invalid integer".to_string()));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_sub((b - b'0') as i64))
            .ok_or_else(|| ClientError::Protocol("integer out of range".to_string()))?;
    }

    if negative {
        Ok(value)
    } else {
        value
            .checked_neg()
            .ok_or_else(|| ClientError::Protocol("integer out of range".to_string()))
    }
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}

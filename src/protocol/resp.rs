//! RESP2 parser and encoder
//!
//! The parser works on a borrowed slice and only advances the caller's buffer
//! once a whole frame has been decoded, so partial frames stay buffered.

use super::types::{RespError, RespValue};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const CRLF: &[u8] = b"\r\n";

/// Upper bound for a single bulk string (matches the real server's proto-max-bulk-len)
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Deepest array nesting accepted; requests themselves are flat
const MAX_DEPTH: usize = 32;

/// RESP2 Parser
pub struct RespParser;

impl RespParser {
    /// Parse one RESP value from the front of `buf`.
    ///
    /// Returns Ok(Some(value)) and consumes the frame if it is complete,
    /// Ok(None) without consuming anything if more data is needed,
    /// Err(e) if the bytes are not valid RESP.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        match Self::parse_at(buf, 0, 0)? {
            Some((value, consumed)) => {
                buf.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn parse_at(buf: &[u8], pos: usize, depth: usize) -> Result<Option<(RespValue, usize)>, RespError> {
        let Some(&prefix) = buf.get(pos) else {
            return Ok(None);
        };

        let Some((line, after_line)) = Self::line_at(buf, pos + 1) else {
            return Ok(None);
        };

        match prefix {
            b'+' => Ok(Some((RespValue::SimpleString(Self::utf8(line)?), after_line))),
            b'-' => Ok(Some((RespValue::Error(Self::utf8(line)?), after_line))),
            b':' => Ok(Some((RespValue::Integer(Self::number(line)?), after_line))),
            b'$' => {
                let len = Self::number(line)?;
                if len == -1 {
                    return Ok(Some((RespValue::Null, after_line)));
                }
                if !(0..=MAX_BULK_LEN).contains(&len) {
                    return Err(RespError::InvalidProtocol(format!(
                        "invalid bulk length {}",
                        len
                    )));
                }
                let end = after_line + len as usize;
                if buf.len() < end + CRLF.len() {
                    return Ok(None);
                }
                if &buf[end..end + CRLF.len()] != CRLF {
                    return Err(RespError::InvalidProtocol(
                        "missing CRLF after bulk string data".to_string(),
                    ));
                }
                let data = Bytes::copy_from_slice(&buf[after_line..end]);
                Ok(Some((RespValue::BulkString(data), end + CRLF.len())))
            }
            b'*' => {
                let count = Self::number(line)?;
                if count == -1 {
                    return Ok(Some((RespValue::NullArray, after_line)));
                }
                if count < 0 {
                    return Err(RespError::InvalidProtocol(format!(
                        "invalid multibulk length {}",
                        count
                    )));
                }
                if depth >= MAX_DEPTH {
                    return Err(RespError::InvalidProtocol(
                        "arrays nested too deeply".to_string(),
                    ));
                }
                let mut elements = Vec::with_capacity((count as usize).min(1024));
                let mut cursor = after_line;
                for _ in 0..count {
                    match Self::parse_at(buf, cursor, depth + 1)? {
                        Some((value, next)) => {
                            elements.push(value);
                            cursor = next;
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some((RespValue::Array(elements), cursor)))
            }
            other => Err(RespError::InvalidProtocol(format!(
                "expected '*', got '{}'",
                other as char
            ))),
        }
    }

    /// Find the line starting at `start`; returns it without CRLF plus the offset after CRLF.
    fn line_at(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
        let rest = buf.get(start..)?;
        let idx = rest.windows(2).position(|w| w == CRLF)?;
        Some((&rest[..idx], start + idx + CRLF.len()))
    }

    fn utf8(line: &[u8]) -> Result<String, RespError> {
        String::from_utf8(line.to_vec()).map_err(|_| RespError::InvalidUtf8)
    }

    fn number(line: &[u8]) -> Result<i64, RespError> {
        std::str::from_utf8(line)
            .map_err(|_| RespError::InvalidUtf8)?
            .parse::<i64>()
            .map_err(|_| RespError::InvalidLength)
    }
}

/// RESP2 Encoder
pub struct RespEncoder;

impl RespEncoder {
    /// Encode a RESP value to bytes
    pub fn encode(value: &RespValue) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_to(&mut buf, value);
        buf.freeze()
    }

    /// Encode a RESP value into an existing buffer
    pub fn encode_to(buf: &mut BytesMut, value: &RespValue) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Error(e) => {
                buf.put_u8(b'-');
                buf.put_slice(e.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Integer(i) => {
                buf.put_u8(b':');
                buf.put_slice(i.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::BulkString(bytes) => {
                buf.put_u8(b'$');
                buf.put_slice(bytes.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(bytes);
                buf.put_slice(CRLF);
            }
            RespValue::Null => buf.put_slice(b"$-1\r\n"),
            RespValue::NullArray => buf.put_slice(b"*-1\r\n"),
            RespValue::Array(arr) => {
                buf.put_u8(b'*');
                buf.put_slice(arr.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for elem in arr {
                    Self::encode_to(buf, elem);
                }
            }
        }
    }
}

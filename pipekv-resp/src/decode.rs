//! # Reply Parser
//!
//! Purpose: Read one complete RESP2 value from a buffered stream into a
//! typed [`Reply`], reusing a caller-supplied line buffer between calls.

use std::io::BufRead;

use crate::error::WireError;
use crate::reply::Reply;

/// Reads one RESP2 value from the buffered reader.
///
/// `line_buf` is scratch space for header lines; it is cleared on entry and
/// may hold arbitrary garbage afterwards.
pub fn read_reply<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> Result<Reply, WireError> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(WireError::Frame("empty frame line"));
    }

    match line_buf[0] {
        b'+' => Ok(Reply::Simple(line_buf[1..].to_vec())),
        b'-' => Ok(Reply::Error(line_buf[1..].to_vec())),
        b':' => Ok(Reply::Integer(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            read_bulk_body(reader, len)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            read_array_body(reader, len, line_buf)
        }
        _ => Err(WireError::Frame("unknown frame type")),
    }
}

fn read_bulk_body<R: BufRead>(reader: &mut R, len: i64) -> Result<Reply, WireError> {
    if len < 0 {
        return Ok(Reply::Bulk(None));
    }

    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(WireError::Frame("bulk string missing trailing CRLF"));
    }
    Ok(Reply::Bulk(Some(data)))
}

fn read_array_body<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> Result<Reply, WireError> {
    if len <= 0 {
        return Ok(Reply::Array(Vec::new()));
    }

    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        items.push(read_reply(reader, line_buf)?);
    }
    Ok(Reply::Array(items))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> Result<(), WireError> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(WireError::Frame("unexpected end of stream"));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(WireError::Frame("frame line missing CRLF"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> Result<i64, WireError> {
    if data.is_empty() {
        return Err(WireError::Frame("empty length field"));
    }
    let mut negative = false;
    let mut idx = 0;
    if data[0] == b'-' {
        negative = true;
        idx = 1;
    }

    let mut value: i64 = 0;
    while idx < data.len() {
        let b = data[idx];
        if !b.is_ascii_digit() {
            return Err(WireError::Frame("non-digit in length field"));
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
        idx += 1;
    }

    if negative {
        Ok(-value)
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(input: &[u8]) -> Reply {
        let mut reader = Cursor::new(input.to_vec());
        let mut line = Vec::new();
        read_reply(&mut reader, &mut line).unwrap()
    }

    #[test]
    fn parses_simple_string() {
        assert_eq!(parse(b"+OK\r\n"), Reply::Simple(b"OK".to_vec()));
    }

    #[test]
    fn parses_error() {
        assert_eq!(parse(b"-ERR bad\r\n"), Reply::Error(b"ERR bad".to_vec()));
    }

    #[test]
    fn parses_integer() {
        assert_eq!(parse(b":42\r\n"), Reply::Integer(42));
        assert_eq!(parse(b":-7\r\n"), Reply::Integer(-7));
    }

    #[test]
    fn parses_bulk_string() {
        assert_eq!(parse(b"$5\r\nhello\r\n"), Reply::Bulk(Some(b"hello".to_vec())));
    }

    #[test]
    fn parses_null_bulk_string() {
        assert_eq!(parse(b"$-1\r\n"), Reply::Bulk(None));
    }

    #[test]
    fn parses_nested_array() {
        let reply = parse(b"*2\r\n$3\r\nfoo\r\n:9\r\n");
        assert_eq!(
            reply,
            Reply::Array(vec![Reply::Bulk(Some(b"foo".to_vec())), Reply::Integer(9)])
        );
    }

    #[test]
    fn rejects_unknown_frame_marker() {
        let mut reader = Cursor::new(b"?what\r\n".to_vec());
        let mut line = Vec::new();
        let err = read_reply(&mut reader, &mut line).unwrap_err();
        assert!(matches!(err, WireError::Frame(_)));
    }

    #[test]
    fn rejects_truncated_stream() {
        let mut reader = Cursor::new(b"$5\r\nhe".to_vec());
        let mut line = Vec::new();
        assert!(read_reply(&mut reader, &mut line).is_err());
    }
}

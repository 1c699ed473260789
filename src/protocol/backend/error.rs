//! Error and notice response field parsing.
//!
//! Both messages are a run of `{tag: u8, value: cstring}` records terminated
//! by a single zero byte. The sentinel, not buffer exhaustion, ends the scan.

use crate::error::{Result, ServerError};
use crate::protocol::codec::read_cstr;

/// Parse ErrorResponse/NoticeResponse fields from payload.
///
/// Unknown field tags are kept verbatim so nothing the server said is lost.
pub fn parse_fields(payload: &[u8]) -> Result<ServerError> {
    let mut fields = std::collections::HashMap::new();
    let mut data = payload;

    while let Some((&tag, rest)) = data.split_first() {
        if tag == 0 {
            break;
        }
        let (value, rest) = read_cstr(rest)?;
        fields.insert(tag, value.to_string());
        data = rest;
    }

    Ok(ServerError::new(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::field_type;

    fn record(tag: u8, value: &str) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(value.as_bytes());
        out.push(0);
        out
    }

    #[test]
    fn test_parse_fields() {
        let mut payload = Vec::new();
        payload.extend(record(b'S', "ERROR"));
        payload.extend(record(b'C', "42601"));
        payload.extend(record(b'M', "syntax error at or near \"SELECTx\""));
        payload.extend(record(b'P', "1"));
        payload.push(0);

        let err = parse_fields(&payload).unwrap();
        assert_eq!(err.severity(), "ERROR");
        assert_eq!(err.code(), "42601");
        assert!(err.message().contains("syntax error"));
        assert_eq!(err.position(), Some(1));
    }

    #[test]
    fn test_unknown_tags_preserved() {
        let mut payload = Vec::new();
        payload.extend(record(b'M', "hello"));
        payload.extend(record(b'Y', "mystery"));
        payload.push(0);

        let err = parse_fields(&payload).unwrap();
        assert_eq!(err.get(b'Y'), Some("mystery"));
        assert_eq!(err.get(field_type::MESSAGE), Some("hello"));
    }

    #[test]
    fn test_sentinel_stops_scan() {
        // Bytes after the sentinel must be ignored, not parsed.
        let mut payload = Vec::new();
        payload.extend(record(b'M', "done"));
        payload.push(0);
        payload.extend_from_slice(b"garbage with no terminator");

        let err = parse_fields(&payload).unwrap();
        assert_eq!(err.message(), "done");
    }
}

//! Extended query protocol messages.

use crate::error::{Error, Result};
use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::Oid;

/// Write a Parse message to create a prepared statement.
///
/// - `name`: Statement name (empty string for unnamed statement)
/// - `query`: SQL query with $1, $2, ... placeholders
/// - `param_oids`: Parameter type OIDs (empty = let server infer)
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_i16(param_oids.len() as i16);
    for &oid in param_oids {
        msg.write_i32(oid as i32);
    }
    msg.finish();
}

fn check_formats(formats: &[i16], what: &str) -> Result<()> {
    for &f in formats {
        if f != 0 && f != 1 {
            return Err(Error::InvalidUsage(format!(
                "invalid {what} format code {f}: must be 0 (text) or 1 (binary)"
            )));
        }
    }
    Ok(())
}

/// Write a Bind message to create a portal from a prepared statement.
///
/// - `portal`: Portal name (empty string for unnamed portal)
/// - `statement`: Statement name
/// - `param_formats`: Per-parameter format codes; may be empty (all text),
///   a single code applied to every parameter, or one code per value
/// - `values`: Parameter values; `None` binds SQL NULL
/// - `result_formats`: Format codes for result columns, same 0/1/n rule
///
/// Format codes are validated locally so a malformed Bind never reaches the
/// server.
pub fn write_bind(
    buf: &mut Vec<u8>,
    portal: &str,
    statement: &str,
    param_formats: &[i16],
    values: &[Option<Vec<u8>>],
    result_formats: &[i16],
) -> Result<()> {
    check_formats(param_formats, "parameter")?;
    check_formats(result_formats, "result")?;
    if param_formats.len() > 1 && param_formats.len() != values.len() {
        return Err(Error::InvalidUsage(format!(
            "parameter format count {} does not match value count {}",
            param_formats.len(),
            values.len()
        )));
    }

    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);

    msg.write_cstr(portal);
    msg.write_cstr(statement);

    msg.write_i16(param_formats.len() as i16);
    for &f in param_formats {
        msg.write_i16(f);
    }

    msg.write_i16(values.len() as i16);
    for value in values {
        match value {
            Some(bytes) => {
                msg.write_i32(bytes.len() as i32);
                msg.write_bytes(bytes);
            }
            // NULL is a length of -1 with no data bytes.
            None => msg.write_i32(-1),
        }
    }

    msg.write_i16(result_formats.len() as i16);
    for &f in result_formats {
        msg.write_i16(f);
    }

    msg.finish();
    Ok(())
}

/// Write a Describe message to get metadata.
///
/// - `describe_type`: 'S' for statement, 'P' for portal
/// - `name`: Statement or portal name
pub fn write_describe(buf: &mut Vec<u8>, describe_type: u8, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.write_u8(describe_type);
    msg.write_cstr(name);
    msg.finish();
}

/// Write a Describe message for a statement.
pub fn write_describe_statement(buf: &mut Vec<u8>, name: &str) {
    write_describe(buf, b'S', name);
}

/// Write a Describe message for a portal.
pub fn write_describe_portal(buf: &mut Vec<u8>, name: &str) {
    write_describe(buf, b'P', name);
}

/// Write an Execute message to run a portal.
///
/// - `portal`: Portal name
/// - `max_rows`: Maximum number of rows to return (0 = unlimited); when the
///   limit is hit the server answers PortalSuspended instead of
///   CommandComplete
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_i32(max_rows as i32);
    msg.finish();
}

/// Write a Close message to release a statement or portal.
///
/// - `close_type`: 'S' for statement, 'P' for portal
/// - `name`: Statement or portal name
pub fn write_close(buf: &mut Vec<u8>, close_type: u8, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::CLOSE);
    msg.write_u8(close_type);
    msg.write_cstr(name);
    msg.finish();
}

/// Write a Close message for a statement.
pub fn write_close_statement(buf: &mut Vec<u8>, name: &str) {
    write_close(buf, b'S', name);
}

/// Write a Close message for a portal.
pub fn write_close_portal(buf: &mut Vec<u8>, name: &str) {
    write_close(buf, b'P', name);
}

/// Write a Sync message.
///
/// Flushes any extended-query error state and elicits ReadyForQuery.
pub fn write_sync(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::SYNC);
    msg.finish();
}

/// Write a Flush message.
///
/// Forces the server to send all buffered responses for the current
/// extended-query progress without requiring Sync.
pub fn write_flush(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::FLUSH);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    #[test]
    fn test_parse() {
        let mut buf = Vec::new();
        write_parse(
            &mut buf,
            "statement1",
            "select * from users where id = $1",
            &[oid::INT4],
        );

        let mut expected = vec![b'P', 0, 0, 0, 0x37];
        expected.extend_from_slice(b"statement1\0select * from users where id = $1\0");
        expected.extend_from_slice(&[0, 1, 0, 0, 0, 0x17]);
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_bind_all_text() {
        let mut buf = Vec::new();
        write_bind(
            &mut buf,
            "port1",
            "stmt1",
            &[],
            &[
                Some(b"this is a test".to_vec()),
                Some(b"hello".to_vec()),
            ],
            &[],
        )
        .unwrap();

        let mut expected = vec![b'B', 0, 0, 0, 0x2D];
        expected.extend_from_slice(b"port1\0stmt1\0");
        expected.extend_from_slice(&[0, 0]); // no parameter format codes
        expected.extend_from_slice(&[0, 2]);
        expected.extend_from_slice(&[0, 0, 0, 0x0E]);
        expected.extend_from_slice(b"this is a test");
        expected.extend_from_slice(&[0, 0, 0, 0x05]);
        expected.extend_from_slice(b"hello");
        expected.extend_from_slice(&[0, 0]); // no result format codes
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_bind_null_is_negative_length() {
        let mut buf = Vec::new();
        write_bind(&mut buf, "", "s", &[], &[None], &[]).unwrap();
        // the single value is encoded as length -1 with no bytes
        let tail = &buf[buf.len() - 6..];
        assert_eq!(tail, &[0xFF, 0xFF, 0xFF, 0xFF, 0, 0]);
    }

    #[test]
    fn test_bind_rejects_bad_format() {
        let mut buf = Vec::new();
        let err = write_bind(&mut buf, "", "s", &[2], &[None], &[]).unwrap_err();
        assert!(err.to_string().contains("format code"));
    }

    #[test]
    fn test_bind_rejects_format_count_mismatch() {
        let mut buf = Vec::new();
        let err = write_bind(&mut buf, "", "s", &[0, 0, 0], &[None, None], &[]).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_describe_statement() {
        let mut buf = Vec::new();
        write_describe_statement(&mut buf, "statement1");

        let mut expected = vec![b'D', 0, 0, 0, 0x10, b'S'];
        expected.extend_from_slice(b"statement1\0");
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_describe_portal() {
        let mut buf = Vec::new();
        write_describe_portal(&mut buf, "portal1");

        let mut expected = vec![b'D', 0, 0, 0, 0x0D, b'P'];
        expected.extend_from_slice(b"portal1\0");
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_execute() {
        let mut buf = Vec::new();
        write_execute(&mut buf, "portal1", 100);

        let mut expected = vec![b'E', 0, 0, 0, 0x10];
        expected.extend_from_slice(b"portal1\0");
        expected.extend_from_slice(&[0, 0, 0, 0x64]);
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_sync() {
        let mut buf = Vec::new();
        write_sync(&mut buf);
        assert_eq!(buf, [b'S', 0, 0, 0, 4]);
    }

    #[test]
    fn test_flush() {
        let mut buf = Vec::new();
        write_flush(&mut buf);
        assert_eq!(buf, [b'H', 0, 0, 0, 4]);
    }
}

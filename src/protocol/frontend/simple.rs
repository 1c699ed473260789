//! Simple query protocol messages.

use crate::protocol::codec::MessageBuilder;

/// Write a Query message.
///
/// The SQL may contain multiple semicolon-separated statements; the server
/// answers each in order and finishes with a single ReadyForQuery.
pub fn write_query(buf: &mut Vec<u8>, sql: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::QUERY);
    msg.write_cstr(sql);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query() {
        let mut buf = Vec::new();
        write_query(&mut buf, "select * from people");

        let mut expected = vec![b'Q', 0, 0, 0, 0x19];
        expected.extend_from_slice(b"select * from people\0");
        assert_eq!(buf, expected);
    }
}

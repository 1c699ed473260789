//! Scripted backend bytes for driving the engine without a server.
//!
//! Frames are built by hand rather than through the crate's encoders so the
//! tests stay independent of the code under test.

#![allow(dead_code)]

/// A backend frame: type byte, length (counting itself), payload.
pub fn frame(type_byte: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![type_byte];
    out.extend_from_slice(&((payload.len() + 4) as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn auth_ok() -> Vec<u8> {
    frame(b'R', &0_i32.to_be_bytes())
}

pub fn auth_cleartext() -> Vec<u8> {
    frame(b'R', &3_i32.to_be_bytes())
}

pub fn auth_md5(salt: &[u8; 4]) -> Vec<u8> {
    let mut payload = 5_i32.to_be_bytes().to_vec();
    payload.extend_from_slice(salt);
    frame(b'R', &payload)
}

/// An authentication request the engine cannot answer (e.g. 7 = GSS).
pub fn auth_other(kind: i32) -> Vec<u8> {
    frame(b'R', &kind.to_be_bytes())
}

pub fn backend_key(pid: u32, secret: u32) -> Vec<u8> {
    let mut payload = pid.to_be_bytes().to_vec();
    payload.extend_from_slice(&secret.to_be_bytes());
    frame(b'K', &payload)
}

pub fn parameter_status(name: &str, value: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(name.as_bytes());
    payload.push(0);
    payload.extend_from_slice(value.as_bytes());
    payload.push(0);
    frame(b'S', &payload)
}

pub fn ready(status: u8) -> Vec<u8> {
    frame(b'Z', &[status])
}

pub fn parse_complete() -> Vec<u8> {
    frame(b'1', &[])
}

pub fn bind_complete() -> Vec<u8> {
    frame(b'2', &[])
}

pub fn close_complete() -> Vec<u8> {
    frame(b'3', &[])
}

pub fn no_data() -> Vec<u8> {
    frame(b'n', &[])
}

pub fn portal_suspended() -> Vec<u8> {
    frame(b's', &[])
}

pub fn empty_query_response() -> Vec<u8> {
    frame(b'I', &[])
}

pub fn command_complete(tag: &str) -> Vec<u8> {
    let mut payload = tag.as_bytes().to_vec();
    payload.push(0);
    frame(b'C', &payload)
}

/// RowDescription with text-format int4 columns of the given names.
pub fn row_description(names: &[&str]) -> Vec<u8> {
    let mut payload = (names.len() as u16).to_be_bytes().to_vec();
    for name in names {
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(&0_u32.to_be_bytes()); // table oid
        payload.extend_from_slice(&0_i16.to_be_bytes()); // attribute number
        payload.extend_from_slice(&23_u32.to_be_bytes()); // int4
        payload.extend_from_slice(&4_i16.to_be_bytes()); // size
        payload.extend_from_slice(&(-1_i32).to_be_bytes()); // modifier
        payload.extend_from_slice(&0_i16.to_be_bytes()); // text format
    }
    frame(b'T', &payload)
}

pub fn data_row(values: &[Option<&str>]) -> Vec<u8> {
    let mut payload = (values.len() as u16).to_be_bytes().to_vec();
    for value in values {
        match value {
            Some(text) => {
                payload.extend_from_slice(&(text.len() as i32).to_be_bytes());
                payload.extend_from_slice(text.as_bytes());
            }
            None => payload.extend_from_slice(&(-1_i32).to_be_bytes()),
        }
    }
    frame(b'D', &payload)
}

pub fn parameter_description(oids: &[u32]) -> Vec<u8> {
    let mut payload = (oids.len() as u16).to_be_bytes().to_vec();
    for oid in oids {
        payload.extend_from_slice(&oid.to_be_bytes());
    }
    frame(b't', &payload)
}

fn fields_payload(fields: &[(u8, &str)]) -> Vec<u8> {
    let mut payload = Vec::new();
    for (tag, value) in fields {
        payload.push(*tag);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
    }
    payload.push(0);
    payload
}

pub fn error_response(fields: &[(u8, &str)]) -> Vec<u8> {
    frame(b'E', &fields_payload(fields))
}

pub fn notice_response(fields: &[(u8, &str)]) -> Vec<u8> {
    frame(b'N', &fields_payload(fields))
}

/// A typical syntax-error ErrorResponse.
pub fn syntax_error(message: &str) -> Vec<u8> {
    error_response(&[
        (b'S', "ERROR"),
        (b'C', "42601"),
        (b'M', message),
        (b'P', "1"),
    ])
}

/// The full post-authentication handshake tail.
pub fn handshake_tail() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(parameter_status("server_version", "16.3"));
    out.extend(parameter_status("client_encoding", "UTF8"));
    out.extend(backend_key(1234, 12345678));
    out.extend(ready(b'I'));
    out
}

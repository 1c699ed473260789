//! Authentication messages.

use crate::protocol::codec::MessageBuilder;

/// Write a PasswordMessage (cleartext or MD5 hashed password).
pub fn write_password(buf: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish();
}

/// Compute MD5 password hash.
///
/// PostgreSQL MD5 password format: "md5" + md5(md5(password + username) + salt)
pub fn md5_password(username: &str, password: &str, salt: &[u8; 4]) -> String {
    use md5::{Digest, Md5};

    // First hash: md5(password + username)
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(username.as_bytes());
    let first_hash = hasher.finalize();
    let first_hash_hex = format!("{:x}", first_hash);

    // Second hash: md5(first_hash_hex + salt)
    let mut hasher = Md5::new();
    hasher.update(first_hash_hex.as_bytes());
    hasher.update(salt);
    let second_hash = hasher.finalize();

    format!("md5{:x}", second_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password() {
        let mut buf = Vec::new();
        write_password(&mut buf, "this is a test");

        let mut expected = vec![b'p', 0, 0, 0, 0x13];
        expected.extend_from_slice(b"this is a test\0");
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_md5_password() {
        assert_eq!(
            md5_password("jim", "secret", b"abcd"),
            "md59625bf463b81c6bcb14d00f510688fad"
        );
    }
}

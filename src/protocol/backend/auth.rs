//! Authentication-related backend messages.

use crate::error::{Error, Result};
use crate::protocol::codec::{read_i32, read_u32};

/// Authentication method constants.
pub mod auth_type {
    pub const OK: i32 = 0;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const SCM_CREDENTIAL: i32 = 6;
    pub const GSS: i32 = 7;
    pub const GSS_CONTINUE: i32 = 8;
    pub const SSPI: i32 = 9;
    pub const SASL: i32 = 10;
}

/// Authentication request from the server.
///
/// The engine answers cleartext and MD5 requests; every other method is
/// reported as unsupported.
#[derive(Debug, Clone)]
pub enum Authentication {
    /// Authentication successful
    Ok,
    /// Kerberos V5 authentication required
    KerberosV5,
    /// Cleartext password required
    CleartextPassword,
    /// MD5 password required (with 4-byte salt)
    Md5Password { salt: [u8; 4] },
    /// SCM credentials message required
    ScmCredential,
    /// GSSAPI authentication required
    Gss,
    /// GSSAPI continuation (with opaque auth data)
    GssContinue { data: Vec<u8> },
    /// SSPI authentication required
    Sspi,
    /// SASL authentication required
    Sasl,
}

impl Authentication {
    /// Parse an Authentication message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (kind, rest) = read_i32(payload)?;

        match kind {
            auth_type::OK => Ok(Authentication::Ok),
            auth_type::KERBEROS_V5 => Ok(Authentication::KerberosV5),
            auth_type::CLEARTEXT_PASSWORD => Ok(Authentication::CleartextPassword),
            auth_type::MD5_PASSWORD => {
                if rest.len() < 4 {
                    return Err(Error::Protocol("MD5Password: missing salt".into()));
                }
                let mut salt = [0u8; 4];
                salt.copy_from_slice(&rest[..4]);
                Ok(Authentication::Md5Password { salt })
            }
            auth_type::SCM_CREDENTIAL => Ok(Authentication::ScmCredential),
            auth_type::GSS => Ok(Authentication::Gss),
            auth_type::GSS_CONTINUE => Ok(Authentication::GssContinue {
                data: rest.to_vec(),
            }),
            auth_type::SSPI => Ok(Authentication::Sspi),
            auth_type::SASL => Ok(Authentication::Sasl),
            _ => Err(Error::Protocol(format!(
                "unknown authentication type: {kind}"
            ))),
        }
    }
}

/// BackendKeyData message - process ID and secret key for cancellation.
///
/// A CancelRequest carrying these values may be sent on a separate
/// connection; the v3 protocol has no in-band cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKeyData {
    /// Process ID of the backend
    pub pid: u32,
    /// Secret key for cancellation
    pub secret: u32,
}

impl BackendKeyData {
    /// Parse a BackendKeyData message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (pid, rest) = read_u32(payload)?;
        let (secret, _) = read_u32(rest)?;
        Ok(Self { pid, secret })
    }
}

//! COPY negotiation messages.
//!
//! The engine decodes these so the framing stays in sync, then rejects the
//! operation; COPY streaming is not supported.

use crate::error::Result;
use crate::protocol::codec::{read_i16, read_u8, read_u16};

/// CopyInResponse / CopyOutResponse / CopyBothResponse payload.
#[derive(Debug, Clone)]
pub struct CopyResponse {
    /// Overall format: 0 = textual, 1 = binary
    pub format: u8,
    /// Per-column format codes
    pub column_formats: Vec<i16>,
}

impl CopyResponse {
    /// Parse a Copy*Response message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (format, rest) = read_u8(payload)?;
        let (num_columns, mut data) = read_u16(rest)?;

        let mut column_formats = Vec::with_capacity(num_columns as usize);
        for _ in 0..num_columns {
            let (f, rest) = read_i16(data)?;
            column_formats.push(f);
            data = rest;
        }

        Ok(Self {
            format,
            column_formats,
        })
    }
}

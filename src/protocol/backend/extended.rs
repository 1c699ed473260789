//! Extended query protocol backend messages.
//!
//! ParseComplete, BindComplete, CloseComplete, NoData and PortalSuspended
//! have empty payloads; only ParameterDescription carries data.

use crate::error::Result;
use crate::protocol::codec::{read_u16, read_u32};
use crate::protocol::types::Oid;

/// Parse a ParameterDescription payload into parameter type OIDs.
pub fn parse_parameter_description(payload: &[u8]) -> Result<Vec<Oid>> {
    let (num_params, mut data) = read_u16(payload)?;

    let mut oids = Vec::with_capacity(num_params as usize);
    for _ in 0..num_params {
        let (oid, rest) = read_u32(data)?;
        oids.push(oid);
        data = rest;
    }

    Ok(oids)
}

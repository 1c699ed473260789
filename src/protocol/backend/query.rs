//! Query-related backend messages.

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr, read_i16, read_i32, read_u16, read_u32};
use crate::protocol::types::{FormatCode, Oid};

/// One column of a RowDescription.
///
/// The 7-tuple the server reports for every result column. In a
/// RowDescription returned from the statement variant of Describe the format
/// code is not yet known and is always zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Field name
    pub name: String,
    /// Table OID (0 if not a table column)
    pub table_oid: Oid,
    /// Column attribute number (0 if not a table column)
    pub column_id: i16,
    /// Data type OID
    pub type_oid: Oid,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: i16,
    /// Type modifier, type-specific (e.g. varchar length + 4)
    pub type_modifier: i32,
    /// Format code (0=text, 1=binary)
    pub format: FormatCode,
}

/// Parse a RowDescription payload into its column list.
pub fn parse_row_description(payload: &[u8]) -> Result<Vec<Column>> {
    let (num_fields, mut data) = read_u16(payload)?;

    let mut columns = Vec::with_capacity(num_fields as usize);
    for _ in 0..num_fields {
        let (name, rest) = read_cstr(data)?;
        let (table_oid, rest) = read_u32(rest)?;
        let (column_id, rest) = read_i16(rest)?;
        let (type_oid, rest) = read_u32(rest)?;
        let (type_size, rest) = read_i16(rest)?;
        let (type_modifier, rest) = read_i32(rest)?;
        let (format, rest) = read_i16(rest)?;

        columns.push(Column {
            name: name.to_string(),
            table_oid,
            column_id,
            type_oid,
            type_size,
            type_modifier,
            format: FormatCode::from_i16(format),
        });
        data = rest;
    }

    Ok(columns)
}

/// Parse a DataRow payload into its values.
///
/// Each value is a big-endian i32 length followed by that many bytes; a
/// length of -1 is SQL NULL with no data bytes. Values are kept as raw
/// bytes; text decoding belongs to the type layer.
pub fn parse_data_row(payload: &[u8]) -> Result<Vec<Option<Vec<u8>>>> {
    let (num_columns, mut data) = read_u16(payload)?;

    let mut values = Vec::with_capacity(num_columns as usize);
    for _ in 0..num_columns {
        let (len, rest) = read_i32(data)?;
        if len == -1 {
            values.push(None);
            data = rest;
        } else if len < 0 {
            return Err(Error::Protocol(format!("DataRow: negative length {len}")));
        } else {
            let (value, rest) = read_bytes(rest, len as usize)?;
            values.push(Some(value.to_vec()));
            data = rest;
        }
    }

    Ok(values)
}

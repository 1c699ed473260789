//! PostgreSQL backend (server → client) messages.

pub mod auth;
pub mod copy;
pub mod error;
pub mod extended;
pub mod query;

pub use auth::{Authentication, BackendKeyData};
pub use copy::CopyResponse;
pub use query::Column;

use crate::error::{Error, Result, ServerError};
use crate::protocol::codec::read_cstr;
use crate::protocol::types::Oid;

/// Backend message type bytes.
pub mod msg_type {
    /// Authentication message
    pub const AUTHENTICATION: u8 = b'R';
    /// BackendKeyData
    pub const BACKEND_KEY_DATA: u8 = b'K';
    /// ParameterStatus
    pub const PARAMETER_STATUS: u8 = b'S';
    /// ReadyForQuery
    pub const READY_FOR_QUERY: u8 = b'Z';
    /// RowDescription
    pub const ROW_DESCRIPTION: u8 = b'T';
    /// DataRow
    pub const DATA_ROW: u8 = b'D';
    /// CommandComplete
    pub const COMMAND_COMPLETE: u8 = b'C';
    /// EmptyQueryResponse
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    /// ErrorResponse
    pub const ERROR_RESPONSE: u8 = b'E';
    /// NoticeResponse
    pub const NOTICE_RESPONSE: u8 = b'N';
    /// NotificationResponse
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    /// ParseComplete
    pub const PARSE_COMPLETE: u8 = b'1';
    /// BindComplete
    pub const BIND_COMPLETE: u8 = b'2';
    /// CloseComplete
    pub const CLOSE_COMPLETE: u8 = b'3';
    /// ParameterDescription
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    /// NoData
    pub const NO_DATA: u8 = b'n';
    /// PortalSuspended
    pub const PORTAL_SUSPENDED: u8 = b's';
    /// CopyInResponse
    pub const COPY_IN_RESPONSE: u8 = b'G';
    /// CopyOutResponse
    pub const COPY_OUT_RESPONSE: u8 = b'H';
    /// CopyBothResponse
    pub const COPY_BOTH_RESPONSE: u8 = b'W';
}

/// A decoded backend message.
///
/// One variant per protocol-v3.0 message the engine consumes. Payloads are
/// owned so a decoded message can outlive the read buffer and be fed to the
/// session state machine as an event.
#[derive(Debug, Clone)]
pub enum BackendMessage {
    /// Authentication request ('R'), sub-dispatched on the leading i32
    Authentication(Authentication),
    /// Cancellation key data ('K')
    BackendKeyData(BackendKeyData),
    /// Run-time parameter report ('S')
    ParameterStatus { name: String, value: String },
    /// Ready for a new query cycle ('Z'); status is 'I', 'T' or 'E'
    ReadyForQuery { status: u8 },
    /// Error report ('E')
    ErrorResponse(ServerError),
    /// Warning/informational report ('N')
    NoticeResponse(ServerError),
    /// LISTEN/NOTIFY payload ('A')
    NotificationResponse {
        pid: u32,
        channel: String,
        payload: String,
    },
    /// Parse completed ('1')
    ParseComplete,
    /// Bind completed ('2')
    BindComplete,
    /// Close completed ('3')
    CloseComplete,
    /// Command finished ('C') with its completion tag
    CommandComplete { tag: String },
    /// Response to an empty query string ('I')
    EmptyQueryResponse,
    /// Execute hit its row limit ('s')
    PortalSuspended,
    /// Statement or portal returns no columns ('n')
    NoData,
    /// Result column metadata ('T')
    RowDescription(Vec<Column>),
    /// Prepared statement parameter OIDs ('t')
    ParameterDescription(Vec<Oid>),
    /// One result row ('D'); `None` entries are SQL NULL
    DataRow(Vec<Option<Vec<u8>>>),
    /// COPY FROM STDIN requested ('G')
    CopyInResponse(CopyResponse),
    /// COPY TO STDOUT requested ('H')
    CopyOutResponse(CopyResponse),
    /// COPY for streaming replication ('W')
    CopyBothResponse(CopyResponse),
}

impl BackendMessage {
    /// Decode a framed `(type_byte, payload)` pair.
    ///
    /// An unknown type byte is a protocol violation: a correct server never
    /// produces one, and the connection cannot stay in sync after it.
    pub fn decode(type_byte: u8, payload: &[u8]) -> Result<Self> {
        let msg = match type_byte {
            msg_type::AUTHENTICATION => {
                BackendMessage::Authentication(Authentication::parse(payload)?)
            }
            msg_type::BACKEND_KEY_DATA => {
                BackendMessage::BackendKeyData(BackendKeyData::parse(payload)?)
            }
            msg_type::PARAMETER_STATUS => {
                let (name, rest) = read_cstr(payload)?;
                let (value, _) = read_cstr(rest)?;
                BackendMessage::ParameterStatus {
                    name: name.to_string(),
                    value: value.to_string(),
                }
            }
            msg_type::READY_FOR_QUERY => {
                let status = *payload.first().ok_or_else(|| {
                    Error::Protocol("ReadyForQuery: missing status byte".into())
                })?;
                BackendMessage::ReadyForQuery { status }
            }
            msg_type::ERROR_RESPONSE => {
                BackendMessage::ErrorResponse(error::parse_fields(payload)?)
            }
            msg_type::NOTICE_RESPONSE => {
                BackendMessage::NoticeResponse(error::parse_fields(payload)?)
            }
            msg_type::NOTIFICATION_RESPONSE => {
                let (pid, rest) = crate::protocol::codec::read_u32(payload)?;
                let (channel, rest) = read_cstr(rest)?;
                let (notify_payload, _) = read_cstr(rest)?;
                BackendMessage::NotificationResponse {
                    pid,
                    channel: channel.to_string(),
                    payload: notify_payload.to_string(),
                }
            }
            msg_type::PARSE_COMPLETE => BackendMessage::ParseComplete,
            msg_type::BIND_COMPLETE => BackendMessage::BindComplete,
            msg_type::CLOSE_COMPLETE => BackendMessage::CloseComplete,
            msg_type::COMMAND_COMPLETE => {
                let (tag, _) = read_cstr(payload)?;
                BackendMessage::CommandComplete {
                    tag: tag.to_string(),
                }
            }
            msg_type::EMPTY_QUERY_RESPONSE => BackendMessage::EmptyQueryResponse,
            msg_type::PORTAL_SUSPENDED => BackendMessage::PortalSuspended,
            msg_type::NO_DATA => BackendMessage::NoData,
            msg_type::ROW_DESCRIPTION => {
                BackendMessage::RowDescription(query::parse_row_description(payload)?)
            }
            msg_type::PARAMETER_DESCRIPTION => {
                BackendMessage::ParameterDescription(extended::parse_parameter_description(
                    payload,
                )?)
            }
            msg_type::DATA_ROW => BackendMessage::DataRow(query::parse_data_row(payload)?),
            msg_type::COPY_IN_RESPONSE => {
                BackendMessage::CopyInResponse(CopyResponse::parse(payload)?)
            }
            msg_type::COPY_OUT_RESPONSE => {
                BackendMessage::CopyOutResponse(CopyResponse::parse(payload)?)
            }
            msg_type::COPY_BOTH_RESPONSE => {
                BackendMessage::CopyBothResponse(CopyResponse::parse(payload)?)
            }
            other => {
                return Err(Error::Protocol(format!(
                    "unknown backend message type: '{}' (0x{other:02x})",
                    other as char
                )));
            }
        };
        Ok(msg)
    }
}

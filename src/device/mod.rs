//! The boundary to the card-reader toolkit.
//!
//! Every call is synchronous and the toolkit is not thread-safe: callers
//! must hold the reader lock for the whole session and run these calls off
//! the async workers.

pub mod parser;
pub mod simulated;

use thiserror::Error;

use crate::models::card::{CardData, ReaderStatus};

/// Toolkit result code; `0` means success.
pub type ResultCode = i32;

/// A failure raised by the toolkit itself rather than reported as a code.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The toolkit could not be reached (missing native component, broken IPC).
    #[error("toolkit transport failure: {0}")]
    Transport(String),

    /// A call whose success value is data returned a non-zero code.
    #[error("toolkit returned code {0}")]
    Status(ResultCode),

    /// The toolkit returned a document that could not be interpreted.
    #[error("malformed card payload: {0}")]
    MalformedPayload(String),
}

/// The operations the orchestrator needs from a card-reader toolkit.
pub trait DeviceGateway: Send {
    fn initialize(&mut self, process_mode: bool, config_path: &str) -> Result<ResultCode, GatewayError>;

    fn list_readers(&mut self) -> Result<Vec<String>, GatewayError>;

    fn select_reader(&mut self, name: &str) -> Result<ResultCode, GatewayError>;

    fn connect_card(&mut self) -> Result<ResultCode, GatewayError>;

    fn reader_status(&mut self) -> Result<ReaderStatus, GatewayError>;

    /// Reads the public data block. `request_id` is echoed by the toolkit
    /// into the signed response so it can be checked afterwards.
    fn read_card(&mut self, request_id: &str) -> Result<CardData, GatewayError>;

    /// Returns the card photo, or `None` when the card carries none.
    fn photo(&mut self) -> Result<Option<Vec<u8>>, GatewayError>;

    fn disconnect_card(&mut self) -> Result<ResultCode, GatewayError>;

    fn cleanup(&mut self) -> Result<ResultCode, GatewayError>;
}

/// Splits a toolkit reader list on `;` and line breaks, trimming entries and
/// skipping blanks.
pub fn split_reader_list(raw: &str) -> Vec<String> {
    raw.split([';', '\n', '\r'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

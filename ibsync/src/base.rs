// ibsync/src/base.rs
// Base types and error definitions for the synchronous gateway bridge

use thiserror::Error;

/// Request identifier used to correlate a request with its callbacks.
pub type RequestId = i32;

/// Request id used by the gateway for notices that belong to no request.
pub const NO_REQUEST_ID: RequestId = -1;

/// Errors that can occur while talking to the gateway
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IBSyncError {
  #[error("Configuration error: {0}")]
  ConfigurationError(String),

  #[error("Not connected to gateway")]
  NotConnected,

  #[error("Duplicate request ID: {0}")]
  DuplicateRequestId(RequestId),

  #[error("Invalid parameter: {0}")]
  InvalidParameter(String),

  #[error("Message parse error: {0}")]
  ParseError(String),

  #[error("Internal error: {0}")]
  InternalError(String),

  #[error("API error: code={0}, msg={1}")]
  ApiError(i32, String),
}

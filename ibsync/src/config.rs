// ibsync/src/config.rs
//! Settings for `IBSyncClient`.

use crate::base::{IBSyncError, RequestId};
use std::time::Duration;

/// Configuration for the synchronous client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
  /// Maximum time a request waits for its end marker (default: 10s)
  pub request_timeout: Duration,
  /// When true, an error for a pending request also ends its collection early
  /// with `CollectStatus::Error` instead of letting it run into the timeout
  /// (default: false)
  pub abort_on_error: bool,
  /// First request id handed out by the client, at least 1 (default: 1)
  pub first_request_id: RequestId,
  /// How long to wait for a straggling error after a collection ends (default: 0)
  pub error_poll_timeout: Duration,
  /// How long a timed-out request's queue is kept to swallow late answers
  /// before it is purged (default: 60s)
  pub stale_queue_age: Duration,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      request_timeout: Duration::from_secs(10),
      abort_on_error: false,
      first_request_id: 1,
      error_poll_timeout: Duration::ZERO,
      stale_queue_age: Duration::from_secs(60),
    }
  }
}

impl ClientConfig {
  pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
    self.request_timeout = timeout;
    self
  }

  pub fn with_abort_on_error(mut self, abort_on_error: bool) -> Self {
    self.abort_on_error = abort_on_error;
    self
  }

  pub fn with_first_request_id(mut self, req_id: RequestId) -> Self {
    self.first_request_id = req_id;
    self
  }

  pub fn with_error_poll_timeout(mut self, timeout: Duration) -> Self {
    self.error_poll_timeout = timeout;
    self
  }

  pub fn with_stale_queue_age(mut self, age: Duration) -> Self {
    self.stale_queue_age = age;
    self
  }

  pub fn validate(&self) -> Result<(), IBSyncError> {
    if self.request_timeout.is_zero() {
      return Err(IBSyncError::ConfigurationError("request_timeout must be greater than zero".to_string()));
    }
    // Errors for ids <= 0 are connection-level notices and never reach a queue.
    if self.first_request_id < 1 {
      return Err(IBSyncError::ConfigurationError(format!(
        "first_request_id must be at least 1, got {}", self.first_request_id
      )));
    }
    Ok(())
  }
}

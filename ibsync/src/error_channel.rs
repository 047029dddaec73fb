// ibsync/src/error_channel.rs
//! Side channel for errors reported by the gateway.
//!
//! Errors arrive on their own callback, independent of any request queue. They
//! are kept here in arrival order until the caller polls for them, which it
//! should do after every synchronous request.

use crate::base::{IBSyncError, RequestId, NO_REQUEST_ID};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// One error message as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
  pub req_id: RequestId,
  pub error_code: i32,
  pub error_string: String,
}

impl ErrorRecord {
  pub fn new(req_id: RequestId, error_code: i32, error_string: &str) -> Self {
    ErrorRecord { req_id, error_code, error_string: error_string.to_string() }
  }

  /// Notices not tied to a request (farm status and the like) carry id -1.
  pub fn is_informational(&self) -> bool {
    self.req_id == NO_REQUEST_ID
  }
}

impl fmt::Display for ErrorRecord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "IB error id {} errorcode {} string {}", self.req_id, self.error_code, self.error_string)
  }
}

impl From<ErrorRecord> for IBSyncError {
  fn from(record: ErrorRecord) -> Self {
    IBSyncError::ApiError(record.error_code, record.error_string)
  }
}

/// Multi-producer, single-consumer queue of `ErrorRecord`s.
///
/// Producers call `deliver` from any callback thread. The consumer side keeps a
/// small stash so that `take_for` can pull out the records of one request
/// without losing the order of the others.
pub struct ErrorChannel {
  sender: Sender<ErrorRecord>,
  receiver: Receiver<ErrorRecord>,
  stash: Mutex<VecDeque<ErrorRecord>>,
}

impl ErrorChannel {
  pub fn new() -> Self {
    let (sender, receiver) = crossbeam_channel::unbounded();
    ErrorChannel { sender, receiver, stash: Mutex::new(VecDeque::new()) }
  }

  pub fn deliver(&self, record: ErrorRecord) {
    debug!("Error channel: {}", record);
    // Both ends live in self, so the channel cannot be disconnected here.
    let _ = self.sender.send(record);
  }

  pub fn has_error(&self) -> bool {
    !self.stash.lock().is_empty() || !self.receiver.is_empty()
  }

  /// Pops the oldest record, waiting up to `timeout` if none is queued.
  /// Returns `None` straight away when the channel is empty and the timeout is zero.
  pub fn next_error(&self, timeout: Duration) -> Option<ErrorRecord> {
    if let Some(record) = self.stash.lock().pop_front() {
      return Some(record);
    }
    if timeout.is_zero() {
      return self.receiver.try_recv().ok();
    }
    match self.receiver.recv_timeout(timeout) {
      Ok(record) => Some(record),
      Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
    }
  }

  /// Removes and returns every queued record, oldest first.
  pub fn drain(&self) -> Vec<ErrorRecord> {
    let mut stash = self.stash.lock();
    stash.extend(self.receiver.try_iter());
    stash.drain(..).collect()
  }

  /// Removes and returns the records for `req_id`; the rest stay queued in order.
  pub fn take_for(&self, req_id: RequestId) -> Vec<ErrorRecord> {
    let mut stash = self.stash.lock();
    stash.extend(self.receiver.try_iter());
    let (matching, rest): (Vec<_>, Vec<_>) = stash.drain(..).partition(|r| r.req_id == req_id);
    stash.extend(rest);
    matching
  }

  /// Like `take_for`, but if nothing is queued for `req_id` yet, keeps waiting
  /// for new records until `timeout` elapses.
  pub fn take_for_within(&self, req_id: RequestId, timeout: Duration) -> Vec<ErrorRecord> {
    let deadline = Instant::now().checked_add(timeout).unwrap_or_else(Instant::now);
    loop {
      let found = self.take_for(req_id);
      if !found.is_empty() {
        return found;
      }
      match self.receiver.recv_deadline(deadline) {
        Ok(record) => self.stash.lock().push_back(record),
        Err(_) => return Vec::new(),
      }
    }
  }

  /// Drains the channel and fails on the first record that is a real error.
  /// Informational notices are logged and skipped; records after the failing
  /// one stay queued.
  pub fn check(&self) -> Result<(), IBSyncError> {
    while let Some(record) = self.next_error(Duration::ZERO) {
      if record.is_informational() {
        info!("Gateway notice: code={} msg={}", record.error_code, record.error_string);
        continue;
      }
      return Err(record.into());
    }
    Ok(())
  }
}

impl Default for ErrorChannel {
  fn default() -> Self {
    Self::new()
  }
}

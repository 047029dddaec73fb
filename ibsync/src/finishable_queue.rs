// ibsync/src/finishable_queue.rs
//! Per-request queues and the blocking collector that drains them.
//!
//! Callback threads push `Item::Data` for each record and one `Item::Finished`
//! when the gateway signals the end of a request. The caller wraps the queue in
//! a `FinishableQueue` and blocks in `collect` until the sentinel shows up or
//! the deadline passes.

use crate::base::RequestId;
use crate::error_channel::ErrorRecord;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What travels through a request queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Item<T> {
  Data(T),
  /// No more items will arrive for this request.
  Finished,
  /// The request failed before finishing. Only used when errors are routed
  /// onto request queues.
  Failed(ErrorRecord),
}

/// Outcome of a `collect` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectStatus {
  Finished,
  Timeout,
  Error(ErrorRecord),
}

/// Items gathered by `collect`, plus how the collection ended.
#[derive(Debug, Clone, PartialEq)]
pub struct Collected<T> {
  pub items: Vec<T>,
  pub status: CollectStatus,
}

impl<T> Collected<T> {
  pub fn is_finished(&self) -> bool {
    self.status == CollectStatus::Finished
  }

  pub fn is_timeout(&self) -> bool {
    self.status == CollectStatus::Timeout
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

/// Unbounded FIFO for one request. Any number of threads may push; one
/// collector reads.
#[derive(Debug)]
pub struct RequestQueue<T> {
  req_id: RequestId,
  sender: Sender<Item<T>>,
  receiver: Receiver<Item<T>>,
  // Set once the sentinel (or a failure) has been pushed.
  closed: AtomicBool,
  // Set when the caller gave up waiting; late deliveries are dropped.
  abandoned: AtomicBool,
  abandoned_at: Mutex<Option<Instant>>,
  // Set when the issuing side registered for this queue.
  claimed: AtomicBool,
  created: Instant,
}

impl<T> RequestQueue<T> {
  pub fn new(req_id: RequestId) -> Self {
    let (sender, receiver) = crossbeam_channel::unbounded();
    RequestQueue {
      req_id,
      sender,
      receiver,
      closed: AtomicBool::new(false),
      abandoned: AtomicBool::new(false),
      abandoned_at: Mutex::new(None),
      claimed: AtomicBool::new(false),
      created: Instant::now(),
    }
  }

  pub fn req_id(&self) -> RequestId {
    self.req_id
  }

  /// Pushes a data item. Returns false if the item was dropped because the
  /// request already completed or was abandoned.
  pub fn push(&self, value: T) -> bool {
    if self.abandoned.load(Ordering::SeqCst) {
      debug!("Dropping late item for abandoned request {}", self.req_id);
      return false;
    }
    if self.closed.load(Ordering::SeqCst) {
      warn!("Dropping item delivered after completion of request {}", self.req_id);
      return false;
    }
    self.send(Item::Data(value))
  }

  /// Pushes the completion sentinel. Only the first call has any effect.
  pub fn finish(&self) -> bool {
    self.close_with(Item::Finished)
  }

  /// Ends the request early with an error.
  pub fn fail(&self, record: ErrorRecord) -> bool {
    self.close_with(Item::Failed(record))
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }

  pub fn is_abandoned(&self) -> bool {
    self.abandoned.load(Ordering::SeqCst)
  }

  pub(crate) fn abandon(&self) {
    *self.abandoned_at.lock() = Some(Instant::now());
    self.abandoned.store(true, Ordering::SeqCst);
  }

  pub fn is_claimed(&self) -> bool {
    self.claimed.load(Ordering::SeqCst)
  }

  pub(crate) fn claim(&self) {
    self.claimed.store(true, Ordering::SeqCst);
  }

  /// True when no collector will ever read this queue again and it has been
  /// that way for at least `age`: abandoned that long ago, or created by a
  /// delivery that long ago and never claimed.
  pub fn is_stale(&self, age: Duration) -> bool {
    match *self.abandoned_at.lock() {
      Some(at) => at.elapsed() >= age,
      None => !self.is_claimed() && self.created.elapsed() >= age,
    }
  }

  /// Number of items waiting to be collected, sentinel included.
  pub fn len(&self) -> usize {
    self.receiver.len()
  }

  pub fn is_empty(&self) -> bool {
    self.receiver.is_empty()
  }

  fn close_with(&self, item: Item<T>) -> bool {
    if self.abandoned.load(Ordering::SeqCst) {
      debug!("Dropping late completion for abandoned request {}", self.req_id);
      return false;
    }
    if self.closed.swap(true, Ordering::SeqCst) {
      debug!("Ignoring duplicate completion for request {}", self.req_id);
      return false;
    }
    self.send(item)
  }

  fn send(&self, item: Item<T>) -> bool {
    // The receiver lives as long as self, so send only fails on a logic error.
    self.sender.send(item).is_ok()
  }
}

/// Blocking collector over one request queue.
pub struct FinishableQueue<T> {
  queue: Arc<RequestQueue<T>>,
}

impl<T> FinishableQueue<T> {
  pub fn new(queue: Arc<RequestQueue<T>>) -> Self {
    FinishableQueue { queue }
  }

  pub fn req_id(&self) -> RequestId {
    self.queue.req_id
  }

  /// Drains items until the sentinel arrives or `timeout` elapses.
  ///
  /// The deadline is fixed when the call starts, so a slow trickle of items
  /// cannot stretch the total wait past `timeout`. On timeout the items seen so
  /// far are returned with `CollectStatus::Timeout`. Never fails.
  ///
  /// Calling this again after it returned `Finished` waits out the full timeout,
  /// since the sentinel is consumed.
  pub fn collect(&self, timeout: Duration) -> Collected<T> {
    let deadline = Instant::now().checked_add(timeout);
    let mut items = Vec::new();
    let mut status = CollectStatus::Timeout;

    loop {
      let next = match deadline {
        Some(deadline) => self.queue.receiver.recv_deadline(deadline),
        // Timeout too large to represent; wait without a bound.
        None => self.queue.receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
      };
      match next {
        Ok(Item::Data(value)) => {
          items.push(value);
          trace!("Request {}: collected item #{}", self.queue.req_id, items.len());
        }
        Ok(Item::Finished) => {
          status = CollectStatus::Finished;
          break;
        }
        Ok(Item::Failed(record)) => {
          debug!("Request {} failed during collection: {}", self.queue.req_id, record);
          status = CollectStatus::Error(record);
          break;
        }
        Err(RecvTimeoutError::Timeout) => break,
        Err(RecvTimeoutError::Disconnected) => {
          warn!("Queue for request {} disconnected during collection", self.queue.req_id);
          break;
        }
      }
    }

    debug!("Request {}: collected {} item(s), status {:?}", self.queue.req_id, items.len(), status);
    Collected { items, status }
  }
}

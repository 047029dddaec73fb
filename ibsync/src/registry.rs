// ibsync/src/registry.rs
//! Maps request ids to their queues.
//!
//! Either side may touch a request first: the caller registers before sending,
//! but a fast gateway can answer on the reader thread before that happens. Both
//! sides go through the same get-or-create under one lock, so a request id
//! never ends up with two queues.

use crate::base::{IBSyncError, RequestId};
use crate::error_channel::ErrorRecord;
use crate::finishable_queue::{CollectStatus, RequestQueue};
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct QueueRegistry<T> {
  name: &'static str,
  queues: Mutex<HashMap<RequestId, Arc<RequestQueue<T>>>>,
}

impl<T> QueueRegistry<T> {
  /// `name` only shows up in log lines.
  pub fn new(name: &'static str) -> Self {
    QueueRegistry { name, queues: Mutex::new(HashMap::new()) }
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  /// Returns the queue for `req_id`, creating an empty one if none exists.
  pub fn ensure_queue(&self, req_id: RequestId) -> Arc<RequestQueue<T>> {
    let mut queues = self.queues.lock();
    queues
      .entry(req_id)
      .or_insert_with(|| {
        debug!("{}: created queue for request {}", self.name, req_id);
        Arc::new(RequestQueue::new(req_id))
      })
      .clone()
  }

  /// Issuing-side registration. A queue created earlier by a delivery is
  /// adopted; a queue left behind by a timed-out request is not.
  pub fn register(&self, req_id: RequestId) -> Result<Arc<RequestQueue<T>>, IBSyncError> {
    let queue = self.ensure_queue(req_id);
    if queue.is_abandoned() {
      warn!("{}: request id {} still belongs to an abandoned request", self.name, req_id);
      return Err(IBSyncError::DuplicateRequestId(req_id));
    }
    queue.claim();
    Ok(queue)
  }

  /// Delivers one data item, creating the queue if needed.
  pub fn deliver(&self, req_id: RequestId, value: T) -> bool {
    self.ensure_queue(req_id).push(value)
  }

  /// Delivers the completion sentinel, creating the queue if needed. The
  /// sentinel of a timed-out request settles it instead.
  pub fn finish(&self, req_id: RequestId) -> bool {
    if self.settle(req_id) {
      return false;
    }
    self.ensure_queue(req_id).finish()
  }

  /// Routes an error onto a queue that already exists and is still open.
  /// Errors for ids this registry never saw are left alone; an error for a
  /// timed-out request settles it.
  pub fn fail(&self, req_id: RequestId, record: ErrorRecord) -> bool {
    let queue = {
      let mut queues = self.queues.lock();
      let queue = match queues.get(&req_id) {
        Some(queue) => queue.clone(),
        None => return false,
      };
      if queue.is_abandoned() {
        queues.remove(&req_id);
        debug!("{}: abandoned request {} settled by error {}", self.name, req_id, record.error_code);
        return false;
      }
      queue
    };
    if queue.is_closed() {
      return false;
    }
    queue.fail(record)
  }

  /// Drops the queue of a timed-out request once the gateway is known to be
  /// done with it. Returns false if `req_id` has no abandoned queue.
  pub fn settle(&self, req_id: RequestId) -> bool {
    let mut queues = self.queues.lock();
    if !queues.get(&req_id).is_some_and(|queue| queue.is_abandoned()) {
      return false;
    }
    queues.remove(&req_id);
    debug!("{}: abandoned request {} settled", self.name, req_id);
    true
  }

  /// Settles a queue after its collection returned. Completed requests are
  /// removed; timed-out ones are kept as abandoned so late deliveries for
  /// that id are swallowed instead of seeding a fresh queue.
  pub fn release(&self, req_id: RequestId, status: &CollectStatus) {
    let mut queues = self.queues.lock();
    match status {
      CollectStatus::Finished | CollectStatus::Error(_) => {
        queues.remove(&req_id);
      }
      CollectStatus::Timeout => {
        if let Some(queue) = queues.get(&req_id) {
          queue.abandon();
          debug!("{}: request {} abandoned after timeout", self.name, req_id);
        }
      }
    }
  }

  pub fn remove(&self, req_id: RequestId) -> Option<Arc<RequestQueue<T>>> {
    self.queues.lock().remove(&req_id)
  }

  pub fn contains(&self, req_id: RequestId) -> bool {
    self.queues.lock().contains_key(&req_id)
  }

  pub fn len(&self) -> usize {
    self.queues.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.queues.lock().is_empty()
  }

  /// Drops every abandoned queue. Returns how many were dropped.
  pub fn purge_abandoned(&self) -> usize {
    let mut queues = self.queues.lock();
    let before = queues.len();
    queues.retain(|_, queue| !queue.is_abandoned());
    before - queues.len()
  }

  /// Drops queues nobody will collect that have sat for at least `age`. See
  /// `RequestQueue::is_stale`.
  pub fn purge_stale(&self, age: Duration) -> usize {
    let mut queues = self.queues.lock();
    let before = queues.len();
    queues.retain(|_, queue| !queue.is_stale(age));
    let purged = before - queues.len();
    if purged > 0 {
      debug!("{}: purged {} stale queue(s)", self.name, purged);
    }
    purged
  }

  pub fn clear(&self) {
    let mut queues = self.queues.lock();
    if !queues.is_empty() {
      debug!("{}: dropping {} queue(s)", self.name, queues.len());
    }
    queues.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::finishable_queue::FinishableQueue;
  use std::sync::Barrier;
  use std::thread;

  #[test]
  fn test_ensure_queue_is_idempotent() {
    let registry: QueueRegistry<u32> = QueueRegistry::new("test");
    let a = registry.ensure_queue(1);
    let b = registry.ensure_queue(1);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(registry.len(), 1);
  }

  #[test]
  fn test_concurrent_creation_yields_one_queue() {
    let registry: Arc<QueueRegistry<u32>> = Arc::new(QueueRegistry::new("test"));
    let barrier = Arc::new(Barrier::new(16));
    let handles: Vec<_> = (0..16)
      .map(|_| {
        let registry = registry.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
          barrier.wait();
          registry.ensure_queue(99)
        })
      })
      .collect();
    let queues: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(queues.iter().all(|q| Arc::ptr_eq(q, &queues[0])));
    assert_eq!(registry.len(), 1);
  }

  #[test]
  fn test_delivery_before_registration_is_kept() {
    let registry: QueueRegistry<&'static str> = QueueRegistry::new("test");
    registry.deliver(4, "early");
    registry.finish(4);
    let queue = registry.register(4).unwrap();
    let collected = FinishableQueue::new(queue).collect(Duration::from_secs(1));
    assert_eq!(collected.items, vec!["early"]);
    assert!(collected.is_finished());
  }

  #[test]
  fn test_requests_are_isolated() {
    let registry: QueueRegistry<&'static str> = QueueRegistry::new("test");
    registry.deliver(1, "for-a");
    registry.deliver(2, "for-b");
    registry.finish(2);
    registry.finish(1);

    let b = FinishableQueue::new(registry.register(2).unwrap()).collect(Duration::from_secs(1));
    let a = FinishableQueue::new(registry.register(1).unwrap()).collect(Duration::from_secs(1));
    assert_eq!(a.items, vec!["for-a"]);
    assert_eq!(b.items, vec!["for-b"]);
  }

  #[test]
  fn test_release_after_finish_removes_queue() {
    let registry: QueueRegistry<u32> = QueueRegistry::new("test");
    registry.finish(3);
    let collected = FinishableQueue::new(registry.register(3).unwrap()).collect(Duration::from_secs(1));
    registry.release(3, &collected.status);
    assert!(!registry.contains(3));
  }

  #[test]
  fn test_timed_out_request_swallows_late_delivery() {
    let registry: QueueRegistry<u32> = QueueRegistry::new("test");
    let queue = registry.register(6).unwrap();
    let collected = FinishableQueue::new(queue).collect(Duration::from_millis(10));
    assert!(collected.is_timeout());
    registry.release(6, &collected.status);

    assert!(!registry.deliver(6, 1));
    assert_eq!(registry.register(6).unwrap_err(), IBSyncError::DuplicateRequestId(6));

    assert_eq!(registry.purge_abandoned(), 1);
    assert!(registry.is_empty());
    assert!(registry.register(6).is_ok());
  }

  #[test]
  fn test_late_sentinel_settles_timed_out_request() {
    let registry: QueueRegistry<u32> = QueueRegistry::new("test");
    let queue = registry.register(4).unwrap();
    let collected = FinishableQueue::new(queue).collect(Duration::from_millis(10));
    registry.release(4, &collected.status);
    assert!(registry.contains(4));

    assert!(!registry.deliver(4, 1));
    assert!(!registry.finish(4));
    assert!(registry.is_empty());
    // Settling only applies to abandoned queues.
    assert!(!registry.settle(4));
  }

  #[test]
  fn test_late_error_settles_timed_out_request() {
    let registry: QueueRegistry<u32> = QueueRegistry::new("test");
    registry.register(9).unwrap();
    registry.release(9, &CollectStatus::Timeout);
    assert!(!registry.fail(9, ErrorRecord::new(9, 162, "Historical Market Data Service error message")));
    assert!(!registry.contains(9));
  }

  #[test]
  fn test_purge_stale_keeps_live_requests() {
    let registry: QueueRegistry<u32> = QueueRegistry::new("test");
    registry.register(1).unwrap();
    registry.register(2).unwrap();
    registry.release(2, &CollectStatus::Timeout);
    // Answer for an id nobody registered.
    registry.deliver(3, 30);

    assert_eq!(registry.purge_stale(Duration::from_secs(60)), 0);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(registry.purge_stale(Duration::from_millis(10)), 2);
    assert!(registry.contains(1));
    assert_eq!(registry.len(), 1);
  }

  #[test]
  fn test_fail_only_touches_open_queues() {
    let registry: QueueRegistry<u32> = QueueRegistry::new("test");
    let record = ErrorRecord::new(8, 200, "No security definition");
    assert!(!registry.fail(8, record.clone()));
    assert!(!registry.contains(8));

    registry.register(8).unwrap();
    assert!(registry.fail(8, record.clone()));
    // Already closed by the first failure.
    assert!(!registry.fail(8, record));
  }

  #[test]
  fn test_clear_drops_everything() {
    let registry: QueueRegistry<u32> = QueueRegistry::new("test");
    registry.ensure_queue(1);
    registry.ensure_queue(2);
    registry.clear();
    assert!(registry.is_empty());
  }
}

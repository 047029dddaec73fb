// ibsync/src/router.rs
use crate::base::RequestId;
use crate::contract::{
  ContractDetails, HistoricalTick, HistoricalTickBidAsk, HistoricalTickLast, HistoricalTicks,
};
use crate::error_channel::{ErrorChannel, ErrorRecord};
use crate::handler::ResponseHandler;
use crate::registry::QueueRegistry;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Turns gateway callbacks into queue deliveries.
///
/// One registry per kind of answer, plus the shared error channel. The router
/// lives as long as the client session; dropping it drops every queue.
pub struct ResponseRouter {
  contract_details: QueueRegistry<ContractDetails>,
  head_timestamps: QueueRegistry<String>,
  historical_ticks: QueueRegistry<HistoricalTicks>,
  errors: ErrorChannel,
  abort_on_error: AtomicBool,
}

impl ResponseRouter {
  pub fn new(abort_on_error: bool) -> Arc<Self> {
    Arc::new(ResponseRouter {
      contract_details: QueueRegistry::new("contract_details"),
      head_timestamps: QueueRegistry::new("head_timestamp"),
      historical_ticks: QueueRegistry::new("historical_ticks"),
      errors: ErrorChannel::new(),
      abort_on_error: AtomicBool::new(abort_on_error),
    })
  }

  pub fn contract_details_queues(&self) -> &QueueRegistry<ContractDetails> {
    &self.contract_details
  }

  pub fn head_timestamp_queues(&self) -> &QueueRegistry<String> {
    &self.head_timestamps
  }

  pub fn historical_ticks_queues(&self) -> &QueueRegistry<HistoricalTicks> {
    &self.historical_ticks
  }

  pub fn errors(&self) -> &ErrorChannel {
    &self.errors
  }

  pub fn set_abort_on_error(&self, enabled: bool) {
    self.abort_on_error.store(enabled, Ordering::Relaxed);
  }

  /// Number of queues still held across all registries.
  pub fn pending_queues(&self) -> usize {
    self.contract_details.len() + self.head_timestamps.len() + self.historical_ticks.len()
  }

  pub fn purge_abandoned(&self) -> usize {
    self.contract_details.purge_abandoned()
      + self.head_timestamps.purge_abandoned()
      + self.historical_ticks.purge_abandoned()
  }

  pub fn purge_stale(&self, age: Duration) -> usize {
    self.contract_details.purge_stale(age)
      + self.head_timestamps.purge_stale(age)
      + self.historical_ticks.purge_stale(age)
  }

  pub fn clear(&self) {
    self.contract_details.clear();
    self.head_timestamps.clear();
    self.historical_ticks.clear();
  }

  fn deliver_ticks(&self, req_id: RequestId, batch: HistoricalTicks, done: bool) {
    debug!("Handler: Historical Ticks: ReqID={}, Count={}, Done={}", req_id, batch.len(), done);
    self.historical_ticks.deliver(req_id, batch);
    if done {
      self.historical_ticks.finish(req_id);
    }
  }
}

impl ResponseHandler for ResponseRouter {
  fn error(&self, id: RequestId, error_code: i32, error_msg: &str) {
    let record = ErrorRecord::new(id, error_code, error_msg);
    if record.is_informational() {
      info!("Gateway notice: code={} msg={}", error_code, error_msg);
    } else {
      warn!("API Error received for request {}: Code={}, Msg={}", id, error_code, error_msg);
    }

    // The channel gets the record before any queue does, so a collector woken
    // by the failure always finds it there.
    self.errors.deliver(record.clone());
    if id <= 0 {
      return;
    }

    if self.abort_on_error.load(Ordering::Relaxed) {
      let routed = self.contract_details.fail(id, record.clone())
        || self.head_timestamps.fail(id, record.clone())
        || self.historical_ticks.fail(id, record);
      if routed {
        debug!("Error for request {} routed to its pending queue", id);
      }
    } else {
      // No end marker follows an error, so a timed-out request is done now.
      self.contract_details.settle(id);
      self.head_timestamps.settle(id);
      self.historical_ticks.settle(id);
    }
  }

  fn contract_details(&self, req_id: RequestId, contract_details: &ContractDetails) {
    debug!("Handler: Contract Details: ReqID={}, ConID={}", req_id, contract_details.contract.con_id);
    self.contract_details.deliver(req_id, contract_details.clone());
  }

  fn bond_contract_details(&self, req_id: RequestId, contract_details: &ContractDetails) {
    debug!("Handler: Bond Contract Details: ReqID={}, ConID={}", req_id, contract_details.contract.con_id);
    self.contract_details.deliver(req_id, contract_details.clone());
  }

  fn contract_details_end(&self, req_id: RequestId) {
    debug!("Handler: Contract Details End: ReqID={}", req_id);
    self.contract_details.finish(req_id);
  }

  fn head_timestamp(&self, req_id: RequestId, head_timestamp: &str) {
    debug!("Handler: Head Timestamp: ReqID={}, Timestamp={}", req_id, head_timestamp);
    self.head_timestamps.deliver(req_id, head_timestamp.to_string());
    self.head_timestamps.finish(req_id);
  }

  fn historical_ticks(&self, req_id: RequestId, ticks: &[HistoricalTick], done: bool) {
    self.deliver_ticks(req_id, HistoricalTicks::Midpoint(ticks.to_vec()), done);
  }

  fn historical_ticks_bid_ask(&self, req_id: RequestId, ticks: &[HistoricalTickBidAsk], done: bool) {
    self.deliver_ticks(req_id, HistoricalTicks::BidAsk(ticks.to_vec()), done);
  }

  fn historical_ticks_last(&self, req_id: RequestId, ticks: &[HistoricalTickLast], done: bool) {
    self.deliver_ticks(req_id, HistoricalTicks::Last(ticks.to_vec()), done);
  }
}

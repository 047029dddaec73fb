// ibsync/src/handler.rs
// Callbacks for answers coming back from the gateway.
use crate::base::RequestId;
use crate::contract::{ContractDetails, HistoricalTick, HistoricalTickBidAsk, HistoricalTickLast};

/// Inbound half of the gateway API. Called from the gateway's reader thread(s),
/// possibly before the caller has registered interest in `req_id`.
pub trait ResponseHandler: Send + Sync {
  /// Error or notice. `id` is -1 for notices that belong to no request.
  fn error(&self, id: RequestId, error_code: i32, error_msg: &str);

  /// Provides details for a contract requested via `req_contract_details`.
  fn contract_details(&self, req_id: RequestId, contract_details: &ContractDetails);

  /// Provides details for a bond contract requested via `req_contract_details`.
  fn bond_contract_details(&self, req_id: RequestId, contract_details: &ContractDetails);

  /// Indicates the end of a contract details request.
  fn contract_details_end(&self, req_id: RequestId);

  /// Earliest data point. There is no separate end message.
  fn head_timestamp(&self, req_id: RequestId, head_timestamp: &str);

  fn historical_ticks(&self, req_id: RequestId, ticks: &[HistoricalTick], done: bool);

  fn historical_ticks_bid_ask(&self, req_id: RequestId, ticks: &[HistoricalTickBidAsk], done: bool);

  fn historical_ticks_last(&self, req_id: RequestId, ticks: &[HistoricalTickLast], done: bool);
}

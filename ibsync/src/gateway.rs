// ibsync/src/gateway.rs
#![allow(clippy::too_many_arguments)] // Mirrors the gateway's request signatures

use crate::base::{IBSyncError, RequestId};
use crate::contract::{Contract, DateFormat, WhatToShow};

/// Outbound half of the gateway API: fire a request tagged with `req_id`.
///
/// Implementations only send. Answers come back later, on some other thread,
/// through a `ResponseHandler`.
#[cfg_attr(test, mockall::automock)]
pub trait RequestSender: Send + Sync {
  /// Ask for every contract matching a (possibly partial) contract.
  fn req_contract_details(&self, req_id: RequestId, contract: &Contract) -> Result<(), IBSyncError>;

  /// Ask for the earliest available data point for a contract.
  fn req_head_timestamp(
    &self,
    req_id: RequestId,
    contract: &Contract,
    what_to_show: WhatToShow,
    use_rth: bool,
    format_date: DateFormat,
  ) -> Result<(), IBSyncError>;

  /// Ask for historical ticks. Exactly one of `start_date_time` and
  /// `end_date_time` should be non-empty.
  fn req_historical_ticks(
    &self,
    req_id: RequestId,
    contract: &Contract,
    start_date_time: &str,
    end_date_time: &str,
    number_of_ticks: i32,
    what_to_show: WhatToShow,
    use_rth: bool,
  ) -> Result<(), IBSyncError>;
}

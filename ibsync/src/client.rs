// ibsync/src/client.rs
use crate::base::{IBSyncError, RequestId};
use crate::config::ClientConfig;
use crate::contract::{Contract, ContractDetails, DateFormat, HistoricalTicks, WhatToShow};
use crate::error_channel::{ErrorChannel, ErrorRecord};
use crate::finishable_queue::{CollectStatus, Collected, FinishableQueue};
use crate::gateway::RequestSender;
use crate::registry::QueueRegistry;
use crate::router::ResponseRouter;
use crate::sim::SimulatedGateway;
use crate::timestamp::parse_head_timestamp;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Largest tick count the gateway serves per historical ticks request.
pub const MAX_HISTORICAL_TICKS: i32 = 1000;

/// Synchronous front end over an asynchronous gateway.
///
/// Every request goes the same way: register a queue, send, block in `collect`
/// until the end marker or the configured timeout, then look at the error
/// channel for anything the gateway reported about that request.
pub struct IBSyncClient {
  sender: Arc<dyn RequestSender>,
  router: Arc<ResponseRouter>,
  config: ClientConfig,
  next_req_id: AtomicI32,
}

impl IBSyncClient {
  /// The caller must already have wired `router` as the response handler of
  /// whatever `sender` talks to.
  pub fn new(sender: Arc<dyn RequestSender>, router: Arc<ResponseRouter>, config: ClientConfig) -> Result<Self, IBSyncError> {
    config.validate()?;
    router.set_abort_on_error(config.abort_on_error);
    info!("Creating IBSyncClient (timeout: {:?}, abort_on_error: {})", config.request_timeout, config.abort_on_error);
    Ok(IBSyncClient {
      sender,
      router,
      next_req_id: AtomicI32::new(config.first_request_id),
      config,
    })
  }

  /// Create a client backed by an in-process simulated gateway.
  pub fn simulated(gateway: Arc<SimulatedGateway>, config: ClientConfig) -> Result<Self, IBSyncError> {
    let router = ResponseRouter::new(config.abort_on_error);
    gateway.set_handler(router.clone());
    Self::new(gateway, router, config)
  }

  pub fn config(&self) -> &ClientConfig {
    &self.config
  }

  pub fn router(&self) -> Arc<ResponseRouter> {
    self.router.clone()
  }

  /// The side channel for gateway errors. Poll it after each raw request.
  pub fn errors(&self) -> &ErrorChannel {
    self.router.errors()
  }

  /// Hands out request ids; never repeats within a session.
  pub fn next_request_id(&self) -> RequestId {
    self.next_req_id.fetch_add(1, Ordering::SeqCst)
  }

  /// Registers a queue for `req_id`, lets `issue` send the request, and blocks
  /// until the request finishes or `timeout` elapses.
  ///
  /// A failed send leaves nothing behind in the registry. A timed-out request
  /// leaves its id abandoned so late answers are dropped; such queues go away
  /// when the gateway settles the request or once they are older than
  /// `stale_queue_age`.
  pub fn issue_and_collect<T, F>(
    &self,
    registry: &QueueRegistry<T>,
    req_id: RequestId,
    timeout: Duration,
    issue: F,
  ) -> Result<Collected<T>, IBSyncError>
  where
    F: FnOnce(&dyn RequestSender, RequestId) -> Result<(), IBSyncError>,
  {
    self.purge_stale_queues();
    let queue = registry.register(req_id)?;
    if let Err(e) = issue(self.sender.as_ref(), req_id) {
      error!("Failed to send {} request {}: {:?}", registry.name(), req_id, e);
      registry.remove(req_id);
      return Err(e);
    }

    let collected = FinishableQueue::new(queue).collect(timeout);
    registry.release(req_id, &collected.status);
    if collected.is_timeout() {
      warn!("{} request {} did not finish within {:?} ({} item(s) so far)",
            registry.name(), req_id, timeout, collected.items.len());
    }
    Ok(collected)
  }

  /// Raw contract details request. Errors the gateway reports for the request
  /// stay on the error channel.
  pub fn request_contract_details(&self, contract: &Contract) -> Result<Collected<ContractDetails>, IBSyncError> {
    let req_id = self.next_request_id();
    info!("Requesting contract details for {} (ReqID={})", contract.text_description(), req_id);
    self.issue_and_collect(self.router.contract_details_queues(), req_id, self.config.request_timeout, |sender, id| {
      sender.req_contract_details(id, contract)
    })
  }

  /// Turns a partial contract into a fully specified one.
  ///
  /// Takes the first match when several come back. If nothing comes back and
  /// the gateway reported no error, the input contract is returned unchanged.
  pub fn resolve_contract(&self, contract: &Contract) -> Result<Contract, IBSyncError> {
    let req_id = self.next_request_id();
    info!("Getting full contract details for {} (ReqID={})", contract.text_description(), req_id);
    let collected = self.issue_and_collect(
      self.router.contract_details_queues(), req_id, self.config.request_timeout,
      |sender, id| sender.req_contract_details(id, contract),
    )?;
    let request_error = self.request_error(req_id, &collected.status);

    let count = collected.items.len();
    match collected.items.into_iter().next() {
      None => {
        if let Some(record) = request_error {
          return Err(record.into());
        }
        warn!("No contract details for {}: returning unresolved contract", contract.text_description());
        Ok(contract.clone())
      }
      Some(first) => {
        if let Some(record) = request_error {
          warn!("Contract details request {} returned data despite error: {}", req_id, record);
        }
        if count > 1 {
          warn!("{} contracts match {}: returning the first", count, contract.text_description());
        }
        Ok(first.contract)
      }
    }
  }

  /// Earliest available `TRADES` data point for a contract, as the gateway
  /// formats it. `unix_time` selects seconds since the epoch over the
  /// formatted date. `Ok(None)` if nothing came back in time.
  pub fn resolve_head_timestamp(&self, contract: &Contract, unix_time: bool) -> Result<Option<String>, IBSyncError> {
    let format = if unix_time { DateFormat::Unix } else { DateFormat::Formatted };
    let req_id = self.next_request_id();
    info!("Getting earliest data point for {} (ReqID={})", contract.text_description(), req_id);
    let collected = self.issue_and_collect(
      self.router.head_timestamp_queues(), req_id, self.config.request_timeout,
      |sender, id| sender.req_head_timestamp(id, contract, WhatToShow::Trades, true, format),
    )?;
    let request_error = self.request_error(req_id, &collected.status);

    let count = collected.items.len();
    match collected.items.into_iter().next() {
      None => match request_error {
        Some(record) => Err(record.into()),
        None => {
          warn!("Failed to get the earliest data point for {}", contract.text_description());
          Ok(None)
        }
      },
      Some(first) => {
        if count > 1 {
          warn!("Head timestamp request {} returned {} results: using the first", req_id, count);
        }
        Ok(Some(first))
      }
    }
  }

  /// Same as `resolve_head_timestamp`, parsed into UTC.
  pub fn head_timestamp_utc(&self, contract: &Contract) -> Result<Option<DateTime<Utc>>, IBSyncError> {
    match self.resolve_head_timestamp(contract, true)? {
      Some(raw) => parse_head_timestamp(&raw, DateFormat::Unix, Tz::UTC).map(Some),
      None => Ok(None),
    }
  }

  /// Historical ticks, one entry per batch delivered by the gateway.
  ///
  /// Exactly one of `start_date_time` and `end_date_time` must be set. A
  /// timeout returns the batches received so far.
  #[allow(clippy::too_many_arguments)]
  pub fn historical_ticks(
    &self,
    contract: &Contract,
    start_date_time: &str,
    end_date_time: &str,
    number_of_ticks: i32,
    what_to_show: WhatToShow,
    use_rth: bool,
  ) -> Result<Vec<HistoricalTicks>, IBSyncError> {
    if start_date_time.is_empty() == end_date_time.is_empty() {
      return Err(IBSyncError::InvalidParameter(
        "exactly one of start_date_time and end_date_time must be set".to_string(),
      ));
    }
    if number_of_ticks <= 0 || number_of_ticks > MAX_HISTORICAL_TICKS {
      return Err(IBSyncError::InvalidParameter(format!(
        "number_of_ticks must be in 1..={}, got {}", MAX_HISTORICAL_TICKS, number_of_ticks
      )));
    }
    if what_to_show == WhatToShow::Ask || what_to_show == WhatToShow::Bid {
      return Err(IBSyncError::InvalidParameter(format!(
        "{} is not available for historical ticks; use BID_ASK", what_to_show
      )));
    }

    let req_id = self.next_request_id();
    info!("Requesting {} historical ticks ({}) for {} (ReqID={})",
          number_of_ticks, what_to_show, contract.text_description(), req_id);
    let collected = self.issue_and_collect(
      self.router.historical_ticks_queues(), req_id, self.config.request_timeout,
      |sender, id| sender.req_historical_ticks(
        id, contract, start_date_time, end_date_time, number_of_ticks, what_to_show, use_rth,
      ),
    )?;
    let request_error = self.request_error(req_id, &collected.status);

    match request_error {
      Some(record) if collected.items.is_empty() => Err(record.into()),
      Some(record) => {
        warn!("Historical ticks request {} returned data despite error: {}", req_id, record);
        Ok(collected.items)
      }
      None => {
        debug!("Historical ticks request {}: {} batch(es)", req_id, collected.items.len());
        Ok(collected.items)
      }
    }
  }

  /// Drops queues of timed-out requests, and answers nobody asked for, that are
  /// older than `stale_queue_age`. Runs before every request.
  pub fn purge_stale_queues(&self) -> usize {
    self.router.purge_stale(self.config.stale_queue_age)
  }

  /// Drains the error channel. Informational notices are skipped; the first
  /// real error is returned.
  pub fn check_errors(&self) -> Result<(), IBSyncError> {
    self.errors().check()
  }

  /// Drops every pending queue and any unread errors.
  pub fn shutdown(&self) {
    let pending = self.router.pending_queues();
    let unread = self.errors().drain();
    if pending > 0 || !unread.is_empty() {
      info!("Shutting down with {} pending queue(s) and {} unread error(s)", pending, unread.len());
    }
    self.router.clear();
  }

  /// The error reported for `req_id`, if any. Records for other requests stay
  /// on the channel.
  fn request_error(&self, req_id: RequestId, status: &CollectStatus) -> Option<ErrorRecord> {
    let wait = match status {
      CollectStatus::Finished => Duration::ZERO,
      _ => self.config.error_poll_timeout,
    };
    let mut records = self.errors().take_for_within(req_id, wait);
    if let CollectStatus::Error(record) = status {
      return Some(record.clone());
    }
    if records.len() > 1 {
      debug!("Request {} has {} error records; keeping the first", req_id, records.len());
    }
    if records.is_empty() { None } else { Some(records.remove(0)) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::contract::HistoricalTick;
  use crate::gateway::MockRequestSender;
  use crate::handler::ResponseHandler;
  use crate::sim::{SimScenario, NO_SECURITY_DEFINITION};
  use chrono::TimeZone;

  fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
  }

  fn details(symbol: &str, con_id: i32) -> ContractDetails {
    ContractDetails {
      contract: Contract { con_id, primary_exchange: Some("NASDAQ".to_string()), ..Contract::stock(symbol) },
      long_name: format!("{} INC", symbol),
      min_tick: 0.01,
      ..ContractDetails::default()
    }
  }

  fn short_config() -> ClientConfig {
    ClientConfig::default().with_request_timeout(Duration::from_millis(200))
  }

  fn sim_client(config: ClientConfig) -> (IBSyncClient, Arc<SimulatedGateway>) {
    let gateway = SimulatedGateway::new(Duration::from_millis(2));
    let client = IBSyncClient::simulated(gateway.clone(), config).unwrap();
    (client, gateway)
  }

  #[test]
  fn test_resolve_contract_sends_request_and_returns_first() {
    init_logger();
    let router = ResponseRouter::new(false);
    let mut sender = MockRequestSender::new();
    let answering = router.clone();
    sender
      .expect_req_contract_details()
      .withf(|req_id, contract| *req_id == 100 && contract.symbol == "AAPL")
      .times(1)
      .returning(move |req_id, _| {
        answering.contract_details(req_id, &details("AAPL", 265598));
        answering.contract_details(req_id, &details("AAPL", 38708077));
        answering.contract_details_end(req_id);
        Ok(())
      });
    let client = IBSyncClient::new(Arc::new(sender), router.clone(), ClientConfig::default().with_first_request_id(100)).unwrap();

    let resolved = client.resolve_contract(&Contract::stock("AAPL")).unwrap();
    assert_eq!(resolved.con_id, 265598);
    assert_eq!(resolved.primary_exchange.as_deref(), Some("NASDAQ"));
    assert_eq!(router.pending_queues(), 0);
  }

  #[test]
  fn test_send_failure_cleans_up_queue() {
    let router = ResponseRouter::new(false);
    let mut sender = MockRequestSender::new();
    sender.expect_req_contract_details().returning(|_, _| Err(IBSyncError::NotConnected));
    let client = IBSyncClient::new(Arc::new(sender), router.clone(), ClientConfig::default()).unwrap();

    assert_eq!(client.resolve_contract(&Contract::stock("AAPL")), Err(IBSyncError::NotConnected));
    assert_eq!(router.pending_queues(), 0);
  }

  #[test]
  fn test_head_timestamp_requests_trades_in_rth() {
    let router = ResponseRouter::new(false);
    let mut sender = MockRequestSender::new();
    let answering = router.clone();
    sender
      .expect_req_head_timestamp()
      .withf(|_, contract, what, use_rth, format| {
        contract.symbol == "IBM" && *what == WhatToShow::Trades && *use_rth && *format == DateFormat::Unix
      })
      .times(1)
      .returning(move |req_id, _, _, _, _| {
        answering.head_timestamp(req_id, "345479400");
        Ok(())
      });
    let client = IBSyncClient::new(Arc::new(sender), router, ClientConfig::default()).unwrap();

    let ts = client.head_timestamp_utc(&Contract::stock("IBM")).unwrap();
    assert_eq!(ts, Some(Utc.with_ymd_and_hms(1980, 12, 12, 14, 30, 0).unwrap()));
  }

  #[test]
  fn test_unknown_contract_is_an_api_error() {
    init_logger();
    let (client, _gateway) = sim_client(short_config());
    let err = client.resolve_contract(&Contract::stock("ZZZZ")).unwrap_err();
    assert!(matches!(err, IBSyncError::ApiError(NO_SECURITY_DEFINITION, _)));
    // The record was consumed by the request it belongs to.
    assert!(!client.errors().has_error());
  }

  #[test]
  fn test_error_without_abort_times_out_then_shows_on_channel() {
    let (client, gateway) = sim_client(short_config());
    let collected = client.request_contract_details(&Contract::stock("ZZZZ")).unwrap();
    gateway.wait_idle();
    assert!(collected.is_timeout());
    assert!(collected.is_empty());
    let record = client.errors().next_error(Duration::from_secs(1)).unwrap();
    assert_eq!(record.req_id, 1);
    assert_eq!(record.error_code, NO_SECURITY_DEFINITION);
  }

  #[test]
  fn test_abort_on_error_returns_early() {
    let config = ClientConfig::default().with_request_timeout(Duration::from_secs(10)).with_abort_on_error(true);
    let (client, _gateway) = sim_client(config);
    let start = std::time::Instant::now();
    let err = client.resolve_contract(&Contract::stock("ZZZZ")).unwrap_err();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(matches!(err, IBSyncError::ApiError(NO_SECURITY_DEFINITION, _)));
    assert!(!client.errors().has_error());
  }

  #[test]
  fn test_silent_gateway_returns_unresolved_contract() {
    let (client, gateway) = sim_client(short_config());
    gateway.add_scenario("MSFT", SimScenario::default().with_details(details("MSFT", 272093)).without_end());
    let input = Contract::stock("MSFT");
    // The details arrive but the end marker never does: the partial result is
    // still used.
    let resolved = client.resolve_contract(&input).unwrap();
    assert_eq!(resolved.con_id, 272093);

    gateway.add_scenario("QQQ", SimScenario::default().without_end());
    let unresolved = client.resolve_contract(&Contract::stock("QQQ")).unwrap();
    assert_eq!(unresolved, Contract::stock("QQQ"));
  }

  #[test]
  fn test_late_answer_after_timeout_is_dropped() {
    let (client, gateway) = sim_client(ClientConfig::default().with_request_timeout(Duration::from_millis(30)));
    gateway.add_scenario("SLOW", SimScenario::default().with_details(details("SLOW", 1)).with_latency(Duration::from_millis(150)));

    let collected = client.request_contract_details(&Contract::stock("SLOW")).unwrap();
    assert!(collected.is_timeout());
    gateway.wait_idle();
    // The late details were dropped and the late end marker settled the request.
    assert_eq!(client.router().pending_queues(), 0);
  }

  #[test]
  fn test_timed_out_requests_do_not_pile_up() {
    let config = ClientConfig::default()
      .with_request_timeout(Duration::from_millis(5))
      .with_stale_queue_age(Duration::from_millis(10));
    let (client, gateway) = sim_client(config);
    gateway.add_scenario(
      "MUTE",
      SimScenario::default().with_details(details("MUTE", 7)).with_latency(Duration::from_millis(20)).without_end(),
    );

    for _ in 0..50 {
      let collected = client.request_contract_details(&Contract::stock("MUTE")).unwrap();
      assert!(collected.is_timeout());
    }
    gateway.wait_idle();
    std::thread::sleep(Duration::from_millis(20));
    client.purge_stale_queues();
    assert_eq!(client.router().pending_queues(), 0);
  }

  #[test]
  fn test_timed_out_error_requests_are_settled() {
    let config = ClientConfig::default().with_request_timeout(Duration::from_millis(5));
    let (client, gateway) = sim_client(config);
    gateway.add_scenario("GONE", SimScenario::default().with_error(NO_SECURITY_DEFINITION, "No security definition")
      .with_latency(Duration::from_millis(20)));

    for _ in 0..10 {
      assert!(client.request_contract_details(&Contract::stock("GONE")).unwrap().is_timeout());
    }
    gateway.wait_idle();
    assert_eq!(client.router().pending_queues(), 0);
    assert_eq!(client.errors().drain().len(), 10);
  }

  #[test]
  fn test_request_id_zero_is_rejected() {
    let gateway = SimulatedGateway::new(Duration::ZERO);
    let config = short_config().with_first_request_id(0).with_abort_on_error(true);
    assert!(matches!(IBSyncClient::simulated(gateway, config), Err(IBSyncError::ConfigurationError(_))));
  }

  #[test]
  fn test_historical_ticks_round_trip() {
    let (client, gateway) = sim_client(short_config());
    let tick = HistoricalTick { time: 1_704_189_600, price: 1.0945, size: 0.0 };
    gateway.add_scenario("EUR", SimScenario::default().with_ticks(HistoricalTicks::Midpoint(vec![tick; 3])));

    let batches = client
      .historical_ticks(&Contract::stock("EUR"), "", "20240102 10:00:00", 3, WhatToShow::Midpoint, false)
      .unwrap();
    assert_eq!(batches, vec![HistoricalTicks::Midpoint(vec![tick; 3])]);
    assert_eq!(
      gateway.issued_requests(),
      vec![(1, crate::sim::SimRequest::HistoricalTicks(WhatToShow::Midpoint))]
    );
  }

  #[test]
  fn test_historical_ticks_validates_arguments() {
    let (client, gateway) = sim_client(short_config());
    let c = Contract::stock("EUR");
    assert!(matches!(
      client.historical_ticks(&c, "", "", 10, WhatToShow::Trades, true),
      Err(IBSyncError::InvalidParameter(_))
    ));
    assert!(matches!(
      client.historical_ticks(&c, "20240102 10:00:00", "", 0, WhatToShow::Trades, true),
      Err(IBSyncError::InvalidParameter(_))
    ));
    assert!(matches!(
      client.historical_ticks(&c, "20240102 10:00:00", "", 10, WhatToShow::Bid, true),
      Err(IBSyncError::InvalidParameter(_))
    ));
    assert!(gateway.issued_requests().is_empty());
  }

  #[test]
  fn test_head_timestamp_without_data_is_none() {
    let (client, gateway) = sim_client(short_config());
    gateway.add_scenario("NEW", SimScenario::default().without_end());
    assert_eq!(client.resolve_head_timestamp(&Contract::stock("NEW"), false).unwrap(), None);
  }

  #[test]
  fn test_check_errors_skips_notices() {
    let (client, _gateway) = sim_client(short_config());
    let router = client.router();
    router.error(-1, 2104, "Market data farm connection is OK:usfarm");
    assert_eq!(client.check_errors(), Ok(()));
    router.error(77, 321, "Error validating request");
    assert_eq!(client.check_errors(), Err(IBSyncError::ApiError(321, "Error validating request".to_string())));
  }

  #[test]
  fn test_request_ids_are_unique() {
    let (client, _gateway) = sim_client(short_config());
    let a = client.next_request_id();
    let b = client.next_request_id();
    assert_eq!(b, a + 1);
  }

  #[test]
  fn test_shutdown_clears_state() {
    let (client, _gateway) = sim_client(short_config());
    let router = client.router();
    router.contract_details(9, &details("AAPL", 1));
    router.error(9, 200, "x");
    client.shutdown();
    assert_eq!(router.pending_queues(), 0);
    assert!(!client.errors().has_error());
  }
}

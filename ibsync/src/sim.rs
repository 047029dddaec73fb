// ibsync/src/sim.rs
//! An in-process stand-in for the gateway.
//!
//! `SimulatedGateway` accepts requests like a real connection and answers them
//! from background threads through a `ResponseHandler`, after a configurable
//! delay. Answers are scripted per symbol with `SimScenario`. Unknown symbols
//! get the same "no security definition" error the real gateway sends.

use crate::base::{IBSyncError, RequestId};
use crate::contract::{Contract, ContractDetails, DateFormat, HistoricalTicks, SecType, WhatToShow};
use crate::gateway::RequestSender;
use crate::handler::ResponseHandler;
use chrono::{TimeZone, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const NO_SECURITY_DEFINITION: i32 = 200;
pub const HISTORICAL_DATA_ERROR: i32 = 162;

/// Scripted answers for one symbol.
#[derive(Debug, Clone, Default)]
pub struct SimScenario {
  pub details: Vec<ContractDetails>,
  /// Earliest data point, seconds since the epoch.
  pub head_timestamp: Option<i64>,
  pub tick_batches: Vec<HistoricalTicks>,
  /// When set, every request for this symbol fails with this code and message.
  pub error: Option<(i32, String)>,
  pub latency: Duration,
  /// Send the data but never the end marker.
  pub omit_end: bool,
}

impl SimScenario {
  pub fn with_details(mut self, details: ContractDetails) -> Self {
    self.details.push(details);
    self
  }

  pub fn with_head_timestamp(mut self, unix_secs: i64) -> Self {
    self.head_timestamp = Some(unix_secs);
    self
  }

  pub fn with_ticks(mut self, batch: HistoricalTicks) -> Self {
    self.tick_batches.push(batch);
    self
  }

  pub fn with_error(mut self, code: i32, msg: &str) -> Self {
    self.error = Some((code, msg.to_string()));
    self
  }

  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  pub fn without_end(mut self) -> Self {
    self.omit_end = true;
    self
  }
}

/// Kind of request recorded by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimRequest {
  ContractDetails,
  HeadTimestamp(DateFormat),
  HistoricalTicks(WhatToShow),
}

enum Reply {
  Details(Vec<ContractDetails>),
  HeadTimestamp(String),
  Ticks(Vec<HistoricalTicks>),
  Error(i32, String),
}

pub struct SimulatedGateway {
  handler: Mutex<Option<Arc<dyn ResponseHandler>>>,
  scenarios: Mutex<HashMap<String, SimScenario>>,
  jitter: Duration,
  connected: AtomicBool,
  issued: Mutex<Vec<(RequestId, SimRequest)>>,
  workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SimulatedGateway {
  /// `jitter` adds a random extra delay in `[0, jitter]` to every reply.
  pub fn new(jitter: Duration) -> Arc<Self> {
    Arc::new(SimulatedGateway {
      handler: Mutex::new(None),
      scenarios: Mutex::new(HashMap::new()),
      jitter,
      connected: AtomicBool::new(true),
      issued: Mutex::new(Vec::new()),
      workers: Mutex::new(Vec::new()),
    })
  }

  pub fn set_handler(&self, handler: Arc<dyn ResponseHandler>) {
    let mut slot = self.handler.lock();
    if slot.is_some() {
      warn!("Replacing existing response handler.");
    }
    *slot = Some(handler);
  }

  pub fn add_scenario(&self, symbol: &str, scenario: SimScenario) {
    self.scenarios.lock().insert(symbol.to_string(), scenario);
  }

  pub fn set_connected(&self, connected: bool) {
    self.connected.store(connected, Ordering::SeqCst);
  }

  /// Requests received so far, in order.
  pub fn issued_requests(&self) -> Vec<(RequestId, SimRequest)> {
    self.issued.lock().clone()
  }

  /// Blocks until every reply started so far has been delivered.
  pub fn wait_idle(&self) {
    let workers: Vec<_> = self.workers.lock().drain(..).collect();
    for worker in workers {
      if worker.join().is_err() {
        warn!("Simulated reply thread panicked");
      }
    }
  }

  fn accept(&self, req_id: RequestId, request: SimRequest) -> Result<Arc<dyn ResponseHandler>, IBSyncError> {
    if !self.connected.load(Ordering::SeqCst) {
      return Err(IBSyncError::NotConnected);
    }
    let handler = self.handler.lock().clone()
      .ok_or_else(|| IBSyncError::InternalError("No response handler set".to_string()))?;
    self.issued.lock().push((req_id, request));
    Ok(handler)
  }

  fn scenario_for(&self, contract: &Contract) -> Option<SimScenario> {
    self.scenarios.lock().get(&contract.symbol).cloned()
  }

  fn reply_delay(&self, latency: Duration) -> Duration {
    let jitter_ms = self.jitter.as_millis() as u64;
    if jitter_ms == 0 {
      return latency;
    }
    latency + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
  }

  fn spawn_reply(&self, handler: Arc<dyn ResponseHandler>, req_id: RequestId, delay: Duration, omit_end: bool, reply: Reply) {
    let worker = thread::spawn(move || {
      if !delay.is_zero() {
        thread::sleep(delay);
      }
      match reply {
        Reply::Error(code, msg) => handler.error(req_id, code, &msg),
        Reply::Details(details) => {
          for d in &details {
            if d.contract.sec_type == SecType::Bond {
              handler.bond_contract_details(req_id, d);
            } else {
              handler.contract_details(req_id, d);
            }
          }
          if !omit_end {
            handler.contract_details_end(req_id);
          }
        }
        // The head timestamp message is its own end marker.
        Reply::HeadTimestamp(value) => handler.head_timestamp(req_id, &value),
        Reply::Ticks(batches) => {
          let last = batches.len().saturating_sub(1);
          for (i, batch) in batches.iter().enumerate() {
            let done = i == last && !omit_end;
            match batch {
              HistoricalTicks::Midpoint(t) => handler.historical_ticks(req_id, t, done),
              HistoricalTicks::BidAsk(t) => handler.historical_ticks_bid_ask(req_id, t, done),
              HistoricalTicks::Last(t) => handler.historical_ticks_last(req_id, t, done),
            }
          }
        }
      }
      debug!("Simulated reply for request {} delivered", req_id);
    });
    self.workers.lock().push(worker);
  }

  fn unknown_contract(contract: &Contract) -> Reply {
    info!("Simulator has no scenario for {}", contract.text_description());
    Reply::Error(NO_SECURITY_DEFINITION, "No security definition has been found for the request".to_string())
  }
}

impl RequestSender for SimulatedGateway {
  fn req_contract_details(&self, req_id: RequestId, contract: &Contract) -> Result<(), IBSyncError> {
    let handler = self.accept(req_id, SimRequest::ContractDetails)?;
    let (reply, latency, omit_end) = match self.scenario_for(contract) {
      Some(SimScenario { error: Some((code, msg)), latency, .. }) => (Reply::Error(code, msg), latency, false),
      Some(s) => (Reply::Details(s.details), s.latency, s.omit_end),
      None => (Self::unknown_contract(contract), Duration::ZERO, false),
    };
    self.spawn_reply(handler, req_id, self.reply_delay(latency), omit_end, reply);
    Ok(())
  }

  fn req_head_timestamp(
    &self,
    req_id: RequestId,
    contract: &Contract,
    what_to_show: WhatToShow,
    use_rth: bool,
    format_date: DateFormat,
  ) -> Result<(), IBSyncError> {
    let handler = self.accept(req_id, SimRequest::HeadTimestamp(format_date))?;
    debug!("Simulator head timestamp: ReqID={}, WhatToShow={}, RTH={}", req_id, what_to_show, use_rth);
    let (reply, latency, omit_end) = match self.scenario_for(contract) {
      Some(SimScenario { error: Some((code, msg)), latency, .. }) => (Reply::Error(code, msg), latency, false),
      Some(s) => {
        let reply = match s.head_timestamp.and_then(|secs| Utc.timestamp_opt(secs, 0).single()) {
          _ if s.omit_end => None,
          Some(ts) => Some(Reply::HeadTimestamp(match format_date {
            DateFormat::Unix => ts.timestamp().to_string(),
            DateFormat::Formatted => ts.format("%Y%m%d-%H:%M:%S").to_string(),
          })),
          None => Some(Reply::Error(
            HISTORICAL_DATA_ERROR,
            "Historical Market Data Service error message:No head time stamp".to_string(),
          )),
        };
        match reply {
          Some(reply) => (reply, s.latency, false),
          // Nothing at all comes back.
          None => return Ok(()),
        }
      }
      None => (Self::unknown_contract(contract), Duration::ZERO, false),
    };
    self.spawn_reply(handler, req_id, self.reply_delay(latency), omit_end, reply);
    Ok(())
  }

  fn req_historical_ticks(
    &self,
    req_id: RequestId,
    contract: &Contract,
    start_date_time: &str,
    end_date_time: &str,
    number_of_ticks: i32,
    what_to_show: WhatToShow,
    use_rth: bool,
  ) -> Result<(), IBSyncError> {
    let handler = self.accept(req_id, SimRequest::HistoricalTicks(what_to_show))?;
    debug!(
      "Simulator historical ticks: ReqID={}, Start='{}', End='{}', Count={}, RTH={}",
      req_id, start_date_time, end_date_time, number_of_ticks, use_rth
    );
    let (reply, latency, omit_end) = match self.scenario_for(contract) {
      Some(SimScenario { error: Some((code, msg)), latency, .. }) => (Reply::Error(code, msg), latency, false),
      Some(s) => {
        let batches = if s.tick_batches.is_empty() {
          vec![HistoricalTicks::Midpoint(Vec::new())]
        } else {
          s.tick_batches
        };
        (Reply::Ticks(batches), s.latency, s.omit_end)
      }
      None => (Self::unknown_contract(contract), Duration::ZERO, false),
    };
    self.spawn_reply(handler, req_id, self.reply_delay(latency), omit_end, reply);
    Ok(())
  }
}

// ibsync/src/contract.rs
// Contract and tick data structures carried through request queues

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecType {
  Stock,          // STK
  Option,         // OPT
  Future,         // FUT
  ContinuousFuture, // CONTFUT
  Forex,          // CASH
  Bond,           // BOND
  Cfd,            // CFD
  FutureOption,   // FOP
  Index,          // IND
  Commodity,      // CMDTY
  Crypto,         // CRYPTO
}

impl fmt::Display for SecType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      SecType::Stock => "STK",
      SecType::Option => "OPT",
      SecType::Future => "FUT",
      SecType::ContinuousFuture => "CONTFUT",
      SecType::Forex => "CASH",
      SecType::Bond => "BOND",
      SecType::Cfd => "CFD",
      SecType::FutureOption => "FOP",
      SecType::Index => "IND",
      SecType::Commodity => "CMDTY",
      SecType::Crypto => "CRYPTO",
    };
    write!(f, "{}", s)
  }
}

impl FromStr for SecType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "STK" => Ok(SecType::Stock),
      "OPT" => Ok(SecType::Option),
      "FUT" => Ok(SecType::Future),
      "CONTFUT" => Ok(SecType::ContinuousFuture),
      "CASH" => Ok(SecType::Forex),
      "BOND" => Ok(SecType::Bond),
      "CFD" => Ok(SecType::Cfd),
      "FOP" => Ok(SecType::FutureOption),
      "IND" => Ok(SecType::Index),
      "CMDTY" => Ok(SecType::Commodity),
      "CRYPTO" => Ok(SecType::Crypto),
      _ => Err(format!("Unknown security type: {}", s)),
    }
  }
}

/// A possibly partial contract. `con_id == 0` means not yet resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
  pub con_id: i32,
  pub symbol: String,
  pub sec_type: SecType,
  pub last_trade_date_or_contract_month: Option<String>,
  pub strike: Option<f64>,
  pub multiplier: Option<String>,
  pub exchange: String,
  pub primary_exchange: Option<String>,
  pub currency: String,
  pub local_symbol: Option<String>,
  pub trading_class: Option<String>,
  pub include_expired: bool,
}

impl Contract {
  /// Create a new stock contract
  pub fn stock(symbol: &str) -> Self {
    Self::stock_with_exchange(symbol, "SMART", "USD")
  }

  /// Create a new stock contract with specified exchange and currency
  pub fn stock_with_exchange(symbol: &str, exchange: &str, currency: &str) -> Self {
    Contract {
      symbol: symbol.to_string(),
      sec_type: SecType::Stock,
      exchange: exchange.to_string(),
      currency: currency.to_string(),
      ..Self::default()
    }
  }

  /// Create a futures contract for a given contract month (YYYYMM).
  pub fn future(symbol: &str, contract_month: &str, exchange: &str, currency: &str) -> Self {
    Contract {
      symbol: symbol.to_string(),
      sec_type: SecType::Future,
      last_trade_date_or_contract_month: Some(contract_month.to_string()),
      exchange: exchange.to_string(),
      currency: currency.to_string(),
      ..Self::default()
    }
  }

  pub fn is_resolved(&self) -> bool {
    self.con_id != 0
  }

  /// Short text form for log lines, e.g. `AAPL STK SMART USD`.
  pub fn text_description(&self) -> String {
    let mut parts = vec![self.symbol.clone(), self.sec_type.to_string(), self.exchange.clone()];
    if let Some(month) = &self.last_trade_date_or_contract_month {
      parts.push(month.clone());
    }
    if let Some(strike) = self.strike {
      parts.push(strike.to_string());
    }
    parts.push(self.currency.clone());
    parts.retain(|p| !p.is_empty());
    parts.join(" ")
  }
}

impl Default for Contract {
  fn default() -> Contract {
    Self {
      con_id: 0,
      symbol: String::new(),
      sec_type: SecType::Stock,
      last_trade_date_or_contract_month: None,
      strike: None,
      multiplier: None,
      exchange: String::new(),
      primary_exchange: None,
      currency: String::new(),
      local_symbol: None,
      trading_class: None,
      include_expired: false,
    }
  }
}

/// Full description of a contract as returned by a contract details request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractDetails {
  pub contract: Contract,
  pub market_name: String,
  pub min_tick: f64,
  pub order_types: String,
  pub valid_exchanges: String,
  pub long_name: String,
  pub industry: String,
  pub category: String,
  pub time_zone_id: String,
  pub trading_hours: String,
  pub liquid_hours: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhatToShow {
  Trades,
  Midpoint,
  Bid,
  Ask,
  BidAsk,
}

impl fmt::Display for WhatToShow {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      WhatToShow::Trades => "TRADES",
      WhatToShow::Midpoint => "MIDPOINT",
      WhatToShow::Bid => "BID",
      WhatToShow::Ask => "ASK",
      WhatToShow::BidAsk => "BID_ASK",
    };
    write!(f, "{}", s)
  }
}

/// How the gateway formats dates in replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateFormat {
  /// `yyyymmdd  hh:mm:ss` in the gateway's login time zone.
  Formatted = 1,
  /// Seconds since the epoch.
  Unix = 2,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickAttribBidAsk {
  pub bid_past_low: bool,
  pub ask_past_high: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickAttribLast {
  pub past_limit: bool,
  pub unreported: bool,
}

/// Midpoint tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalTick {
  pub time: i64,
  pub price: f64,
  pub size: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalTickBidAsk {
  pub time: i64,
  pub tick_attrib_bid_ask: TickAttribBidAsk,
  pub price_bid: f64,
  pub price_ask: f64,
  pub size_bid: f64,
  pub size_ask: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalTickLast {
  pub time: i64,
  pub tick_attrib_last: TickAttribLast,
  pub price: f64,
  pub size: f64,
  pub exchange: String,
  pub special_conditions: String,
}

/// One batch of historical ticks, as delivered by a single callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HistoricalTicks {
  Midpoint(Vec<HistoricalTick>),
  BidAsk(Vec<HistoricalTickBidAsk>),
  Last(Vec<HistoricalTickLast>),
}

impl HistoricalTicks {
  pub fn len(&self) -> usize {
    match self {
      HistoricalTicks::Midpoint(t) => t.len(),
      HistoricalTicks::BidAsk(t) => t.len(),
      HistoricalTicks::Last(t) => t.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

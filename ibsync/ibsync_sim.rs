// ibsync_sim.rs
// Runs synchronous requests against the in-process simulated gateway.
// Use it like this:
// ibsync_sim resolve AAPL --latency-ms 50
// ibsync_sim ticks EUR --count 5 --omit-end --timeout-ms 500

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ibsync::{
  ClientConfig, IBSyncClient, IBSyncError,
  contract::{Contract, ContractDetails, HistoricalTick, HistoricalTicks, WhatToShow},
  sim::{SimScenario, SimulatedGateway},
};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
  #[clap(subcommand)]
  command: Command,

  /// Overall deadline for each request, in milliseconds.
  #[arg(long, global = true, default_value_t = 10_000)]
  timeout_ms: u64,

  /// Simulated reply latency, in milliseconds.
  #[arg(long, global = true, default_value_t = 20)]
  latency_ms: u64,

  /// Random extra latency added to each reply, in milliseconds.
  #[arg(long, global = true, default_value_t = 0)]
  jitter_ms: u64,

  /// Never send the end marker, so requests run into the timeout.
  #[arg(long, global = true)]
  omit_end: bool,

  /// End a request as soon as the gateway reports an error for it.
  #[arg(long, global = true)]
  abort_on_error: bool,
}

#[derive(Parser, Debug)]
enum Command {
  /// Resolve a stock symbol into a full contract.
  Resolve { symbol: String },
  /// Fetch the earliest available data point for a stock symbol.
  HeadTimestamp {
    symbol: String,
    /// Ask for seconds since the epoch instead of a formatted date.
    #[arg(long)]
    unix: bool,
  },
  /// Fetch midpoint ticks ending at a fixed time.
  Ticks {
    symbol: String,
    #[arg(long, default_value_t = 10)]
    count: i32,
  },
}

/// Known symbols; anything else gets "no security definition".
fn populate(gateway: &SimulatedGateway, args: &Args) {
  let latency = Duration::from_millis(args.latency_ms);
  for (symbol, con_id, long_name, head) in [
    ("AAPL", 265598, "APPLE INC", 345479400_i64),
    ("MSFT", 272093, "MICROSOFT CORP", 511108200),
    ("EUR", 12087792, "European Monetary Union Euro", 1_104_537_600),
  ] {
    let details = ContractDetails {
      contract: Contract { con_id, primary_exchange: Some("NASDAQ".to_string()), ..Contract::stock(symbol) },
      long_name: long_name.to_string(),
      min_tick: 0.01,
      ..ContractDetails::default()
    };
    let ticks: Vec<HistoricalTick> = (0..10)
      .map(|i| HistoricalTick { time: 1_704_189_600 + i, price: 100.0 + i as f64 * 0.01, size: 0.0 })
      .collect();
    let mut scenario = SimScenario::default()
      .with_details(details)
      .with_head_timestamp(head)
      .with_ticks(HistoricalTicks::Midpoint(ticks))
      .with_latency(latency);
    if args.omit_end {
      scenario = scenario.without_end();
    }
    gateway.add_scenario(symbol, scenario);
  }
}

fn run(client: &IBSyncClient, command: &Command) -> Result<()> {
  match command {
    Command::Resolve { symbol } => {
      let contract = client.resolve_contract(&Contract::stock(symbol))
        .with_context(|| format!("resolving {}", symbol))?;
      if !contract.is_resolved() {
        warn!("{} came back unresolved", symbol);
      }
      println!("{}", serde_json::to_string_pretty(&contract)?);
    }
    Command::HeadTimestamp { symbol, unix } => {
      match client.resolve_head_timestamp(&Contract::stock(symbol), *unix)? {
        Some(ts) => println!("{}", ts),
        None => return Err(anyhow!("no head timestamp for {}", symbol)),
      }
    }
    Command::Ticks { symbol, count } => {
      let batches = client.historical_ticks(
        &Contract::stock(symbol), "", "20240102 10:00:00", *count, WhatToShow::Midpoint, false,
      )?;
      info!("Received {} batch(es)", batches.len());
      println!("{}", serde_json::to_string_pretty(&batches)?);
    }
  }
  Ok(())
}

fn main() -> Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
  let args = Args::parse();

  let gateway = SimulatedGateway::new(Duration::from_millis(args.jitter_ms));
  populate(&gateway, &args);

  let config = ClientConfig::default()
    .with_request_timeout(Duration::from_millis(args.timeout_ms))
    .with_abort_on_error(args.abort_on_error);
  let client = IBSyncClient::simulated(Arc::clone(&gateway), config)?;

  let result = run(&client, &args.command);
  gateway.wait_idle();

  if let Err(IBSyncError::ApiError(code, msg)) = client.check_errors() {
    warn!("Unread gateway error: code={} msg={}", code, msg);
  }
  client.shutdown();

  if let Err(e) = &result {
    error!("Request failed: {:?}", e);
  }
  result
}

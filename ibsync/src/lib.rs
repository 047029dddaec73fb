// ibsync/src/lib.rs
// Main entry point for the ibsync library

//! # ibsync
//!
//! Blocking request/response calls over a callback-driven brokerage gateway.
//!
//! - Per-request queues created on first touch from either side
//! - A collector that drains a queue until its end marker or a deadline
//! - A side channel for gateway errors, checked after each call
//! - A simulated gateway for tests and demos

mod base;
mod timestamp;
pub mod config;
pub mod contract;
pub mod error_channel;
pub mod finishable_queue;
pub mod registry;
pub mod handler;
pub mod gateway;
pub mod router;
pub mod client;
pub mod sim;

pub use base::{IBSyncError, RequestId, NO_REQUEST_ID};
pub use client::IBSyncClient;
pub use config::ClientConfig;
pub use error_channel::{ErrorChannel, ErrorRecord};
pub use finishable_queue::{CollectStatus, Collected, FinishableQueue, Item, RequestQueue};
pub use registry::QueueRegistry;
pub use timestamp::parse_head_timestamp;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Elastic training driver.
//!
//! A long-lived controller that discovers a dynamic pool of training
//! hosts, assigns them into numbered slots, coordinates rendezvous
//! rounds as membership changes, supervises worker processes, and
//! reports their terminal results.
//!
//! The six load-bearing components:
//! - [`host`] — discovers and tracks the live host set, blacklists lost
//!   hosts, issues per-host cancellation signals.
//! - [`slots`] — pure, deterministic host-to-slot packing.
//! - [`registry`] — tracks one rendezvous round's participant quorum.
//! - [`supervisor`] — one OS thread per worker slot.
//! - [`results`] — the first-writer-wins terminal result map.
//! - [`driver`] — [`driver::ElasticDriver`], which wires the above
//!   together.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod host;
pub mod launcher;
pub mod logging;
pub mod registry;
pub mod rendezvous;
pub mod results;
pub mod slots;
pub mod supervisor;
pub mod types;

pub use config::DriverConfig;
pub use driver::ElasticDriver;
pub use error::{DriverError, Result};
pub use types::{HostInfo, SlotInfo};

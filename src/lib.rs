//! Retarget a recorded client/server capture onto new subnets and router MACs.
//!
//! Packet work is delegated to tcpprep, tshark and tcprewrite. This crate
//! decides which endpoint of each flow is the server, builds a deduplicated
//! rewrite plan from that, and drives the rewrite tool through it one rule at
//! a time.

pub mod driver;
pub mod error;
pub mod pairs;
pub mod parser;
pub mod pipeline;
pub mod reconcile;
pub mod stage;
pub mod target;
pub mod tools;

#[cfg(test)]
mod testutil;

pub use error::{RemapError, Result, Side, Stage, ToolError};
pub use pairs::{AddressPair, PairTable, RewriteRule};
pub use pipeline::{Pipeline, RunOptions, RunSummary};
pub use target::{MacAddr, Subnet, TargetSpec};

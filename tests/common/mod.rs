//! Common test infrastructure
//!
//! End-to-end tests build a [`TestHarness`]: on-disk state and content
//! databases in a temp dir, a manual clock, and the full set of jobs wired
//! from a TOML snippet. Wake-ups are fired synchronously with
//! [`TestHarness::fire_due`] so tests control exactly when things run.

mod fixtures;
mod harness;
mod transport;

pub use fixtures::*;
pub use harness::TestHarness;
pub use transport::ScriptedTransport;

//! Round-trip orchestration.
//!
//! The runner sequences the stateful calls against the payment API:
//! preflight (token check, profile, balance), transfer submission with
//! bounded retries, status polling, and the alternating A→B / B→A loop.

pub mod runner;

pub use runner::{AccountContext, Runner};

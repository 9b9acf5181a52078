//! SHUTTLE — Automated round-trip transfer runner for RevaPay
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod session;
pub mod auth;
pub mod api;
pub mod engine;
pub mod storage;

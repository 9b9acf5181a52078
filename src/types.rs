//! Shared types for the SHUTTLE runner.
//!
//! These types form the data model used across all modules: the two
//! mutable account records, API payload shapes, and the domain error
//! enum the engine uses to drive the token lifecycle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Which of the two configured accounts a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountSlot {
    A,
    B,
}

impl fmt::Display for AccountSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountSlot::A => write!(f, "A"),
            AccountSlot::B => write!(f, "B"),
        }
    }
}

/// One of the two mutable account records.
///
/// Tokens are refreshed in place and persisted to the token file after
/// every change. `pay_id` and `wallet` start from config (possibly empty)
/// and are overwritten from the profile endpoint during preflight.
#[derive(Debug, Clone)]
pub struct Account {
    pub slot: AccountSlot,
    pub email: String,
    pub pay_id: String,
    pub wallet: String,
    pub access_token: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    /// Full proxy URL (scheme + credentials + host:port) for this account's
    /// HTTP session.
    pub proxy: String,
}

impl Account {
    /// Token text for persistence. Empty string when the token is absent,
    /// matching the dotenv-shaped file the runner rewrites.
    pub fn access_token_text(&self) -> String {
        self.access_token
            .as_ref()
            .map(|t| t.expose_secret().clone())
            .unwrap_or_default()
    }

    pub fn refresh_token_text(&self) -> String {
        self.refresh_token
            .as_ref()
            .map(|t| t.expose_secret().clone())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Payment API shapes
// ---------------------------------------------------------------------------

/// Profile data returned by the payment API for the authenticated user.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub wallet_address: String,
    pub pay_id: String,
    /// USDT balance. Missing balance in the API response reads as zero.
    pub balance_usdt: Decimal,
}

/// A transfer to submit, rendered as the natural-language "send" message
/// the payment API expects.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub amount: Decimal,
    pub network: String,
    pub to_pay_id: String,
}

impl TransferRequest {
    /// The message body the API parses to create a transaction room.
    pub fn message(&self) -> String {
        format!(
            "send {} usdt on {} to {}(ID)",
            self.amount, self.network, self.to_pay_id
        )
    }
}

/// One entry in a transaction room's message history.
///
/// The API encodes transfer outcome in this history: any entry flagged
/// `isError` means the transfer failed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMessage {
    #[serde(default)]
    pub message_content: String,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub is_error: bool,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Summary of one completed round (A→B then B→A).
#[derive(Debug, Clone)]
pub struct RoundReport {
    pub round: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Room id for the A→B leg.
    pub outbound_room: String,
    /// Room id for the B→A leg.
    pub inbound_room: String,
}

impl fmt::Display for RoundReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Round #{}: out={} in={} ({}s)",
            self.round,
            self.outbound_room,
            self.inbound_room,
            (self.finished_at - self.started_at).num_seconds(),
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for SHUTTLE.
#[derive(Debug, thiserror::Error)]
pub enum ShuttleError {
    /// The API rejected the bearer token (HTTP 401). The engine reacts by
    /// refreshing the token, falling back to a full OTP login.
    #[error("Bearer token rejected (401)")]
    Unauthorized,

    #[error("Proxy unusable ({proxy}): {message}")]
    Proxy { proxy: String, message: String },

    #[error("API error at {endpoint} ({status}): {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Auth error: {0}")]
    Auth(String),

    #[error("Insufficient balance on account {slot}: need {needed} USDT, have {available} USDT")]
    InsufficientBalance {
        slot: AccountSlot,
        needed: Decimal,
        available: Decimal,
    },

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ShuttleError {
    /// Whether an `anyhow` error chain bottoms out in a 401 rejection.
    pub fn is_unauthorized(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<ShuttleError>(),
            Some(ShuttleError::Unauthorized)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! RevaPay payment API integration.
//!
//! The remote API is conversational: a transfer is submitted as a
//! natural-language "send" message, which creates a transaction room;
//! the room's message history encodes success or failure.
//!
//! Endpoints used:
//! - GET  `/api/users/me` — profile + USDT balance
//! - POST `/api/message/create-message` — submit a transfer, returns a room id
//! - GET  `/api/message/get-message/{room_id}` — room message history
//!
//! A 401 surfaces as `ShuttleError::Unauthorized` so the engine can run
//! the token refresh / re-login lifecycle and retry.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info};

use crate::types::{RoomMessage, ShuttleError, TransferRequest, UserProfile};

// ---------------------------------------------------------------------------
// API response types (RevaPay JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MeResponse {
    #[serde(default)]
    user: Option<MeUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeUser {
    #[serde(default)]
    wallet_address: String,
    #[serde(default)]
    pay_id: String,
    #[serde(default)]
    balance: Option<MeBalance>,
}

#[derive(Debug, Deserialize)]
struct MeBalance {
    #[serde(default)]
    usdt: Decimal,
}

/// `create-message` nests its payload twice: `data.data.roomCreated.roomId`.
#[derive(Debug, Deserialize)]
struct CreateMessageResponse {
    data: CreateMessageData,
}

#[derive(Debug, Deserialize)]
struct CreateMessageData {
    data: CreateMessagePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateMessagePayload {
    room_created: RoomCreated,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomCreated {
    room_id: String,
}

#[derive(Debug, Deserialize)]
struct RoomHistoryResponse {
    #[serde(default)]
    data: Vec<RoomMessage>,
}

// ---------------------------------------------------------------------------
// Gateway trait
// ---------------------------------------------------------------------------

/// Abstraction over the payment API.
///
/// The production impl is `PayClient`; integration tests drive the engine
/// against an in-memory mock.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Fetch the authenticated user's profile and balance.
    async fn profile(&self, token: &SecretString) -> Result<UserProfile>;

    /// Submit a transfer message. Returns the id of the transaction room
    /// the API created for it.
    async fn create_transfer(
        &self,
        token: &SecretString,
        request: &TransferRequest,
    ) -> Result<String>;

    /// Fetch the message history of a transaction room.
    async fn room_messages(&self, token: &SecretString, room_id: &str)
        -> Result<Vec<RoomMessage>>;
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// RevaPay client bound to one account's proxied session.
pub struct PayClient {
    http: Client,
    base_url: String,
}

impl PayClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn profile_from_response(resp: MeResponse) -> UserProfile {
        let user = resp.user.unwrap_or_else(|| MeUser {
            wallet_address: String::new(),
            pay_id: String::new(),
            balance: None,
        });
        UserProfile {
            wallet_address: user.wallet_address,
            pay_id: user.pay_id,
            balance_usdt: user.balance.map(|b| b.usdt).unwrap_or_default(),
        }
    }
}

#[async_trait]
impl PaymentGateway for PayClient {
    async fn profile(&self, token: &SecretString) -> Result<UserProfile> {
        let endpoint = format!("{}/api/users/me", self.base_url);
        debug!(endpoint = %endpoint, "Fetching profile");

        let resp = self
            .http
            .get(&endpoint)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .context("Profile request failed")?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ShuttleError::Unauthorized.into());
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ShuttleError::Api {
                endpoint,
                status,
                body,
            }
            .into());
        }

        let me: MeResponse = resp.json().await.context("Failed to parse profile response")?;
        Ok(Self::profile_from_response(me))
    }

    async fn create_transfer(
        &self,
        token: &SecretString,
        request: &TransferRequest,
    ) -> Result<String> {
        let endpoint = format!("{}/api/message/create-message", self.base_url);
        let message = request.message();
        let body = serde_json::json!({
            "message": message,
            "roomId": null,
        });

        let resp = self
            .http
            .post(&endpoint)
            .bearer_auth(token.expose_secret())
            .json(&body)
            .send()
            .await
            .context("Transfer submission failed")?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ShuttleError::Unauthorized.into());
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ShuttleError::Api {
                endpoint,
                status,
                body,
            }
            .into());
        }

        let created: CreateMessageResponse = resp
            .json()
            .await
            .context("Failed to parse create-message response")?;
        let room_id = created.data.data.room_created.room_id;

        info!(message = %message, room_id = %room_id, "Transfer submitted");
        Ok(room_id)
    }

    async fn room_messages(
        &self,
        token: &SecretString,
        room_id: &str,
    ) -> Result<Vec<RoomMessage>> {
        let endpoint = format!("{}/api/message/get-message/{room_id}", self.base_url);
        debug!(endpoint = %endpoint, "Fetching room history");

        let resp = self
            .http
            .get(&endpoint)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .context("Room history request failed")?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ShuttleError::Unauthorized.into());
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ShuttleError::Api {
                endpoint,
                status,
                body,
            }
            .into());
        }

        let history: RoomHistoryResponse = resp
            .json()
            .await
            .context("Failed to parse room history response")?;
        Ok(history.data)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Privy passwordless authentication.
//!
//! Token lifecycle for one account: refresh an expired bearer token via
//! the refresh token, or run the full one-time-code flow (request a code
//! by email, prompt the operator, authenticate) when refresh is not
//! possible. All calls go through the account's proxied session and carry
//! the `privy-app-id` header.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{info, warn};

use crate::types::ShuttleError;

const REFRESH_PATH: &str = "/api/v1/refresh";
const INIT_PATH: &str = "/api/v1/passwordless/init";
const AUTHENTICATE_PATH: &str = "/api/v1/passwordless/authenticate";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

/// Token payload returned by both the refresh and authenticate endpoints.
/// Refresh responses rotate only the access token.
#[derive(Debug, Deserialize)]
struct AuthTokens {
    #[serde(default)]
    token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Tokens granted by a refresh or login.
#[derive(Debug)]
pub struct TokenGrant {
    pub token: SecretString,
    /// Present after a full login; absent after a refresh (the stored
    /// refresh token stays valid).
    pub refresh_token: Option<SecretString>,
}

impl TokenGrant {
    fn from_response(tokens: AuthTokens) -> Result<Self> {
        if tokens.token.is_empty() {
            return Err(ShuttleError::Auth("auth response missing token".to_string()).into());
        }
        Ok(Self {
            token: SecretString::new(tokens.token),
            refresh_token: tokens.refresh_token.map(SecretString::new),
        })
    }
}

// ---------------------------------------------------------------------------
// OTP input
// ---------------------------------------------------------------------------

/// Source of one-time codes for the passwordless login flow.
///
/// Production uses `StdinOtp` (the operator reads the code from their
/// inbox); tests supply canned codes.
#[async_trait]
pub trait OtpSource: Send + Sync {
    async fn code_for(&self, email: &str) -> Result<String>;
}

/// Reads the one-time code from standard input.
pub struct StdinOtp;

#[async_trait]
impl OtpSource for StdinOtp {
    async fn code_for(&self, email: &str) -> Result<String> {
        let email = email.to_string();
        tokio::task::spawn_blocking(move || {
            println!("Enter the one-time code sent to {email}: ");
            let mut line = String::new();
            std::io::stdin()
                .read_line(&mut line)
                .context("Failed to read one-time code from stdin")?;
            Ok(line.trim().to_string())
        })
        .await
        .context("OTP prompt task failed")?
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Passwordless auth client bound to one account's proxied session.
pub struct AuthClient {
    http: Client,
    base_url: String,
    app_id: String,
}

impl AuthClient {
    pub fn new(http: Client, base_url: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            app_id: app_id.into(),
        }
    }

    /// Exchange the refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant> {
        let body = serde_json::json!({ "refresh_token": refresh_token.expose_secret() });

        let resp = self
            .http
            .post(format!("{}{REFRESH_PATH}", self.base_url))
            .header("privy-app-id", &self.app_id)
            .json(&body)
            .send()
            .await
            .context("Token refresh request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                warn!(status = %status, body = %body, "Refresh token rejected");
                return Err(ShuttleError::Unauthorized.into());
            }
            anyhow::bail!("Token refresh failed {status}: {body}");
        }

        let tokens: AuthTokens = resp
            .json()
            .await
            .context("Failed to parse refresh response")?;

        info!("Access token refreshed");
        TokenGrant::from_response(tokens)
    }

    /// Ask the auth service to email a one-time code.
    pub async fn request_code(&self, email: &str) -> Result<()> {
        let body = serde_json::json!({ "email": email });

        let resp = self
            .http
            .post(format!("{}{INIT_PATH}", self.base_url))
            .header("privy-app-id", &self.app_id)
            .json(&body)
            .send()
            .await
            .context("One-time code request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("One-time code request failed {status}: {body}");
        }

        info!(email = %email, "One-time code sent");
        Ok(())
    }

    /// Exchange an emailed one-time code for a fresh token pair.
    pub async fn authenticate(&self, email: &str, code: &str) -> Result<TokenGrant> {
        let body = serde_json::json!({
            "email": email,
            "code": code,
            "mode": "login-or-sign-up",
        });

        let resp = self
            .http
            .post(format!("{}{AUTHENTICATE_PATH}", self.base_url))
            .header("privy-app-id", &self.app_id)
            .json(&body)
            .send()
            .await
            .context("Authenticate request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Authentication failed {status}: {body}");
        }

        let tokens: AuthTokens = resp
            .json()
            .await
            .context("Failed to parse authenticate response")?;

        info!(email = %email, "Passwordless login succeeded");
        TokenGrant::from_response(tokens)
    }

    /// Full passwordless login: request a code, prompt for it, authenticate.
    pub async fn login(&self, email: &str, otp: &dyn OtpSource) -> Result<TokenGrant> {
        self.request_code(email).await?;
        let code = otp.code_for(email).await?;
        self.authenticate(email, &code).await
    }
}

// ---------------------------------------------------------------------------
// Token lifecycle seam
// ---------------------------------------------------------------------------

/// The two ways the engine can obtain fresh tokens for an account.
/// Abstracted so the engine can be driven by an in-memory impl in tests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant>;

    /// Run the full one-time-code login for `email`.
    async fn login(&self, email: &str) -> Result<TokenGrant>;
}

/// Production token source: Privy auth client plus an OTP prompt.
pub struct Authenticator {
    client: AuthClient,
    otp: Box<dyn OtpSource>,
}

impl Authenticator {
    pub fn new(client: AuthClient, otp: Box<dyn OtpSource>) -> Self {
        Self { client, otp }
    }
}

#[async_trait]
impl TokenSource for Authenticator {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant> {
        self.client.refresh(refresh_token).await
    }

    async fn login(&self, email: &str) -> Result<TokenGrant> {
        self.client.login(email, &*self.otp).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

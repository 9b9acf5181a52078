//! The round-trip runner.
//!
//! Everything here is deliberately sequential: the whole system is a
//! single linear sequence of HTTP calls with fixed delays and bounded
//! retries. Token lifecycle (refresh on 401, OTP login as fallback,
//! persist after every change) lives in `reauthorize`, and every gateway
//! call gets exactly one re-auth attempt before the error is surfaced.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use secrecy::SecretString;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::api::PaymentGateway;
use crate::auth::{TokenGrant, TokenSource};
use crate::config::TimingConfig;
use crate::storage;
use crate::types::{Account, RoomMessage, RoundReport, ShuttleError, TransferRequest, UserProfile};

// ---------------------------------------------------------------------------
// Account context
// ---------------------------------------------------------------------------

/// One account's mutable record plus the clients bound to its proxied
/// session.
pub struct AccountContext {
    pub account: Account,
    pub gateway: Box<dyn PaymentGateway>,
    pub tokens: Box<dyn TokenSource>,
}

impl AccountContext {
    pub fn new(
        account: Account,
        gateway: Box<dyn PaymentGateway>,
        tokens: Box<dyn TokenSource>,
    ) -> Self {
        Self {
            account,
            gateway,
            tokens,
        }
    }

    /// Current bearer token, cloned for the duration of one call.
    fn token(&self) -> Result<SecretString> {
        self.account.access_token.clone().ok_or_else(|| {
            anyhow::Error::from(ShuttleError::Auth(format!(
                "account {} has no access token",
                self.account.slot
            )))
        })
    }

    /// Rotate tokens in place. Refresh grants carry no refresh token, so
    /// the stored one is kept.
    pub fn apply_grant(&mut self, grant: TokenGrant) {
        self.account.access_token = Some(grant.token);
        if let Some(refresh) = grant.refresh_token {
            self.account.refresh_token = Some(refresh);
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct Runner {
    amount: Decimal,
    network: String,
    timing: TimingConfig,
    token_file: PathBuf,
}

impl Runner {
    pub fn new(
        amount: Decimal,
        network: impl Into<String>,
        timing: TimingConfig,
        token_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            amount,
            network: network.into(),
            timing,
            token_file: token_file.into(),
        }
    }

    /// Run `rounds` round trips: each round sends A→B, confirms, then
    /// sends B→A and confirms. Preflight verifies both accounts first.
    pub async fn run(
        &self,
        a: &mut AccountContext,
        b: &mut AccountContext,
        rounds: u32,
    ) -> Result<Vec<RoundReport>> {
        self.preflight(a).await?;
        self.preflight(b).await?;

        let to_b = b.account.pay_id.clone();
        let to_a = a.account.pay_id.clone();

        let mut reports = Vec::with_capacity(rounds as usize);
        for round in 1..=rounds {
            info!(round, rounds, "Starting round trip");
            let started_at = Utc::now();

            let outbound_room = self.transfer_leg(a, &to_b).await?;
            tokio::time::sleep(self.timing.step_delay()).await;
            let inbound_room = self.transfer_leg(b, &to_a).await?;

            let report = RoundReport {
                round,
                started_at,
                finished_at: Utc::now(),
                outbound_room,
                inbound_room,
            };
            info!(round, report = %report, "Round trip complete");
            reports.push(report);
        }

        Ok(reports)
    }

    /// Verify an account is usable: valid tokens, profile fetched (PayID
    /// and wallet adopted from it), and balance covering the amount.
    async fn preflight(&self, ctx: &mut AccountContext) -> Result<()> {
        self.ensure_token(ctx).await?;

        let profile = self.fetch_profile(ctx).await?;
        if !profile.pay_id.is_empty() {
            ctx.account.pay_id = profile.pay_id.clone();
        }
        if !profile.wallet_address.is_empty() {
            ctx.account.wallet = profile.wallet_address.clone();
        }

        info!(
            account = %ctx.account.slot,
            email = %ctx.account.email,
            pay_id = %ctx.account.pay_id,
            wallet = %ctx.account.wallet,
            balance = %profile.balance_usdt,
            "Account ready"
        );

        if profile.balance_usdt < self.amount {
            return Err(ShuttleError::InsufficientBalance {
                slot: ctx.account.slot,
                needed: self.amount,
                available: profile.balance_usdt,
            }
            .into());
        }

        Ok(())
    }

    /// Accounts without a full token pair go through the OTP login before
    /// any API call is made.
    async fn ensure_token(&self, ctx: &mut AccountContext) -> Result<()> {
        if ctx.account.access_token.is_some() && ctx.account.refresh_token.is_some() {
            return Ok(());
        }

        warn!(
            account = %ctx.account.slot,
            email = %ctx.account.email,
            "Missing tokens, running one-time-code login"
        );
        let grant = ctx.tokens.login(&ctx.account.email).await?;
        ctx.apply_grant(grant);
        storage::record_tokens(&self.token_file, &ctx.account)
            .context("Failed to persist tokens after login")?;
        Ok(())
    }

    /// Rotate credentials after a 401: refresh first, full OTP login when
    /// refresh is impossible or fails. New tokens are persisted before
    /// the caller retries.
    async fn reauthorize(&self, ctx: &mut AccountContext) -> Result<()> {
        warn!(
            account = %ctx.account.slot,
            email = %ctx.account.email,
            "Bearer token rejected, rotating credentials"
        );

        let grant = match ctx.account.refresh_token.clone() {
            Some(refresh_token) => match ctx.tokens.refresh(&refresh_token).await {
                Ok(grant) => grant,
                Err(e) => {
                    warn!(error = %e, "Refresh failed, falling back to one-time-code login");
                    ctx.tokens.login(&ctx.account.email).await?
                }
            },
            None => ctx.tokens.login(&ctx.account.email).await?,
        };

        ctx.apply_grant(grant);
        storage::record_tokens(&self.token_file, &ctx.account)
            .context("Failed to persist rotated tokens")?;
        info!(account = %ctx.account.slot, "Credentials rotated and persisted");
        Ok(())
    }

    // -- Single calls with one re-auth attempt -----------------------------

    async fn fetch_profile(&self, ctx: &mut AccountContext) -> Result<UserProfile> {
        let token = ctx.token()?;
        // Bind before matching so the call's borrow of `ctx` has ended
        // by the time the re-auth arm needs `&mut ctx`.
        let result = ctx.gateway.profile(&token).await;
        match result {
            Err(e) if ShuttleError::is_unauthorized(&e) => {
                self.reauthorize(ctx).await?;
                let token = ctx.token()?;
                ctx.gateway.profile(&token).await
            }
            other => other,
        }
    }

    async fn submit_once(
        &self,
        ctx: &mut AccountContext,
        request: &TransferRequest,
    ) -> Result<String> {
        let token = ctx.token()?;
        let result = ctx.gateway.create_transfer(&token, request).await;
        match result {
            Err(e) if ShuttleError::is_unauthorized(&e) => {
                self.reauthorize(ctx).await?;
                let token = ctx.token()?;
                ctx.gateway.create_transfer(&token, request).await
            }
            other => other,
        }
    }

    async fn poll_once(
        &self,
        ctx: &mut AccountContext,
        room_id: &str,
    ) -> Result<Vec<RoomMessage>> {
        let token = ctx.token()?;
        let result = ctx.gateway.room_messages(&token, room_id).await;
        match result {
            Err(e) if ShuttleError::is_unauthorized(&e) => {
                self.reauthorize(ctx).await?;
                let token = ctx.token()?;
                ctx.gateway.room_messages(&token, room_id).await
            }
            other => other,
        }
    }

    // -- Retry wrappers -----------------------------------------------------

    /// Submit a transfer, retrying up to `max_retries` times with a fixed
    /// delay between attempts. Returns the transaction room id.
    async fn submit_transfer(&self, ctx: &mut AccountContext, to_pay_id: &str) -> Result<String> {
        let request = TransferRequest {
            amount: self.amount,
            network: self.network.clone(),
            to_pay_id: to_pay_id.to_string(),
        };

        info!(
            account = %ctx.account.slot,
            from = %ctx.account.email,
            to = %to_pay_id,
            amount = %self.amount,
            network = %self.network,
            "Submitting transfer"
        );

        let mut last_error = None;
        for attempt in 1..=self.timing.max_retries {
            if attempt > 1 {
                tokio::time::sleep(self.timing.proxy_retry_delay()).await;
            }
            let outcome = self.submit_once(ctx, &request).await;
            match outcome {
                Ok(room_id) => {
                    info!(account = %ctx.account.slot, room_id = %room_id, "Transfer submitted");
                    return Ok(room_id);
                }
                Err(e) => {
                    warn!(
                        account = %ctx.account.slot,
                        attempt,
                        max_retries = self.timing.max_retries,
                        error = %e,
                        "Transfer submission failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no submission attempts made")))
            .with_context(|| {
                format!(
                    "Transfer submission gave up after {} attempts",
                    self.timing.max_retries
                )
            })
    }

    /// Poll the room history and decide the transfer outcome. An entry
    /// flagged as an error fails the transfer immediately; transport
    /// errors are retried up to `max_retries` times.
    async fn confirm_transfer(&self, ctx: &mut AccountContext, room_id: &str) -> Result<()> {
        let mut last_error = None;
        for attempt in 1..=self.timing.max_retries {
            if attempt > 1 {
                tokio::time::sleep(self.timing.proxy_retry_delay()).await;
            }
            let outcome = self.poll_once(ctx, room_id).await;
            match outcome {
                Ok(messages) => {
                    for msg in &messages {
                        debug!(
                            room_id = %room_id,
                            content = %msg.message_content,
                            is_system = msg.is_system,
                            action = ?msg.action,
                            "Room message"
                        );
                        if msg.is_error {
                            return Err(ShuttleError::TransferFailed(
                                msg.message_content.clone(),
                            )
                            .into());
                        }
                    }
                    info!(
                        account = %ctx.account.slot,
                        room_id = %room_id,
                        messages = messages.len(),
                        "Transfer confirmed"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        account = %ctx.account.slot,
                        room_id = %room_id,
                        attempt,
                        max_retries = self.timing.max_retries,
                        error = %e,
                        "Status poll failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no poll attempts made"))).with_context(
            || {
                format!(
                    "Status poll gave up after {} attempts",
                    self.timing.max_retries
                )
            },
        )
    }

    /// Submit, wait, confirm — the whole leg either settles or fails.
    async fn attempt_leg(&self, ctx: &mut AccountContext, to_pay_id: &str) -> Result<String> {
        let room_id = self.submit_transfer(ctx, to_pay_id).await?;
        tokio::time::sleep(self.timing.step_delay()).await;
        self.confirm_transfer(ctx, &room_id).await?;
        Ok(room_id)
    }

    /// One leg of a round. A failed leg — submission exhausted its
    /// retries or the room reported an error — is rerun exactly once
    /// after `retry_delay`; a second failure aborts the run.
    async fn transfer_leg(&self, ctx: &mut AccountContext, to_pay_id: &str) -> Result<String> {
        let first = self.attempt_leg(ctx, to_pay_id).await;
        match first {
            Ok(room_id) => Ok(room_id),
            Err(e) => {
                warn!(
                    account = %ctx.account.slot,
                    error = %e,
                    "Transfer leg failed, resubmitting once"
                );
                tokio::time::sleep(self.timing.retry_delay()).await;
                self.attempt_leg(ctx, to_pay_id)
                    .await
                    .context("Transfer failed again after resubmission")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

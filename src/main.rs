//! SHUTTLE — Automated round-trip transfer runner for RevaPay
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds one proxied session per account (with a liveness probe), and
//! runs the alternating A→B / B→A transfer loop with graceful shutdown.

use anyhow::Result;
use tracing::{error, info};

use shuttle::api::PayClient;
use shuttle::auth::{AuthClient, Authenticator, StdinOtp};
use shuttle::config::AppConfig;
use shuttle::engine::{AccountContext, Runner};
use shuttle::session;
use shuttle::types::{Account, AccountSlot};

const BANNER: &str = r#"
  ____  _   _ _   _ _____ _____ _     _____
 / ___|| | | | | | |_   _|_   _| |   | ____|
 \___ \| |_| | | | | | |   | | | |   |  _|
  ___) |  _  | |_| | | |   | | | |___| |___
 |____/|_| |_|\___/  |_|   |_| |_____|_____|

  Round-trip transfer runner
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");

    let run_id = uuid::Uuid::new_v4();
    info!(
        agent_name = %cfg.agent.name,
        run_id = %run_id,
        rounds = cfg.agent.rounds,
        amount = %cfg.agent.amount,
        network = %cfg.agent.network,
        "SHUTTLE starting up"
    );

    // -- Resolve accounts and build proxied sessions -----------------------

    let account_a = cfg.accounts.a.resolve(AccountSlot::A, cfg.proxy.as_ref())?;
    let account_b = cfg.accounts.b.resolve(AccountSlot::B, cfg.proxy.as_ref())?;

    let mut ctx_a = build_context(&cfg, account_a).await?;
    let mut ctx_b = build_context(&cfg, account_b).await?;

    let runner = Runner::new(
        cfg.agent.amount,
        cfg.agent.network.clone(),
        cfg.timing.clone(),
        cfg.storage.token_file.clone(),
    );

    // -- Run with graceful shutdown ----------------------------------------

    tokio::select! {
        result = runner.run(&mut ctx_a, &mut ctx_b, cfg.agent.rounds) => {
            match result {
                Ok(reports) => {
                    for report in &reports {
                        info!(summary = %report, "Round trip");
                    }
                    info!(rounds = reports.len(), "All round trips complete. SHUTTLE shut down cleanly.");
                }
                Err(e) => {
                    error!(error = %e, "Run aborted");
                    return Err(e);
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received.");
        }
    }

    Ok(())
}

/// Build the session, gateway, and auth clients for one account.
async fn build_context(cfg: &AppConfig, account: Account) -> Result<AccountContext> {
    let client = session::connect(
        &account.proxy,
        cfg.timing.request_timeout(),
        cfg.timing.max_retries,
        cfg.timing.proxy_retry_delay(),
    )
    .await?;

    let gateway = PayClient::new(client.clone(), cfg.api.pay_base_url.clone());
    let auth = AuthClient::new(
        client,
        cfg.api.auth_base_url.clone(),
        cfg.api.privy_app_id.clone(),
    );
    let tokens = Authenticator::new(auth, Box::new(StdinOtp));

    Ok(AccountContext::new(
        account,
        Box::new(gateway),
        Box::new(tokens),
    ))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("shuttle=info"));

    let json_logging = std::env::var("SHUTTLE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}

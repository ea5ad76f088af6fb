//! Headless order engine for kitchen-display terminals.
//!
//! ```text
//! pos-order-engine                                  run auto-advance until Ctrl-C
//! pos-order-engine configure <connection> [url]     store terminal credentials
//! pos-order-engine reset                            delete stored credentials
//! ```

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use pos_order_engine::logging::{default_log_dir, init_logging};
use pos_order_engine::{storage, Actor, EngineConfig, OrderEngine};

const ENV_LOG_DIR: &str = "POS_LOG_DIR";
const ENV_STAFF_ID: &str = "POS_STAFF_ID";
const ENV_STAFF_ROLE: &str = "POS_STAFF_ROLE";
const SESSION_REFRESH: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    let log_dir = std::env::var_os(ENV_LOG_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(default_log_dir);
    let _guard = init_logging(Some(&log_dir));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_sha = env!("ENGINE_GIT_SHA"),
        "Starting order engine"
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("configure") => {
            let Some(connection) = args.get(1) else {
                bail!("usage: pos-order-engine configure <connection-string> [admin-url]");
            };
            storage::store_terminal_credentials(connection, args.get(2).map(String::as_str), None)
                .map_err(anyhow::Error::msg)?;
            return Ok(());
        }
        Some("reset") => {
            storage::clear_terminal_credentials().map_err(anyhow::Error::msg)?;
            return Ok(());
        }
        Some(other) => bail!("unknown command: {other}"),
        None => {}
    }

    let config = EngineConfig::from_env().context("Terminal not configured")?;
    info!(admin_url = %config.admin_url, channel = %config.channel, "Configuration loaded");
    let engine = OrderEngine::from_config(&config)?;

    let staff_id = std::env::var(ENV_STAFF_ID).unwrap_or_else(|_| "kitchen-display".into());
    let role = std::env::var(ENV_STAFF_ROLE).unwrap_or_else(|_| "staff".into());
    let actor = Actor::with_role(&staff_id, &role);
    engine.auth().sign_in(actor.clone());
    if !engine.sync_authorization().await {
        bail!("role '{role}' may not update order status; auto-advance not started");
    }

    // Operator sessions have a maximum lifetime; the sidecar's service
    // actor signs in again well before it runs out.
    let mut session_refresh = tokio::time::interval_at(
        tokio::time::Instant::now() + SESSION_REFRESH,
        SESSION_REFRESH,
    );
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            _ = session_refresh.tick() => {
                engine.auth().sign_in(actor.clone());
                if !engine.sync_authorization().await {
                    warn!("Auto-advance stopped after session refresh");
                }
            }
        }
    }

    info!("Shutdown requested");
    engine.stop_auto_advance().await;
    Ok(())
}

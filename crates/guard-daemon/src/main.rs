//! Guard Daemon
//!
//! Runs the kill switch, risk accountant and tamper monitor for one bot process,
//! and serves the status endpoint plus token-gated operator routes.

mod control_loop;
mod routes;

use anyhow::{Context, Result};
use clap::Parser;
use guard_core::{GuardConfig, SystemClock};
use notifier::Notifier;
use risk_manager::{CircuitBreaker, ConfigIntegrityMonitor, RiskAccountant};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::control_loop::{ControlLoop, ExitReason};
use crate::routes::{create_router, AppState, OPERATOR_TOKEN_ENV};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser)]
#[command(name = "guard-daemon")]
#[command(about = "Risk guard for multi-strategy trading bots", long_about = None)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, default_value = "config/guard.yaml")]
    config: PathBuf,

    /// Override the status endpoint address
    #[arg(long)]
    status_addr: Option<String>,

    /// Do not serve the status endpoint
    #[arg(long)]
    no_http: bool,
}

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let (json_layer, text_layer) = if json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guard_daemon=info,risk_manager=info,notifier=info".into()),
        )
        .with(json_layer)
        .with(text_layer)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = GuardConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    info!(
        fingerprint = %config.fingerprint()?,
        path = %cli.config.display(),
        "Starting Guard Daemon"
    );
    if !config.kill_switch.enabled {
        warn!("Kill switch toggle is off at startup, trading will not be permitted");
    }

    let notifier = Arc::new(Notifier::from_config(&config.notifier)?);
    if notifier.configured_channels().is_empty() {
        warn!(
            path = %config.notifier.panic_log_path.display(),
            "No notification channel configured, escalations go to the PANIC log only"
        );
    }

    let breaker = Arc::new(CircuitBreaker::new(config.kill_switch.clone(), notifier.clone()));
    let accountant = Arc::new(RiskAccountant::new(
        config.risk.clone(),
        config.starting_capital,
        breaker.clone(),
        Arc::new(SystemClock),
    ));

    let config_path = config
        .monitor
        .config_path
        .clone()
        .unwrap_or_else(|| cli.config.clone());
    let monitor = ConfigIntegrityMonitor::new(
        config_path,
        config.monitor.secrets_path.clone(),
        breaker.clone(),
        notifier.clone(),
    )
    .await;

    if !cli.no_http {
        let addr = cli
            .status_addr
            .clone()
            .unwrap_or_else(|| config.daemon.status_addr.clone());
        let operator_token = std::env::var(OPERATOR_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty());
        if operator_token.is_none() {
            warn!(
                env = OPERATOR_TOKEN_ENV,
                "No operator token set, override and strategy routes are disabled"
            );
        }
        let state = Arc::new(AppState {
            accountant: accountant.clone(),
            notifier: notifier.clone(),
            operator_token,
        });
        let router = create_router(state).layer(TraceLayer::new_for_http());

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding status endpoint on {addr}"))?;
        info!(address = %addr, "Status endpoint listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "Status endpoint stopped");
            }
        });
    }

    let control = ControlLoop::new(
        accountant,
        monitor,
        Duration::from_secs(config.daemon.poll_interval_secs),
    );
    match control.run(shutdown_signal()).await {
        ExitReason::Disabled => warn!(tier = %breaker.tier(), "Guard disabled, exiting"),
        ExitReason::Shutdown => info!("Guard Daemon stopped"),
    }

    Ok(())
}

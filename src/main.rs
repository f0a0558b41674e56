mod config;
mod error;
mod evaluator;
mod marketplace;
mod model;
mod monitor;
mod notifier;

use std::sync::Arc;
use std::time::Duration;

use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tokio::task::JoinError;
use tokio::time::error::Elapsed;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::{AppConfig, NotifierKind};
use marketplace::Marketplace;
use marketplace::bybit::BybitP2p;
use monitor::{Monitor, MonitorSettings};
use notifier::Notifier;
use notifier::telegram::TelegramNotifier;
use notifier::terminal::TerminalNotifier;

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("runtime error")]
    Runtime,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let config = config::from_env().change_context(AppError::Config)?;

    init_tracing(&config);

    info!(
        rules = config.rules.len(),
        asset = %config.asset,
        payment_methods = ?config.payment_methods,
        signed = config.credentials.is_some(),
        "configuration loaded"
    );

    let marketplace: Arc<dyn Marketplace> = Arc::new(BybitP2p::new(config.credentials.clone()));
    let notifier = build_notifier(&config);

    let monitor = Monitor::new(
        marketplace,
        notifier,
        config.rules.clone(),
        MonitorSettings::from_config(&config),
    );

    // ── Shutdown ──────────────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    let mut handle = tokio::spawn(monitor.run(cancel.clone()));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.change_context(AppError::Runtime)?;
            info!("ctrl+c received, shutting down");
        }
        joined = &mut handle => return Err(unexpected_exit(joined)),
    }

    cancel.cancel();

    // A fetch has no timeout of its own; give up on it after a grace period.
    log_monitor_exit(tokio::time::timeout(Duration::from_secs(5), handle).await);

    info!("shutdown complete");
    Ok(())
}

/// The loop only returns once cancelled, so an earlier exit means it died.
fn unexpected_exit(joined: Result<usize, JoinError>) -> Report<AppError> {
    match joined {
        Ok(cycles) => Report::new(AppError::Runtime)
            .attach(format!("monitor stopped unexpectedly after {cycles} cycles")),
        Err(e) => Report::new(e).change_context(AppError::Runtime),
    }
}

fn log_monitor_exit(result: Result<Result<usize, JoinError>, Elapsed>) {
    match result {
        Ok(Ok(cycles)) => info!(cycles, "monitor finished"),
        Ok(Err(e)) => error!(error = %e, "monitor task failed"),
        Err(_) => warn!("monitor did not stop within the grace period"),
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.log_level);
    match config.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

fn build_notifier(config: &AppConfig) -> Arc<dyn Notifier> {
    match &config.notifier {
        NotifierKind::Telegram { token } => Arc::new(TelegramNotifier::new(token.clone())),
        NotifierKind::Terminal => Arc::new(TerminalNotifier),
    }
}

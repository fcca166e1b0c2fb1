//! xcm-monitor service binary.
//!
//! Exit codes: 0 after a shutdown signal, 1 on configuration errors or lost chain connectivity.

use actix_web::dev::ServerHandle;
use anyhow::Context;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use xcm_monitor::alert::{AlertSink, LogAlertSink, TelegramAlertSink};
use xcm_monitor::checkpoint::{resume_block, PgCheckpointStore};
use xcm_monitor::{
    metrics, GapFillingPoller, LogLevel, Metrics, MonitorError, ReconnectingExecutor, Settings,
    SidecarConnector, XcmMonitor,
};

fn init_tracing(level: LogLevel) {
    // RUST_LOG wins over the configured level when set.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(reason = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(reason = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn stop_early(metrics_handle: ServerHandle) -> anyhow::Result<()> {
    tracing::info!("shutdown during startup");
    metrics_handle.stop(true).await;
    Ok(())
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let metrics = Metrics::new(&settings.metrics_prefix).context("register metrics")?;
    let metrics = Arc::new(metrics);
    let metrics_server = metrics::serve(Arc::clone(&metrics), settings.metrics_port)
        .context("bind metrics endpoint")?;
    let metrics_handle = metrics_server.handle();
    tokio::spawn(metrics_server);

    let checkpoint = Arc::new(
        PgCheckpointStore::connect(&settings.database_url)
            .await
            .context("connect checkpoint store")?,
    );
    let alerts: Arc<dyn AlertSink> = if settings.alerts_enabled {
        Arc::new(TelegramAlertSink::new(
            settings.telegram_token.as_deref().unwrap_or_default(),
            settings.telegram_chat_id.as_deref().unwrap_or_default(),
        )?)
    } else {
        tracing::info!("alert delivery disabled, alerts are logged only");
        Arc::new(LogAlertSink)
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let reconnection = settings.reconnection();
    let relay = match ReconnectingExecutor::connect_with_shutdown(
        "relay",
        Arc::new(SidecarConnector::new(&settings.relay_url, settings.rpc_timeout())),
        reconnection.clone(),
        shutdown_rx.clone(),
    )
    .await
    {
        Ok(relay) => Arc::new(relay),
        Err(MonitorError::Interrupted { .. }) => return stop_early(metrics_handle).await,
        Err(e) => return Err(e.into()),
    };
    let para = match ReconnectingExecutor::connect_with_shutdown(
        "para",
        Arc::new(SidecarConnector::new(&settings.para_url, settings.rpc_timeout())),
        reconnection,
        shutdown_rx.clone(),
    )
    .await
    {
        Ok(para) => Arc::new(para),
        Err(MonitorError::Interrupted { .. }) => return stop_early(metrics_handle).await,
        Err(e) => return Err(e.into()),
    };

    let last_fired = resume_block(checkpoint.as_ref(), settings.initial_block).await;
    metrics.set_last_processed_block(last_fired);
    let monitor = Arc::new(XcmMonitor::new(
        Arc::clone(&relay),
        para,
        settings.controller_address.clone(),
        checkpoint,
        alerts,
        Arc::clone(&metrics),
    ));
    let poller = GapFillingPoller::new(
        relay,
        settings.para_id,
        monitor,
        last_fired,
        settings.poll_interval(),
    );

    let result = poller.run(shutdown_rx).await;
    metrics_handle.stop(true).await;
    result?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match Settings::build() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::from(1);
        }
    };
    init_tracing(settings.log_level);

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(reason = %e, "monitor stopped");
            ExitCode::from(1)
        }
    }
}

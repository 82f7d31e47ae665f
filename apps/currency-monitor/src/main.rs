//! Currency Monitor Binary
//!
//! Starts the ticker feed client, the alert mail worker, the config watcher
//! and the health endpoint.
//!
//! # Usage
//!
//! ```bash
//! MONITOR_CONFIG=~/.currency-monitor.json cargo run --bin currency-monitor
//! ```
//!
//! # Environment Variables
//!
//! ## Configuration file
//! - `MONITOR_CONFIG`: JSON configuration file, hot-reloaded (default: unset)
//! - `MONITOR_POLL_INTERVAL_MS`: Config file poll interval (default: 1000)
//!
//! ## Without a configuration file
//! - `MONITOR_URL`: Feed endpoint (default: <wss://api.huobi.pro/ws>)
//! - `MONITOR_CURRENCIES`: Comma-separated symbols (default: btcusdt)
//! - `MONITOR_PRICE_FORMAT`: Price format (default: .2f)
//! - `MONITOR_EMAIL`: Alert recipient (default: unset)
//!
//! ## Optional
//! - `MONITOR_LOG_DIR`: Per-symbol tick log directory (default: log to stdout)
//! - `MONITOR_THROTTLE_SECS`: Minimum seconds between alerts per symbol (default: 1800)
//! - `MONITOR_BACKOFF_SECS`: Reconnect delay (default: 5)
//! - `MONITOR_MAX_RECONNECT_ATTEMPTS`: Reconnect cap, 0 = unlimited (default: 0)
//! - `MONITOR_SUBSCRIBE_TIMEOUT_SECS`: Subscription ack timeout (default: 10)
//! - `MONITOR_IDLE_TIMEOUT_SECS`: Inbound idle timeout (default: 30)
//! - `MONITOR_HEALTH_PORT`: Health/metrics HTTP port, 0 = disabled (default: 8085)
//! - `SENDMAIL_PATH`, `MAIL_FROM`, `MAIL_SUBJECT`, `MAIL_TIMEOUT_SECS`: Mail delivery
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use currency_monitor::application::ports::{FeedControl, TickSink};
use currency_monitor::infrastructure::config::load;
use currency_monitor::infrastructure::health::{HealthServer, HealthServerState};
use currency_monitor::infrastructure::telemetry;
use currency_monitor::{
    AlertDispatcher, ConfigError, ConfigStore, ConfigWatcher, FeedConnection, MonitorConfig,
    NotificationThrottle, RuntimeSettings, SendmailMailSink, TickLogRegistry, TickLogWriter,
    TickRouter, WatcherSettings, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Currency Monitor");

    // Initialize Prometheus metrics
    let _metrics_handle = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    };

    let settings = RuntimeSettings::from_env();
    let initial = load_initial_config(&settings)?;
    log_config(&settings, &initial);

    let shutdown_token = CancellationToken::new();

    let store = Arc::new(ConfigStore::new(initial));
    let throttle = Arc::new(NotificationThrottle::new(settings.throttle_interval));
    let registry = match &settings.log_dir {
        Some(dir) => TickLogRegistry::open(dir)?,
        None => TickLogRegistry::tracing_only(),
    };
    let tick_writer = TickLogWriter::spawn(registry)?;
    let tick_log: Arc<dyn TickSink> = Arc::new(tick_writer.clone());

    // Alert mail worker
    let mail_sink = Arc::new(SendmailMailSink::new(settings.mail.clone()));
    let (dispatcher, alert_tx) = AlertDispatcher::new(mail_sink, shutdown_token.clone());
    let mail_task = tokio::spawn(dispatcher.run());

    // Feed connection
    let router = Arc::new(TickRouter::new(
        Arc::clone(&store),
        Arc::clone(&throttle),
        Arc::clone(&tick_log),
        alert_tx,
    ));
    let (connection, feed_handle) = FeedConnection::new(
        settings.feed.clone(),
        Arc::clone(&store),
        router,
        shutdown_token.clone(),
    );
    let feed_status = feed_handle.status();

    // Spawn config watcher
    if let Some(path) = settings.config_path.clone() {
        let feed_control: Arc<dyn FeedControl> = Arc::new(feed_handle);
        let watcher = ConfigWatcher::new(
            WatcherSettings::new(path).with_poll_interval(settings.poll_interval),
            Arc::clone(&store),
            Arc::clone(&throttle),
            feed_control,
            shutdown_token.clone(),
        )
        .with_tick_sink(tick_log);
        tokio::spawn(watcher.run());
    }

    // Spawn health server
    if settings.health_port == 0 {
        tracing::info!("Health server disabled");
    } else {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            feed_status,
            Arc::clone(&store),
            Arc::clone(&throttle),
        ));
        let health_server =
            HealthServer::new(settings.health_port, health_state, shutdown_token.clone());
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    let mut feed_task = tokio::spawn(connection.run());

    tracing::info!("Currency monitor ready");

    let mut feed_failed = false;
    tokio::select! {
        () = await_shutdown(shutdown_token.clone()) => {}
        result = &mut feed_task => {
            feed_failed = true;
            match result {
                Ok(Ok(())) => tracing::warn!("Feed connection stopped"),
                Ok(Err(e)) => tracing::error!(error = %e, "Feed connection failed"),
                Err(e) => tracing::error!(error = %e, "Feed connection task panicked"),
            }
            shutdown_token.cancel();
        }
    }

    let drain = async {
        if !feed_failed && let Err(e) = feed_task.await {
            tracing::error!(error = %e, "Feed connection task panicked");
        }
        if let Err(e) = mail_task.await {
            tracing::error!(error = %e, "Mail worker task panicked");
        }
        if tick_writer.flush().await.is_none() {
            tracing::warn!("Tick log writer stopped before shutdown");
        }
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Graceful shutdown timed out"
        );
    }

    tracing::info!("Currency monitor stopped");
    if feed_failed {
        return Err("feed connection stopped".into());
    }
    Ok(())
}

/// Load the configuration file, or build one from the environment.
fn load_initial_config(settings: &RuntimeSettings) -> Result<MonitorConfig, ConfigError> {
    match &settings.config_path {
        Some(path) => load(path),
        None => settings.fallback.to_monitor_config(),
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(settings: &RuntimeSettings, config: &MonitorConfig) {
    tracing::info!(
        url = %config.url,
        symbols = config.symbols.len(),
        email_configured = config.email.is_some(),
        config_file = settings.config_path.is_some(),
        throttle_secs = settings.throttle_interval.as_secs(),
        health_port = settings.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        log_dir = ?settings.log_dir,
        backoff_secs = settings.feed.backoff_delay.as_secs(),
        idle_timeout_secs = settings.feed.idle_timeout.as_secs(),
        sendmail = %settings.mail.sendmail_path.display(),
        "Runtime settings"
    );
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}

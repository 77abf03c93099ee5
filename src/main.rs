mod config;
mod diff;
mod http;
mod metrics;
mod snapshot;
mod source;
mod state;
mod telegram;

use axum::serve;
use clap::Parser;
use config::Config;
use metrics::Metrics;
use reqwest::Client;
use source::TopologySource;
use state::EngineState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use telegram::Notifier;
use teloxide::Bot;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "topologyd")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    #[arg(long, conflicts_with = "telegram_off")]
    telegram_on: bool,
    #[arg(long, conflicts_with = "telegram_on")]
    telegram_off: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if cli.telegram_on {
        cfg.telegram.enabled = true;
    } else if cli.telegram_off {
        cfg.telegram.enabled = false;
    }

    let api_key = match ensure_source_settings(&cfg) {
        Ok(key) => key,
        Err(err) => {
            error!(error = %err, "failed to prepare topology source settings");
            std::process::exit(1);
        }
    };

    let telegram_token = if cfg.telegram.enabled {
        match ensure_telegram_settings(&cfg) {
            Ok(token) => Some(token),
            Err(err) => {
                error!(error = %err, "failed to prepare Telegram settings");
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    info!(
        listen = %cfg.listen,
        interval_secs = cfg.interval_secs,
        source = %cfg.source.base_url,
        "starting topologyd"
    );

    let now = now_unix();
    let shared_state = Arc::new(RwLock::new(EngineState::new(now, cfg.change_log_capacity)));
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let cfg = cfg.clone();
        let metrics = metrics.clone();
        let http_state = shared_state.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, http_state);
            let addr: SocketAddr = match cfg.listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %cfg.listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to start HTTP server");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    let notifier = if cfg.telegram.enabled {
        let bot = Bot::new(telegram_token.unwrap_or_default());
        Some(Notifier::new(bot, cfg.telegram.clone(), metrics.clone()))
    } else {
        None
    };

    let poll_task = {
        let cfg = cfg.clone();
        let metrics = metrics.clone();
        let shared_state = shared_state.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let client = Client::builder()
                .user_agent("topologyd/0.1.0")
                .build()
                .unwrap_or_else(|_| Client::new());
            let source = TopologySource::new(client, &cfg.source, api_key);

            // The first tick fires immediately and doubles as the seed
            // fetch; an overrunning cycle delays the next tick rather than
            // skipping or overlapping it.
            let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("received shutdown signal, stopping poll loop");
                        break;
                    }
                    _ = ticker.tick() => {
                        run_poll_cycle(&source, &shared_state, &metrics, notifier.as_ref()).await;
                    }
                }
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = poll_task.await;
    let _ = http_task.await;
}

/// One fetch-and-reconcile cycle. A source failure skips the cycle and keeps
/// the previous snapshot; the next scheduled tick is the retry.
async fn run_poll_cycle(
    source: &TopologySource,
    shared_state: &Arc<RwLock<EngineState>>,
    metrics: &Arc<Metrics>,
    notifier: Option<&Notifier>,
) {
    let now = now_unix();
    match source.fetch_snapshot().await {
        Ok(snapshot) => {
            let (alerts, published) = {
                let mut guard = shared_state.write().await;
                let alerts = guard.apply_snapshot(snapshot, now);
                (alerts, guard.clone())
            };

            metrics.update_from_state(&published);
            info!(
                nodes = published.summary.total,
                critical = published.summary.critical.count,
                alerts = alerts.len(),
                "poll cycle reconciled"
            );

            if let Some(notifier) = notifier {
                notifier.dispatch(alerts);
            }
        }
        Err(err) => {
            metrics.inc_source_error();
            {
                let mut guard = shared_state.write().await;
                guard.record_source_failure(err.to_string());
            }
            warn!(error = %err, "snapshot source unavailable, keeping previous topology");
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn resolve_secret_from_env(env_name: &str) -> Option<String> {
    if let Ok(v) = std::env::var(env_name) {
        if !v.trim().is_empty() {
            return Some(v);
        }
    }
    None
}

fn ensure_source_settings(cfg: &Config) -> Result<String, String> {
    let env_name = cfg.source.api_key_env.clone();
    let env_key = resolve_secret_from_env(&env_name);
    let cfg_key = cfg
        .source
        .api_key
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    if let Some(v) = env_key {
        return Ok(v);
    }
    if let Some(v) = cfg_key {
        return Ok(v);
    }

    Err(format!(
        "no topology API key found: set '{}' in the environment or source.api_key in config",
        env_name
    ))
}

fn ensure_telegram_settings(cfg: &Config) -> Result<String, String> {
    let env_name = cfg.telegram.bot_token_env.clone();
    let env_token = resolve_secret_from_env(&env_name);
    let cfg_token = cfg
        .telegram
        .bot_token
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    if cfg.telegram.allowed_chat_ids.is_empty() {
        return Err(
            "telegram.allowed_chat_ids is empty: add at least one chat id to config".to_string(),
        );
    }

    if let Some(v) = env_token {
        return Ok(v);
    }
    if let Some(v) = cfg_token {
        return Ok(v);
    }

    Err(format!(
        "no Telegram token found: set '{}' in the environment or telegram.bot_token in config",
        env_name
    ))
}

mod config;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

use sentinel_api::state::AppState;
use sentinel_core::{
    alert_channel, AlertChannel, AlertDispatcher, EmailChannel, Engine, EngineConfig,
    MonitorStore, ProbeKind, ProbeSet, Prober, RetryPolicy, Scheduler, SqliteStore,
    TelegramChannel, WebhookChannel,
};

use crate::config::{AppConfig, MonitorDef, DEFAULT_LISTEN};

fn version_string() -> &'static str {
    static VERSION: OnceLock<String> = OnceLock::new();
    VERSION.get_or_init(|| {
        let version = env!("CARGO_PKG_VERSION");
        match env!("SENTINEL_GIT_HASH") {
            "" => version.to_string(),
            hash => format!("{version} ({hash})"),
        }
    })
}

/// VPS Sentinel: uptime monitoring for HTTP endpoints, page keywords and TCP ports.
#[derive(Parser)]
#[command(name = "vps-sentinel", version = version_string(), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler, alerting and HTTP API.
    Serve {
        /// Listen address (e.g. 0.0.0.0:3000). Overrides config file and PORT.
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Check a single target once, with retries, and exit.
    Check {
        /// URL to probe (or host name with --port).
        url: String,

        /// Require this text in the response body.
        #[arg(long, conflicts_with = "port")]
        keyword: Option<String>,

        /// Probe a TCP port instead of making an HTTP request.
        #[arg(long)]
        port: Option<i64>,

        /// Additional attempts after a failed first attempt.
        #[arg(long, default_value_t = 2)]
        retries: u32,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { listen, config } => {
            run_serve(listen, config).await;
        }
        Commands::Check {
            url,
            keyword,
            port,
            retries,
        } => {
            fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
                )
                .init();
            let up = run_check(url, keyword, port, retries).await;
            if !up {
                std::process::exit(1);
            }
        }
    }
}

/// `--listen` wins, then the config file, then `PORT`, then the default.
fn resolve_listen(
    flag: Option<SocketAddr>,
    file: Option<SocketAddr>,
    port_env: Option<String>,
) -> Result<SocketAddr, String> {
    if let Some(addr) = flag.or(file) {
        return Ok(addr);
    }
    let default: SocketAddr = DEFAULT_LISTEN
        .parse()
        .map_err(|e| format!("Invalid default listen address: {e}"))?;
    match port_env {
        Some(port) => {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|_| format!("Invalid PORT value '{port}'"))?;
            Ok(SocketAddr::new(default.ip(), port))
        }
        None => Ok(default),
    }
}

async fn run_serve(listen_override: Option<SocketAddr>, config_path: Option<PathBuf>) {
    let app_config = if let Some(ref path) = config_path {
        match AppConfig::load(path) {
            Ok(c) => {
                init_tracing(&c.server.log_format);
                tracing::info!(path = %path.display(), "Loaded config file");
                c
            }
            Err(e) => {
                init_tracing("pretty");
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        }
    } else {
        init_tracing("pretty");
        AppConfig::default()
    };

    let listen = match resolve_listen(
        listen_override,
        app_config.server.listen,
        std::env::var("PORT").ok(),
    ) {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let engine_config = app_config.probe.to_engine_config();

    let store = match SqliteStore::connect(&app_config.database.url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(url = %app_config.database.url, error = %e, "Failed to open database");
            std::process::exit(1);
        }
    };

    seed_monitors(store.as_ref(), &app_config.monitor).await;

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build HTTP client");
            std::process::exit(1);
        }
    };

    let channels = build_channels(&app_config, client);
    if channels.is_empty() {
        tracing::warn!("No alert channels configured, transitions will only be logged");
    }
    let (alert_tx, alert_rx) = alert_channel();
    let dispatcher = AlertDispatcher::new(alert_rx, channels);
    tracing::info!(channels = dispatcher.channel_count(), "Alert dispatcher started");
    let dispatcher_handle = tokio::spawn(dispatcher.run());

    let prober = match ProbeSet::from_config(&engine_config) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build probes");
            std::process::exit(1);
        }
    };

    let engine = Engine::new(store, Arc::new(prober), &engine_config, Some(alert_tx));
    let state = AppState::new(engine.clone()).with_history_limit(engine_config.history_limit);

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let scheduler_handle = Scheduler::new(engine).spawn(async move {
        let _ = stop_rx.await;
    });

    tracing::info!(%listen, "Starting VPS Sentinel");
    if let Err(e) = sentinel_api::serve_with_state(listen, state, sentinel_api::shutdown_signal()).await {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }

    tracing::info!("Shutdown signal received, stopping scheduler...");
    let _ = stop_tx.send(());
    if let Err(e) = scheduler_handle.await {
        tracing::warn!(error = %e, "Scheduler task ended abnormally");
    }

    match tokio::time::timeout(Duration::from_secs(5), dispatcher_handle).await {
        Ok(_) => tracing::info!("Alert dispatcher shut down"),
        Err(_) => tracing::warn!("Alert dispatcher did not shut down in time, aborting"),
    }

    tracing::info!("Shutdown complete");
}

/// Add config-declared monitors whose URL is not stored yet.
async fn seed_monitors(store: &dyn MonitorStore, defs: &[MonitorDef]) {
    if defs.is_empty() {
        return;
    }
    let existing: HashSet<String> = match store.list_monitors().await {
        Ok(monitors) => monitors.into_iter().map(|m| m.url).collect(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list monitors, skipping config monitors");
            return;
        }
    };

    for def in defs {
        let new = match def.to_new_monitor() {
            Ok(new) => new,
            Err(e) => {
                tracing::error!("{}", e);
                continue;
            }
        };
        if existing.contains(&new.url) {
            continue;
        }
        match store.add_monitor(new).await {
            Ok(m) => tracing::info!(monitor_id = m.id, name = %m.name, "Monitor added from config"),
            Err(e) => tracing::error!(name = %def.name, error = %e, "Failed to add monitor"),
        }
    }
}

fn build_channels(config: &AppConfig, client: reqwest::Client) -> Vec<Arc<dyn AlertChannel>> {
    let mut channels: Vec<Arc<dyn AlertChannel>> = Vec::new();

    if let Some(tg) = config.telegram_config() {
        channels.push(Arc::new(TelegramChannel::new(tg, client.clone())));
    }

    if let Some(email) = &config.email {
        match EmailChannel::new(email.clone()) {
            Ok(channel) => channels.push(Arc::new(channel)),
            Err(e) => tracing::error!(error = %e, "Email channel disabled"),
        }
    }

    for wh in &config.webhook {
        channels.push(Arc::new(WebhookChannel::new(wh.clone(), client.clone())));
    }

    channels
}

async fn run_check(url: String, keyword: Option<String>, port: Option<i64>, retries: u32) -> bool {
    let kind = match (keyword, port) {
        (_, Some(port)) => ProbeKind::port(port),
        (Some(keyword), None) => ProbeKind::keyword(keyword),
        (None, None) => Ok(ProbeKind::Http),
    };
    let kind = match kind {
        Ok(k) => k,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            return false;
        }
    };

    let config = EngineConfig::default().with_max_retries(retries);
    let probes = match ProbeSet::from_config(&config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            return false;
        }
    };
    let retry = RetryPolicy::from_config(&config);

    println!(
        "{} {}",
        style("vps-sentinel").bold(),
        style(env!("CARGO_PKG_VERSION")).dim()
    );
    println!("  {} {}", style("target:").dim(), style(&url).bold());
    println!("  {} {}", style("kind:  ").dim(), describe(&kind));
    println!();

    let spinner = ProgressBar::new_spinner().with_style(
        ProgressStyle::with_template("  {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));

    let (probes, target, probe_kind, bar) = (&probes, url.as_str(), &kind, &spinner);
    let outcome = retry
        .run(move |attempt| {
            bar.set_message(format!("attempt {}/{}", attempt, retries + 1));
            probes.probe(target, probe_kind)
        })
        .await;
    spinner.finish_and_clear();

    let latency = format!("{}ms", outcome.latency_ms);
    if outcome.is_up() {
        println!(
            "  {}  {}  {}",
            style("UP  ").green().bold(),
            style(outcome.status).green(),
            style(latency).dim()
        );
    } else {
        let status = match outcome.status {
            0 => "unreachable".to_string(),
            409 if matches!(kind, ProbeKind::Keyword { .. }) => "409 keyword missing".to_string(),
            code => code.to_string(),
        };
        println!(
            "  {}  {}  {}",
            style("DOWN").red().bold(),
            style(status).red(),
            style(latency).dim()
        );
    }

    outcome.is_up()
}

fn describe(kind: &ProbeKind) -> String {
    match kind {
        ProbeKind::Http => "http".into(),
        ProbeKind::Keyword { keyword } => format!("keyword \"{keyword}\""),
        ProbeKind::Port { port } => format!("tcp port {port}"),
    }
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}

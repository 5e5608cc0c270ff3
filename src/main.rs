//! pollguard host binary.
//!
//! Polls every configured target through [`PollGuard`] and logs a one-line
//! status per target whenever it changes.
//!
//! ```text
//!   pollguard.toml ──▶ GuardConfig ──▶ PollGuard<serde_json::Value>
//!        │                                 │
//!        │ (watcher)      per target: poll(name, HttpProbe::fetch)
//!        ▼                                 │
//!   target diff ──▶ start / restart / detach
//!                                          │
//!        reporter: render ActionState ──▶ log on change
//!        status API (optional): /consumers, /circuits, /metrics
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use url::Url;

use pollguard::admin::{self, AdminState};
use pollguard::config::{load_config, ConfigWatcher, GuardConfig, TargetConfig, TargetDiff};
use pollguard::observability::{logging, metrics};
use pollguard::state::ActionState;
use pollguard::upstream::HttpProbe;
use pollguard::{PollGuard, TimerPort, TokioTimer};

const REPORT_INTERVAL: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "pollguard")]
#[command(about = "Poll status endpoints through a cache, retries and a circuit breaker", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "pollguard.toml")]
    config: PathBuf,

    /// Fetch every target once, print the results and exit.
    #[arg(long)]
    once: bool,

    /// Do not reload the target list when the config file changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    logging::init(&config.observability)?;

    tracing::info!(
        config = %cli.config.display(),
        targets = config.targets.len(),
        "pollguard v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::install_exporter(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let client = HttpProbe::client(CONNECT_TIMEOUT, config.polling.request_timeout())?;
    let timer: Arc<dyn TimerPort> = Arc::new(TokioTimer::new());
    let guard: PollGuard<Value> = PollGuard::new(&config, timer);

    if cli.once {
        for target in &config.targets {
            let probe = HttpProbe::new(client.clone(), Url::parse(&target.url)?);
            let result = guard
                .fetch(&target.name, ttl_for(target, &guard), move || {
                    let probe = probe.clone();
                    async move { probe.fetch().await }
                })
                .await;
            match result {
                Ok(value) => println!("{}: {}", target.name, summarize(&value, None)),
                Err(err) => println!("{}: {}", target.name, err.user_message()),
            }
        }
        return Ok(());
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let maintenance = guard.spawn_maintenance(shutdown_tx.subscribe());

    let status_api = if config.admin.enabled {
        let addr: SocketAddr = config.admin.bind_address.parse()?;
        let listener = TcpListener::bind(addr).await?;
        let state = AdminState::new(guard.clone(), config.admin.api_key.clone());
        let router = admin::setup_admin_router(state, config.admin.request_timeout());
        Some(tokio::spawn(admin::serve(listener, router, shutdown_tx.subscribe())))
    } else {
        None
    };

    let mut current = config;
    for target in &current.targets {
        start_target(&guard, &client, &current, target);
    }

    let (_watcher, mut reloads) = match cli.no_watch {
        true => (None, None),
        false => match ConfigWatcher::new(&cli.config).run() {
            Ok((watcher, reloads)) => (Some(watcher), Some(reloads)),
            Err(e) => {
                tracing::warn!(error = %e, "Config watcher unavailable, reload disabled");
                (None, None)
            }
        },
    };

    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    let mut last_lines: HashMap<String, String> = HashMap::new();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for target in &current.targets {
                    report(&guard, target, &mut last_lines);
                }
            }
            Some(next) = next_reload(&mut reloads) => {
                apply_reload(&guard, &client, &current, &next, &mut last_lines);
                current = next;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, detaching consumers");
                break;
            }
        }
    }

    guard.shutdown();
    let _ = shutdown_tx.send(());
    maintenance.await?;
    if let Some(status_api) = status_api {
        status_api.await??;
    }

    tracing::info!(metrics = ?guard.metrics(), "Shutdown complete");
    Ok(())
}

async fn next_reload(
    reloads: &mut Option<tokio::sync::mpsc::UnboundedReceiver<GuardConfig>>,
) -> Option<GuardConfig> {
    match reloads {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn start_target(guard: &PollGuard<Value>, client: &reqwest::Client, config: &GuardConfig, target: &TargetConfig) {
    let url = match Url::parse(&target.url) {
        Ok(url) => url,
        Err(e) => {
            tracing::error!(target_name = %target.name, error = %e, "Skipping target with invalid url");
            return;
        }
    };
    let interval = target
        .interval_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(config.polling.default_interval_secs));

    let probe = HttpProbe::new(client.clone(), url);
    guard.poll(
        &target.name,
        &target.name,
        interval,
        ttl_for(target, guard),
        move || {
            let probe = probe.clone();
            async move { probe.fetch().await }
        },
    );
}

fn apply_reload(
    guard: &PollGuard<Value>,
    client: &reqwest::Client,
    current: &GuardConfig,
    next: &GuardConfig,
    last_lines: &mut HashMap<String, String>,
) {
    let diff = TargetDiff::between(&current.targets, &next.targets);
    if diff.is_empty() {
        tracing::info!("Config reloaded, target list unchanged");
        return;
    }

    for name in &diff.removed {
        guard.detach(name);
        guard.release_key(name);
        last_lines.remove(name);
    }
    for target in &diff.changed {
        guard.release_key(&target.name);
        start_target(guard, client, next, target);
    }
    for target in &diff.added {
        start_target(guard, client, next, target);
    }

    tracing::info!(
        added = diff.added.len(),
        changed = diff.changed.len(),
        removed = diff.removed.len(),
        "Config reloaded, targets updated"
    );
}

fn ttl_for(target: &TargetConfig, guard: &PollGuard<Value>) -> Duration {
    target
        .ttl_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| guard.default_ttl())
}

fn report(guard: &PollGuard<Value>, target: &TargetConfig, last_lines: &mut HashMap<String, String>) {
    let Some(state) = guard.state(&target.name) else {
        return;
    };

    let line = render(&state, rotate(guard, target, &state));
    if last_lines.get(&target.name) != Some(&line) {
        tracing::info!(target_name = %target.name, attempts = state.connection_attempts, "{line}");
        last_lines.insert(target.name.clone(), line);
    }
}

/// Index to show this report; advances the stored index for the next one.
fn rotate(guard: &PollGuard<Value>, target: &TargetConfig, state: &ActionState<Value>) -> Option<usize> {
    match (&state.last_result, target.rotate) {
        (Some(Value::Array(items)), true) => {
            guard.states().increment_rotation_index(&target.name, items.len());
            Some(state.rotation_index)
        }
        _ => None,
    }
}

fn render(state: &ActionState<Value>, rotation: Option<usize>) -> String {
    if let Some(open) = &state.breaker_open {
        return format!("paused, retrying in {}s", open.retry_in.as_secs());
    }
    match (&state.last_result, &state.last_error) {
        (_, Some(err)) => err.user_message().to_string(),
        (Some(value), None) => summarize(value, rotation),
        (None, None) => "loading".to_string(),
    }
}

/// One line per document. Arrays show the rotated item, or a count.
fn summarize(value: &Value, rotation: Option<usize>) -> String {
    match (value, rotation) {
        (Value::Array(items), _) if items.is_empty() => "none".to_string(),
        (Value::Array(items), Some(index)) => {
            let index = index % items.len();
            format!("{}/{}: {}", index + 1, items.len(), label(&items[index]))
        }
        (Value::Array(items), None) => format!("{} items", items.len()),
        (other, _) => label(other),
    }
}

fn label(value: &Value) -> String {
    ["status", "state", "result", "name", "title"]
        .iter()
        .find_map(|field| value.get(field).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

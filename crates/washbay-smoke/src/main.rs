//! Washbay Smoke Harness
//!
//! Runs one scripted pass of the offline engine against a real SQLite
//! store: install, activate, queue a booking, drain it to a headless page,
//! acknowledge it, and serve a navigation. Prints a JSON report.
//!
//! ```text
//! washbay-smoke [--config engine.json] [--db path/to/washbay.db] [--offline]
//! ```

use anyhow::{Context, Result};
use serde_json::json;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use washbay_common::{init_logging, LogConfig};
use washbay_store::{MutationStore, SqliteStore};
use washbay_sw::{
    ControlMessage, EngineConfig, EventOutcome, FetchOutcome, FetchRequest, FetchResponse,
    MemoryHost, Network, NetworkConfig, ReqwestNetwork, ScriptedNetwork, ServiceWorker,
    WorkerEvent,
};

/// Performance timing collector for tracking operation durations.
struct PerfTiming {
    timings: RefCell<HashMap<&'static str, Duration>>,
}

impl PerfTiming {
    fn new() -> Self {
        Self {
            timings: RefCell::new(HashMap::new()),
        }
    }

    fn record(&self, operation: &'static str, started: Instant) {
        self.timings.borrow_mut().insert(operation, started.elapsed());
    }

    fn summary(&self) -> serde_json::Value {
        let timings = self.timings.borrow();
        let summary = timings
            .iter()
            .map(|(op, d)| {
                let ms = (d.as_secs_f64() * 100_000.0).round() / 100.0;
                (op.to_string(), json!(ms))
            })
            .collect();
        serde_json::Value::Object(summary)
    }
}

/// Parse command line arguments
struct Args {
    config: Option<PathBuf>,
    db: Option<PathBuf>,
    offline: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;
        let mut db = None;
        let mut offline = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => config = args.next().map(PathBuf::from),
                "--db" => db = args.next().map(PathBuf::from),
                "--offline" => offline = true,
                other => warn!(arg = other, "Ignoring unknown argument"),
            }
        }

        Self {
            config,
            db,
            offline,
        }
    }

    fn db_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.db {
            return Ok(path.clone());
        }
        let base = dirs::data_local_dir().context("no local data directory on this platform")?;
        Ok(base.join("washbay").join("washbay.db"))
    }
}

/// Network answering every app-shell path locally.
fn scripted_network(config: &EngineConfig) -> Result<ScriptedNetwork> {
    let network = ScriptedNetwork::new();
    for path in config.app_shell.iter().chain([&config.root_document]) {
        let body = format!("<!-- washbay smoke: {path} -->");
        network.route(config.resolve(path)?.as_str(), FetchResponse::new(200, body));
    }
    Ok(network)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(LogConfig::from_env());

    let args = Args::parse();
    let config = EngineConfig::load(args.config.as_deref())?;
    let db_path = args.db_path()?;
    info!(
        config = ?args.config,
        db = %db_path.display(),
        offline = args.offline,
        version = %config.version,
        "Starting Washbay Smoke Harness"
    );

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = Arc::new(SqliteStore::open(&db_path)?);
    let host = Arc::new(MemoryHost::new());
    let network: Arc<dyn Network> = if args.offline {
        Arc::new(scripted_network(&config)?)
    } else {
        Arc::new(ReqwestNetwork::new(NetworkConfig::default())?)
    };

    let worker = ServiceWorker::builder(config.clone())
        .store(Arc::clone(&store))
        .network(network)
        .host(Arc::clone(&host))
        .build()?;
    let timing = PerfTiming::new();

    // Lifecycle
    host.with_registration(|r| r.update(config.version.clone()));
    let started = Instant::now();
    let installed = match worker.handle(WorkerEvent::Install).await {
        Ok(handled) => matches!(handled.settle().await, EventOutcome::Installed { .. }),
        Err(e) => {
            error!(error = %e, retryable = e.is_retryable(), "Install failed");
            false
        }
    };
    timing.record("install", started);
    host.with_registration(|r| r.install_complete(installed));

    let started = Instant::now();
    let deleted = match worker.handle(WorkerEvent::Activate).await?.settle().await {
        EventOutcome::Activated { deleted } => deleted,
        _ => Vec::new(),
    };
    timing.record("activate", started);

    // Offline write, drain, acknowledge
    let page = host.open_page(config.resolve("/dashboard")?);
    let id = store
        .enqueue(json!({
            "service": "full-detail",
            "vehicle": "sedan",
            "slot": washbay_common::now_millis(),
        }))
        .await?;

    let started = Instant::now();
    let report = match worker
        .handle(WorkerEvent::Sync {
            tag: config.sync_tag.clone(),
        })
        .await?
        .settle()
        .await
    {
        EventOutcome::Synced(report) => Some(report),
        _ => None,
    };
    timing.record("drain", started);

    for message in host.messages_for(&page.id) {
        if let ControlMessage::SyncBooking { offline_id, .. } = message {
            let ack = ControlMessage::BookingSynced { offline_id };
            worker
                .handle(WorkerEvent::Message {
                    source: Some(page.id.clone()),
                    data: ack.to_json(),
                })
                .await?;
        }
    }
    worker
        .handle(WorkerEvent::Message {
            source: Some(page.id.clone()),
            data: ControlMessage::GetPendingCount.to_json(),
        })
        .await?;

    // Navigation
    let started = Instant::now();
    let navigation = worker
        .handle(WorkerEvent::Fetch(FetchRequest::navigate(config.resolve("/")?)))
        .await?
        .settle()
        .await;
    timing.record("navigation", started);
    let navigation = match navigation {
        EventOutcome::Fetch(FetchOutcome::Respond(r)) => {
            json!({"status": r.status, "from_cache": r.from_cache})
        }
        other => json!({"outcome": format!("{other:?}")}),
    };

    let replies: Vec<_> = host
        .messages_for(&page.id)
        .iter()
        .map(ControlMessage::to_json)
        .collect();
    let result = json!({
        "installed": installed,
        "deleted_buckets": deleted,
        "enqueued": id,
        "drain": report.map(|r| json!({
            "pending": r.pending,
            "clients": r.clients,
            "messages_sent": r.messages_sent,
            "dead_lettered": r.dead_lettered,
        })),
        "remaining": store.count().await?,
        "messages": replies,
        "navigation": navigation,
        "timings_ms": timing.summary(),
    });
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use dispatch_core::{
    load_dispatch_config, load_dispatch_config_from_env, BackendConfig, Clock, DispatchEngine,
    HttpBackend, LocalStore, MemoryBackend, RemoteBackend, SessionContext, SyncEvent, SystemClock,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

mod app;

use app::{ConsoleApp, StdoutReportSink};

#[derive(Parser, Debug)]
#[command(author, version, about = "Line-mode dispatch board console", long_about = None)]
struct Cli {
    /// RPC endpoint of the dispatch backend. Overrides the config file.
    #[arg(long)]
    endpoint: Option<String>,
    /// API key sent with every request. Overrides the config file.
    #[arg(long, env = "DISPATCH_API_KEY")]
    api_key: Option<String>,
    /// Session token issued at login.
    #[arg(long, env = "DISPATCH_TOKEN", default_value = "")]
    token: String,
    /// Operator name; keys the local profile and address history.
    #[arg(long, default_value = "DISP1")]
    operator: String,
    #[arg(long, default_value = "dispatcher")]
    role: String,
    /// Allow LOGOFF FORCE past revision conflicts.
    #[arg(long = "override")]
    override_guard: bool,
    /// JSON config file. Falls back to DISPATCH_CONFIG_PATH, then the builtin defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Local profile store. Kept in memory when omitted.
    #[arg(long)]
    store: Option<PathBuf>,
    /// Run against an in-process demo board instead of a remote backend.
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => load_dispatch_config(path),
        None => load_dispatch_config_from_env(),
    };
    let mut config = (*loaded).clone();
    let backend_config = BackendConfig {
        endpoint: cli
            .endpoint
            .clone()
            .unwrap_or_else(|| config.backend().endpoint.clone()),
        api_key: cli
            .api_key
            .clone()
            .unwrap_or_else(|| config.backend().api_key.clone()),
    };
    config.set_backend(backend_config.clone());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backend: Arc<dyn RemoteBackend> = if cli.demo {
        info!("Running against the in-process demo board");
        Arc::new(MemoryBackend::demo(Arc::clone(&clock)).as_actor(cli.operator.clone()))
    } else {
        info!("Connecting to dispatch backend at {}", backend_config.endpoint);
        Arc::new(HttpBackend::new(
            backend_config.endpoint,
            backend_config.api_key,
        ))
    };

    let limit = config.local_store().address_history_limit();
    let store = match &cli.store {
        Some(path) => LocalStore::open(path, limit).unwrap_or_else(|err| {
            warn!("Local store unavailable, keeping profile in memory: {err}");
            LocalStore::in_memory(limit)
        }),
        None => LocalStore::in_memory(limit),
    };

    let session = SessionContext::new(cli.token.clone(), cli.operator.clone())
        .with_role(cli.role.clone())
        .with_override(cli.override_guard);

    let engine = DispatchEngine::new(
        &config,
        backend,
        session,
        clock,
        store,
        Arc::new(StdoutReportSink),
    );

    let reconciler = engine.reconciler();
    let events = reconciler.subscribe();
    let (trigger_tx, trigger_rx) = mpsc::channel::<()>(8);
    let poll_handle = tokio::spawn(reconciler.run(trigger_rx));
    let _event_handle = tokio::spawn(print_sync_events(events));

    // First snapshot before the operator starts typing.
    let _ = trigger_tx.send(()).await;

    let app = ConsoleApp::new(engine, trigger_tx);
    let result = app.run().await;

    // The poll loop exits once every trigger sender is gone.
    let _ = poll_handle.await;
    info!("Console shut down");
    result
}

async fn print_sync_events(mut events: broadcast::Receiver<SyncEvent>) {
    loop {
        match events.recv().await {
            Ok(SyncEvent::Changed(changes)) => {
                if changes.any() {
                    let sections: Vec<String> = changes
                        .changed_sections()
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                    println!("-- board updated: {}", sections.join(", "));
                }
            }
            Ok(SyncEvent::Liveness(liveness)) => println!("-- connection {liveness:?}"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Dropped {skipped} sync events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

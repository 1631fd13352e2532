//! EduBridge CLI
//!
//! Runs the session service: HTTP API, live event feed and snapshot
//! persistence.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use edubridge_core::{
    accounts, create_router, mailer_from_config, AppState, Config, MailProvider, Store,
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// EduBridge - tutoring session invitations
///
/// Serves the REST API and WebSocket feed used by tutors and students to
/// schedule sessions, send invitations and collect responses.
#[derive(Parser, Debug)]
#[command(name = "edubridge")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: edubridge.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Port for the HTTP API server (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Path of the data snapshot (overrides storage.dataFile)
    #[arg(short, long, value_name = "FILE")]
    data_file: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("EduBridge starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Runs the server until Ctrl+C.
///
/// 1. Load and validate config
/// 2. Load the data snapshot
/// 3. Provision the bootstrap admin
/// 4. Serve HTTP with periodic autosave
/// 5. Save once more on shutdown
async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(ref data_file) = args.data_file {
        config.storage.data_file.clone_from(data_file);
    }

    // Re-validate after overrides
    config.validate()?;

    print_config(&config);

    let mailer = mailer_from_config(&config.mailer)?;

    let data_path = PathBuf::from(&config.storage.data_file);
    let store = Store::load(&data_path).await?;
    println!();
    println!(
        "Data loaded from {}: {} users, {} sessions",
        data_path.display(),
        store.users().len(),
        store.sessions_where(|_| true).len()
    );

    let addr = config.server_address();
    let autosave = Duration::from_secs(u64::from(config.storage.autosave_seconds));
    let state = AppState::with_store(config, store, mailer);
    let shared_store = Arc::clone(&state.store);

    if accounts::ensure_bootstrap_admin(&state).await? {
        println!("Bootstrap admin provisioned");
    }

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    let autosave_handle = tokio::spawn(autosave_loop(
        Arc::clone(&shared_store),
        data_path.clone(),
        autosave,
    ));

    println!("HTTP API server running on http://{addr}");
    println!("Press Ctrl+C to stop");

    let router = create_router(state);
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    autosave_handle.abort();

    println!();
    println!("Saving data...");
    shared_store.lock().await.save(&data_path).await?;
    println!("Data saved to {}", data_path.display());

    served.map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))
}

/// Writes the snapshot whenever the store revision moved since the last save.
async fn autosave_loop(store: Arc<Mutex<Store>>, path: PathBuf, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // First tick completes immediately
    interval.tick().await;
    let mut saved_revision = store.lock().await.revision();

    loop {
        interval.tick().await;
        // Serialize under the lock; the file write happens after it is released.
        let (revision, bytes) = {
            let store = store.lock().await;
            let revision = store.revision();
            if revision == saved_revision {
                continue;
            }
            match store.snapshot() {
                Ok(bytes) => (revision, bytes),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to serialize data");
                    continue;
                }
            }
        };
        match Store::write_snapshot(&path, &bytes).await {
            Ok(()) => {
                tracing::debug!(revision, path = %path.display(), "Autosaved data");
                saved_revision = revision;
            }
            Err(e) => tracing::warn!(error = %e, "Failed to autosave data"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Prints the loaded configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Listen address: {}", config.server_address());
    println!("  Public URL: {}", config.public_url);
    println!("  Data file: {}", config.storage.data_file);
    println!("  Autosave: every {}s", config.storage.autosave_seconds);
    println!("  Mail provider: {:?}", config.mailer.provider);
    if config.mailer.provider == MailProvider::Memory {
        println!("  (memory provider: emails are kept in-process and never delivered)");
    }
    println!(
        "  Email webhook secret: {}",
        if config.mailer.webhook_secret.is_some() {
            "set"
        } else {
            "not set"
        }
    );
}

use anyhow::Result;
use std::io::IsTerminal;
use std::sync::Arc;

use llm_speedtest::config::{self, Config};
use llm_speedtest::orchestrator::BenchmarkOrchestrator;
use llm_speedtest::routes;
use llm_speedtest::store::{validate_api_key, CredentialStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("🚀 LLM Speed Test starting...");
    tracing::info!(
        "Server configured: {}:{}",
        config.server_host,
        config.server_port
    );

    let store = Arc::new(SqliteStore::open(&config.db_file)?);
    tracing::info!("✅ Result store ready: {}", config.db_file.display());

    ensure_api_key(&config, store.as_ref())?;

    let orchestrator = Arc::new(BenchmarkOrchestrator::new(
        config.gateway_settings(),
        store.clone(),
        store.clone(),
    ));
    tracing::info!("✅ Benchmark orchestrator initialized");

    let app_state = routes::AppState {
        orchestrator,
        credentials: store.clone(),
        history: store,
    };

    // Build the application with routes and middleware
    let app = routes::build_app(app_state);

    // Bind to configured host and port
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    print_startup_banner(&config);

    tracing::info!("🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("👋 Server shutdown complete");

    Ok(())
}

/// Make sure the provider key is in the store.
///
/// A configured key is written through; otherwise an interactive terminal is
/// offered a prompt. The server still starts without a key, but benchmark
/// requests fail until one is saved.
fn ensure_api_key(config: &Config, store: &dyn CredentialStore) -> Result<()> {
    let provider = &config.provider_name;

    if let Some(key) = &config.api_key {
        match validate_api_key(key, &config.api_key_prefix) {
            Ok(()) => {
                store.put_credential(provider, key.trim())?;
                tracing::info!("✅ {} API key loaded from configuration", provider);
            }
            Err(e) => tracing::warn!("Ignoring configured API key: {}", e),
        }
        return Ok(());
    }

    if store.get_credential(provider)?.is_some() {
        tracing::info!("✅ {} API key found in store", provider);
        return Ok(());
    }

    if !std::io::stdin().is_terminal() {
        tracing::warn!(
            "No {} API key configured; set OPENROUTER_API_KEY or POST /api/openrouter/api-key",
            provider
        );
        return Ok(());
    }

    match config::prompt_for_api_key(provider)? {
        Some(key) => match validate_api_key(&key, &config.api_key_prefix) {
            Ok(()) => {
                store.put_credential(provider, &key)?;
                tracing::info!("✅ {} API key saved", provider);
            }
            Err(e) => tracing::warn!("API key not saved: {}", e),
        },
        None => tracing::warn!("Starting without a {} API key", provider),
    }

    Ok(())
}

/// Print startup banner
fn print_startup_banner(config: &Config) {
    let banner = r#"
╔═══════════════════════════════════════════════════════════╗
║                                                           ║
║                   ⚡ LLM Speed Test                        ║
║                                                           ║
║      Concurrent latency comparison across models         ║
║                                                           ║
╚═══════════════════════════════════════════════════════════╝
"#;

    println!("{}", banner);
    println!("  Version:     {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Server:      http://{}:{}",
        config.server_host, config.server_port
    );
    println!("  Gateway:     {}", config.gateway_url);
    println!("  Provider:    {}", config.provider_name);
    println!("  Database:    {}", config.db_file.display());
    println!("  Log Level:   {}", config.log_level);
    println!();
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}

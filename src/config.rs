use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Password;
use std::path::PathBuf;

use crate::provider::GatewaySettings;

const DEFAULT_GATEWAY_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_DB_FILE: &str = "~/.local/share/llm-speedtest/results.sqlite3";

/// LLM Speed Test - concurrent latency comparison across gateway models
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value = "8000")]
    pub port: u16,

    /// Chat-completion gateway base URL
    #[arg(short = 'g', long, env = "GATEWAY_URL", default_value = DEFAULT_GATEWAY_URL)]
    pub gateway_url: String,

    /// Provider name credentials and results are stored under
    #[arg(long, env = "PROVIDER_NAME", default_value = "OpenRouter")]
    pub provider: String,

    /// Gateway API key (stored in the credential store at startup)
    #[arg(short = 'k', long, env = "OPENROUTER_API_KEY")]
    pub api_key: Option<String>,

    /// Required API key prefix
    #[arg(long, env = "API_KEY_PREFIX", default_value = "sk-or-")]
    pub api_key_prefix: String,

    /// Path to the SQLite database for keys and results
    #[arg(short = 'd', long, env = "DB_FILE")]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// TCP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "30")]
    pub connect_timeout: u64,

    /// Maximum idle connections kept per host
    #[arg(long, env = "HTTP_MAX_CONNECTIONS", default_value = "20")]
    pub max_connections: usize,

    /// HTTP-Referer attribution header sent to the gateway
    #[arg(long, env = "HTTP_REFERER", default_value = "http://localhost:5173")]
    pub referer: String,

    /// X-Title attribution header sent to the gateway
    #[arg(long, env = "APP_TITLE", default_value = "LLM Speed Test")]
    pub app_title: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Gateway
    pub gateway_url: String,
    pub provider_name: String,
    pub api_key: Option<String>,
    pub api_key_prefix: String,

    // Storage
    pub db_file: PathBuf,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_max_connections: usize,
    pub referer: String,
    pub app_title: String,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > .env > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Ok(Self::from_args(CliArgs::parse()))
    }

    pub fn from_args(args: CliArgs) -> Self {
        Config {
            server_host: args.host,
            server_port: args.port,

            gateway_url: args.gateway_url.trim_end_matches('/').to_string(),
            provider_name: args.provider,
            api_key: args.api_key.filter(|key| !key.trim().is_empty()),
            api_key_prefix: args.api_key_prefix,

            db_file: expand_tilde(args.db_file.as_deref().unwrap_or(DEFAULT_DB_FILE)),

            http_connect_timeout: args.connect_timeout,
            http_max_connections: args.max_connections,
            referer: args.referer,
            app_title: args.app_title,

            log_level: args.log_level,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server_port == 0 {
            anyhow::bail!("SERVER_PORT must be greater than 0");
        }

        if self.gateway_url.is_empty() {
            anyhow::bail!("GATEWAY_URL must not be empty");
        }

        if !self.gateway_url.starts_with("http://") && !self.gateway_url.starts_with("https://") {
            anyhow::bail!(
                "GATEWAY_URL must be an http(s) URL: {}",
                self.gateway_url
            );
        }

        if self.provider_name.trim().is_empty() {
            anyhow::bail!("PROVIDER_NAME must not be empty");
        }

        Ok(())
    }

    /// Settings the orchestrator needs to build provider clients
    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            base_url: self.gateway_url.clone(),
            provider_name: self.provider_name.clone(),
            api_key_prefix: self.api_key_prefix.clone(),
            connect_timeout_secs: self.http_connect_timeout,
            max_idle_connections: self.http_max_connections,
            referer: Some(self.referer.clone()).filter(|s| !s.is_empty()),
            title: Some(self.app_title.clone()).filter(|s| !s.is_empty()),
        }
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// === Interactive Setup ===

/// Ask for a gateway API key on the terminal.
///
/// Returns `None` when the user just presses enter.
pub fn prompt_for_api_key(provider: &str) -> Result<Option<String>> {
    println!();
    println!("No {} API key is configured.", provider);
    println!("Enter one now to enable benchmarks, or press enter to skip.");
    println!();

    let key: String = Password::new()
        .with_prompt(format!("{} API key", provider))
        .allow_empty_password(true)
        .interact()
        .context("Failed to read API key")?;

    let key = key.trim().to_string();
    Ok(if key.is_empty() { None } else { Some(key) })
}

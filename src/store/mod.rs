// Credential and result persistence
// The orchestrator only sees these traits; concrete stores are injected

pub mod memory;
pub mod sqlite;

use anyhow::Result;

use crate::error::BenchError;
use crate::models::benchmark::{Credential, ResultRecord, StoredResult};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Values people paste from documentation instead of a real key
const PLACEHOLDER_KEYS: &[&str] = &[
    "your-api-key",
    "your_api_key",
    "your-api-key-here",
    "your_api_key_here",
    "your-openrouter-api-key",
    "your_openrouter_api_key",
    "<your-api-key>",
    "changeme",
    "sk-or-v1-...",
];

/// Source of API keys, keyed by provider name
pub trait CredentialStore: Send + Sync {
    /// Stored credential for the provider, if any
    fn get_credential(&self, provider: &str) -> Result<Option<Credential>>;

    /// Insert or replace the provider's key
    fn put_credential(&self, provider: &str, value: &str) -> Result<()>;
}

/// Receiver of finished per-model outcomes.
///
/// Called from the blocking pool, once per model, so implementations may do
/// synchronous I/O.
pub trait ResultSink: Send + Sync {
    fn record(&self, record: &ResultRecord) -> Result<()>;
}

/// Read access to recorded results, newest first
pub trait ResultHistory: Send + Sync {
    fn recent(&self, limit: usize) -> Result<Vec<StoredResult>>;
}

/// Check a key's shape before any network use.
///
/// Rejects empty keys, known placeholders, keys with whitespace and keys
/// lacking `expected_prefix` or anything after it.
pub fn validate_api_key(value: &str, expected_prefix: &str) -> Result<(), BenchError> {
    let value = value.trim();

    if value.is_empty() {
        return Err(BenchError::InvalidCredential("API key is empty".to_string()));
    }

    let lowered = value.to_ascii_lowercase();
    if PLACEHOLDER_KEYS.contains(&lowered.as_str()) || value.ends_with("...") {
        return Err(BenchError::InvalidCredential(
            "API key is a placeholder value".to_string(),
        ));
    }

    if value.chars().any(char::is_whitespace) {
        return Err(BenchError::InvalidCredential(
            "API key must not contain whitespace".to_string(),
        ));
    }

    if !value.starts_with(expected_prefix) || value.len() == expected_prefix.len() {
        return Err(BenchError::InvalidCredential(format!(
            "API key must start with '{}'",
            expected_prefix
        )));
    }

    Ok(())
}

/// [`validate_api_key`] for a stored credential
pub fn validate_credential(credential: &Credential, expected_prefix: &str) -> Result<(), BenchError> {
    validate_api_key(&credential.value, expected_prefix)
}

// In-memory credential and result store

use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use super::{CredentialStore, ResultHistory, ResultSink};
use crate::models::benchmark::{Credential, ResultRecord, StoredResult};

/// Process-local store, for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryStore {
    credentials: DashMap<String, Credential>,
    results: Mutex<Vec<StoredResult>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with one provider key
    pub fn with_credential(provider: &str, value: &str) -> Self {
        let store = Self::new();
        store.credentials.insert(
            provider.to_string(),
            Credential {
                provider: provider.to_string(),
                value: value.to_string(),
                obtained_at: Utc::now(),
            },
        );
        store
    }

    /// Everything recorded so far, oldest first
    pub fn records(&self) -> Vec<StoredResult> {
        self.results
            .lock()
            .map(|results| results.clone())
            .unwrap_or_default()
    }
}

impl CredentialStore for MemoryStore {
    fn get_credential(&self, provider: &str) -> Result<Option<Credential>> {
        Ok(self
            .credentials
            .get(provider)
            .map(|entry| entry.value().clone()))
    }

    fn put_credential(&self, provider: &str, value: &str) -> Result<()> {
        self.credentials.insert(
            provider.to_string(),
            Credential {
                provider: provider.to_string(),
                value: value.to_string(),
                obtained_at: Utc::now(),
            },
        );
        Ok(())
    }
}

impl ResultSink for MemoryStore {
    fn record(&self, record: &ResultRecord) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut results = self
            .results
            .lock()
            .map_err(|_| anyhow::anyhow!("result store lock poisoned"))?;
        results.push(StoredResult {
            id,
            prompt: record.prompt.clone(),
            provider: record.provider.clone(),
            model: record.model.clone(),
            response_time: record.response_time_ms,
            response_text: record.response_text.clone(),
            status: record.status.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }
}

impl ResultHistory for MemoryStore {
    fn recent(&self, limit: usize) -> Result<Vec<StoredResult>> {
        let results = self
            .results
            .lock()
            .map_err(|_| anyhow::anyhow!("result store lock poisoned"))?;
        Ok(results.iter().rev().take(limit).cloned().collect())
    }
}

//! Database models for the zonewatch broker.

use serde_json::Value;

use zonewatch_core::results::ResultEntry;

/// Test record from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TestRow {
    pub id: i64,
    pub hash_id: String,
    pub fingerprint: i64,
    pub domain: String,
    pub batch_id: Option<i64>,
    pub creation_time: i64,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub progress: i64,
    pub params: String,
    pub results: Option<String>,
    pub undelegated: bool,
    pub priority: i64,
    pub queue: i64,
}

impl TestRow {
    /// The stored (normalized) params document.
    pub fn params_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.params)
    }

    /// The stored result entries; empty until the test finished.
    pub fn result_entries(&self) -> Result<Vec<ResultEntry>, serde_json::Error> {
        match &self.results {
            Some(json) => serde_json::from_str(json),
            None => Ok(Vec::new()),
        }
    }
}

/// Progress summary of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStatus {
    pub nb_running: i64,
    pub nb_finished: i64,
    pub finished_test_ids: Vec<String>,
}

/// What `add_user` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddUserOutcome {
    Created,
    AlreadyExists { same_key: bool },
}

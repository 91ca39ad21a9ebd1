//! The durable job store.
//!
//! One interface, three interchangeable SQL backends. The broker talks to
//! `dyn Store` only; placeholder dialects, autoincrement DDL,
//! unique-violation signaling, and the claim-serialization primitive are
//! the adapters' business. External test agents drive the claim contract
//! (`claim_next` / `set_progress` / `store_results`) through the same
//! interface.

pub mod models;
pub mod mysql;
pub mod postgres;
pub mod schema;
pub mod sqlite;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use zonewatch_core::config::{DbConfig, DbEngine};
use zonewatch_core::fingerprint;
use zonewatch_core::params::TestParams;
use zonewatch_core::results::{self, ResultEntry};
use zonewatch_core::validation::HistoryQuery;

pub use models::{AddUserOutcome, BatchStatus, TestRow};
pub use mysql::MysqlStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Test not found: {0}")]
    TestNotFound(String),

    #[error("Unknown batch job id: {0}")]
    BatchNotFound(i64),

    #[error("User not authorized: {0}")]
    Unauthorized(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("Batch job still running: {batch_id}")]
    BatchStillRunning { batch_id: i64, creation_time: i64 },

    #[error("Results for test {0} rejected: test was never claimed")]
    NotStarted(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Query(e.to_string())
    }
}

/// Normalized unique-violation check shared by the adapters. sqlx folds the
/// driver-specific codes (SQLite 2067/1555, PostgreSQL 23505, MySQL 1062)
/// into one error kind.
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Serialize a result document for storage, dropping sub-`INFO` entries at
/// the boundary.
pub(crate) fn encode_results(entries: Vec<ResultEntry>) -> Result<String, StoreError> {
    let kept = results::boundary_filter(entries);
    Ok(serde_json::to_string(&kept)?)
}

/// Returns the current time as a Unix timestamp (seconds since epoch).
#[allow(clippy::cast_possible_wrap)]
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Everything the store needs to persist one new test.
///
/// The test id is not part of this: it is derived inside the creating
/// transaction from `canonical` plus the row's creation time.
#[derive(Debug, Clone)]
pub struct CreateTest {
    pub fingerprint: i64,
    pub canonical: String,
    pub domain: String,
    pub params_json: String,
    pub undelegated: bool,
    pub priority: i64,
    pub queue: i64,
}

impl CreateTest {
    /// Build a create request from normalized params.
    pub fn from_params(params: &TestParams) -> Result<Self, StoreError> {
        let canonical = fingerprint::canonical_json(params);
        Ok(Self {
            fingerprint: fingerprint::fingerprint(&canonical),
            canonical,
            domain: params.domain.clone(),
            params_json: serde_json::to_string(params)?,
            undelegated: params.undelegated(),
            priority: params.priority,
            queue: params.queue,
        })
    }
}

/// The persistence contract of the broker.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a test or return the id of a reusable equivalent.
    ///
    /// Inside one transaction: the most recent row with the same
    /// fingerprint is reused when it is younger than the reuse window or
    /// not yet finished. A concurrent creation of the same fingerprint is
    /// resolved through the unique index on the test id plus a retry of
    /// the lookup branch.
    async fn create_test(
        &self,
        request: &CreateTest,
        reuse_window_s: u64,
    ) -> Result<String, StoreError>;

    /// Atomically claim the next runnable test on `queue`.
    ///
    /// Highest priority first, then lowest id. Returns `None` when the
    /// queue is drained or `max_concurrent` tests are already running on
    /// it. A claimed test (start time set) is never handed out again.
    async fn claim_next(&self, queue: i64, max_concurrent: i64)
        -> Result<Option<String>, StoreError>;

    /// Monotone progress write; a lower value than the current one is a
    /// no-op. Reaching 100 sets the end time in the same statement.
    async fn set_progress(&self, test_id: &str, progress: i64) -> Result<(), StoreError>;

    /// Store the result document and finish the test. Rejected when the
    /// test was never claimed.
    async fn store_results(
        &self,
        test_id: &str,
        results: Vec<ResultEntry>,
    ) -> Result<(), StoreError>;

    /// Full row for one test.
    async fn read_test(&self, test_id: &str) -> Result<TestRow, StoreError>;

    /// Finished-or-running tests for a domain, newest first.
    async fn history(&self, query: &HistoryQuery) -> Result<Vec<TestRow>, StoreError>;

    /// Create a batch and its tests in one transaction.
    ///
    /// Credentials are verified and the at-most-one-open-batch rule
    /// enforced atomically with the inserts.
    async fn create_batch(
        &self,
        username: &str,
        api_key: &str,
        tests: &[CreateTest],
    ) -> Result<i64, StoreError>;

    /// Progress summary of a batch.
    async fn batch_status(&self, batch_id: i64) -> Result<BatchStatus, StoreError>;

    /// Idempotently register an api user.
    async fn add_user(&self, username: &str, api_key: &str) -> Result<AddUserOutcome, StoreError>;

    /// Constant-time credential check.
    async fn verify_user(&self, username: &str, api_key: &str) -> Result<bool, StoreError>;
}

/// Instantiate the configured backend.
pub async fn open(config: &DbConfig) -> Result<Arc<dyn Store>, StoreError> {
    match config.engine {
        DbEngine::Sqlite => Ok(Arc::new(SqliteStore::open(&config.database_file).await?)),
        DbEngine::Postgresql => Ok(Arc::new(PostgresStore::connect(config).await?)),
        DbEngine::Mysql => Ok(Arc::new(MysqlStore::connect(config).await?)),
    }
}

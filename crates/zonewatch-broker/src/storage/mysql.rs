//! MySQL store adapter (client-server relational backend B).
//!
//! Claim guarantee: claims on one queue serialize on a named server lock
//! (`GET_LOCK`) held for the duration of the claim transaction's
//! connection, so the running-count check and the row update are atomic
//! per queue. The candidate select additionally uses
//! `FOR UPDATE SKIP LOCKED` (MySQL 8).

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::{MySql, MySqlConnection, Pool};
use tracing::info;

use zonewatch_core::config::DbConfig;
use zonewatch_core::fingerprint;
use zonewatch_core::results::ResultEntry;
use zonewatch_core::validation::{HistoryFilter, HistoryQuery};

use super::models::{AddUserOutcome, BatchStatus, TestRow};
use super::{
    encode_results, is_unique_violation, schema, unix_timestamp, CreateTest, Store, StoreError,
};
use crate::auth::constant_time_str_eq;

/// Store backed by a MySQL server.
#[derive(Clone)]
pub struct MysqlStore {
    pool: Pool<MySql>,
}

impl MysqlStore {
    /// Connect to the configured server and bring the schema up to date.
    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port())
            .username(&config.user)
            .password(&config.password)
            .database(&config.database_name);

        let pool = MySqlPoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        info!(host = %config.host, database = %config.database_name, "Store database opened");

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(schema::MYSQL_VERSION_TABLE)
            .execute(&self.pool)
            .await?;
        let (applied,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_version")
                .fetch_one(&self.pool)
                .await?;

        for (idx, patch) in schema::MYSQL_PATCHES.iter().enumerate() {
            let version = (idx + 1) as i64;
            if version <= applied {
                continue;
            }
            // MySQL DDL commits implicitly; the version row is written only
            // after the whole patch applied.
            sqlx::raw_sql(patch)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Migration(e.to_string()))?;
            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(version)
                .execute(&self.pool)
                .await?;
            info!(version, "Applied schema patch");
        }
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub const fn pool(&self) -> &Pool<MySql> {
        &self.pool
    }
}

async fn latest_for_fingerprint(
    conn: &mut MySqlConnection,
    fingerprint: i64,
) -> Result<Option<(String, i64, i64)>, sqlx::Error> {
    sqlx::query_as(
        "SELECT hash_id, creation_time, progress FROM test_results \
         WHERE fingerprint = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(fingerprint)
    .fetch_optional(conn)
    .await
}

const fn reusable(creation_time: i64, progress: i64, now: i64, window: i64) -> bool {
    creation_time > now - window || progress < 100
}

#[async_trait]
impl Store for MysqlStore {
    async fn create_test(
        &self,
        request: &CreateTest,
        reuse_window_s: u64,
    ) -> Result<String, StoreError> {
        let now = unix_timestamp();
        #[allow(clippy::cast_possible_wrap)]
        let window = reuse_window_s as i64;

        let mut tx = self.pool.begin().await?;
        if let Some((hash_id, creation_time, progress)) =
            latest_for_fingerprint(&mut tx, request.fingerprint).await?
        {
            if reusable(creation_time, progress, now, window) {
                tx.commit().await?;
                return Ok(hash_id);
            }
        }

        let hash_id = fingerprint::test_id(&request.canonical, now);
        let inserted = sqlx::query(
            "INSERT INTO test_results \
             (hash_id, fingerprint, domain, creation_time, progress, params, undelegated, priority, queue) \
             VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?)",
        )
        .bind(&hash_id)
        .bind(request.fingerprint)
        .bind(&request.domain)
        .bind(now)
        .bind(&request.params_json)
        .bind(request.undelegated)
        .bind(request.priority)
        .bind(request.queue)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {
                tx.commit().await?;
                Ok(hash_id)
            }
            Err(e) if is_unique_violation(&e) => {
                // The same fingerprint landed concurrently in this second;
                // retry the lookup branch.
                drop(tx);
                let mut conn = self.pool.acquire().await?;
                match latest_for_fingerprint(&mut conn, request.fingerprint).await? {
                    Some((hash_id, creation_time, progress))
                        if reusable(creation_time, progress, now, window) =>
                    {
                        Ok(hash_id)
                    }
                    _ => Err(StoreError::Query(
                        "test id collision without a reusable row".to_string(),
                    )),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn claim_next(
        &self,
        queue: i64,
        max_concurrent: i64,
    ) -> Result<Option<String>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Named lock held by this transaction's connection serializes
        // claims per queue; released before the connection returns to the
        // pool.
        let lock_name = format!("zonewatch_claim_{queue}");
        let (locked,): (Option<i64>,) = sqlx::query_as("SELECT GET_LOCK(?, 5)")
            .bind(&lock_name)
            .fetch_one(&mut *tx)
            .await?;
        if locked != Some(1) {
            return Ok(None);
        }

        let outcome: Result<Option<String>, sqlx::Error> = async {
            let (running,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM test_results \
                 WHERE queue = ? AND start_time IS NOT NULL AND progress < 100",
            )
            .bind(queue)
            .fetch_one(&mut *tx)
            .await?;
            if running >= max_concurrent {
                return Ok(None);
            }

            let candidate: Option<(i64, String)> = sqlx::query_as(
                "SELECT id, hash_id FROM test_results \
                 WHERE queue = ? AND start_time IS NULL \
                 ORDER BY priority DESC, id ASC LIMIT 1 \
                 FOR UPDATE SKIP LOCKED",
            )
            .bind(queue)
            .fetch_optional(&mut *tx)
            .await?;
            let Some((id, hash_id)) = candidate else {
                return Ok(None);
            };

            let updated = sqlx::query(
                "UPDATE test_results SET start_time = ? WHERE id = ? AND start_time IS NULL",
            )
            .bind(unix_timestamp())
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            Ok((updated == 1).then_some(hash_id))
        }
        .await;

        // The named lock is connection-scoped, not transaction-scoped:
        // release it before the connection can return to the pool.
        sqlx::query("SELECT RELEASE_LOCK(?)")
            .bind(&lock_name)
            .execute(&mut *tx)
            .await?;

        let claimed = outcome?;
        tx.commit().await?;
        Ok(claimed)
    }

    async fn set_progress(&self, test_id: &str, progress: i64) -> Result<(), StoreError> {
        let progress = progress.clamp(0, 100);
        let updated = if progress == 100 {
            sqlx::query(
                "UPDATE test_results SET progress = 100, end_time = ? \
                 WHERE hash_id = ? AND progress < 100",
            )
            .bind(unix_timestamp())
            .bind(test_id)
            .execute(&self.pool)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                "UPDATE test_results SET progress = ? \
                 WHERE hash_id = ? AND progress < ? AND progress < 100",
            )
            .bind(progress)
            .bind(test_id)
            .bind(progress)
            .execute(&self.pool)
            .await?
            .rows_affected()
        };

        if updated == 0 {
            let exists: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM test_results WHERE hash_id = ?")
                    .bind(test_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if exists.is_none() {
                return Err(StoreError::TestNotFound(test_id.to_string()));
            }
        }
        Ok(())
    }

    async fn store_results(
        &self,
        test_id: &str,
        results: Vec<ResultEntry>,
    ) -> Result<(), StoreError> {
        let json = encode_results(results)?;
        let mut tx = self.pool.begin().await?;

        let row: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT start_time FROM test_results WHERE hash_id = ? FOR UPDATE")
                .bind(test_id)
                .fetch_optional(&mut *tx)
                .await?;
        match row {
            None => return Err(StoreError::TestNotFound(test_id.to_string())),
            Some((None,)) => return Err(StoreError::NotStarted(test_id.to_string())),
            Some((Some(_),)) => {}
        }

        sqlx::query(
            "UPDATE test_results \
             SET results = ?, progress = 100, end_time = COALESCE(end_time, ?) \
             WHERE hash_id = ?",
        )
        .bind(&json)
        .bind(unix_timestamp())
        .bind(test_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn read_test(&self, test_id: &str) -> Result<TestRow, StoreError> {
        sqlx::query_as::<_, TestRow>("SELECT * FROM test_results WHERE hash_id = ?")
            .bind(test_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::TestNotFound(test_id.to_string()))
    }

    async fn history(&self, query: &HistoryQuery) -> Result<Vec<TestRow>, StoreError> {
        let rows = match query.filter {
            HistoryFilter::All => {
                sqlx::query_as::<_, TestRow>(
                    "SELECT * FROM test_results \
                     WHERE domain = ? AND start_time IS NOT NULL \
                     ORDER BY creation_time DESC, id DESC LIMIT ? OFFSET ?",
                )
                .bind(&query.domain)
                .bind(query.limit)
                .bind(query.offset)
                .fetch_all(&self.pool)
                .await?
            }
            HistoryFilter::Delegated | HistoryFilter::Undelegated => {
                sqlx::query_as::<_, TestRow>(
                    "SELECT * FROM test_results \
                     WHERE domain = ? AND start_time IS NOT NULL AND undelegated = ? \
                     ORDER BY creation_time DESC, id DESC LIMIT ? OFFSET ?",
                )
                .bind(&query.domain)
                .bind(query.filter == HistoryFilter::Undelegated)
                .bind(query.limit)
                .bind(query.offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn create_batch(
        &self,
        username: &str,
        api_key: &str,
        tests: &[CreateTest],
    ) -> Result<i64, StoreError> {
        let now = unix_timestamp();
        let mut tx = self.pool.begin().await?;

        let user: Option<(String,)> =
            sqlx::query_as("SELECT api_key FROM users WHERE username = ? FOR UPDATE")
                .bind(username)
                .fetch_optional(&mut *tx)
                .await?;
        let authorized = user.is_some_and(|(stored,)| constant_time_str_eq(&stored, api_key));
        if !authorized {
            return Err(StoreError::Unauthorized(username.to_string()));
        }

        let open: Option<(i64, i64)> = sqlx::query_as(
            "SELECT b.id, b.creation_time FROM batch_jobs b \
             WHERE b.username = ? AND EXISTS ( \
                 SELECT 1 FROM test_results t \
                 WHERE t.batch_id = b.id AND t.progress < 100) \
             ORDER BY b.id DESC LIMIT 1",
        )
        .bind(username)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some((batch_id, creation_time)) = open {
            return Err(StoreError::BatchStillRunning {
                batch_id,
                creation_time,
            });
        }

        #[allow(clippy::cast_possible_wrap)]
        let batch_id = sqlx::query("INSERT INTO batch_jobs (username, creation_time) VALUES (?, ?)")
            .bind(username)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .last_insert_id() as i64;

        for test in tests {
            let hash_id = fingerprint::test_id(&test.canonical, now);
            sqlx::query(
                "INSERT INTO test_results \
                 (hash_id, fingerprint, domain, batch_id, creation_time, progress, params, undelegated, priority, queue) \
                 VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?, ?)",
            )
            .bind(&hash_id)
            .bind(test.fingerprint)
            .bind(&test.domain)
            .bind(batch_id)
            .bind(now)
            .bind(&test.params_json)
            .bind(test.undelegated)
            .bind(test.priority)
            .bind(test.queue)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(batch_id)
    }

    async fn batch_status(&self, batch_id: i64) -> Result<BatchStatus, StoreError> {
        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM batch_jobs WHERE id = ?")
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StoreError::BatchNotFound(batch_id));
        }

        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT hash_id, progress FROM test_results WHERE batch_id = ? ORDER BY id ASC",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        let mut status = BatchStatus {
            nb_running: 0,
            nb_finished: 0,
            finished_test_ids: Vec::new(),
        };
        for (hash_id, progress) in rows {
            if progress == 100 {
                status.nb_finished += 1;
                status.finished_test_ids.push(hash_id);
            } else {
                status.nb_running += 1;
            }
        }
        Ok(status)
    }

    async fn add_user(&self, username: &str, api_key: &str) -> Result<AddUserOutcome, StoreError> {
        let inserted = sqlx::query("INSERT INTO users (username, api_key) VALUES (?, ?)")
            .bind(username)
            .bind(api_key)
            .execute(&self.pool)
            .await;

        match inserted {
            Ok(_) => Ok(AddUserOutcome::Created),
            Err(e) if is_unique_violation(&e) => {
                let (stored,): (String,) =
                    sqlx::query_as("SELECT api_key FROM users WHERE username = ?")
                        .bind(username)
                        .fetch_one(&self.pool)
                        .await?;
                Ok(AddUserOutcome::AlreadyExists {
                    same_key: constant_time_str_eq(&stored, api_key),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn verify_user(&self, username: &str, api_key: &str) -> Result<bool, StoreError> {
        let user: Option<(String,)> =
            sqlx::query_as("SELECT api_key FROM users WHERE username = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user.is_some_and(|(stored,)| constant_time_str_eq(&stored, api_key)))
    }
}

//! SQLite-backed revocation ledger.
//!
//! One table, `token_revocations`, keyed by token id. The connection runs in
//! WAL mode with `synchronous = FULL` so an acknowledged revocation survives
//! a crash. Every query runs on the blocking pool.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::params;
use rusqlite::Connection;
use snafu::ResultExt;
use tracing::info;

use super::ledger::RevocationLedger;
use crate::error::CreateDirectorySnafu;
use crate::error::JoinSnafu;
use crate::error::LedgerError;
use crate::types::RevocationEntry;

fn db_error(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> LedgerError {
    move |e| LedgerError::Database {
        operation,
        source: Box::new(e),
    }
}

/// Durable ledger in a local SQLite database.
#[derive(Clone)]
pub struct SqliteRevocationLedger {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteRevocationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRevocationLedger").field("path", &self.path).finish()
    }
}

impl SqliteRevocationLedger {
    /// Open or create the ledger at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context(CreateDirectorySnafu { path: parent })?;
        }

        let conn = Connection::open(&path).map_err(db_error("open"))?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(db_error("configure"))?;
        conn.pragma_update(None, "synchronous", "FULL").map_err(db_error("configure"))?;
        Self::init_schema(&conn)?;

        info!(path = %path.display(), "opened revocation ledger");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory().map_err(db_error("open"))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_schema(conn: &Connection) -> Result<(), LedgerError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS token_revocations (
                token_id TEXT PRIMARY KEY,
                expires_at_ms INTEGER NOT NULL,
                revoked_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS token_revocations_expiry ON token_revocations (expires_at_ms);
            CREATE INDEX IF NOT EXISTS token_revocations_revoked ON token_revocations (revoked_at_ms);",
        )
        .map_err(db_error("create schema"))
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, LedgerError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| LedgerError::Poisoned)?;
            f(&guard)
        })
        .await
        .context(JoinSnafu)?
    }
}

// SQLite stores INTEGER as i64; timestamps in ms fit comfortably.
fn to_sql(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

#[async_trait]
impl RevocationLedger for SqliteRevocationLedger {
    async fn insert(&self, entry: RevocationEntry) -> Result<bool, LedgerError> {
        self.with_conn(move |conn| {
            let existed: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM token_revocations WHERE token_id = ?1)",
                    params![entry.token_id],
                    |row| row.get(0),
                )
                .map_err(db_error("insert"))?;
            conn.execute(
                "INSERT INTO token_revocations (token_id, expires_at_ms, revoked_at_ms)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(token_id) DO UPDATE SET
                    expires_at_ms = MAX(expires_at_ms, excluded.expires_at_ms),
                    revoked_at_ms = excluded.revoked_at_ms",
                params![entry.token_id, to_sql(entry.expires_at_ms), to_sql(entry.revoked_at_ms)],
            )
            .map_err(db_error("insert"))?;
            Ok(!existed)
        })
        .await
    }

    async fn contains(&self, token_id: &str) -> Result<bool, LedgerError> {
        let token_id = token_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM token_revocations WHERE token_id = ?1)",
                params![token_id],
                |row| row.get(0),
            )
            .map_err(db_error("lookup"))
        })
        .await
    }

    async fn prune_expired(&self, now_ms: u64) -> Result<u64, LedgerError> {
        self.with_conn(move |conn| {
            let deleted = conn
                .execute("DELETE FROM token_revocations WHERE expires_at_ms <= ?1", params![to_sql(now_ms)])
                .map_err(db_error("prune"))?;
            Ok(deleted as u64)
        })
        .await
    }

    async fn live_entries(&self, now_ms: u64) -> Result<Vec<String>, LedgerError> {
        self.with_conn(move |conn| {
            query_ids(conn, "SELECT token_id FROM token_revocations WHERE expires_at_ms > ?1", to_sql(now_ms))
        })
        .await
    }

    async fn revoked_since(&self, since_ms: u64) -> Result<Vec<String>, LedgerError> {
        self.with_conn(move |conn| {
            query_ids(conn, "SELECT token_id FROM token_revocations WHERE revoked_at_ms >= ?1", to_sql(since_ms))
        })
        .await
    }
}

fn query_ids(conn: &Connection, sql: &str, bound: i64) -> Result<Vec<String>, LedgerError> {
    let mut stmt = conn.prepare(sql).map_err(db_error("scan"))?;
    let rows = stmt.query_map(params![bound], |row| row.get::<_, String>(0)).map_err(db_error("scan"))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_error("scan"))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn entry(id: &str, revoked_at_ms: u64, expires_at_ms: u64) -> RevocationEntry {
        RevocationEntry {
            token_id: id.to_string(),
            expires_at_ms,
            revoked_at_ms,
        }
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("revocations.db");

        {
            let ledger = SqliteRevocationLedger::open(&path).unwrap();
            assert!(ledger.insert(entry("tok-1", 100, 10_000)).await.unwrap());
        }

        let ledger = SqliteRevocationLedger::open(&path).unwrap();
        assert!(ledger.contains("tok-1").await.unwrap());
        assert!(!ledger.contains("tok-2").await.unwrap());
    }

    #[tokio::test]
    async fn upsert_and_prune() {
        let ledger = SqliteRevocationLedger::open_in_memory().unwrap();
        assert!(ledger.insert(entry("a", 10, 1_000)).await.unwrap());
        assert!(!ledger.insert(entry("a", 20, 500)).await.unwrap());
        ledger.insert(entry("b", 30, 200)).await.unwrap();

        assert_eq!(ledger.prune_expired(200).await.unwrap(), 1);
        assert_eq!(ledger.live_entries(200).await.unwrap(), vec!["a".to_string()]);
        assert_eq!(ledger.prune_expired(999).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn revoked_since_filters_by_revocation_time() {
        let ledger = SqliteRevocationLedger::open_in_memory().unwrap();
        ledger.insert(entry("early", 100, 10_000)).await.unwrap();
        ledger.insert(entry("late", 500, 10_000)).await.unwrap();

        let mut recent = ledger.revoked_since(200).await.unwrap();
        recent.sort();
        assert_eq!(recent, vec!["late".to_string()]);
    }
}

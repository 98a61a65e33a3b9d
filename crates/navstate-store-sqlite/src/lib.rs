use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS app_states (
  state_key TEXT PRIMARY KEY,
  payload_json TEXT NOT NULL,
  payload_sha256 TEXT NOT NULL CHECK (length(payload_sha256) = 64),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  save_count INTEGER NOT NULL DEFAULT 1 CHECK (save_count >= 1)
);
CREATE INDEX IF NOT EXISTS idx_app_states_updated_at ON app_states(updated_at);
";

/// Durable app-state blobs keyed by ULID.
///
/// Keys are minted by [`SqliteAppStateStore::new_key`]. Any other key is
/// treated as unknown on read so foreign or legacy references resolve as
/// absent state.
pub struct SqliteAppStateStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredAppState {
    pub key: String,
    pub payload: Value,
    pub payload_sha256: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub save_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    /// Keys whose stored payload no longer matches its recorded digest.
    pub digest_mismatches: Vec<String>,
    pub schema_status: SchemaStatus,
}

impl SqliteAppStateStore {
    /// Open a SQLite-backed app-state store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect();

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when the database carries a newer schema or a
    /// migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }
        if version == 0 {
            let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration 001")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration v1")?;
            tracing::info!("app state store migrated to schema version 1");
        }

        Ok(())
    }

    /// Mint a fresh state key.
    #[must_use]
    pub fn new_key() -> String {
        Ulid::new().to_string()
    }

    /// Insert or overwrite the payload stored under `key`.
    ///
    /// Overwrites keep the original `created_at` and bump `save_count`.
    ///
    /// # Errors
    /// Returns an error when `key` was not minted by this store, the payload
    /// cannot be serialized, or the write fails.
    pub fn save_state(&mut self, key: &str, payload: &Value) -> Result<StoredAppState> {
        Ulid::from_string(key).with_context(|| format!("invalid app state key: {key}"))?;
        let payload_json =
            serde_json::to_string(payload).context("failed to serialize app state")?;
        let digest = payload_digest(&payload_json);
        let now = now_rfc3339()?;

        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute(
            "INSERT INTO app_states(
               state_key, payload_json, payload_sha256, created_at, updated_at, save_count
             )
             VALUES (?1, ?2, ?3, ?4, ?4, 1)
             ON CONFLICT(state_key) DO UPDATE SET
               payload_json = excluded.payload_json,
               payload_sha256 = excluded.payload_sha256,
               updated_at = excluded.updated_at,
               save_count = app_states.save_count + 1",
            params![key, payload_json, digest, now],
        )
        .with_context(|| format!("failed to persist app state {key}"))?;
        tx.commit().context("failed to commit app state transaction")?;

        tracing::debug!(key, "app state persisted");
        self.load_state(key)?.ok_or_else(|| anyhow!("app state {key} vanished after save"))
    }

    /// Retrieve the payload stored under `key`.
    ///
    /// A key this store could not have minted yields `Ok(None)`.
    ///
    /// # Errors
    /// Returns an error when lookup, digest verification or JSON
    /// deserialization fails.
    pub fn load_state(&self, key: &str) -> Result<Option<StoredAppState>> {
        if !is_minted_key(key) {
            tracing::debug!(key, "unknown app state key format; treating state as absent");
            return Ok(None);
        }
        let row = self
            .conn
            .query_row(
                "SELECT payload_json, payload_sha256, created_at, updated_at, save_count
                 FROM app_states WHERE state_key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("failed to load app state {key}"))?;

        let Some((payload_json, payload_sha256, created_at, updated_at, save_count)) = row else {
            return Ok(None);
        };
        if payload_digest(&payload_json) != payload_sha256 {
            return Err(anyhow!("app state {key} failed digest verification"));
        }
        let payload =
            serde_json::from_str(&payload_json).context("failed to deserialize stored app state")?;

        Ok(Some(StoredAppState {
            key: key.to_string(),
            payload,
            payload_sha256,
            created_at: parse_rfc3339(&created_at)?,
            updated_at: parse_rfc3339(&updated_at)?,
            save_count,
        }))
    }

    /// Remove the state stored under `key`. Returns whether a row was deleted.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_state(&mut self, key: &str) -> Result<bool> {
        if !is_minted_key(key) {
            return Ok(false);
        }
        let deleted = self
            .conn
            .execute("DELETE FROM app_states WHERE state_key = ?1", params![key])
            .with_context(|| format!("failed to delete app state {key}"))?;
        Ok(deleted > 0)
    }

    /// Delete every state last written before `cutoff`. Returns the number of
    /// removed rows.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read, a timestamp is malformed, or
    /// the delete transaction fails.
    pub fn purge_older_than(&mut self, cutoff: OffsetDateTime) -> Result<usize> {
        let tx = self.conn.transaction().context("failed to start purge transaction")?;
        let mut stale = Vec::new();
        {
            let mut stmt = tx
                .prepare("SELECT state_key, updated_at FROM app_states")
                .context("failed to prepare app state scan")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let key: String = row.get(0)?;
                let updated_at: String = row.get(1)?;
                if parse_rfc3339(&updated_at)? < cutoff {
                    stale.push(key);
                }
            }
        }

        for key in &stale {
            tx.execute("DELETE FROM app_states WHERE state_key = ?1", params![key])
                .with_context(|| format!("failed to purge app state {key}"))?;
        }
        tx.commit().context("failed to commit purge transaction")?;

        if !stale.is_empty() {
            tracing::info!(purged = stale.len(), "purged stale app states");
        }
        Ok(stale.len())
    }

    /// Run `SQLite` quick checks and verify every payload digest.
    ///
    /// # Errors
    /// Returns an error when diagnostics cannot be executed.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut digest_mismatches = Vec::new();
        if table_exists(&self.conn, "app_states")? {
            let mut stmt = self
                .conn
                .prepare(
                    "SELECT state_key, payload_json, payload_sha256
                     FROM app_states
                     ORDER BY state_key",
                )
                .context("failed to prepare digest scan")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let key: String = row.get(0)?;
                let payload_json: String = row.get(1)?;
                let recorded: String = row.get(2)?;
                if payload_digest(&payload_json) != recorded {
                    digest_mismatches.push(key);
                }
            }
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            digest_mismatches,
            schema_status,
        })
    }
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn is_minted_key(raw: &str) -> bool {
    Ulid::from_string(raw).is_ok()
}

fn payload_digest(payload_json: &str) -> String {
    hex::encode(Sha256::digest(payload_json.as_bytes()))
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

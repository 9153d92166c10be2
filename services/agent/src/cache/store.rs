//! SQLite-based persistence for the resource cache.
//!
//! The cache is written as a whole snapshot (every cached resource plus the
//! sequence of each watch topic) so a restarted agent can resume from its
//! last position instead of running a full catch-up.

use std::path::Path;

use agentsdk_resource::ResourceInstance;
use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from cache store operations.
#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid cached resource {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Everything persisted for a cache.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    pub resources: Vec<(String, ResourceInstance)>,
    pub sequences: Vec<(String, i64)>,
}

impl CacheSnapshot {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.sequences.is_empty()
    }
}

/// SQLite cache store.
pub struct CacheStore {
    conn: Connection,
}

impl CacheStore {
    /// Open or create a cache store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheStoreError> {
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self { conn };
        store.init_schema()?;

        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, CacheStoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), CacheStoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS resources (
                cache_key TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_resources_kind ON resources(kind);

            CREATE TABLE IF NOT EXISTS sequences (
                topic TEXT PRIMARY KEY,
                sequence_id INTEGER NOT NULL
            );
            "#,
        )?;

        debug!("Cache store schema initialized");
        Ok(())
    }

    /// Replace the stored snapshot in a single transaction.
    pub fn replace_all(&mut self, snapshot: &CacheSnapshot) -> Result<(), CacheStoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM resources", [])?;
        tx.execute("DELETE FROM sequences", [])?;

        {
            let mut insert = tx.prepare(
                "INSERT INTO resources (cache_key, kind, content_hash, body) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (key, resource) in &snapshot.resources {
                let body = serde_json::to_string(resource).map_err(|e| CacheStoreError::Invalid {
                    key: key.clone(),
                    reason: e.to_string(),
                })?;
                insert.execute(params![
                    key,
                    resource.kind,
                    resource.content_hash().as_str(),
                    body
                ])?;
            }

            let mut insert_seq =
                tx.prepare("INSERT INTO sequences (topic, sequence_id) VALUES (?1, ?2)")?;
            for (topic, id) in &snapshot.sequences {
                insert_seq.execute(params![topic, id])?;
            }
        }

        tx.commit()?;
        debug!(
            resources = snapshot.resources.len(),
            sequences = snapshot.sequences.len(),
            "Cache snapshot saved"
        );
        Ok(())
    }

    /// Load the stored snapshot. Rows that no longer decode are skipped.
    pub fn load(&self) -> Result<CacheSnapshot, CacheStoreError> {
        let mut snapshot = CacheSnapshot::default();

        let mut stmt = self
            .conn
            .prepare("SELECT cache_key, body FROM resources ORDER BY cache_key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (key, body) = row?;
            match serde_json::from_str::<ResourceInstance>(&body) {
                Ok(resource) => snapshot.resources.push((key, resource)),
                Err(e) => warn!(cache_key = %key, error = %e, "Skipping undecodable cached resource"),
            }
        }

        let mut stmt = self
            .conn
            .prepare("SELECT topic, sequence_id FROM sequences ORDER BY topic")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            snapshot.sequences.push(row?);
        }

        Ok(snapshot)
    }

    /// Remove everything from the store.
    pub fn clear(&self) -> Result<(), CacheStoreError> {
        self.conn
            .execute_batch("DELETE FROM resources; DELETE FROM sequences;")?;
        Ok(())
    }
}

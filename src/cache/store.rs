//! Asset store trait, SQLite implementation and in-memory implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::types::{AssetSnapshot, RequestKey, StoredAsset};

/// Store failures. Surfaced to callers unchanged; never retried.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to open cache store at {path}: {source}")]
  Open {
    path: PathBuf,
    source: rusqlite::Error,
  },
  #[error("failed to create cache directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("could not determine data directory")]
  NoDataDir,
  #[error("cache store lock poisoned")]
  LockPoisoned,
  #[error("cache store query failed: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("failed to encode cached headers: {0}")]
  Headers(#[from] serde_json::Error),
  #[error("failed to parse cached timestamp {value:?}: {source}")]
  Timestamp {
    value: String,
    source: chrono::ParseError,
  },
}

/// Storage backend for generation-partitioned asset snapshots.
///
/// Writes are keyed by request identity within a generation and are
/// last-write-wins. `put_all` is atomic: either every entry lands or none.
pub trait AssetStore: Send + Sync {
  /// Look up a cached snapshot by exact request identity.
  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<StoredAsset>, StoreError>;

  /// Insert or overwrite one snapshot.
  fn put(
    &self,
    generation: &str,
    key: &RequestKey,
    snapshot: &AssetSnapshot,
  ) -> Result<(), StoreError>;

  /// Atomically insert a full set of snapshots.
  fn put_all(
    &self,
    generation: &str,
    entries: &[(RequestKey, AssetSnapshot)],
  ) -> Result<(), StoreError>;

  /// Names of every generation with at least one stored asset.
  fn list_generations(&self) -> Result<Vec<String>, StoreError>;

  /// Drop every asset belonging to `generation`.
  fn delete_generation(&self, generation: &str) -> Result<(), StoreError>;
}

impl<S: AssetStore + ?Sized> AssetStore for Arc<S> {
  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<StoredAsset>, StoreError> {
    (**self).get(generation, key)
  }

  fn put(
    &self,
    generation: &str,
    key: &RequestKey,
    snapshot: &AssetSnapshot,
  ) -> Result<(), StoreError> {
    (**self).put(generation, key, snapshot)
  }

  fn put_all(
    &self,
    generation: &str,
    entries: &[(RequestKey, AssetSnapshot)],
  ) -> Result<(), StoreError> {
    (**self).put_all(generation, entries)
  }

  fn list_generations(&self) -> Result<Vec<String>, StoreError> {
    (**self).list_generations()
  }

  fn delete_generation(&self, generation: &str) -> Result<(), StoreError> {
    (**self).delete_generation(generation)
  }
}

/// In-memory store for ephemeral runs and tests.
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<(String, String), StoredAsset>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl AssetStore for MemoryStore {
  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<StoredAsset>, StoreError> {
    let entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
    Ok(
      entries
        .get(&(generation.to_string(), key.storage_key()))
        .cloned(),
    )
  }

  fn put(
    &self,
    generation: &str,
    key: &RequestKey,
    snapshot: &AssetSnapshot,
  ) -> Result<(), StoreError> {
    let mut entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
    entries.insert(
      (generation.to_string(), key.storage_key()),
      StoredAsset {
        snapshot: snapshot.clone(),
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn put_all(
    &self,
    generation: &str,
    new_entries: &[(RequestKey, AssetSnapshot)],
  ) -> Result<(), StoreError> {
    // One lock acquisition makes the batch atomic.
    let mut entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
    let cached_at = Utc::now();
    for (key, snapshot) in new_entries {
      entries.insert(
        (generation.to_string(), key.storage_key()),
        StoredAsset {
          snapshot: snapshot.clone(),
          cached_at,
        },
      );
    }
    Ok(())
  }

  fn list_generations(&self) -> Result<Vec<String>, StoreError> {
    let entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
    let mut generations: Vec<String> = entries.keys().map(|(g, _)| g.clone()).collect();
    generations.sort();
    generations.dedup();
    Ok(generations)
  }

  fn delete_generation(&self, generation: &str) -> Result<(), StoreError> {
    let mut entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
    entries.retain(|(g, _), _| g != generation);
    Ok(())
  }
}

/// SQLite-backed asset store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (creating if needed) a store at the given path.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| StoreError::CreateDir {
        path: parent.to_path_buf(),
        source: e,
      })?;
    }

    let conn = Connection::open(path).map_err(|e| StoreError::Open {
      path: path.to_path_buf(),
      source: e,
    })?;

    Self::from_connection(conn)
  }

  /// Open a store at the default location under the platform data dir.
  pub fn open_default() -> Result<Self, StoreError> {
    Self::open(&Self::default_path()?)
  }

  /// Fully in-memory store, used by tests.
  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, StoreError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or(StoreError::NoDataDir)?;

    Ok(data_dir.join("rdx").join("cache.db"))
  }

  fn from_connection(conn: Connection) -> Result<Self, StoreError> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn run_migrations(&self) -> Result<(), StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(())
  }
}

/// Schema for the asset cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS asset_cache (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key)
);

CREATE INDEX IF NOT EXISTS idx_asset_cache_generation ON asset_cache(generation);
"#;

impl AssetStore for SqliteStore {
  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<StoredAsset>, StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;

    let mut stmt = conn.prepare(
      "SELECT status, headers, body, cached_at FROM asset_cache
       WHERE generation = ? AND request_key = ?",
    )?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![generation, key.storage_key()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    match row {
      Some((status, headers, body, cached_at)) => Ok(Some(StoredAsset {
        snapshot: AssetSnapshot {
          status,
          headers: serde_json::from_str(&headers)?,
          body,
        },
        cached_at: parse_datetime(&cached_at)?,
      })),
      None => Ok(None),
    }
  }

  fn put(
    &self,
    generation: &str,
    key: &RequestKey,
    snapshot: &AssetSnapshot,
  ) -> Result<(), StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    insert_snapshot(&conn, generation, key, snapshot)?;
    Ok(())
  }

  fn put_all(
    &self,
    generation: &str,
    entries: &[(RequestKey, AssetSnapshot)],
  ) -> Result<(), StoreError> {
    let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;

    let tx = conn.transaction()?;
    for (key, snapshot) in entries {
      insert_snapshot(&tx, generation, key, snapshot)?;
    }
    tx.commit()?;

    Ok(())
  }

  fn list_generations(&self) -> Result<Vec<String>, StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;

    let mut stmt =
      conn.prepare("SELECT DISTINCT generation FROM asset_cache ORDER BY generation")?;
    let generations = stmt
      .query_map([], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;

    Ok(generations)
  }

  fn delete_generation(&self, generation: &str) -> Result<(), StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    conn.execute(
      "DELETE FROM asset_cache WHERE generation = ?",
      params![generation],
    )?;
    Ok(())
  }
}

fn insert_snapshot(
  conn: &Connection,
  generation: &str,
  key: &RequestKey,
  snapshot: &AssetSnapshot,
) -> Result<(), StoreError> {
  let headers = serde_json::to_string(&snapshot.headers)?;
  conn.execute(
    "INSERT OR REPLACE INTO asset_cache
       (generation, request_key, method, url, status, headers, body, cached_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
    params![
      generation,
      key.storage_key(),
      key.method(),
      key.url().as_str(),
      snapshot.status,
      headers,
      snapshot.body,
    ],
  )?;
  Ok(())
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| StoreError::Timestamp {
      value: s.to_string(),
      source: e,
    })
}

//! Persistent cache for the last successful update.
//!
//! Values live in a small key-value table so a restart can redisplay the last
//! snapshot before the first fetch of the new session completes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::types::{PlaceInfo, WeatherSnapshot};

pub const KEY_LAST_WEATHER: &str = "last_weather";
pub const KEY_LAST_PLACE: &str = "last_place";
pub const KEY_LAST_UPDATE_TIME: &str = "last_update_time";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Corrupt value for {key}: {message}")]
    Corrupt { key: String, message: String },
    #[error("Cache write timed out")]
    Timeout,
    #[error("Cache task failed: {0}")]
    Task(String),
}

/// Minimal string key-value store backing the weather cache.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn put(&self, key: &str, value: &str) -> Result<(), CacheError>;
}

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), CacheError> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value = self
            .conn
            .lock()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

/// Process-local store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// The persisted subset of the scheduler's state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CachedUpdate {
    pub weather: Option<WeatherSnapshot>,
    pub place: Option<PlaceInfo>,
    /// 0 when no update has ever succeeded
    pub last_success_epoch_ms: u64,
}

/// Typed view over a [`KeyValueStore`].
#[derive(Clone)]
pub struct WeatherCache {
    store: Arc<dyn KeyValueStore>,
}

impl WeatherCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Read everything that was persisted. A key that cannot be read or
    /// decoded is logged and treated as absent.
    pub fn load(&self) -> CachedUpdate {
        let weather = self.load_weather().unwrap_or_else(|e| {
            tracing::warn!("Ignoring cached weather: {}", e);
            None
        });
        let place = self.load_place().unwrap_or_else(|e| {
            tracing::warn!("Ignoring cached place: {}", e);
            None
        });
        let last_success_epoch_ms = self.load_last_update_time().unwrap_or_else(|e| {
            tracing::warn!("Ignoring cached update time: {}", e);
            0
        });

        CachedUpdate {
            weather,
            place,
            last_success_epoch_ms,
        }
    }

    pub fn load_weather(&self) -> Result<Option<WeatherSnapshot>, CacheError> {
        match self.store.get(KEY_LAST_WEATHER)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn load_place(&self) -> Result<Option<PlaceInfo>, CacheError> {
        match self.store.get(KEY_LAST_PLACE)? {
            Some(json) => {
                let places: Vec<PlaceInfo> = serde_json::from_str(&json)?;
                Ok(places.into_iter().next())
            }
            None => Ok(None),
        }
    }

    pub fn load_last_update_time(&self) -> Result<u64, CacheError> {
        match self.store.get(KEY_LAST_UPDATE_TIME)? {
            Some(raw) => raw.trim().parse().map_err(|e| CacheError::Corrupt {
                key: KEY_LAST_UPDATE_TIME.to_string(),
                message: format!("{}", e),
            }),
            None => Ok(0),
        }
    }

    /// Write the persisted subset. Only keys with a value are written so a
    /// missing place never erases the previously cached one.
    pub fn store(&self, update: &CachedUpdate) -> Result<(), CacheError> {
        if let Some(weather) = &update.weather {
            self.store
                .put(KEY_LAST_WEATHER, &serde_json::to_string(weather)?)?;
        }
        if let Some(place) = &update.place {
            self.store
                .put(KEY_LAST_PLACE, &serde_json::to_string(&[place])?)?;
        }
        self.store.put(
            KEY_LAST_UPDATE_TIME,
            &update.last_success_epoch_ms.to_string(),
        )?;
        Ok(())
    }

    /// [`store`](Self::store) on the blocking pool, bounded by `timeout`.
    pub async fn store_bounded(
        &self,
        update: CachedUpdate,
        timeout: Duration,
    ) -> Result<(), CacheError> {
        let cache = self.clone();
        let task = tokio::task::spawn_blocking(move || cache.store(&update));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(CacheError::Task(e.to_string())),
            Err(_) => Err(CacheError::Timeout),
        }
    }
}

impl std::fmt::Debug for WeatherCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherCache").finish_non_exhaustive()
    }
}

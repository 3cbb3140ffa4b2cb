// crates/criteriagate-store-sqlite/src/config.rs
// ============================================================================
// Module: CriteriaGate SQLite Store Configuration
// Description: Connection tuning for the SQLite-backed store.
// Purpose: Keep WAL/sync/busy-timeout choices in one documented place.
// Dependencies: std::path, rusqlite
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

/// `SQLite` journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqliteJournalMode {
    /// Write-ahead log; concurrent readers while a writer holds the lock.
    #[default]
    Wal,
    /// Legacy rollback-journal mode.
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `PRAGMA journal_mode` value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` synchronous mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqliteSyncMode {
    /// fsync on every commit; safest, slowest.
    #[default]
    Full,
    /// fsync at WAL checkpoints only.
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `PRAGMA synchronous` value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for opening the store's `SQLite` connection.
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Path to the database file (`:memory:` for an in-process store).
    pub path: PathBuf,
    /// Busy timeout applied before a lock-contended call returns `SQLITE_BUSY`.
    pub busy_timeout: Duration,
    /// Journal mode.
    pub journal_mode: SqliteJournalMode,
    /// Synchronous mode.
    pub sync_mode: SqliteSyncMode,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("criteriagate.sqlite3"),
            busy_timeout: Duration::from_secs(5),
            journal_mode: SqliteJournalMode::Wal,
            sync_mode: SqliteSyncMode::Full,
        }
    }
}

impl SqliteStoreConfig {
    /// Builds an in-memory configuration, useful for tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self { path: PathBuf::from(":memory:"), ..Self::default() }
    }
}

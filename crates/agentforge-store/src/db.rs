//! Connection handling: one `rusqlite::Connection` per `Store`, guarded by a
//! blocking `Mutex` since `Connection` is `Send` but not `Sync` (mirrors the
//! open-then-`execute_batch` pattern the chat feature's memory index uses).

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::Result;
use crate::schema::SCHEMA_SQL;

pub struct Store {
    pub(crate) conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        tracing::info!(path = %path.display(), "opened sqlite store");
        Self::from_connection(conn)
    }

    /// Open (creating if absent) the store at `<resolved_data_dir>/agentforge.sqlite`,
    /// using the same `PathsConfig` the rest of the ambient stack resolves its
    /// data directory from.
    pub fn open_default(paths: &agentforge_config::config::PathsConfig) -> Result<Self> {
        Self::open(Self::default_path(&paths.resolved_data_dir()))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Default on-disk location: `<data_dir>/agentforge.sqlite`, the same
    /// data directory `agentforge_config::PathsConfig::resolved_data_dir`
    /// resolves for the rest of the ambient stack.
    pub fn default_path(data_dir: &Path) -> std::path::PathBuf {
        data_dir.join("agentforge.sqlite")
    }
}

/// RFC3339 timestamp for the `TEXT` columns that hold `created_at` /
/// `updated_at` / `timestamp` (callers stamp rows with this rather than
/// letting the schema default anything, so clocks stay mockable in tests).
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_parent_directories_and_applies_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("agentforge.sqlite");
        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        assert!(store.find_conversation("missing").unwrap().is_none());
    }

    #[test]
    fn default_path_joins_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Store::default_path(dir.path()), dir.path().join("agentforge.sqlite"));
    }
}

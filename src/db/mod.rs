//! Persistence layer: a thin wrapper over `rusqlite` plus one file per
//! entity family, following the repository-per-concern split the engine
//! inherited from its predecessor's `db/faces.rs`/`db/albums.rs` style.

mod schema;

pub mod clusters;
pub mod faces;
pub mod file_index;
pub mod geo;
pub mod images;
pub mod jobs;
pub mod metadata;
pub mod objects;
pub mod smart_albums;
pub mod training;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

pub use schema::SCHEMA;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening database at {}", path.display()))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        self.run_migrations()?;
        Ok(())
    }

    /// Best-effort idempotent `ALTER TABLE`s for columns added after the
    /// initial schema was laid down; failures (column already exists) are
    /// swallowed, matching the predecessor's migration style.
    fn run_migrations(&self) -> Result<()> {
        let statements = [
            "ALTER TABLE images ADD COLUMN smart_album_count INTEGER NOT NULL DEFAULT 0",
            "ALTER TABLE people ADD COLUMN face_count INTEGER NOT NULL DEFAULT 0",
        ];
        for stmt in statements {
            let _ = self.conn.execute(stmt, []);
        }
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_and_initializes_schema() {
        let db = Database::open_in_memory().unwrap();
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM images", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}

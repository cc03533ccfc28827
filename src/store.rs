//! Embedded relational + full-text store. One SQLite file backs the
//! whole index; schema application is idempotent so repeated opens of
//! an existing file are cheap.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS models (
    unique_id        TEXT PRIMARY KEY,
    name             TEXT NOT NULL,
    layer            TEXT NOT NULL,
    materialization  TEXT NOT NULL DEFAULT '',
    file_path        TEXT NOT NULL DEFAULT '',
    raw_code         TEXT NOT NULL DEFAULT '',
    compiled_code    TEXT NOT NULL DEFAULT '',
    description      TEXT NOT NULL DEFAULT '',
    tags             TEXT NOT NULL DEFAULT '[]',
    depends_on       TEXT NOT NULL DEFAULT '[]',
    package_name     TEXT NOT NULL DEFAULT '',
    upstream_count   INTEGER NOT NULL DEFAULT 0,
    downstream_count INTEGER NOT NULL DEFAULT 0,
    centrality       REAL NOT NULL DEFAULT 0.0,
    row_count        INTEGER,
    bytes            INTEGER,
    last_modified    TEXT
);

CREATE TABLE IF NOT EXISTS columns (
    model_id        TEXT NOT NULL REFERENCES models(unique_id) ON DELETE CASCADE,
    name            TEXT NOT NULL,
    data_type       TEXT NOT NULL DEFAULT '',
    description     TEXT NOT NULL DEFAULT '',
    is_primary_key  INTEGER NOT NULL DEFAULT 0,
    is_foreign_key  INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (model_id, name)
);

CREATE TABLE IF NOT EXISTS sources (
    unique_id             TEXT PRIMARY KEY,
    name                  TEXT NOT NULL,
    source_name           TEXT NOT NULL DEFAULT '',
    schema                TEXT NOT NULL DEFAULT '',
    description           TEXT NOT NULL DEFAULT '',
    loader                TEXT NOT NULL DEFAULT '',
    freshness_warn_after  TEXT,
    freshness_error_after TEXT
);

CREATE TABLE IF NOT EXISTS source_columns (
    source_id   TEXT NOT NULL REFERENCES sources(unique_id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    data_type   TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (source_id, name)
);

CREATE TABLE IF NOT EXISTS tests (
    unique_id           TEXT PRIMARY KEY,
    kind                TEXT NOT NULL,
    model_id            TEXT,
    column_name         TEXT NOT NULL DEFAULT '',
    severity            TEXT NOT NULL DEFAULT 'error',
    last_status         TEXT,
    last_execution_time REAL,
    last_failures       INTEGER
);

CREATE TABLE IF NOT EXISTS macros (
    unique_id     TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    source_code   TEXT NOT NULL DEFAULT '',
    description   TEXT NOT NULL DEFAULT '',
    package_name  TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS exposures (
    unique_id      TEXT PRIMARY KEY,
    name           TEXT NOT NULL,
    exposure_type  TEXT NOT NULL DEFAULT '',
    url            TEXT,
    owner          TEXT NOT NULL DEFAULT '',
    depends_on     TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS edges (
    parent_id  TEXT NOT NULL,
    child_id   TEXT NOT NULL,
    PRIMARY KEY (parent_id, child_id)
);
CREATE INDEX IF NOT EXISTS idx_edges_parent ON edges(parent_id);
CREATE INDEX IF NOT EXISTS idx_edges_child  ON edges(child_id);

CREATE TABLE IF NOT EXISTS index_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS search_index USING fts5(
    unique_id UNINDEXED,
    name,
    description,
    columns,
    sql,
    tags,
    tokenize = 'porter unicode61'
);
"#;

/// Owns the connection and applies the fixed schema on open.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Store> {
        let conn = Connection::open(path)?;
        Store::init(conn)
    }

    pub fn open_in_memory() -> Result<Store> {
        let conn = Connection::open_in_memory()?;
        Store::init(conn)
    }

    fn init(conn: Connection) -> Result<Store> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Store { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Run `f` inside a single transaction, committing on success and
    /// rolling back if `f` returns an error — the granularity the
    /// Ingestor uses for one artifact pass.
    pub fn transaction<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction) -> Result<T>,
    {
        let tx = self.conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn metadata(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM index_metadata")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let mut out = HashMap::new();
        for r in rows {
            let (k, v) = r?;
            out.insert(k, v);
        }
        Ok(out)
    }
}

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use cs_core::{CallEdgeRecord, RescanReason};
use rusqlite::{params, Connection, Transaction};

use crate::error::StoreError;

/// Engine schema version. Incremental updates are refused when the
/// stored version differs.
pub const SCHEMA_VERSION: u32 = 9;

/// Meta keys recognized by the engine.
pub mod meta_keys {
    pub const INDEX_STATE: &str = "index_state";
    pub const LAST_FULL_INDEX: &str = "last_full_index";
    pub const LAST_INCREMENTAL_INDEX: &str = "last_incremental_index";
    pub const INDEX_COMMIT: &str = "index_commit";
    pub const FILES_SINCE_FULL: &str = "files_since_full";
    pub const SCHEMA_VERSION: &str = "schema_version";
    pub const CALLGRAPH_QUALITY: &str = "callgraph_quality";
    pub const INVALIDATION_MODE: &str = "invalidation_mode";
}

/// One tracked source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    /// Hex digest of the file content.
    pub content_hash: String,
    pub mtime: i64,
    pub indexed_at: i64,
    /// Short digest of the extracted document; empty when unknown.
    pub document_hash: String,
    pub symbol_count: i64,
}

/// One caller-owned call edge as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEdgeRow {
    pub caller_id: Option<String>,
    pub caller_file: String,
    pub callee_id: String,
    pub call_line: i64,
    pub call_col: i64,
    pub call_end_col: Option<i64>,
}

/// One pending rescan work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RescanEntry {
    pub file_path: String,
    pub reason: RescanReason,
    pub depth: i64,
    pub enqueued_at: i64,
    pub attempts: i64,
}

/// SQLite-backed state store for the incremental index engine.
///
/// Single-writer: the updater serializes all mutating operations and
/// multi-statement writes run inside one caller-owned transaction (the
/// free functions below take the transaction's connection handle).
pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    /// Open or create a state store at the given SQLite database path.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        configure_pragmas(&conn)?;
        create_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory state store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        configure_pragmas(&conn)?;
        create_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Begin a write transaction covering a whole delta batch.
    pub fn transaction(&mut self) -> Result<Transaction<'_>, StoreError> {
        Ok(self.conn.transaction()?)
    }

    // -- Tracked files --

    pub fn get_file(&self, path: &str) -> Result<Option<FileRecord>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT path, content_hash, mtime, indexed_at, document_hash, symbol_count \
             FROM indexed_files WHERE path = ?1",
        )?;
        let mut rows = stmt.query(params![path])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_file_record(row)?)),
            None => Ok(None),
        }
    }

    pub fn list_files(&self) -> Result<Vec<FileRecord>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT path, content_hash, mtime, indexed_at, document_hash, symbol_count \
             FROM indexed_files ORDER BY path",
        )?;
        let mut rows = stmt.query([])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row_to_file_record(row)?);
        }
        Ok(results)
    }

    pub fn count_files(&self) -> Result<usize, StoreError> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM indexed_files", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // -- Symbol ownership --

    /// Symbol ids currently defined by a file.
    pub fn file_symbols(&self, path: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT symbol_id FROM file_symbols WHERE path = ?1 ORDER BY symbol_id",
        )?;
        let mut rows = stmt.query(params![path])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row.get(0)?);
        }
        Ok(results)
    }

    /// One pass over `file_symbols` yielding symbol id → owning file.
    pub fn symbol_to_file_map(&self) -> Result<HashMap<String, String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT symbol_id, path FROM file_symbols")?;
        let mut rows = stmt.query([])?;
        let mut map = HashMap::new();
        while let Some(row) = rows.next()? {
            let symbol_id: String = row.get(0)?;
            let path: String = row.get(1)?;
            map.insert(symbol_id, path);
        }
        Ok(map)
    }

    // -- Call edges --

    /// Incoming-call lookup, served by the callee index.
    pub fn call_edges_for_callee(&self, callee_id: &str) -> Result<Vec<CallEdgeRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT caller_id, caller_file, callee_id, call_line, call_col, call_end_col \
             FROM call_edges WHERE callee_id = ?1 ORDER BY caller_file, call_line, call_col",
        )?;
        let mut rows = stmt.query(params![callee_id])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row_to_call_edge(row)?);
        }
        Ok(results)
    }

    /// Edges owned by a caller file.
    pub fn call_edges_from_file(&self, caller_file: &str) -> Result<Vec<CallEdgeRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT caller_id, caller_file, callee_id, call_line, call_col, call_end_col \
             FROM call_edges WHERE caller_file = ?1 ORDER BY call_line, call_col",
        )?;
        let mut rows = stmt.query(params![caller_file])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row_to_call_edge(row)?);
        }
        Ok(results)
    }

    pub fn count_call_edges_from_file(&self, caller_file: &str) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM call_edges WHERE caller_file = ?1",
            params![caller_file],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // -- File dependencies --

    /// Files that depend on definitions in `defining_file`.
    pub fn dependents_of(&self, defining_file: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT dependent_file FROM file_deps WHERE defining_file = ?1 ORDER BY dependent_file",
        )?;
        let mut rows = stmt.query(params![defining_file])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row.get(0)?);
        }
        Ok(results)
    }

    /// Files whose definitions `dependent_file` references.
    pub fn dependencies_of(&self, dependent_file: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT defining_file FROM file_deps WHERE dependent_file = ?1 ORDER BY defining_file",
        )?;
        let mut rows = stmt.query(params![dependent_file])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row.get(0)?);
        }
        Ok(results)
    }

    // -- Rescan queue --

    /// Enqueue a path for rescan. Re-enqueuing an already-queued path
    /// is a no-op; the earliest depth wins.
    pub fn enqueue_rescan(
        &self,
        path: &str,
        reason: RescanReason,
        depth: u32,
    ) -> Result<(), StoreError> {
        enqueue_rescan(&self.conn, path, reason, depth)
    }

    pub fn get_rescan_entry(&self, path: &str) -> Result<Option<RescanEntry>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT file_path, reason, depth, enqueued_at, attempts \
             FROM rescan_queue WHERE file_path = ?1",
        )?;
        let mut rows = stmt.query(params![path])?;
        match rows.next()? {
            Some(row) => row_to_rescan_entry(row),
            None => Ok(None),
        }
    }

    /// The next queue entry whose path is not excluded, ordered by
    /// `(enqueued_at, depth)`.
    pub fn next_rescan_entry(
        &self,
        exclude: &HashSet<String>,
    ) -> Result<Option<RescanEntry>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT file_path, reason, depth, enqueued_at, attempts \
             FROM rescan_queue ORDER BY enqueued_at, depth, file_path",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            if let Some(entry) = row_to_rescan_entry(row)? {
                if !exclude.contains(&entry.file_path) {
                    return Ok(Some(entry));
                }
            }
        }
        Ok(None)
    }

    pub fn list_rescan_queue(&self) -> Result<Vec<RescanEntry>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT file_path, reason, depth, enqueued_at, attempts \
             FROM rescan_queue ORDER BY enqueued_at, depth, file_path",
        )?;
        let mut rows = stmt.query([])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            if let Some(entry) = row_to_rescan_entry(row)? {
                results.push(entry);
            }
        }
        Ok(results)
    }

    pub fn count_rescan_queue(&self) -> Result<usize, StoreError> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM rescan_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Record a failed rescan attempt; the row stays queued.
    pub fn increment_rescan_attempts(&self, path: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE rescan_queue SET attempts = attempts + 1 WHERE file_path = ?1",
            params![path],
        )?;
        Ok(())
    }

    pub fn remove_rescan_entry(&self, path: &str) -> Result<bool, StoreError> {
        let affected = self.conn.execute(
            "DELETE FROM rescan_queue WHERE file_path = ?1",
            params![path],
        )?;
        Ok(affected > 0)
    }

    // -- Meta --

    /// Fetch a meta value; empty string when missing.
    pub fn get_meta(&self, key: &str) -> Result<String, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT value FROM meta WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(String::new()),
        }
    }

    /// Fetch a meta value as an integer; 0 when missing or unparsable.
    pub fn get_meta_i64(&self, key: &str) -> Result<i64, StoreError> {
        Ok(self.get_meta(key)?.parse().unwrap_or(0))
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn set_meta_i64(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.set_meta(key, &value.to_string())
    }

    /// The stored schema version, if any was ever written.
    pub fn stored_schema_version(&self) -> Result<Option<u32>, StoreError> {
        let raw = self.get_meta(meta_keys::SCHEMA_VERSION)?;
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(raw.parse().ok())
    }

    /// Effective index state, composed with the rescan queue: a
    /// non-empty queue makes the state "pending" regardless of the
    /// stored value.
    pub fn get_index_state(&self) -> Result<String, StoreError> {
        if self.count_rescan_queue()? > 0 {
            return Ok("pending".to_string());
        }
        self.get_meta(meta_keys::INDEX_STATE)
    }

    /// Whether incremental indexing must be refused in favor of a full
    /// reindex, with a human-readable reason.
    pub fn needs_full_reindex(&self) -> Result<Option<String>, StoreError> {
        if let Some(stored) = self.stored_schema_version()? {
            if stored != SCHEMA_VERSION {
                return Ok(Some(format!(
                    "stored schema version {stored} differs from engine version {SCHEMA_VERSION}"
                )));
            }
        }
        let state = self.get_meta(meta_keys::INDEX_STATE)?;
        if state.is_empty() || state == "none" {
            return Ok(Some("no previous index".to_string()));
        }
        Ok(None)
    }

    /// Expose the raw connection for advanced usage (e.g., testing).
    #[doc(hidden)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

// ---------------------------------------------------------------------------
// Transaction-scoped writes
//
// These take a `&Connection` so they run against either the bare
// connection or a `Transaction` handle; the updater passes its open
// transaction for all multi-statement work.
// ---------------------------------------------------------------------------

pub fn upsert_file(conn: &Connection, rec: &FileRecord) -> Result<(), StoreError> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO indexed_files \
         (path, content_hash, mtime, indexed_at, document_hash, symbol_count) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    stmt.execute(params![
        rec.path,
        rec.content_hash,
        rec.mtime,
        rec.indexed_at,
        rec.document_hash,
        rec.symbol_count,
    ])?;
    Ok(())
}

pub fn delete_file(conn: &Connection, path: &str) -> Result<bool, StoreError> {
    let affected = conn.execute("DELETE FROM indexed_files WHERE path = ?1", params![path])?;
    Ok(affected > 0)
}

pub fn insert_file_symbol(conn: &Connection, path: &str, symbol_id: &str) -> Result<(), StoreError> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO file_symbols (path, symbol_id) VALUES (?1, ?2)",
    )?;
    stmt.execute(params![path, symbol_id])?;
    Ok(())
}

pub fn delete_file_symbols(conn: &Connection, path: &str) -> Result<usize, StoreError> {
    let affected = conn.execute("DELETE FROM file_symbols WHERE path = ?1", params![path])?;
    Ok(affected)
}

/// Insert a call edge, replacing any previous edge at the same call
/// site. An empty caller id is stored as NULL, a zero end column as
/// NULL.
pub fn insert_call_edge(conn: &Connection, edge: &CallEdgeRecord) -> Result<(), StoreError> {
    let caller_id = if edge.caller_id.is_empty() {
        None
    } else {
        Some(edge.caller_id.as_str())
    };
    let end_col = if edge.call_end_col == 0 {
        None
    } else {
        Some(edge.call_end_col as i64)
    };
    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO call_edges \
         (caller_id, caller_file, callee_id, call_line, call_col, call_end_col) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    stmt.execute(params![
        caller_id,
        edge.caller_file,
        edge.callee_id,
        edge.call_line as i64,
        edge.call_col as i64,
        end_col,
    ])?;
    Ok(())
}

pub fn delete_call_edges_for_file(conn: &Connection, path: &str) -> Result<usize, StoreError> {
    let affected = conn.execute(
        "DELETE FROM call_edges WHERE caller_file = ?1",
        params![path],
    )?;
    Ok(affected)
}

pub fn insert_file_dep(
    conn: &Connection,
    dependent_file: &str,
    defining_file: &str,
) -> Result<(), StoreError> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO file_deps (dependent_file, defining_file) VALUES (?1, ?2)",
    )?;
    stmt.execute(params![dependent_file, defining_file])?;
    Ok(())
}

pub fn delete_file_deps(conn: &Connection, dependent_file: &str) -> Result<usize, StoreError> {
    let affected = conn.execute(
        "DELETE FROM file_deps WHERE dependent_file = ?1",
        params![dependent_file],
    )?;
    Ok(affected)
}

pub fn enqueue_rescan(
    conn: &Connection,
    path: &str,
    reason: RescanReason,
    depth: u32,
) -> Result<(), StoreError> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO rescan_queue \
         (file_path, reason, depth, enqueued_at, attempts) \
         VALUES (?1, ?2, ?3, ?4, 0)",
    )?;
    stmt.execute(params![path, reason.as_str(), depth as i64, now_epoch()])?;
    Ok(())
}

/// Clear all index tables, leaving `meta` intact. Used when
/// repopulating from a full reindex.
pub fn clear_index_tables(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "DELETE FROM file_symbols;\
         DELETE FROM indexed_files;\
         DELETE FROM call_edges;\
         DELETE FROM file_deps;\
         DELETE FROM rescan_queue;",
    )?;
    Ok(())
}

/// Integer seconds since epoch.
pub fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn configure_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\
         PRAGMA busy_timeout = 5000;\
         PRAGMA synchronous = NORMAL;\
         PRAGMA foreign_keys = ON;",
    )?;
    Ok(())
}

fn create_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS indexed_files (
            path          TEXT PRIMARY KEY,
            content_hash  TEXT NOT NULL,
            mtime         INTEGER NOT NULL,
            indexed_at    INTEGER NOT NULL,
            document_hash TEXT NOT NULL DEFAULT '',
            symbol_count  INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS file_symbols (
            path      TEXT NOT NULL,
            symbol_id TEXT NOT NULL,
            UNIQUE(path, symbol_id)
        );

        CREATE INDEX IF NOT EXISTS idx_file_symbols_symbol ON file_symbols(symbol_id);

        CREATE TABLE IF NOT EXISTS call_edges (
            caller_id    TEXT,
            caller_file  TEXT NOT NULL,
            callee_id    TEXT NOT NULL,
            call_line    INTEGER NOT NULL,
            call_col     INTEGER NOT NULL,
            call_end_col INTEGER,
            UNIQUE(caller_file, call_line, call_col, callee_id)
        );

        CREATE INDEX IF NOT EXISTS idx_call_edges_callee ON call_edges(callee_id);

        CREATE TABLE IF NOT EXISTS file_deps (
            dependent_file TEXT NOT NULL,
            defining_file  TEXT NOT NULL,
            UNIQUE(dependent_file, defining_file)
        );

        CREATE INDEX IF NOT EXISTS idx_file_deps_defining ON file_deps(defining_file);

        CREATE TABLE IF NOT EXISTS rescan_queue (
            file_path   TEXT PRIMARY KEY,
            reason      TEXT NOT NULL,
            depth       INTEGER NOT NULL,
            enqueued_at INTEGER NOT NULL,
            attempts    INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;

    // Stamp the engine schema version only on first creation so a
    // version written by an older engine survives for the gate check.
    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES (?1, ?2)",
        params![meta_keys::SCHEMA_VERSION, SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

fn row_to_file_record(row: &rusqlite::Row<'_>) -> Result<FileRecord, StoreError> {
    Ok(FileRecord {
        path: row.get(0)?,
        content_hash: row.get(1)?,
        mtime: row.get(2)?,
        indexed_at: row.get(3)?,
        document_hash: row.get(4)?,
        symbol_count: row.get(5)?,
    })
}

fn row_to_call_edge(row: &rusqlite::Row<'_>) -> Result<CallEdgeRow, StoreError> {
    Ok(CallEdgeRow {
        caller_id: row.get(0)?,
        caller_file: row.get(1)?,
        callee_id: row.get(2)?,
        call_line: row.get(3)?,
        call_col: row.get(4)?,
        call_end_col: row.get(5)?,
    })
}

/// Rows with an unrecognized reason tag are skipped rather than failing
/// the whole query.
fn row_to_rescan_entry(row: &rusqlite::Row<'_>) -> Result<Option<RescanEntry>, StoreError> {
    let reason_raw: String = row.get(1)?;
    match RescanReason::parse(&reason_raw) {
        Some(reason) => Ok(Some(RescanEntry {
            file_path: row.get(0)?,
            reason,
            depth: row.get(2)?,
            enqueued_at: row.get(3)?,
            attempts: row.get(4)?,
        })),
        None => Ok(None),
    }
}

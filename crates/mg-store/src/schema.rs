use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 1;

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;

    // Force-checkpoint any stale WAL data into the main DB on startup.
    // Errors are non-fatal — in-memory DBs and fresh files legitimately fail this.
    if conn
        .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
        .is_ok()
    {
        tracing::debug!("startup WAL checkpoint complete");
    }
    Ok(())
}

fn stamp_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Create the interaction graph tables. Idempotent.
///
/// The graph vocabulary is fixed: User, Interaction and Topic nodes;
/// INITIATED, FOLLOWS, ABOUT and typed cross-link edges. `entities`
/// and `topics` are denormalized JSON arrays on the interaction row
/// (queried with json_each); ABOUT edges carry the normalized fan-in.
pub fn initialize_graph(conn: &Connection) -> Result<()> {
    apply_pragmas(conn)?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            name       TEXT PRIMARY KEY,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS interactions (
            id        TEXT PRIMARY KEY,
            user      TEXT NOT NULL,
            input     TEXT NOT NULL,
            output    TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            intent    TEXT,
            sentiment TEXT,
            entities  TEXT NOT NULL DEFAULT '[]',
            topics    TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS topics (
            name TEXT PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS initiated (
            user           TEXT NOT NULL REFERENCES users(name),
            interaction_id TEXT NOT NULL REFERENCES interactions(id),
            UNIQUE (user, interaction_id)
        );

        CREATE TABLE IF NOT EXISTS follows (
            prev_id TEXT NOT NULL REFERENCES interactions(id),
            next_id TEXT NOT NULL REFERENCES interactions(id)
        );

        CREATE TABLE IF NOT EXISTS about (
            interaction_id TEXT NOT NULL REFERENCES interactions(id),
            topic          TEXT NOT NULL REFERENCES topics(name)
        );

        CREATE TABLE IF NOT EXISTS links (
            from_id    TEXT NOT NULL REFERENCES interactions(id),
            to_id      TEXT NOT NULL REFERENCES interactions(id),
            rel_type   TEXT NOT NULL,
            similarity REAL,
            reason     TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_interactions_user_ts
            ON interactions(user, timestamp);
        CREATE INDEX IF NOT EXISTS idx_initiated_user ON initiated(user);
        CREATE INDEX IF NOT EXISTS idx_initiated_interaction ON initiated(interaction_id);
        CREATE INDEX IF NOT EXISTS idx_follows_prev ON follows(prev_id);
        CREATE INDEX IF NOT EXISTS idx_about_interaction ON about(interaction_id);
        CREATE INDEX IF NOT EXISTS idx_about_topic ON about(topic);
        CREATE INDEX IF NOT EXISTS idx_links_from ON links(from_id);
        ",
    )?;

    stamp_version(conn)
}

/// Create the semantic memory tables. Idempotent.
/// Collections are created on first reference; documents carry the
/// embedded content blob alongside structured metadata columns.
pub fn initialize_memory(conn: &Connection) -> Result<()> {
    apply_pragmas(conn)?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS collections (
            id   INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS memories (
            id            TEXT PRIMARY KEY,
            collection_id INTEGER NOT NULL REFERENCES collections(id),
            content       TEXT NOT NULL,
            embedding     BLOB NOT NULL,
            type          TEXT NOT NULL,
            user          TEXT,
            confidence    REAL NOT NULL,
            importance    REAL NOT NULL,
            tags          TEXT,
            emotion       TEXT,
            timestamp     TEXT NOT NULL,
            source        TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_memories_collection
            ON memories(collection_id);
        CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(type);
        ",
    )?;

    stamp_version(conn)
}

pub fn get_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = 'schema_version'")?;
    let version = stmt
        .query_row([], |row| {
            let v: String = row.get(0)?;
            Ok(v.parse::<i64>().unwrap_or(0))
        })
        .ok();
    Ok(version)
}

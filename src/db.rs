//! SQLite pool setup and schema.
//!
//! All cross-request state lives here: two tables, `users` and `sightings`.
//! Connections come from an r2d2 pool and are released by scope on every
//! exit path. WAL mode lets reads run in parallel; writes are single-row
//! single-statement, so SQLite's own page lock is the only coordination.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = r2d2::PooledConnection<SqliteConnectionManager>;

/// Open (or create) the database file and prepare the schema.
pub fn open_pool(path: &Path) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    });
    let pool = Pool::builder()
        .max_size(8)
        .build(manager)
        .with_context(|| format!("opening database at {}", path.display()))?;

    let conn = pool.get()?;
    // Username and email are case-sensitive unique keys. Timestamps are
    // stored as fixed-width RFC 3339 UTC strings, so lexicographic order
    // in ORDER BY is chronological order.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            salt TEXT NOT NULL,
            orcid_id TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sightings (
            id TEXT PRIMARY KEY,
            species TEXT NOT NULL,
            scientific_name TEXT,
            timestamp TEXT NOT NULL,
            latitude REAL,
            longitude REAL,
            notes TEXT,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_sightings_owner_ts
            ON sightings(user_id, timestamp DESC);",
    )?;

    Ok(pool)
}

/// Fixed-width RFC 3339 UTC, the only timestamp format stored in the
/// database. Fixed width keeps string comparison chronological.
pub fn format_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad stored timestamp {raw:?}"))?
        .with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_timestamps_roundtrip() {
        let now = Utc::now();
        let parsed = parse_ts(&format_ts(now)).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn stored_timestamps_sort_lexicographically() {
        let early = format_ts(DateTime::parse_from_rfc3339("2025-03-01T08:00:00Z").unwrap().into());
        let late = format_ts(DateTime::parse_from_rfc3339("2025-03-01T08:00:00.5Z").unwrap().into());
        assert!(early < late);
    }

    #[test]
    fn open_pool_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir.path().join("test.db")).unwrap();

        let conn = pool.get().unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(tables.contains(&"users".to_string()));
        assert!(tables.contains(&"sightings".to_string()));
    }

    #[test]
    fn open_pool_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        open_pool(&path).unwrap();
        open_pool(&path).unwrap();
    }
}

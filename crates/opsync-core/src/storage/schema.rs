//! SQLite schema for the mirror key-value store
//!
//! One row per mirror key. The payload is the same JSON envelope the file
//! backend writes, so both backends are interchangeable. The schema version
//! lives in `PRAGMA user_version`.

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Create the mirror table and stamp the version
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS mirror_entries (
            key TEXT PRIMARY KEY,
            payload BLOB NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)
}

/// Version stamped by `init_schema`, 0 for a fresh database
pub fn schema_version(conn: &Connection) -> Result<i32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

/// Whether the database predates the current schema
pub fn needs_init(conn: &Connection) -> bool {
    schema_version(conn).map_or(true, |v| v < SCHEMA_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_needs_init() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);
        assert!(needs_init(&conn));

        init_schema(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
        assert!(!needs_init(&conn));
    }

    #[test]
    fn test_init_keeps_existing_rows() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO mirror_entries (key, payload, updated_at) VALUES ('k', x'00', 1)",
            [],
        )
        .unwrap();

        init_schema(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM mirror_entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}

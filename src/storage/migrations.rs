//! Embedded schema migrations, tracked through `PRAGMA user_version`.

use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StoreError};

const MIGRATIONS: [&str; 1] = [include_str!("../../migrations/001_initial_schema.sql")];

#[allow(clippy::cast_possible_truncation)]
pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring the schema up to date, returning the resulting version.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    let current_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;

    if current_version > SCHEMA_VERSION {
        return Err(StoreError::Config(format!(
            "store schema version {current_version} is newer than supported version {SCHEMA_VERSION}"
        )));
    }

    for (target_version, sql) in (1..).zip(MIGRATIONS.iter()) {
        if current_version >= target_version {
            continue;
        }

        conn.execute_batch(sql).map_err(|err| {
            StoreError::Config(format!("migration {target_version} failed: {err}"))
        })?;
        conn.pragma_update(None, "user_version", target_version)?;
        info!(version = target_version, "applied schema migration");
    }

    Ok(SCHEMA_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_user_version(conn: &Connection) -> u32 {
        conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
            .unwrap()
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            == 1
    }

    #[test]
    fn migrations_are_not_empty() {
        for (idx, sql) in MIGRATIONS.iter().enumerate() {
            assert!(!sql.trim().is_empty(), "Migration {} is empty", idx + 1);
        }
    }

    #[test]
    fn run_migrations_on_empty_database() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_user_version(&conn), 0);

        let result = run_migrations(&conn).unwrap();
        assert_eq!(result, SCHEMA_VERSION);
        assert_eq!(get_user_version(&conn), SCHEMA_VERSION);
        for table in [
            "mq_message_reference",
            "mq_message",
            "mq_transaction",
            "mq_counter",
            "mq_sequence",
        ] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
    }

    #[test]
    fn run_migrations_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        for _ in 0..3 {
            assert_eq!(run_migrations(&conn).unwrap(), SCHEMA_VERSION);
        }
        let seeded: i64 = conn
            .query_row("SELECT count(*) FROM mq_sequence", [], |row| row.get(0))
            .unwrap();
        assert_eq!(seeded, 1);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();
        assert!(matches!(run_migrations(&conn), Err(StoreError::Config(_))));
    }
}

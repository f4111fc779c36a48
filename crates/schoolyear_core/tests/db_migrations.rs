use rusqlite::Connection;
use schoolyear_core::db::migrations::latest_version;
use schoolyear_core::db::{open_db, open_db_in_memory, schema_version, table_exists, DbError};
use schoolyear_core::{RepoError, SqliteRosterRepository};

#[test]
fn open_db_in_memory_creates_every_collection() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn).unwrap(), latest_version());
    for table in [
        "students",
        "workshops",
        "workshop_participants",
        "attendance_sessions",
        "attendance_records",
        "archived_students",
        "archived_workshops",
        "archived_attendance_sessions",
        "closure_ledger",
        "closure_checkpoints",
        "closure_locks",
    ] {
        assert!(table_exists(&conn, table).unwrap(), "missing table {table}");
    }
}

#[test]
fn reopening_a_file_database_keeps_schema_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("school.sqlite3");

    let first = open_db(&path).unwrap();
    assert_eq!(schema_version(&first).unwrap(), latest_version());
    drop(first);

    let second = open_db(&path).unwrap();
    assert_eq!(schema_version(&second).unwrap(), latest_version());
}

#[test]
fn newer_schema_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite3");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 42;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::SchemaTooNew { found, supported } => {
            assert_eq!(found, 42);
            assert_eq!(supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn repositories_refuse_unmigrated_connections() {
    let conn = Connection::open_in_memory().unwrap();

    match SqliteRosterRepository::try_new(&conn) {
        Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        }) => {
            assert_eq!(expected_version, latest_version());
            assert_eq!(actual_version, 0);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("unmigrated connection must be rejected"),
    }
}

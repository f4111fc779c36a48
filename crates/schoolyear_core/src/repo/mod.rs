//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts for the live roster, the
//!   year archive and the closure ledger.
//! - Isolate SQLite query details from the closure orchestrator.
//!
//! # Invariants
//! - Repository writes validate model values before persistence.
//! - Every closure phase is one SQLite transaction that also commits the
//!   phase checkpoint.

pub mod archive_repo;
pub mod closure_repo;
pub mod roster_repo;

use crate::db::migrations::latest_version;
use crate::db::schema_version;
use roster_repo::{RepoError, RepoResult};
use std::time::{SystemTime, UNIX_EPOCH};

/// Rejects connections that did not go through `open_db*`.
pub(crate) fn ensure_connection_ready(conn: &rusqlite::Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = schema_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}

pub(crate) fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

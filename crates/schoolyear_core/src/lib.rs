//! Core domain logic for school year closure.
//! This crate owns the roster store, the year archive and the closure ledger.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig};
pub use model::closure::{
    AcademicYear, ClosureLock, ClosurePhase, ClosureRecord, ClosureState, ClosureStatistics,
    PhaseStatus, ProgressEvent,
};
pub use model::grade::{resolve_promotion, Grade, Promotion};
pub use model::snapshot::RosterSnapshot;
pub use repo::archive_repo::{ArchiveCounts, ArchiveRepository, SqliteArchiveRepository};
pub use repo::closure_repo::{ClosureRepoError, ClosureStore, SqliteClosureRepository};
pub use repo::roster_repo::{RepoError, RepoResult, RosterRepository, SqliteRosterRepository};
pub use service::closure_service::{
    confirm_closure, confirm_restore, ClosureReport, ClosureRequest, ClosureService,
    ClosureServiceError, ProgressSink, RecoveryAction,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}

//! Academic year closure orchestrator.
//!
//! # Responsibility
//! - Validate the year and the typed confirmation before any storage access.
//! - Reject years that are already closed or locked by another run.
//! - Run archive, ledger, promotion and cleanup in order, skipping phases
//!   whose checkpoint exists, and report each step to a [`ProgressSink`].
//!
//! # Invariants
//! - A failed phase leaves earlier phases committed; re-running resumes at the
//!   failed phase.
//! - The lock acquired by a run is released by that run on success and on
//!   handled failure.
//! - Restore never touches data.

use crate::model::closure::{
    AcademicYear, CleanupSummary, ClosureLock, ClosurePhase, ClosureRecord, ClosureState,
    ClosureStatistics, PhaseStatus, ProgressEvent, PromotionSummary,
};
use crate::model::validation::ValidationError;
use crate::repo::archive_repo::ArchiveCounts;
use crate::repo::closure_repo::{ClosureRepoError, ClosureRepoResult, ClosureStore};
use crate::repo::now_epoch_ms;
use crate::repo::roster_repo::{RepoError, RosterRepository};
use crate::service::confirmation::{closure_phrase, restore_phrase, verify_phrase};
use crate::service::promotion::plan_promotions;
use crate::service::statistics::compute_statistics;
use log::{error, info, warn};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Receives progress events while a closure runs.
pub trait ProgressSink {
    fn emit(&mut self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: FnMut(&ProgressEvent),
{
    fn emit(&mut self, event: &ProgressEvent) {
        self(event)
    }
}

/// What the operator should do after a failed phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Transient failure; running the closure again resumes at the failed
    /// phase.
    ReRunToContinue,
    /// Stored data conflicts with the workflow; needs manual repair.
    ContactAdmin,
}

impl RecoveryAction {
    fn for_error(err: &ClosureRepoError) -> Self {
        if err.is_transient() {
            Self::ReRunToContinue
        } else {
            Self::ContactAdmin
        }
    }
}

impl Display for RecoveryAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReRunToContinue => f.write_str("run the closure again to continue"),
            Self::ContactAdmin => f.write_str("contact an administrator"),
        }
    }
}

/// Service error for closure use-cases.
#[derive(Debug)]
pub enum ClosureServiceError {
    InvalidYear(ValidationError),
    /// Typed phrase did not match; nothing was read or written.
    ConfirmationMismatch { expected: String },
    AlreadyClosed { record: ClosureRecord },
    /// Another run holds the year's lock.
    ClosureInProgress { lock: ClosureLock },
    PhaseFailed {
        phase: ClosurePhase,
        action: RecoveryAction,
        source: ClosureRepoError,
    },
    RestoreUnsupported { year: AcademicYear },
    Roster(RepoError),
    Store(ClosureRepoError),
    /// Internal consistency mismatch between checkpoints and stored rows.
    InconsistentState(&'static str),
}

impl Display for ClosureServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidYear(err) => write!(f, "{err}"),
            Self::ConfirmationMismatch { expected } => {
                write!(f, "confirmation phrase mismatch; type exactly `{expected}`")
            }
            Self::AlreadyClosed { record } => write!(
                f,
                "academic year {} was already closed by `{}`",
                record.year, record.closed_by
            ),
            Self::ClosureInProgress { lock } => write!(
                f,
                "closure of {} already in progress (held by `{}` since {})",
                lock.year, lock.holder, lock.acquired_at
            ),
            Self::PhaseFailed {
                phase,
                action,
                source,
            } => write!(f, "closure phase `{phase}` failed: {source}; {action}"),
            Self::RestoreUnsupported { year } => write!(
                f,
                "restoring academic year {year} is not supported; archived copies stay available for manual recovery"
            ),
            Self::Roster(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => write!(f, "inconsistent closure state: {details}"),
        }
    }
}

impl Error for ClosureServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidYear(err) => Some(err),
            Self::PhaseFailed { source, .. } => Some(source),
            Self::Roster(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ClosureServiceError {
    fn from(value: RepoError) -> Self {
        Self::Roster(value)
    }
}

impl From<ClosureRepoError> for ClosureServiceError {
    fn from(value: ClosureRepoError) -> Self {
        match value {
            ClosureRepoError::LockHeld(lock) => Self::ClosureInProgress { lock },
            other => Self::Store(other),
        }
    }
}

/// Input of one closure run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosureRequest {
    pub year: String,
    pub confirmation: String,
    /// Recorded as `closed_by` and as the lock holder.
    pub operator: String,
    pub description: Option<String>,
}

/// Read-only view shown before the operator confirms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosurePreview {
    pub year: AcademicYear,
    /// Phrase the operator must type to confirm.
    pub confirmation_phrase: String,
    pub statistics: ClosureStatistics,
    pub already_closed: bool,
    pub completed_phases: Vec<ClosurePhase>,
}

/// Outcome of a successful closure run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureReport {
    pub record: ClosureRecord,
    /// Phases executed by this run.
    pub ran: Vec<ClosurePhase>,
    /// Phases checkpointed by an earlier run.
    pub skipped: Vec<ClosurePhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<ArchiveCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promoted: Option<PromotionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleaned: Option<CleanupSummary>,
}

#[derive(Default)]
struct PhaseOutputs {
    record: Option<ClosureRecord>,
    archived: Option<ArchiveCounts>,
    promoted: Option<PromotionSummary>,
    cleaned: Option<CleanupSummary>,
}

/// Closure service facade over roster and closure store implementations.
pub struct ClosureService<R: RosterRepository, S: ClosureStore> {
    roster: R,
    store: S,
}

impl<R: RosterRepository, S: ClosureStore> ClosureService<R, S> {
    pub fn new(roster: R, store: S) -> Self {
        Self { roster, store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Statistics of the live roster and the phrase that confirms closure.
    pub fn preview(&self, year: &str) -> Result<ClosurePreview, ClosureServiceError> {
        let year = parse_year(year)?;
        let snapshot = self.roster.load_snapshot()?;
        let state = self.closure_state(&year)?;
        let (already_closed, completed_phases) = match state {
            ClosureState::Open => (false, Vec::new()),
            ClosureState::InProgress { completed } => (false, completed),
            ClosureState::Closed { .. } => (true, self.store.completed_phases(&year)?),
        };

        Ok(ClosurePreview {
            confirmation_phrase: closure_phrase(&year),
            statistics: compute_statistics(&snapshot),
            year,
            already_closed,
            completed_phases,
        })
    }

    /// Where `year` stands in the closure workflow.
    ///
    /// A ledger entry without any checkpoint rows counts as closed.
    pub fn closure_state(&self, year: &AcademicYear) -> Result<ClosureState, ClosureServiceError> {
        let record = self.store.closure_record(year)?;
        let completed = self.store.completed_phases(year)?;

        Ok(match record {
            Some(record)
                if completed.is_empty() || completed.contains(&ClosurePhase::Cleanup) =>
            {
                ClosureState::Closed { record }
            }
            _ if completed.is_empty() => ClosureState::Open,
            _ => ClosureState::InProgress { completed },
        })
    }

    /// Closure ledger, newest year first.
    pub fn closure_records(&self) -> Result<Vec<ClosureRecord>, ClosureServiceError> {
        Ok(self.store.list_closure_records()?)
    }

    /// Closes one academic year.
    ///
    /// # Errors
    /// - `InvalidYear` / `ConfirmationMismatch` before any storage access.
    /// - `AlreadyClosed` when the ledger marks the year closed.
    /// - `ClosureInProgress` when another run holds the lock.
    /// - `PhaseFailed` with the failed phase and the recovery action.
    pub fn run_closure(
        &self,
        request: &ClosureRequest,
        sink: &mut impl ProgressSink,
    ) -> Result<ClosureReport, ClosureServiceError> {
        let year = confirm_closure(&request.year, &request.confirmation)?;
        self.reject_if_closed(&year)?;

        let lock = self.store.acquire_lock(&year, &request.operator)?;
        // Another run may have finished between the preflight and the lock.
        if let Err(err) = self.reject_if_closed(&year) {
            self.release(&lock);
            return Err(err);
        }

        let started_at = Instant::now();
        let result = self.run_phases(&year, request, sink);

        self.release(&lock);

        match &result {
            Ok(report) => info!(
                "event=closure_run module=closure status=ok year={} ran={} skipped={} duration_ms={}",
                year,
                report.ran.len(),
                report.skipped.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=closure_run module=closure status=error year={} duration_ms={} error={}",
                year,
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }

    /// Checks the restore phrase, then refuses: archived years cannot be
    /// restored automatically.
    pub fn restore(&self, year: &str, confirmation: &str) -> Result<(), ClosureServiceError> {
        let year = confirm_restore(year, confirmation)?;
        warn!(
            "event=closure_restore module=closure status=unsupported year={}",
            year
        );
        Err(ClosureServiceError::RestoreUnsupported { year })
    }

    /// Drops a lock left behind by a crashed run.
    pub fn force_unlock(&self, year: &str) -> Result<Option<ClosureLock>, ClosureServiceError> {
        let year = parse_year(year)?;
        Ok(self.store.force_release_lock(&year)?)
    }

    fn reject_if_closed(&self, year: &AcademicYear) -> Result<(), ClosureServiceError> {
        if let ClosureState::Closed { record } = self.closure_state(year)? {
            warn!(
                "event=closure_run module=closure status=rejected year={} error_code=already_closed",
                year
            );
            return Err(ClosureServiceError::AlreadyClosed { record });
        }
        Ok(())
    }

    fn release(&self, lock: &ClosureLock) {
        if let Err(err) = self.store.release_lock(lock) {
            error!(
                "event=closure_lock module=closure status=error year={} error_code={} error={}",
                lock.year,
                err.code(),
                err
            );
        }
    }

    fn run_phases(
        &self,
        year: &AcademicYear,
        request: &ClosureRequest,
        sink: &mut impl ProgressSink,
    ) -> Result<ClosureReport, ClosureServiceError> {
        let completed = self.store.completed_phases(year)?;
        let mut outputs = PhaseOutputs::default();
        let mut ran = Vec::new();
        let mut skipped = Vec::new();

        for phase in ClosurePhase::ORDER {
            if completed.contains(&phase) {
                info!(
                    "event=closure_phase module=closure status=skipped year={} phase={}",
                    year, phase
                );
                sink.emit(&ProgressEvent::new(phase, PhaseStatus::Skipped));
                skipped.push(phase);
                continue;
            }

            sink.emit(&ProgressEvent::new(phase, PhaseStatus::Started));
            let started_at = Instant::now();
            if let Err(err) = self.execute_phase(phase, year, request, &mut outputs) {
                error!(
                    "event=closure_phase module=closure status=error year={} phase={} duration_ms={} error_code={} error={}",
                    year,
                    phase,
                    started_at.elapsed().as_millis(),
                    err.code(),
                    err
                );
                sink.emit(&ProgressEvent::failed(phase, err.to_string()));
                return Err(ClosureServiceError::PhaseFailed {
                    phase,
                    action: RecoveryAction::for_error(&err),
                    source: err,
                });
            }
            info!(
                "event=closure_phase module=closure status=ok year={} phase={} duration_ms={}",
                year,
                phase,
                started_at.elapsed().as_millis()
            );
            sink.emit(&ProgressEvent::new(phase, PhaseStatus::Completed));
            ran.push(phase);
        }

        let record = match outputs.record {
            Some(record) => record,
            None => self
                .store
                .closure_record(year)?
                .ok_or(ClosureServiceError::InconsistentState(
                    "ledger checkpoint present without ledger entry",
                ))?,
        };

        Ok(ClosureReport {
            record,
            ran,
            skipped,
            archived: outputs.archived,
            promoted: outputs.promoted,
            cleaned: outputs.cleaned,
        })
    }

    fn execute_phase(
        &self,
        phase: ClosurePhase,
        year: &AcademicYear,
        request: &ClosureRequest,
        outputs: &mut PhaseOutputs,
    ) -> ClosureRepoResult<()> {
        match phase {
            ClosurePhase::Archive => {
                outputs.archived = Some(self.store.archive_live_collections(year)?);
            }
            ClosurePhase::Ledger => {
                // Statistics come from the archived copies so a resumed run
                // records the roster as it was when archiving committed.
                let archived = self.store.archived_snapshot(year)?;
                let record = ClosureRecord {
                    year: year.clone(),
                    closed_at: now_epoch_ms(),
                    closed_by: request.operator.clone(),
                    description: request
                        .description
                        .clone()
                        .unwrap_or_else(|| default_description(year)),
                    statistics: compute_statistics(&archived),
                };
                self.store.record_closure(&record)?;
                outputs.record = Some(record);
            }
            ClosurePhase::Promotion => {
                let students = self.roster.list_students()?;
                let plan = plan_promotions(&students);
                outputs.promoted = Some(self.store.apply_promotions(year, &plan)?);
            }
            ClosurePhase::Cleanup => {
                outputs.cleaned = Some(self.store.cleanup_year(year)?);
            }
        }
        Ok(())
    }
}

/// Validates the year and the closure phrase without touching storage.
pub fn confirm_closure(
    year: &str,
    confirmation: &str,
) -> Result<AcademicYear, ClosureServiceError> {
    let year = parse_year(year)?;
    check_phrase(confirmation, &closure_phrase(&year))?;
    Ok(year)
}

/// Validates the year and the restore phrase without touching storage.
pub fn confirm_restore(
    year: &str,
    confirmation: &str,
) -> Result<AcademicYear, ClosureServiceError> {
    let year = parse_year(year)?;
    check_phrase(confirmation, &restore_phrase(&year))?;
    Ok(year)
}

fn check_phrase(input: &str, expected: &str) -> Result<(), ClosureServiceError> {
    verify_phrase(input, expected).map_err(|err| ClosureServiceError::ConfirmationMismatch {
        expected: err.expected,
    })
}

fn parse_year(value: &str) -> Result<AcademicYear, ClosureServiceError> {
    AcademicYear::parse(value).map_err(ClosureServiceError::InvalidYear)
}

fn default_description(year: &AcademicYear) -> String {
    format!("Cierre del año académico {year}")
}

#[cfg(test)]
mod tests {
    use super::{
        confirm_closure, confirm_restore, ClosureService, ClosureServiceError, RecoveryAction,
    };
    use crate::db::open_db_in_memory;
    use crate::repo::closure_repo::{ClosureRepoError, SqliteClosureRepository};
    use crate::repo::roster_repo::SqliteRosterRepository;

    #[test]
    fn recovery_action_follows_error_kind() {
        let stale = ClosureRepoError::StaleStudent {
            id: "a".to_string(),
            expected_grade: "PRIMERO".to_string(),
        };
        assert_eq!(
            RecoveryAction::for_error(&stale),
            RecoveryAction::ReRunToContinue
        );

        let missing = ClosureRepoError::PhaseOutOfOrder {
            phase: crate::model::closure::ClosurePhase::Cleanup,
            missing: crate::model::closure::ClosurePhase::Promotion,
        };
        assert_eq!(
            RecoveryAction::for_error(&missing),
            RecoveryAction::ContactAdmin
        );
    }

    #[test]
    fn phrases_are_checked_without_a_connection() {
        assert_eq!(
            confirm_closure("2024", "CERRAR AÑO 2024")
                .expect("exact phrase")
                .as_str(),
            "2024"
        );
        assert!(matches!(
            confirm_closure("2024", "RESTAURAR AÑO 2024"),
            Err(ClosureServiceError::ConfirmationMismatch { .. })
        ));
        assert!(matches!(
            confirm_restore("2024", "CERRAR AÑO 2024"),
            Err(ClosureServiceError::ConfirmationMismatch { .. })
        ));
        assert!(matches!(
            confirm_restore("24", "RESTAURAR AÑO 24"),
            Err(ClosureServiceError::InvalidYear(_))
        ));
    }

    #[test]
    fn invalid_year_is_rejected_before_anything_else() {
        let conn = open_db_in_memory().expect("open db");
        let service = ClosureService::new(
            SqliteRosterRepository::try_new(&conn).expect("roster repo"),
            SqliteClosureRepository::try_new(&conn).expect("closure repo"),
        );

        let err = service.preview("24").expect_err("short year must fail");
        assert!(matches!(err, ClosureServiceError::InvalidYear(_)));

        let err = service
            .force_unlock("two thousand")
            .expect_err("free text must fail");
        assert!(matches!(err, ClosureServiceError::InvalidYear(_)));
    }
}

//! Closure store: phase executors, checkpoints, ledger and lock.
//!
//! # Responsibility
//! - Execute each closure phase as one IMMEDIATE transaction that also
//!   commits the phase checkpoint.
//! - Own the closure ledger (`closure_ledger`) and the per-year lock row
//!   (`closure_locks`).
//!
//! # Invariants
//! - A phase refuses to run when its checkpoint exists or when the previous
//!   phase's checkpoint is missing.
//! - Promotion and cleanup only touch entities whose archive copy for the year
//!   exists (archive before destroy).
//! - At most one ledger row and one lock row per year.

use crate::db::DbError;
use crate::model::closure::{
    AcademicYear, CleanupSummary, ClosureLock, ClosurePhase, ClosureRecord, ClosureStatistics,
    PromotionSummary, StudentPromotion,
};
use crate::model::grade::{Grade, Promotion};
use crate::model::snapshot::RosterSnapshot;
use crate::repo::archive_repo::{
    count_archive, has_archive_row, insert_archive_row, load_payloads, ArchiveCounts,
    ArchiveKind,
};
use crate::repo::roster_repo::{load_snapshot, RepoError};
use crate::repo::{ensure_connection_ready, now_epoch_ms};
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const LEDGER_SELECT_SQL: &str = "SELECT
    academic_year,
    closed_at,
    closed_by,
    description,
    statistics
FROM closure_ledger";

pub type ClosureRepoResult<T> = Result<T, ClosureRepoError>;

/// Errors from closure store operations.
#[derive(Debug)]
pub enum ClosureRepoError {
    /// Storage or payload failure.
    Repo(RepoError),
    /// Another run holds the year's lock.
    LockHeld(ClosureLock),
    /// Release attempted with a token that does not own the lock.
    LockNotOwned(AcademicYear),
    /// Ledger already has an entry for the year.
    AlreadyRecorded(AcademicYear),
    /// Archive rows exist for the year although the archive phase never
    /// committed.
    ArchiveConflict {
        year: AcademicYear,
        existing: u64,
    },
    /// An entity about to be mutated or deleted has no archive copy.
    MissingArchiveCopy { kind: ArchiveKind, id: String },
    /// Student grade changed between planning and applying the promotion.
    StaleStudent { id: String, expected_grade: String },
    PhaseAlreadyCompleted(ClosurePhase),
    PhaseOutOfOrder {
        phase: ClosurePhase,
        missing: ClosurePhase,
    },
}

impl ClosureRepoError {
    /// Whether re-running the closure can succeed without manual repair.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Repo(RepoError::Db(_)) | Self::StaleStudent { .. }
        )
    }

    /// Stable code for log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Repo(RepoError::Db(_)) => "storage_failed",
            Self::Repo(_) => "invalid_data",
            Self::LockHeld(_) => "lock_held",
            Self::LockNotOwned(_) => "lock_not_owned",
            Self::AlreadyRecorded(_) => "ledger_conflict",
            Self::ArchiveConflict { .. } => "archive_conflict",
            Self::MissingArchiveCopy { .. } => "archive_missing",
            Self::StaleStudent { .. } => "stale_student",
            Self::PhaseAlreadyCompleted(_) => "phase_already_completed",
            Self::PhaseOutOfOrder { .. } => "phase_out_of_order",
        }
    }
}

impl Display for ClosureRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::LockHeld(lock) => write!(
                f,
                "closure of {} is locked by `{}` since {}",
                lock.year, lock.holder, lock.acquired_at
            ),
            Self::LockNotOwned(year) => {
                write!(f, "closure lock for {year} is not owned by this run")
            }
            Self::AlreadyRecorded(year) => {
                write!(f, "closure ledger already has an entry for {year}")
            }
            Self::ArchiveConflict { year, existing } => write!(
                f,
                "archive for {year} already holds {existing} row(s) without an archive checkpoint"
            ),
            Self::MissingArchiveCopy { kind, id } => {
                write!(f, "{} {id} has no archive copy", kind.label())
            }
            Self::StaleStudent { id, expected_grade } => write!(
                f,
                "student {id} no longer has grade `{expected_grade}`; promotion plan is stale"
            ),
            Self::PhaseAlreadyCompleted(phase) => {
                write!(f, "closure phase `{phase}` already completed")
            }
            Self::PhaseOutOfOrder { phase, missing } => write!(
                f,
                "closure phase `{phase}` requires completed phase `{missing}`"
            ),
        }
    }
}

impl Error for ClosureRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ClosureRepoError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for ClosureRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(RepoError::Db(DbError::Sqlite(value)))
    }
}

impl From<serde_json::Error> for ClosureRepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Repo(RepoError::Serialization(value))
    }
}

/// Storage contract of the closure orchestrator.
pub trait ClosureStore {
    fn closure_record(&self, year: &AcademicYear) -> ClosureRepoResult<Option<ClosureRecord>>;
    /// All ledger entries, newest year first.
    fn list_closure_records(&self) -> ClosureRepoResult<Vec<ClosureRecord>>;
    /// Checkpointed phases for the year, in workflow order.
    fn completed_phases(&self, year: &AcademicYear) -> ClosureRepoResult<Vec<ClosurePhase>>;

    fn acquire_lock(&self, year: &AcademicYear, holder: &str) -> ClosureRepoResult<ClosureLock>;
    fn release_lock(&self, lock: &ClosureLock) -> ClosureRepoResult<()>;
    /// Drops the lock regardless of owner. Returns the removed row.
    fn force_release_lock(&self, year: &AcademicYear) -> ClosureRepoResult<Option<ClosureLock>>;
    fn current_lock(&self, year: &AcademicYear) -> ClosureRepoResult<Option<ClosureLock>>;

    /// Archive phase: copies every live entity into the year archive.
    fn archive_live_collections(&self, year: &AcademicYear) -> ClosureRepoResult<ArchiveCounts>;
    /// Archived copies for the year as one snapshot.
    fn archived_snapshot(&self, year: &AcademicYear) -> ClosureRepoResult<RosterSnapshot>;
    /// Ledger phase: writes the closure record.
    fn record_closure(&self, record: &ClosureRecord) -> ClosureRepoResult<()>;
    /// Promotion phase: applies planned grade changes.
    fn apply_promotions(
        &self,
        year: &AcademicYear,
        plan: &[StudentPromotion],
    ) -> ClosureRepoResult<PromotionSummary>;
    /// Cleanup phase: deletes attendance sessions and resets workshops.
    fn cleanup_year(&self, year: &AcademicYear) -> ClosureRepoResult<CleanupSummary>;
}

/// SQLite-backed closure store.
pub struct SqliteClosureRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteClosureRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> ClosureRepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl ClosureStore for SqliteClosureRepository<'_> {
    fn closure_record(&self, year: &AcademicYear) -> ClosureRepoResult<Option<ClosureRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{LEDGER_SELECT_SQL} WHERE academic_year = ?1;"))?;
        let mut rows = stmt.query([year.as_str()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_ledger_row(row)?));
        }
        Ok(None)
    }

    fn list_closure_records(&self) -> ClosureRepoResult<Vec<ClosureRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{LEDGER_SELECT_SQL} ORDER BY academic_year DESC;"))?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_ledger_row(row)?);
        }
        Ok(records)
    }

    fn completed_phases(&self, year: &AcademicYear) -> ClosureRepoResult<Vec<ClosurePhase>> {
        let mut stmt = self.conn.prepare(
            "SELECT phase FROM closure_checkpoints WHERE academic_year = ?1;",
        )?;
        let mut rows = stmt.query([year.as_str()])?;
        let mut phases = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            let phase = ClosurePhase::parse(&value).ok_or_else(|| {
                RepoError::InvalidData(format!(
                    "invalid phase `{value}` in closure_checkpoints.phase"
                ))
            })?;
            phases.push(phase);
        }
        phases.sort();
        Ok(phases)
    }

    fn acquire_lock(&self, year: &AcademicYear, holder: &str) -> ClosureRepoResult<ClosureLock> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if let Some(existing) = load_lock(&tx, year)? {
            return Err(ClosureRepoError::LockHeld(existing));
        }

        let lock = ClosureLock {
            year: year.clone(),
            token: Uuid::new_v4(),
            holder: holder.to_string(),
            acquired_at: now_epoch_ms(),
        };
        tx.execute(
            "INSERT INTO closure_locks (academic_year, lock_token, holder, acquired_at)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                lock.year.as_str(),
                lock.token.to_string(),
                lock.holder.as_str(),
                lock.acquired_at,
            ],
        )?;
        tx.commit()?;

        info!(
            "event=closure_lock module=closure status=acquired year={} holder={}",
            year, holder
        );
        Ok(lock)
    }

    fn release_lock(&self, lock: &ClosureLock) -> ClosureRepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM closure_locks WHERE academic_year = ?1 AND lock_token = ?2;",
            params![lock.year.as_str(), lock.token.to_string()],
        )?;
        if changed == 0 {
            return Err(ClosureRepoError::LockNotOwned(lock.year.clone()));
        }
        info!(
            "event=closure_lock module=closure status=released year={}",
            lock.year
        );
        Ok(())
    }

    fn force_release_lock(&self, year: &AcademicYear) -> ClosureRepoResult<Option<ClosureLock>> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let existing = load_lock(&tx, year)?;
        if existing.is_some() {
            tx.execute(
                "DELETE FROM closure_locks WHERE academic_year = ?1;",
                [year.as_str()],
            )?;
        }
        tx.commit()?;

        if let Some(lock) = existing.as_ref() {
            warn!(
                "event=closure_lock module=closure status=force_released year={} holder={}",
                year, lock.holder
            );
        }
        Ok(existing)
    }

    fn current_lock(&self, year: &AcademicYear) -> ClosureRepoResult<Option<ClosureLock>> {
        load_lock(self.conn, year)
    }

    fn archive_live_collections(&self, year: &AcademicYear) -> ClosureRepoResult<ArchiveCounts> {
        let tx = begin_phase(self.conn, year, ClosurePhase::Archive)?;

        let existing = count_archive(&tx, year)?;
        if existing.total() > 0 {
            return Err(ClosureRepoError::ArchiveConflict {
                year: year.clone(),
                existing: existing.total(),
            });
        }

        let snapshot = load_snapshot(&tx)?;
        for student in &snapshot.students {
            insert_archive_row(&tx, ArchiveKind::Student, year, &student.id, student)?;
        }
        for workshop in &snapshot.workshops {
            insert_archive_row(&tx, ArchiveKind::Workshop, year, &workshop.id, workshop)?;
        }
        for session in &snapshot.attendance_sessions {
            insert_archive_row(
                &tx,
                ArchiveKind::AttendanceSession,
                year,
                &session.id,
                session,
            )?;
        }

        finish_phase(tx, year, ClosurePhase::Archive)?;
        Ok(ArchiveCounts {
            students: snapshot.students.len() as u64,
            workshops: snapshot.workshops.len() as u64,
            attendance_sessions: snapshot.attendance_sessions.len() as u64,
        })
    }

    fn archived_snapshot(&self, year: &AcademicYear) -> ClosureRepoResult<RosterSnapshot> {
        Ok(RosterSnapshot {
            students: load_payloads(self.conn, ArchiveKind::Student, year)?,
            workshops: load_payloads(self.conn, ArchiveKind::Workshop, year)?,
            attendance_sessions: load_payloads(self.conn, ArchiveKind::AttendanceSession, year)?,
        })
    }

    fn record_closure(&self, record: &ClosureRecord) -> ClosureRepoResult<()> {
        let year = &record.year;
        let tx = begin_phase(self.conn, year, ClosurePhase::Ledger)?;

        let exists: i64 = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM closure_ledger WHERE academic_year = ?1);",
            [year.as_str()],
            |row| row.get(0),
        )?;
        if exists == 1 {
            return Err(ClosureRepoError::AlreadyRecorded(year.clone()));
        }

        let statistics = serde_json::to_string(&record.statistics)?;
        tx.execute(
            "INSERT INTO closure_ledger (
                academic_year,
                closed_at,
                closed_by,
                description,
                statistics
            ) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                year.as_str(),
                record.closed_at,
                record.closed_by.as_str(),
                record.description.as_str(),
                statistics,
            ],
        )?;

        finish_phase(tx, year, ClosurePhase::Ledger)
    }

    fn apply_promotions(
        &self,
        year: &AcademicYear,
        plan: &[StudentPromotion],
    ) -> ClosureRepoResult<PromotionSummary> {
        let tx = begin_phase(self.conn, year, ClosurePhase::Promotion)?;
        let mut summary = PromotionSummary::default();

        for step in plan {
            let (grade, graduated_year) = match step.outcome {
                Promotion::Unchanged => continue,
                Promotion::Advance(next) => (next, None),
                Promotion::Graduate => (Grade::Graduado, Some(year.as_str())),
            };
            ensure_archived(&tx, ArchiveKind::Student, year, &step.student_id)?;

            let changed = tx.execute(
                "UPDATE students
                 SET grade = ?2,
                     section = '',
                     graduated_year = COALESCE(?3, graduated_year),
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?1
                   AND role = 'student'
                   AND grade = ?4;",
                params![
                    step.student_id.as_str(),
                    grade.as_str(),
                    graduated_year,
                    step.previous_grade.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(ClosureRepoError::StaleStudent {
                    id: step.student_id.clone(),
                    expected_grade: step.previous_grade.clone(),
                });
            }

            match step.outcome {
                Promotion::Graduate => summary.graduated += 1,
                _ => summary.promoted += 1,
            }
        }

        finish_phase(tx, year, ClosurePhase::Promotion)?;
        Ok(summary)
    }

    fn cleanup_year(&self, year: &AcademicYear) -> ClosureRepoResult<CleanupSummary> {
        let tx = begin_phase(self.conn, year, ClosurePhase::Cleanup)?;

        for session_id in list_ids(&tx, "attendance_sessions")? {
            ensure_archived(&tx, ArchiveKind::AttendanceSession, year, &session_id)?;
        }
        let workshop_ids = list_ids(&tx, "workshops")?;
        for workshop_id in &workshop_ids {
            ensure_archived(&tx, ArchiveKind::Workshop, year, workshop_id)?;
        }

        let deleted = tx.execute("DELETE FROM attendance_sessions;", [])?;
        tx.execute("DELETE FROM workshop_participants;", [])?;
        let reset = tx.execute(
            "UPDATE workshops
             SET status = 'inactive',
                 archived_year = ?1,
                 updated_at = (strftime('%s', 'now') * 1000);",
            [year.as_str()],
        )?;

        finish_phase(tx, year, ClosurePhase::Cleanup)?;
        Ok(CleanupSummary {
            attendance_sessions_deleted: deleted as u64,
            workshops_reset: reset as u64,
        })
    }
}

fn begin_phase<'conn>(
    conn: &'conn Connection,
    year: &AcademicYear,
    phase: ClosurePhase,
) -> ClosureRepoResult<Transaction<'conn>> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    if checkpoint_exists(&tx, year, phase)? {
        return Err(ClosureRepoError::PhaseAlreadyCompleted(phase));
    }
    if let Some(previous) = phase
        .position()
        .checked_sub(1)
        .map(|index| ClosurePhase::ORDER[index])
    {
        if !checkpoint_exists(&tx, year, previous)? {
            return Err(ClosureRepoError::PhaseOutOfOrder {
                phase,
                missing: previous,
            });
        }
    }
    Ok(tx)
}

fn finish_phase(
    tx: Transaction<'_>,
    year: &AcademicYear,
    phase: ClosurePhase,
) -> ClosureRepoResult<()> {
    tx.execute(
        "INSERT INTO closure_checkpoints (academic_year, phase) VALUES (?1, ?2);",
        params![year.as_str(), phase.as_str()],
    )?;
    tx.commit()?;
    Ok(())
}

fn checkpoint_exists(
    conn: &Connection,
    year: &AcademicYear,
    phase: ClosurePhase,
) -> ClosureRepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM closure_checkpoints WHERE academic_year = ?1 AND phase = ?2
        );",
        params![year.as_str(), phase.as_str()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn ensure_archived(
    conn: &Connection,
    kind: ArchiveKind,
    year: &AcademicYear,
    id: &str,
) -> ClosureRepoResult<()> {
    if !has_archive_row(conn, kind, year, id)? {
        return Err(ClosureRepoError::MissingArchiveCopy {
            kind,
            id: id.to_string(),
        });
    }
    Ok(())
}

fn list_ids(conn: &Connection, table: &'static str) -> ClosureRepoResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("SELECT id FROM {table} ORDER BY id ASC;"))?;
    let mut rows = stmt.query([])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        ids.push(row.get(0)?);
    }
    Ok(ids)
}

fn load_lock(conn: &Connection, year: &AcademicYear) -> ClosureRepoResult<Option<ClosureLock>> {
    let row = conn
        .query_row(
            "SELECT lock_token, holder, acquired_at
             FROM closure_locks
             WHERE academic_year = ?1;",
            [year.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((token_text, holder, acquired_at)) = row else {
        return Ok(None);
    };
    let token = Uuid::parse_str(&token_text).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid uuid `{token_text}` in closure_locks.lock_token"
        ))
    })?;
    Ok(Some(ClosureLock {
        year: year.clone(),
        token,
        holder,
        acquired_at,
    }))
}

fn parse_ledger_row(row: &Row<'_>) -> ClosureRepoResult<ClosureRecord> {
    let year_text: String = row.get("academic_year")?;
    let year = AcademicYear::parse(&year_text).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid academic year `{year_text}` in closure_ledger.academic_year"
        ))
    })?;

    let statistics_text: String = row.get("statistics")?;
    let statistics: ClosureStatistics = serde_json::from_str(&statistics_text).map_err(|err| {
        RepoError::InvalidData(format!(
            "invalid statistics JSON for {year_text} in closure_ledger.statistics: {err}"
        ))
    })?;

    Ok(ClosureRecord {
        year,
        closed_at: row.get("closed_at")?,
        closed_by: row.get("closed_by")?,
        description: row.get("description")?,
        statistics,
    })
}

use rusqlite::Connection;
use schoolyear_core::db::{open_db, open_db_in_memory};
use schoolyear_core::model::closure::{
    CleanupSummary, ClosureLock, ClosureRecord, PromotionSummary, StudentPromotion,
};
use schoolyear_core::model::student::Student;
use schoolyear_core::repo::closure_repo::ClosureRepoResult;
use schoolyear_core::{
    AcademicYear, ArchiveCounts, ClosurePhase, ClosureRepoError, ClosureRequest, ClosureService,
    ClosureServiceError, ClosureState, ClosureStore, DbError, PhaseStatus, ProgressEvent,
    RecoveryAction, RepoError, RosterRepository, RosterSnapshot, SqliteClosureRepository,
    SqliteRosterRepository,
};
use std::cell::Cell;

/// Delegates to SQLite but fails the chosen phase once, before it writes.
/// With a rival connection set, another session closes the year just before
/// the first lock attempt.
struct FlakyStore<'conn> {
    inner: SqliteClosureRepository<'conn>,
    fail_phase: Cell<Option<ClosurePhase>>,
    rival: Cell<Option<&'conn Connection>>,
}

impl<'conn> FlakyStore<'conn> {
    fn new(conn: &'conn Connection, fail_phase: ClosurePhase) -> Self {
        Self {
            inner: SqliteClosureRepository::try_new(conn).unwrap(),
            fail_phase: Cell::new(Some(fail_phase)),
            rival: Cell::new(None),
        }
    }

    fn racing(conn: &'conn Connection, rival: &'conn Connection) -> Self {
        Self {
            inner: SqliteClosureRepository::try_new(conn).unwrap(),
            fail_phase: Cell::new(None),
            rival: Cell::new(Some(rival)),
        }
    }

    fn trip(&self, phase: ClosurePhase) -> ClosureRepoResult<()> {
        if self.fail_phase.get() == Some(phase) {
            self.fail_phase.set(None);
            let busy = rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                Some("database is locked".to_string()),
            );
            return Err(ClosureRepoError::Repo(RepoError::Db(DbError::Sqlite(busy))));
        }
        Ok(())
    }
}

impl ClosureStore for FlakyStore<'_> {
    fn closure_record(&self, year: &AcademicYear) -> ClosureRepoResult<Option<ClosureRecord>> {
        self.inner.closure_record(year)
    }

    fn list_closure_records(&self) -> ClosureRepoResult<Vec<ClosureRecord>> {
        self.inner.list_closure_records()
    }

    fn completed_phases(&self, year: &AcademicYear) -> ClosureRepoResult<Vec<ClosurePhase>> {
        self.inner.completed_phases(year)
    }

    fn acquire_lock(&self, year: &AcademicYear, holder: &str) -> ClosureRepoResult<ClosureLock> {
        if let Some(rival) = self.rival.take() {
            let mut req = request();
            req.operator = "otra-sesion".to_string();
            ClosureService::new(
                SqliteRosterRepository::try_new(rival).unwrap(),
                SqliteClosureRepository::try_new(rival).unwrap(),
            )
            .run_closure(&req, &mut |_: &ProgressEvent| {})
            .unwrap();
        }
        self.inner.acquire_lock(year, holder)
    }

    fn release_lock(&self, lock: &ClosureLock) -> ClosureRepoResult<()> {
        self.inner.release_lock(lock)
    }

    fn force_release_lock(&self, year: &AcademicYear) -> ClosureRepoResult<Option<ClosureLock>> {
        self.inner.force_release_lock(year)
    }

    fn current_lock(&self, year: &AcademicYear) -> ClosureRepoResult<Option<ClosureLock>> {
        self.inner.current_lock(year)
    }

    fn archive_live_collections(&self, year: &AcademicYear) -> ClosureRepoResult<ArchiveCounts> {
        self.trip(ClosurePhase::Archive)?;
        self.inner.archive_live_collections(year)
    }

    fn archived_snapshot(&self, year: &AcademicYear) -> ClosureRepoResult<RosterSnapshot> {
        self.inner.archived_snapshot(year)
    }

    fn record_closure(&self, record: &ClosureRecord) -> ClosureRepoResult<()> {
        self.trip(ClosurePhase::Ledger)?;
        self.inner.record_closure(record)
    }

    fn apply_promotions(
        &self,
        year: &AcademicYear,
        plan: &[StudentPromotion],
    ) -> ClosureRepoResult<PromotionSummary> {
        self.trip(ClosurePhase::Promotion)?;
        self.inner.apply_promotions(year, plan)
    }

    fn cleanup_year(&self, year: &AcademicYear) -> ClosureRepoResult<CleanupSummary> {
        self.trip(ClosurePhase::Cleanup)?;
        self.inner.cleanup_year(year)
    }
}

fn seed(conn: &Connection) {
    let roster = SqliteRosterRepository::try_new(conn).unwrap();
    roster.upsert_student(&Student::with_id("A", "PRIMERO", "1A")).unwrap();
    roster.upsert_student(&Student::with_id("B", "QUINTO", "5B")).unwrap();
}

fn request() -> ClosureRequest {
    ClosureRequest {
        year: "2024".to_string(),
        confirmation: "CERRAR AÑO 2024".to_string(),
        operator: "secretaria".to_string(),
        description: Some("cierre de prueba".to_string()),
    }
}

fn year() -> AcademicYear {
    AcademicYear::parse("2024").unwrap()
}

fn grade_of(conn: &Connection, id: &str) -> String {
    SqliteRosterRepository::try_new(conn)
        .unwrap()
        .get_student(id)
        .unwrap()
        .unwrap()
        .grade
}

#[test]
fn failed_cleanup_resumes_without_double_promotion() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);
    let service = ClosureService::new(
        SqliteRosterRepository::try_new(&conn).unwrap(),
        FlakyStore::new(&conn, ClosurePhase::Cleanup),
    );

    let mut events = Vec::new();
    let err = service
        .run_closure(&request(), &mut |event: &ProgressEvent| {
            events.push(event.clone())
        })
        .unwrap_err();
    match err {
        ClosureServiceError::PhaseFailed { phase, action, .. } => {
            assert_eq!(phase, ClosurePhase::Cleanup);
            assert_eq!(action, RecoveryAction::ReRunToContinue);
        }
        other => panic!("unexpected error: {other}"),
    }
    let last = events.last().unwrap();
    assert_eq!(last.status, PhaseStatus::Failed);
    assert!(last.error.is_some());

    assert_eq!(grade_of(&conn, "A"), "SEGUNDO");
    assert_eq!(
        service.closure_state(&year()).unwrap(),
        ClosureState::InProgress {
            completed: vec![
                ClosurePhase::Archive,
                ClosurePhase::Ledger,
                ClosurePhase::Promotion,
            ],
        }
    );
    assert!(service.store().current_lock(&year()).unwrap().is_none());

    let mut events = Vec::new();
    let report = service
        .run_closure(&request(), &mut |event: &ProgressEvent| {
            events.push((event.phase, event.status))
        })
        .unwrap();
    assert_eq!(
        events,
        vec![
            (ClosurePhase::Archive, PhaseStatus::Skipped),
            (ClosurePhase::Ledger, PhaseStatus::Skipped),
            (ClosurePhase::Promotion, PhaseStatus::Skipped),
            (ClosurePhase::Cleanup, PhaseStatus::Started),
            (ClosurePhase::Cleanup, PhaseStatus::Completed),
        ]
    );
    assert_eq!(report.ran, vec![ClosurePhase::Cleanup]);
    assert_eq!(report.record.description, "cierre de prueba");
    assert_eq!(grade_of(&conn, "A"), "SEGUNDO");
    assert_eq!(grade_of(&conn, "B"), "GRADUADO");
    assert!(matches!(
        service.closure_state(&year()).unwrap(),
        ClosureState::Closed { .. }
    ));
}

#[test]
fn failed_archive_leaves_year_open() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);
    let service = ClosureService::new(
        SqliteRosterRepository::try_new(&conn).unwrap(),
        FlakyStore::new(&conn, ClosurePhase::Archive),
    );

    assert!(matches!(
        service.run_closure(&request(), &mut |_: &ProgressEvent| {}),
        Err(ClosureServiceError::PhaseFailed {
            phase: ClosurePhase::Archive,
            ..
        })
    ));
    assert_eq!(service.closure_state(&year()).unwrap(), ClosureState::Open);
    assert_eq!(grade_of(&conn, "A"), "PRIMERO");

    let report = service
        .run_closure(&request(), &mut |_: &ProgressEvent| {})
        .unwrap();
    assert_eq!(report.ran, ClosurePhase::ORDER.to_vec());
    assert_eq!(report.record.statistics.total_students, 2);
}

#[test]
fn ledger_statistics_come_from_the_archive_on_resume() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);
    let service = ClosureService::new(
        SqliteRosterRepository::try_new(&conn).unwrap(),
        FlakyStore::new(&conn, ClosurePhase::Ledger),
    );
    assert!(service
        .run_closure(&request(), &mut |_: &ProgressEvent| {})
        .is_err());

    // A roster entry added after archiving is not part of the closed year.
    SqliteRosterRepository::try_new(&conn)
        .unwrap()
        .upsert_student(&Student::with_id("late", "TERCERO", "3A"))
        .unwrap();

    let err = service
        .run_closure(&request(), &mut |_: &ProgressEvent| {})
        .unwrap_err();
    match err {
        ClosureServiceError::PhaseFailed {
            phase,
            action,
            source,
        } => {
            assert_eq!(phase, ClosurePhase::Promotion);
            assert_eq!(action, RecoveryAction::ContactAdmin);
            assert!(matches!(source, ClosureRepoError::MissingArchiveCopy { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }

    let record = service.store().closure_record(&year()).unwrap().unwrap();
    assert_eq!(record.statistics.total_students, 2);
    assert_eq!(grade_of(&conn, "A"), "PRIMERO");
    assert_eq!(grade_of(&conn, "late"), "TERCERO");
}

#[test]
fn held_lock_rejects_a_second_run_until_released() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);
    let store = SqliteClosureRepository::try_new(&conn).unwrap();
    let held = store.acquire_lock(&year(), "otra-sesion").unwrap();

    let service = ClosureService::new(SqliteRosterRepository::try_new(&conn).unwrap(), store);
    match service
        .run_closure(&request(), &mut |_: &ProgressEvent| {})
        .unwrap_err()
    {
        ClosureServiceError::ClosureInProgress { lock } => {
            assert_eq!(lock.holder, "otra-sesion");
            assert_eq!(lock.token, held.token);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(grade_of(&conn, "A"), "PRIMERO");

    let removed = service.force_unlock("2024").unwrap().unwrap();
    assert_eq!(removed.token, held.token);
    assert!(service.force_unlock("2024").unwrap().is_none());

    service
        .run_closure(&request(), &mut |_: &ProgressEvent| {})
        .unwrap();
    assert_eq!(grade_of(&conn, "A"), "SEGUNDO");
}

#[test]
fn year_closed_by_another_session_before_locking_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("school.sqlite3");
    let conn = open_db(&path).unwrap();
    let rival = open_db(&path).unwrap();
    seed(&conn);

    let service = ClosureService::new(
        SqliteRosterRepository::try_new(&conn).unwrap(),
        FlakyStore::racing(&conn, &rival),
    );
    let mut events = Vec::new();
    match service
        .run_closure(&request(), &mut |event: &ProgressEvent| {
            events.push(event.clone())
        })
        .unwrap_err()
    {
        ClosureServiceError::AlreadyClosed { record } => {
            assert_eq!(record.closed_by, "otra-sesion");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(events.is_empty());
    assert!(service.store().current_lock(&year()).unwrap().is_none());
    assert_eq!(grade_of(&conn, "A"), "SEGUNDO");
    assert_eq!(grade_of(&conn, "B"), "GRADUADO");
    assert_eq!(service.closure_records().unwrap().len(), 1);
}

#[test]
fn lock_release_requires_the_owning_token() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteClosureRepository::try_new(&conn).unwrap();

    let lock = store.acquire_lock(&year(), "uno").unwrap();
    assert!(matches!(
        store.acquire_lock(&year(), "dos").unwrap_err(),
        ClosureRepoError::LockHeld(_)
    ));

    let mut forged = lock.clone();
    forged.token = uuid::Uuid::new_v4();
    assert!(matches!(
        store.release_lock(&forged).unwrap_err(),
        ClosureRepoError::LockNotOwned(_)
    ));

    store.release_lock(&lock).unwrap();
    assert!(store.current_lock(&year()).unwrap().is_none());
}

#[test]
fn phases_refuse_to_run_out_of_order_or_twice() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);
    let store = SqliteClosureRepository::try_new(&conn).unwrap();

    assert!(matches!(
        store.cleanup_year(&year()).unwrap_err(),
        ClosureRepoError::PhaseOutOfOrder {
            phase: ClosurePhase::Cleanup,
            missing: ClosurePhase::Promotion,
        }
    ));

    store.archive_live_collections(&year()).unwrap();
    assert!(matches!(
        store.archive_live_collections(&year()).unwrap_err(),
        ClosureRepoError::PhaseAlreadyCompleted(ClosurePhase::Archive)
    ));
    assert_eq!(
        store.completed_phases(&year()).unwrap(),
        vec![ClosurePhase::Archive]
    );
}

#[test]
fn stale_grade_fails_the_promotion_phase() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);
    let store = SqliteClosureRepository::try_new(&conn).unwrap();
    store.archive_live_collections(&year()).unwrap();
    store
        .record_closure(&ClosureRecord {
            year: year(),
            closed_at: 1,
            closed_by: "tester".to_string(),
            description: String::new(),
            statistics: Default::default(),
        })
        .unwrap();

    let roster = SqliteRosterRepository::try_new(&conn).unwrap();
    let plan = schoolyear_core::service::promotion::plan_promotions(&roster.list_students().unwrap());
    roster.upsert_student(&Student::with_id("A", "TERCERO", "3A")).unwrap();

    let err = store.apply_promotions(&year(), &plan).unwrap_err();
    assert!(matches!(err, ClosureRepoError::StaleStudent { ref id, .. } if id == "A"));
    assert!(err.is_transient());
    assert_eq!(grade_of(&conn, "B"), "QUINTO");
    assert_eq!(
        store.completed_phases(&year()).unwrap(),
        vec![ClosurePhase::Archive, ClosurePhase::Ledger]
    );
}

#[test]
fn legacy_ledger_entry_without_checkpoints_counts_as_closed() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO closure_ledger (academic_year, closed_at, closed_by, description, statistics)
         VALUES ('2019', 1, 'legacy', '', '{\"totalStudents\": 7}');",
        [],
    )
    .unwrap();
    let service = ClosureService::new(
        SqliteRosterRepository::try_new(&conn).unwrap(),
        SqliteClosureRepository::try_new(&conn).unwrap(),
    );

    let mut req = request();
    req.year = "2019".to_string();
    req.confirmation = "CERRAR AÑO 2019".to_string();
    match service
        .run_closure(&req, &mut |_: &ProgressEvent| {})
        .unwrap_err()
    {
        ClosureServiceError::AlreadyClosed { record } => {
            assert_eq!(record.closed_by, "legacy");
            assert_eq!(record.statistics.total_students, 7);
        }
        other => panic!("unexpected error: {other}"),
    }
}

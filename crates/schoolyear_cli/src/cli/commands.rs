//! Command implementations.
//!
//! Every command opens the database itself, so migrations always run before
//! any repository touches it.

use super::CliError;
use log::info;
use rusqlite::Connection;
use schoolyear_core::db::migrations::latest_version;
use schoolyear_core::db::schema_version;
use schoolyear_core::{
    confirm_closure, confirm_restore, open_db, AcademicYear, ArchiveRepository, ClosureLock,
    ClosurePhase, ClosureRecord, ClosureRequest, ClosureService, ClosureServiceError, ClosureState, ClosureStore,
    PhaseStatus, ProgressEvent, RosterRepository, RosterSnapshot, SqliteArchiveRepository,
    SqliteClosureRepository, SqliteRosterRepository,
};
use serde::Serialize;
use std::path::Path;

type Service<'conn> =
    ClosureService<SqliteRosterRepository<'conn>, SqliteClosureRepository<'conn>>;

fn build_service(conn: &Connection) -> Result<Service<'_>, CliError> {
    Ok(ClosureService::new(
        SqliteRosterRepository::try_new(conn)?,
        SqliteClosureRepository::try_new(conn)?,
    ))
}

fn parse_year(value: &str) -> Result<AcademicYear, CliError> {
    AcademicYear::parse(value)
        .map_err(|err| CliError::Closure(ClosureServiceError::InvalidYear(err)))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_epoch_ms(value: i64) -> String {
    format!("{value} (epoch ms)")
}

pub fn cmd_init(db: &Path, json: bool) -> Result<(), CliError> {
    let conn = open_db(db)?;
    let version = schema_version(&conn)?;

    if json {
        return print_json(&serde_json::json!({
            "database": db.display().to_string(),
            "schemaVersion": version,
            "latestVersion": latest_version(),
        }));
    }
    println!("database ready: {}", db.display());
    println!("schema version: {version}");
    Ok(())
}

pub fn cmd_import(db: &Path, json: bool, file: &Path) -> Result<(), CliError> {
    let text = std::fs::read_to_string(file).map_err(|source| CliError::Io {
        path: file.to_path_buf(),
        source,
    })?;
    let snapshot: RosterSnapshot = serde_json::from_str(&text)?;

    let conn = open_db(db)?;
    let repo = SqliteRosterRepository::try_new(&conn)?;
    let summary = repo.import_snapshot(&snapshot)?;
    info!(
        "event=cli_import module=cli status=ok file={}",
        file.display()
    );

    if json {
        return print_json(&summary);
    }
    println!(
        "imported {} students, {} workshops, {} attendance sessions",
        summary.students, summary.workshops, summary.attendance_sessions
    );
    Ok(())
}

pub fn cmd_preview(db: &Path, json: bool, year: &str) -> Result<(), CliError> {
    let conn = open_db(db)?;
    let service = build_service(&conn)?;
    let preview = service.preview(year)?;

    if json {
        return print_json(&preview);
    }
    let stats = &preview.statistics;
    println!("Academic year {}", preview.year);
    if preview.already_closed {
        println!("  status: already closed");
    } else if !preview.completed_phases.is_empty() {
        println!(
            "  status: interrupted after {}",
            phase_list(&preview.completed_phases)
        );
    }
    println!("  students:            {}", stats.total_students);
    println!("    to promote:        {}", stats.students_to_promote);
    println!("    to graduate:       {}", stats.students_to_graduate);
    println!("    already graduated: {}", stats.students_already_graduated);
    println!("    unknown grade:     {}", stats.students_with_unknown_grade);
    println!("  teachers:            {}", stats.total_teachers);
    println!("  admins:              {}", stats.total_admins);
    println!(
        "  attendance:          {} sessions, {} records",
        stats.total_attendance_sessions, stats.total_attendance_records
    );
    println!(
        "  workshops:           {} ({} active, {} enrollments)",
        stats.total_workshops, stats.active_workshops, stats.total_workshop_enrollments
    );
    println!();
    println!("To close, type exactly: {}", preview.confirmation_phrase);
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CloseOutput<'a> {
    events: &'a [ProgressEvent],
    report: &'a schoolyear_core::ClosureReport,
}

pub fn cmd_close(
    db: &Path,
    json: bool,
    year: String,
    confirmation: String,
    operator: String,
    description: Option<String>,
) -> Result<(), CliError> {
    confirm_closure(&year, &confirmation)?;
    let conn = open_db(db)?;
    let service = build_service(&conn)?;
    let request = ClosureRequest {
        year,
        confirmation,
        operator,
        description,
    };

    let mut events = Vec::new();
    let result = service.run_closure(&request, &mut |event: &ProgressEvent| {
        if !json {
            eprintln!("{}", describe_event(event));
        }
        events.push(event.clone());
    });
    let report = result?;

    if json {
        return print_json(&CloseOutput {
            events: &events,
            report: &report,
        });
    }
    if let Some(archived) = report.archived {
        println!(
            "archived {} students, {} workshops, {} attendance sessions",
            archived.students, archived.workshops, archived.attendance_sessions
        );
    }
    if let Some(promoted) = report.promoted {
        println!(
            "promoted {} students, graduated {}",
            promoted.promoted, promoted.graduated
        );
    }
    if let Some(cleaned) = report.cleaned {
        println!(
            "deleted {} attendance sessions, reset {} workshops",
            cleaned.attendance_sessions_deleted, cleaned.workshops_reset
        );
    }
    if !report.skipped.is_empty() {
        println!(
            "resumed; already done: {}",
            phase_list(&report.skipped)
        );
    }
    println!(
        "academic year {} closed by {}",
        report.record.year, report.record.closed_by
    );
    Ok(())
}

fn describe_event(event: &ProgressEvent) -> String {
    let status = match event.status {
        PhaseStatus::Started => "started",
        PhaseStatus::Completed => "done",
        PhaseStatus::Skipped => "skipped (already done)",
        PhaseStatus::Failed => "FAILED",
    };
    match event.error.as_deref() {
        Some(error) => format!("[{:>3}%] {} {status}: {error}", event.percent, event.phase),
        None => format!("[{:>3}%] {} {status}", event.percent, event.phase),
    }
}

fn phase_list(phases: &[ClosurePhase]) -> String {
    phases
        .iter()
        .map(|phase| phase.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusOutput {
    year: AcademicYear,
    state: &'static str,
    completed_phases: Vec<ClosurePhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<ClosureRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lock: Option<ClosureLock>,
}

pub fn cmd_status(db: &Path, json: bool, year: &str) -> Result<(), CliError> {
    let year = parse_year(year)?;
    let conn = open_db(db)?;
    let service = build_service(&conn)?;

    let state = service.closure_state(&year)?;
    let completed_phases = service.store().completed_phases(&year)?;
    let lock = service.store().current_lock(&year)?;
    let (label, record) = match state {
        ClosureState::Open => ("open", None),
        ClosureState::InProgress { .. } => ("in_progress", None),
        ClosureState::Closed { record } => ("closed", Some(record)),
    };
    let output = StatusOutput {
        year,
        state: label,
        completed_phases,
        record,
        lock,
    };

    if json {
        return print_json(&output);
    }
    println!("academic year {}: {}", output.year, output.state);
    if !output.completed_phases.is_empty() {
        println!("  completed phases: {}", phase_list(&output.completed_phases));
    }
    if let Some(record) = &output.record {
        println!(
            "  closed by {} at {}",
            record.closed_by,
            format_epoch_ms(record.closed_at)
        );
    }
    if let Some(lock) = &output.lock {
        println!(
            "  locked by {} since {} (use `unlock` if that run is gone)",
            lock.holder,
            format_epoch_ms(lock.acquired_at)
        );
    }
    Ok(())
}

pub fn cmd_ledger(db: &Path, json: bool) -> Result<(), CliError> {
    let conn = open_db(db)?;
    let service = build_service(&conn)?;
    let records = service.closure_records()?;

    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("no academic year has been closed");
        return Ok(());
    }
    for record in &records {
        println!(
            "{}  closed by {} at {}  students={}  {}",
            record.year,
            record.closed_by,
            format_epoch_ms(record.closed_at),
            record.statistics.total_students,
            record.description
        );
    }
    Ok(())
}

pub fn cmd_archive(db: &Path, json: bool, year: &str) -> Result<(), CliError> {
    let year = parse_year(year)?;
    let conn = open_db(db)?;
    let repo = SqliteArchiveRepository::try_new(&conn)?;
    let counts = repo.archive_counts(&year)?;

    if json {
        return print_json(&counts);
    }
    println!("archive {year}:");
    println!("  students:            {}", counts.students);
    println!("  workshops:           {}", counts.workshops);
    println!("  attendance sessions: {}", counts.attendance_sessions);
    Ok(())
}

pub fn cmd_restore(db: &Path, year: &str, confirmation: &str) -> Result<(), CliError> {
    confirm_restore(year, confirmation)?;
    let conn = open_db(db)?;
    let service = build_service(&conn)?;
    service.restore(year, confirmation)?;
    Ok(())
}

pub fn cmd_unlock(db: &Path, json: bool, year: &str) -> Result<(), CliError> {
    let conn = open_db(db)?;
    let service = build_service(&conn)?;
    let removed = service.force_unlock(year)?;

    if json {
        return print_json(&removed);
    }
    match removed {
        Some(lock) => println!(
            "removed lock held by {} since {}",
            lock.holder,
            format_epoch_ms(lock.acquired_at)
        ),
        None => println!("academic year {year} was not locked"),
    }
    Ok(())
}

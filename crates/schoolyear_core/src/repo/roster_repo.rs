//! Live roster repository: students, workshops and attendance sessions.
//!
//! # Responsibility
//! - Read the current-year collections the closure workflow consumes.
//! - Provide the write paths collaborators (and roster import) use to keep
//!   those collections populated.
//!
//! # Invariants
//! - Write paths call `validate()` before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.
//! - Listing order is deterministic (`id ASC`, sessions by `session_date, id`).

use crate::db::DbError;
use crate::model::attendance::{AttendanceRecord, AttendanceSession, AttendanceStatus};
use crate::model::snapshot::RosterSnapshot;
use crate::model::student::{Role, Student};
use crate::model::validation::ValidationError;
use crate::model::workshop::{Workshop, WorkshopStatus};
use crate::repo::ensure_connection_ready;
use log::info;
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use serde::Serialize;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

const STUDENT_SELECT_SQL: &str = "SELECT
    id,
    display_name,
    role,
    grade,
    section,
    graduated_year
FROM students";

const WORKSHOP_SELECT_SQL: &str = "SELECT
    id,
    name,
    status,
    max_participants,
    archived_year
FROM workshops";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by roster and archive persistence.
#[derive(Debug)]
pub enum RepoError {
    Validation(ValidationError),
    Db(DbError),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    InvalidData(String),
    Serialization(serde_json::Error),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Serialization(err) => write!(f, "payload serialization failed: {err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::UninitializedConnection { .. } => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Row counts written by one roster import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub students: usize,
    pub workshops: usize,
    pub attendance_sessions: usize,
}

/// Repository interface over the live collections.
pub trait RosterRepository {
    /// Inserts or replaces one roster entry.
    fn upsert_student(&self, student: &Student) -> RepoResult<()>;
    fn get_student(&self, id: &str) -> RepoResult<Option<Student>>;
    fn list_students(&self) -> RepoResult<Vec<Student>>;
    /// Inserts or replaces one workshop, including its participant set.
    fn upsert_workshop(&self, workshop: &Workshop) -> RepoResult<()>;
    fn get_workshop(&self, id: &str) -> RepoResult<Option<Workshop>>;
    fn list_workshops(&self) -> RepoResult<Vec<Workshop>>;
    /// Inserts or replaces one attendance session and all of its records.
    fn upsert_attendance_session(&self, session: &AttendanceSession) -> RepoResult<()>;
    fn list_attendance_sessions(&self) -> RepoResult<Vec<AttendanceSession>>;
    fn count_attendance_sessions(&self) -> RepoResult<u64>;
    /// Writes a whole snapshot in one transaction.
    fn import_snapshot(&self, snapshot: &RosterSnapshot) -> RepoResult<ImportSummary>;

    /// Reads all three collections.
    fn load_snapshot(&self) -> RepoResult<RosterSnapshot> {
        Ok(RosterSnapshot {
            students: self.list_students()?,
            workshops: self.list_workshops()?,
            attendance_sessions: self.list_attendance_sessions()?,
        })
    }
}

/// SQLite-backed roster repository.
pub struct SqliteRosterRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRosterRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl RosterRepository for SqliteRosterRepository<'_> {
    fn upsert_student(&self, student: &Student) -> RepoResult<()> {
        write_student(self.conn, student)
    }

    fn get_student(&self, id: &str) -> RepoResult<Option<Student>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{STUDENT_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_student_row(row)?));
        }
        Ok(None)
    }

    fn list_students(&self) -> RepoResult<Vec<Student>> {
        load_students(self.conn)
    }

    fn upsert_workshop(&self, workshop: &Workshop) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        write_workshop(&tx, workshop)?;
        tx.commit()?;
        Ok(())
    }

    fn get_workshop(&self, id: &str) -> RepoResult<Option<Workshop>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{WORKSHOP_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_workshop_row(self.conn, row)?));
        }
        Ok(None)
    }

    fn list_workshops(&self) -> RepoResult<Vec<Workshop>> {
        load_workshops(self.conn)
    }

    fn upsert_attendance_session(&self, session: &AttendanceSession) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        write_attendance_session(&tx, session)?;
        tx.commit()?;
        Ok(())
    }

    fn list_attendance_sessions(&self) -> RepoResult<Vec<AttendanceSession>> {
        load_attendance_sessions(self.conn)
    }

    fn count_attendance_sessions(&self) -> RepoResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM attendance_sessions;", [], |row| {
                    row.get(0)
                })?;
        Ok(count as u64)
    }

    fn import_snapshot(&self, snapshot: &RosterSnapshot) -> RepoResult<ImportSummary> {
        snapshot.validate()?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        for student in &snapshot.students {
            write_student(&tx, student)?;
        }
        for workshop in &snapshot.workshops {
            write_workshop(&tx, workshop)?;
        }
        for session in &snapshot.attendance_sessions {
            write_attendance_session(&tx, session)?;
        }
        tx.commit()?;

        let summary = ImportSummary {
            students: snapshot.students.len(),
            workshops: snapshot.workshops.len(),
            attendance_sessions: snapshot.attendance_sessions.len(),
        };
        info!(
            "event=roster_import module=repo status=ok students={} workshops={} attendance_sessions={}",
            summary.students, summary.workshops, summary.attendance_sessions
        );
        Ok(summary)
    }
}

pub(crate) fn load_students(conn: &Connection) -> RepoResult<Vec<Student>> {
    let mut stmt = conn.prepare(&format!("{STUDENT_SELECT_SQL} ORDER BY id ASC;"))?;
    let mut rows = stmt.query([])?;
    let mut students = Vec::new();
    while let Some(row) = rows.next()? {
        students.push(parse_student_row(row)?);
    }
    Ok(students)
}

pub(crate) fn load_workshops(conn: &Connection) -> RepoResult<Vec<Workshop>> {
    let mut stmt = conn.prepare(&format!("{WORKSHOP_SELECT_SQL} ORDER BY id ASC;"))?;
    let mut rows = stmt.query([])?;
    let mut workshops = Vec::new();
    while let Some(row) = rows.next()? {
        workshops.push(parse_workshop_row(conn, row)?);
    }
    Ok(workshops)
}

pub(crate) fn load_attendance_sessions(conn: &Connection) -> RepoResult<Vec<AttendanceSession>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_date, grade, section
         FROM attendance_sessions
         ORDER BY session_date ASC, id ASC;",
    )?;
    let mut rows = stmt.query([])?;
    let mut sessions = Vec::new();
    while let Some(row) = rows.next()? {
        let id: String = row.get("id")?;
        let records = load_attendance_records(conn, &id)?;
        sessions.push(AttendanceSession {
            id,
            date: row.get("session_date")?,
            grade: row.get("grade")?,
            section: row.get("section")?,
            records,
        });
    }
    Ok(sessions)
}

pub(crate) fn load_snapshot(conn: &Connection) -> RepoResult<RosterSnapshot> {
    Ok(RosterSnapshot {
        students: load_students(conn)?,
        workshops: load_workshops(conn)?,
        attendance_sessions: load_attendance_sessions(conn)?,
    })
}

fn write_student(conn: &Connection, student: &Student) -> RepoResult<()> {
    student.validate()?;

    conn.execute(
        "INSERT INTO students (
            id,
            display_name,
            role,
            grade,
            section,
            graduated_year
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT (id) DO UPDATE SET
            display_name = excluded.display_name,
            role = excluded.role,
            grade = excluded.grade,
            section = excluded.section,
            graduated_year = excluded.graduated_year,
            updated_at = (strftime('%s', 'now') * 1000);",
        params![
            student.id.as_str(),
            student.display_name.as_str(),
            student.role.as_str(),
            student.grade.as_str(),
            student.section.as_str(),
            student.graduated_year.as_deref(),
        ],
    )?;
    Ok(())
}

fn write_workshop(conn: &Connection, workshop: &Workshop) -> RepoResult<()> {
    workshop.validate()?;

    conn.execute(
        "INSERT INTO workshops (
            id,
            name,
            status,
            max_participants,
            archived_year
        ) VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT (id) DO UPDATE SET
            name = excluded.name,
            status = excluded.status,
            max_participants = excluded.max_participants,
            archived_year = excluded.archived_year,
            updated_at = (strftime('%s', 'now') * 1000);",
        params![
            workshop.id.as_str(),
            workshop.name.as_str(),
            workshop.status.as_str(),
            workshop.max_participants,
            workshop.archived_year.as_deref(),
        ],
    )?;

    conn.execute(
        "DELETE FROM workshop_participants WHERE workshop_id = ?1;",
        [workshop.id.as_str()],
    )?;
    for student_id in &workshop.participants {
        conn.execute(
            "INSERT INTO workshop_participants (workshop_id, student_id) VALUES (?1, ?2);",
            params![workshop.id.as_str(), student_id.as_str()],
        )?;
    }
    Ok(())
}

fn write_attendance_session(conn: &Connection, session: &AttendanceSession) -> RepoResult<()> {
    session.validate()?;

    conn.execute(
        "INSERT INTO attendance_sessions (id, session_date, grade, section)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (id) DO UPDATE SET
            session_date = excluded.session_date,
            grade = excluded.grade,
            section = excluded.section;",
        params![
            session.id.as_str(),
            session.date.as_str(),
            session.grade.as_str(),
            session.section.as_str(),
        ],
    )?;

    conn.execute(
        "DELETE FROM attendance_records WHERE session_id = ?1;",
        [session.id.as_str()],
    )?;
    for (index, record) in session.records.iter().enumerate() {
        conn.execute(
            "INSERT INTO attendance_records (session_id, record_index, student_id, status)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                session.id.as_str(),
                index as i64,
                record.student_id.as_str(),
                record.status.as_str(),
            ],
        )?;
    }
    Ok(())
}

fn parse_student_row(row: &Row<'_>) -> RepoResult<Student> {
    let role_text: String = row.get("role")?;
    let role = Role::parse(&role_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid role `{role_text}` in students.role"))
    })?;

    let student = Student {
        id: row.get("id")?,
        display_name: row.get("display_name")?,
        role,
        grade: row.get("grade")?,
        section: row.get("section")?,
        graduated_year: row.get("graduated_year")?,
    };
    student.validate()?;
    Ok(student)
}

fn parse_workshop_row(conn: &Connection, row: &Row<'_>) -> RepoResult<Workshop> {
    let id: String = row.get("id")?;
    let status_text: String = row.get("status")?;
    let status = WorkshopStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid workshop status `{status_text}` in workshops.status"
        ))
    })?;

    let max_participants = match row.get::<_, Option<i64>>("max_participants")? {
        Some(value) => Some(u32::try_from(value).map_err(|_| {
            RepoError::InvalidData(format!(
                "invalid max_participants `{value}` for workshop {id}"
            ))
        })?),
        None => None,
    };

    let participants = load_participants(conn, &id)?;
    let workshop = Workshop {
        id,
        name: row.get("name")?,
        status,
        participants,
        max_participants,
        archived_year: row.get("archived_year")?,
    };
    workshop.validate()?;
    Ok(workshop)
}

fn load_participants(conn: &Connection, workshop_id: &str) -> RepoResult<BTreeSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT student_id
         FROM workshop_participants
         WHERE workshop_id = ?1
         ORDER BY student_id ASC;",
    )?;
    let mut rows = stmt.query([workshop_id])?;
    let mut participants = BTreeSet::new();
    while let Some(row) = rows.next()? {
        participants.insert(row.get::<_, String>(0)?);
    }
    Ok(participants)
}

fn load_attendance_records(
    conn: &Connection,
    session_id: &str,
) -> RepoResult<Vec<AttendanceRecord>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, status
         FROM attendance_records
         WHERE session_id = ?1
         ORDER BY record_index ASC;",
    )?;
    let mut rows = stmt.query([session_id])?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let status_text: String = row.get("status")?;
        let status = AttendanceStatus::parse(&status_text).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid attendance status `{status_text}` in attendance_records.status"
            ))
        })?;
        records.push(AttendanceRecord {
            student_id: row.get("student_id")?,
            status,
        });
    }
    Ok(records)
}

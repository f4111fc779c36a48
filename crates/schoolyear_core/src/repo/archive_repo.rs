//! Year-scoped archive namespace.
//!
//! # Responsibility
//! - Store immutable JSON copies of live entities keyed by (year, id).
//! - Read archived copies back for audits and manual recovery.
//!
//! # Invariants
//! - Archive rows are write-once; the schema aborts UPDATE and DELETE.
//! - Rows are only inserted by the archive phase of the closure workflow.

use crate::model::attendance::AttendanceSession;
use crate::model::closure::AcademicYear;
use crate::model::student::Student;
use crate::model::workshop::Workshop;
use crate::repo::ensure_connection_ready;
use crate::repo::roster_repo::{RepoError, RepoResult};
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Entity family stored in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    Student,
    Workshop,
    AttendanceSession,
}

impl ArchiveKind {
    fn table(self) -> &'static str {
        match self {
            Self::Student => "archived_students",
            Self::Workshop => "archived_workshops",
            Self::AttendanceSession => "archived_attendance_sessions",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Workshop => "workshop",
            Self::AttendanceSession => "attendance session",
        }
    }
}

/// Number of archived copies per entity family for one year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveCounts {
    pub students: u64,
    pub workshops: u64,
    pub attendance_sessions: u64,
}

impl ArchiveCounts {
    pub fn total(&self) -> u64 {
        self.students + self.workshops + self.attendance_sessions
    }
}

/// Read access to archived copies.
pub trait ArchiveRepository {
    fn archived_students(&self, year: &AcademicYear) -> RepoResult<Vec<Student>>;
    fn archived_workshops(&self, year: &AcademicYear) -> RepoResult<Vec<Workshop>>;
    fn archived_attendance_sessions(
        &self,
        year: &AcademicYear,
    ) -> RepoResult<Vec<AttendanceSession>>;
    fn archive_counts(&self, year: &AcademicYear) -> RepoResult<ArchiveCounts>;
    /// Years with at least one archived student, newest first.
    fn archived_years(&self) -> RepoResult<Vec<AcademicYear>>;
}

/// SQLite-backed archive reader.
pub struct SqliteArchiveRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteArchiveRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl ArchiveRepository for SqliteArchiveRepository<'_> {
    fn archived_students(&self, year: &AcademicYear) -> RepoResult<Vec<Student>> {
        load_payloads(self.conn, ArchiveKind::Student, year)
    }

    fn archived_workshops(&self, year: &AcademicYear) -> RepoResult<Vec<Workshop>> {
        load_payloads(self.conn, ArchiveKind::Workshop, year)
    }

    fn archived_attendance_sessions(
        &self,
        year: &AcademicYear,
    ) -> RepoResult<Vec<AttendanceSession>> {
        load_payloads(self.conn, ArchiveKind::AttendanceSession, year)
    }

    fn archive_counts(&self, year: &AcademicYear) -> RepoResult<ArchiveCounts> {
        count_archive(self.conn, year)
    }

    fn archived_years(&self) -> RepoResult<Vec<AcademicYear>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT academic_year
             FROM archived_students
             ORDER BY academic_year DESC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut years = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            years.push(AcademicYear::parse(&value).map_err(|_| {
                RepoError::InvalidData(format!(
                    "invalid academic year `{value}` in archived_students.academic_year"
                ))
            })?);
        }
        Ok(years)
    }
}

pub(crate) fn insert_archive_row<T: Serialize>(
    conn: &Connection,
    kind: ArchiveKind,
    year: &AcademicYear,
    id: &str,
    value: &T,
) -> RepoResult<()> {
    let payload = serde_json::to_string(value)?;
    conn.execute(
        &format!(
            "INSERT INTO {} (academic_year, id, payload) VALUES (?1, ?2, ?3);",
            kind.table()
        ),
        params![year.as_str(), id, payload],
    )?;
    Ok(())
}

pub(crate) fn has_archive_row(
    conn: &Connection,
    kind: ArchiveKind,
    year: &AcademicYear,
    id: &str,
) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        &format!(
            "SELECT EXISTS(
                SELECT 1 FROM {} WHERE academic_year = ?1 AND id = ?2
            );",
            kind.table()
        ),
        params![year.as_str(), id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

pub(crate) fn count_archive(conn: &Connection, year: &AcademicYear) -> RepoResult<ArchiveCounts> {
    Ok(ArchiveCounts {
        students: count_rows(conn, ArchiveKind::Student, year)?,
        workshops: count_rows(conn, ArchiveKind::Workshop, year)?,
        attendance_sessions: count_rows(conn, ArchiveKind::AttendanceSession, year)?,
    })
}

pub(crate) fn load_payloads<T: DeserializeOwned>(
    conn: &Connection,
    kind: ArchiveKind,
    year: &AcademicYear,
) -> RepoResult<Vec<T>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, payload FROM {} WHERE academic_year = ?1 ORDER BY id ASC;",
        kind.table()
    ))?;
    let mut rows = stmt.query([year.as_str()])?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let payload: String = row.get(1)?;
        let item = serde_json::from_str(&payload).map_err(|err| {
            RepoError::InvalidData(format!(
                "archived {} {id} for {year} is not valid JSON: {err}",
                kind.label()
            ))
        })?;
        items.push(item);
    }
    Ok(items)
}

fn count_rows(conn: &Connection, kind: ArchiveKind, year: &AcademicYear) -> RepoResult<u64> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE academic_year = ?1;",
            kind.table()
        ),
        [year.as_str()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

//! Attendance session model.
//!
//! # Invariants
//! - `date` is an ISO calendar date (`YYYY-MM-DD`).
//! - `records` keep the order in which they were taken; the same student may
//!   appear more than once.

use crate::model::student::StudentId;
use crate::model::validation::{ensure_id, is_session_date, ValidationError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AttendanceSessionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
            Self::Excused => "excused",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            "late" => Some(Self::Late),
            "excused" => Some(Self::Excused),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub student_id: StudentId,
    pub status: AttendanceStatus,
}

/// One roll call for a grade/section on a given day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSession {
    pub id: AttendanceSessionId,
    pub date: String,
    #[serde(default)]
    pub grade: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub records: Vec<AttendanceRecord>,
}

impl AttendanceSession {
    /// Creates an empty session with a generated id.
    pub fn new(
        date: impl Into<String>,
        grade: impl Into<String>,
        section: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            date: date.into(),
            grade: grade.into(),
            section: section.into(),
            records: Vec::new(),
        }
    }

    pub fn push_record(&mut self, student_id: impl Into<StudentId>, status: AttendanceStatus) {
        self.records.push(AttendanceRecord {
            student_id: student_id.into(),
            status,
        });
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ensure_id("attendance session", &self.id)?;
        if !is_session_date(&self.date) {
            return Err(ValidationError::InvalidSessionDate {
                session_id: self.id.clone(),
                date: self.date.clone(),
            });
        }
        Ok(())
    }
}

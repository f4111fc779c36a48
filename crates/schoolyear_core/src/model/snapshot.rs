//! In-memory view of the live collections at one point in time.

use crate::model::attendance::AttendanceSession;
use crate::model::student::Student;
use crate::model::validation::ValidationError;
use crate::model::workshop::Workshop;
use serde::{Deserialize, Serialize};

/// Live students, workshops and attendance sessions as read together.
///
/// Also the JSON shape accepted by roster import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterSnapshot {
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default)]
    pub workshops: Vec<Workshop>,
    #[serde(default)]
    pub attendance_sessions: Vec<AttendanceSession>,
}

impl RosterSnapshot {
    /// Roster entries with `role = student`.
    pub fn enrolled_students(&self) -> impl Iterator<Item = &Student> {
        self.students.iter().filter(|student| student.is_student())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for student in &self.students {
            student.validate()?;
        }
        for workshop in &self.workshops {
            workshop.validate()?;
        }
        for session in &self.attendance_sessions {
            session.validate()?;
        }
        Ok(())
    }
}

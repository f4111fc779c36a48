//! Closure workflow vocabulary.
//!
//! # Responsibility
//! - Name the academic year being closed and the ordered closure phases.
//! - Define ledger records, statistics snapshots, lock rows and progress
//!   events shared by repositories, services and the CLI.
//!
//! # Invariants
//! - Phases run in [`ClosurePhase::ORDER`]; a phase never runs before every
//!   earlier phase has a checkpoint.
//! - [`ClosureStatistics`] serializes with camelCase keys (`totalStudents`).

use crate::model::grade::Promotion;
use crate::model::student::StudentId;
use crate::model::validation::{is_academic_year, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Validated four-digit academic year token, e.g. `2024`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AcademicYear(String);

impl AcademicYear {
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        if !is_academic_year(value) {
            return Err(ValidationError::InvalidAcademicYear(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AcademicYear {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AcademicYear {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AcademicYear> for String {
    fn from(value: AcademicYear) -> Self {
        value.0
    }
}

/// One grouped write of the closure workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosurePhase {
    /// Copy live entities into the year archive.
    Archive,
    /// Write the closure ledger entry.
    Ledger,
    /// Advance or graduate students.
    Promotion,
    /// Delete attendance sessions and reset workshops.
    Cleanup,
}

impl ClosurePhase {
    pub const ORDER: [ClosurePhase; 4] = [
        ClosurePhase::Archive,
        ClosurePhase::Ledger,
        ClosurePhase::Promotion,
        ClosurePhase::Cleanup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::Ledger => "ledger",
            Self::Promotion => "promotion",
            Self::Cleanup => "cleanup",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ORDER.into_iter().find(|phase| phase.as_str() == value)
    }

    /// Zero-based position in [`Self::ORDER`].
    pub fn position(self) -> usize {
        match self {
            Self::Archive => 0,
            Self::Ledger => 1,
            Self::Promotion => 2,
            Self::Cleanup => 3,
        }
    }

    /// Overall progress once this phase has finished.
    pub fn percent_when_done(self) -> u8 {
        let done = self.position() + 1;
        (done * 100 / Self::ORDER.len()) as u8
    }
}

impl Display for ClosurePhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts derived from the live collections before closure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClosureStatistics {
    pub total_students: u64,
    pub students_to_promote: u64,
    pub students_to_graduate: u64,
    pub students_already_graduated: u64,
    pub students_with_unknown_grade: u64,
    pub total_teachers: u64,
    pub total_admins: u64,
    pub total_attendance_sessions: u64,
    pub total_attendance_records: u64,
    pub active_workshops: u64,
    pub total_workshops: u64,
    pub total_workshop_enrollments: u64,
}

/// Closure ledger entry. At most one per academic year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureRecord {
    pub year: AcademicYear,
    /// Unix epoch milliseconds.
    pub closed_at: i64,
    pub closed_by: String,
    pub description: String,
    pub statistics: ClosureStatistics,
}

/// Row guarding a year against concurrent closure runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureLock {
    pub year: AcademicYear,
    pub token: Uuid,
    pub holder: String,
    /// Unix epoch milliseconds.
    pub acquired_at: i64,
}

/// One planned student mutation for the promotion phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentPromotion {
    pub student_id: StudentId,
    /// Grade token as read; the update only applies while it still matches.
    pub previous_grade: String,
    pub outcome: Promotion,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionSummary {
    pub promoted: u64,
    pub graduated: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    pub attendance_sessions_deleted: u64,
    pub workshops_reset: u64,
}

/// Where a year stands in the closure workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClosureState {
    /// No ledger entry and no checkpoints.
    Open,
    /// Some phases committed; a re-run resumes after the last one.
    InProgress { completed: Vec<ClosurePhase> },
    /// Closure finished (or a ledger entry predates checkpoints).
    Closed { record: ClosureRecord },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Started,
    Completed,
    /// Checkpoint already present from an earlier run.
    Skipped,
    Failed,
}

/// Typed progress notification emitted by the closure orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub phase: ClosurePhase,
    pub status: PhaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Overall progress, 0..=100.
    pub percent: u8,
}

impl ProgressEvent {
    pub fn new(phase: ClosurePhase, status: PhaseStatus) -> Self {
        let percent = match status {
            PhaseStatus::Completed | PhaseStatus::Skipped => phase.percent_when_done(),
            PhaseStatus::Started | PhaseStatus::Failed => {
                (phase.position() * 100 / ClosurePhase::ORDER.len()) as u8
            }
        };
        Self {
            phase,
            status,
            error: None,
            percent,
        }
    }

    pub fn failed(phase: ClosurePhase, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(phase, PhaseStatus::Failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AcademicYear, ClosurePhase, ClosureStatistics, PhaseStatus, ProgressEvent};

    #[test]
    fn academic_year_rejects_free_text() {
        assert!(AcademicYear::parse("2024").is_ok());
        assert!(AcademicYear::parse("año 2024").is_err());
    }

    #[test]
    fn phase_order_matches_positions() {
        for (index, phase) in ClosurePhase::ORDER.into_iter().enumerate() {
            assert_eq!(phase.position(), index);
            assert_eq!(ClosurePhase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(ClosurePhase::Cleanup.percent_when_done(), 100);
    }

    #[test]
    fn progress_percent_tracks_phase() {
        assert_eq!(
            ProgressEvent::new(ClosurePhase::Archive, PhaseStatus::Started).percent,
            0
        );
        assert_eq!(
            ProgressEvent::new(ClosurePhase::Ledger, PhaseStatus::Completed).percent,
            50
        );
        let failed = ProgressEvent::failed(ClosurePhase::Promotion, "disk full");
        assert_eq!(failed.percent, 50);
        assert_eq!(failed.error.as_deref(), Some("disk full"));
    }

    #[test]
    fn statistics_serialize_with_camel_case_keys() {
        let stats = ClosureStatistics {
            total_students: 3,
            ..ClosureStatistics::default()
        };
        let json = serde_json::to_value(stats).expect("statistics json");
        assert_eq!(json["totalStudents"], 3);
        assert_eq!(json["activeWorkshops"], 0);
    }
}

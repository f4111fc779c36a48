//! Roster member model.
//!
//! # Responsibility
//! - Describe one roster entry as read from the user collaborator.
//! - Distinguish students (promoted at year end) from staff (counted only).
//!
//! # Invariants
//! - `grade` keeps the token exactly as stored; see [`crate::model::grade`].
//! - An empty `section` means "awaiting assignment in the new grade".

use crate::model::grade::Grade;
use crate::model::validation::{ensure_id, ValidationError};
use serde::{Deserialize, Serialize};

pub type StudentId = String;

/// Roster role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Teacher => "teacher",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "student" => Some(Self::Student),
            "teacher" => Some(Self::Teacher),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// One roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: StudentId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub grade: String,
    #[serde(default)]
    pub section: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graduated_year: Option<String>,
}

impl Student {
    /// Creates a student with a caller-provided id.
    ///
    /// Used by import paths where identity already exists in the roster.
    pub fn with_id(
        id: impl Into<StudentId>,
        grade: impl Into<String>,
        section: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: String::new(),
            role: Role::Student,
            grade: grade.into(),
            section: section.into(),
            graduated_year: None,
        }
    }

    /// Creates a staff entry. Staff carry no grade or section.
    pub fn staff(id: impl Into<StudentId>, role: Role) -> Self {
        Self {
            role,
            ..Self::with_id(id, "", "")
        }
    }

    pub fn is_student(&self) -> bool {
        self.role == Role::Student
    }

    /// Ladder position of the stored token, if recognized.
    pub fn ladder_grade(&self) -> Option<Grade> {
        Grade::parse(&self.grade)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ensure_id("student", &self.id)
    }
}

//! Workshop model.

use crate::model::student::StudentId;
use crate::model::validation::{ensure_id, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type WorkshopId = String;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkshopStatus {
    #[default]
    Active,
    Inactive,
}

impl WorkshopStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

/// Workshop with its enrolled students.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workshop {
    pub id: WorkshopId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: WorkshopStatus,
    /// Enrolled student ids. Not checked against the roster.
    #[serde(default)]
    pub participants: BTreeSet<StudentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_participants: Option<u32>,
    /// Year of the closure that deactivated this workshop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_year: Option<String>,
}

impl Workshop {
    /// Creates an active workshop with no participants.
    pub fn with_id(id: impl Into<WorkshopId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: WorkshopStatus::Active,
            participants: BTreeSet::new(),
            max_participants: None,
            archived_year: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == WorkshopStatus::Active
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ensure_id("workshop", &self.id)?;
        if self.max_participants == Some(0) {
            return Err(ValidationError::ZeroCapacity(self.id.clone()));
        }
        Ok(())
    }
}

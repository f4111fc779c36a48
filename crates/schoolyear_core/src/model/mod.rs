//! Domain model for the school roster and the year-end closure workflow.
//!
//! # Responsibility
//! - Define the live entities read from collaborators (students, workshops,
//!   attendance sessions).
//! - Define the closure vocabulary: academic years, grade ladder, phases,
//!   ledger records and progress events.
//!
//! # Invariants
//! - Entities are identified by stable string ids assigned by the owning
//!   collaborator.
//! - Grade tokens are stored verbatim; interpretation goes through
//!   [`grade::Grade::parse`].

pub mod attendance;
pub mod closure;
pub mod grade;
pub mod snapshot;
pub mod student;
pub mod validation;
pub mod workshop;

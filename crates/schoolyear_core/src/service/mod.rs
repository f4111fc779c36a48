//! Closure use-case services.
//!
//! # Responsibility
//! - Derive statistics and promotion plans from roster snapshots.
//! - Gate destructive operations behind typed confirmation phrases.
//! - Orchestrate the phased closure workflow over repository contracts.

pub mod closure_service;
pub mod confirmation;
pub mod promotion;
pub mod statistics;

//! Statistics aggregation over roster snapshots.
//!
//! # Invariants
//! - Pure: the same snapshot always yields the same statistics.
//! - Empty collections count as zero.

use crate::model::closure::ClosureStatistics;
use crate::model::grade::{resolve_promotion, Grade, Promotion};
use crate::model::snapshot::RosterSnapshot;
use crate::model::student::Role;

/// Counts what a closure of `snapshot` would archive, promote and reset.
pub fn compute_statistics(snapshot: &RosterSnapshot) -> ClosureStatistics {
    let mut stats = ClosureStatistics::default();

    for entry in &snapshot.students {
        match entry.role {
            Role::Teacher => stats.total_teachers += 1,
            Role::Admin => stats.total_admins += 1,
            Role::Student => {
                stats.total_students += 1;
                match resolve_promotion(&entry.grade) {
                    Promotion::Advance(_) => stats.students_to_promote += 1,
                    Promotion::Graduate => stats.students_to_graduate += 1,
                    Promotion::Unchanged => {
                        if entry.ladder_grade() == Some(Grade::Graduado) {
                            stats.students_already_graduated += 1;
                        } else {
                            stats.students_with_unknown_grade += 1;
                        }
                    }
                }
            }
        }
    }

    stats.total_attendance_sessions = snapshot.attendance_sessions.len() as u64;
    stats.total_attendance_records = snapshot
        .attendance_sessions
        .iter()
        .map(|session| session.records.len() as u64)
        .sum();

    stats.total_workshops = snapshot.workshops.len() as u64;
    for workshop in &snapshot.workshops {
        if workshop.is_active() {
            stats.active_workshops += 1;
        }
        stats.total_workshop_enrollments += workshop.participants.len() as u64;
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::compute_statistics;
    use crate::model::closure::ClosureStatistics;
    use crate::model::attendance::{AttendanceSession, AttendanceStatus};
    use crate::model::snapshot::RosterSnapshot;
    use crate::model::student::{Role, Student};
    use crate::model::workshop::{Workshop, WorkshopStatus};

    #[test]
    fn empty_snapshot_counts_zero() {
        let stats = compute_statistics(&RosterSnapshot::default());
        assert_eq!(stats, ClosureStatistics::default());
    }

    #[test]
    fn counts_students_staff_sessions_and_workshops() {
        let mut session = AttendanceSession::new("2024-11-04", "PRIMERO", "1A");
        session.push_record("a", AttendanceStatus::Present);
        session.push_record("b", AttendanceStatus::Late);

        let mut active = Workshop::with_id("w-1", "Robotics");
        active.participants.insert("a".to_string());
        active.participants.insert("b".to_string());
        let mut closed = Workshop::with_id("w-2", "Chess");
        closed.status = WorkshopStatus::Inactive;

        let snapshot = RosterSnapshot {
            students: vec![
                Student::with_id("a", "primero", "1A"),
                Student::with_id("b", "QUINTO", "5B"),
                Student::with_id("c", "GRADUADO", ""),
                Student::with_id("d", "SEXTO", "6A"),
                Student::staff("t", Role::Teacher),
                Student::staff("x", Role::Admin),
            ],
            workshops: vec![active, closed],
            attendance_sessions: vec![session],
        };

        let stats = compute_statistics(&snapshot);
        assert_eq!(stats.total_students, 4);
        assert_eq!(stats.students_to_promote, 1);
        assert_eq!(stats.students_to_graduate, 1);
        assert_eq!(stats.students_already_graduated, 1);
        assert_eq!(stats.students_with_unknown_grade, 1);
        assert_eq!(stats.total_teachers, 1);
        assert_eq!(stats.total_admins, 1);
        assert_eq!(stats.total_attendance_sessions, 1);
        assert_eq!(stats.total_attendance_records, 2);
        assert_eq!(stats.active_workshops, 1);
        assert_eq!(stats.total_workshops, 2);
        assert_eq!(stats.total_workshop_enrollments, 2);
    }
}

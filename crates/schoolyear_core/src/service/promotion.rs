//! Promotion planning.
//!
//! Turns the live roster into the list of grade changes the promotion phase
//! applies. Staff entries and `Unchanged` outcomes are left out, so the plan
//! only names records that will actually be written.

use crate::model::closure::StudentPromotion;
use crate::model::grade::{resolve_promotion, Promotion};
use crate::model::student::Student;

pub fn plan_promotions(students: &[Student]) -> Vec<StudentPromotion> {
    students
        .iter()
        .filter(|student| student.is_student())
        .filter_map(|student| match resolve_promotion(&student.grade) {
            Promotion::Unchanged => None,
            outcome => Some(StudentPromotion {
                student_id: student.id.clone(),
                previous_grade: student.grade.clone(),
                outcome,
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::plan_promotions;
    use crate::model::grade::{Grade, Promotion};
    use crate::model::student::{Role, Student};

    #[test]
    fn plan_skips_staff_graduates_and_unknown_tokens() {
        let students = vec![
            Student::with_id("a", "Primero", "1A"),
            Student::with_id("b", "QUINTO", "5B"),
            Student::with_id("c", "GRADUADO", ""),
            Student::with_id("d", "kinder", "K"),
            Student::staff("t", Role::Teacher),
        ];

        let plan = plan_promotions(&students);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].student_id, "a");
        assert_eq!(plan[0].previous_grade, "Primero");
        assert_eq!(plan[0].outcome, Promotion::Advance(Grade::Segundo));
        assert_eq!(plan[1].outcome, Promotion::Graduate);
    }
}

//! Aggregated fee position of one student.

use super::assignment::AssignmentStatus;
use super::structure::{FeeStructure, OptionalSemester, Semester};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// One live assignment reduced to what the summary needs.
#[derive(Debug, Clone, FromRow)]
pub struct SummaryRow {
    #[sqlx(try_from = "Option<String>")]
    pub semester: OptionalSemester,
    pub is_mandatory: bool,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub pending_amount: Decimal,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeeTotals {
    pub count: i64,
    pub overdue_count: i64,
    pub total: Decimal,
    pub paid: Decimal,
    pub pending: Decimal,
}

impl FeeTotals {
    fn add(&mut self, row: &SummaryRow, today: NaiveDate) {
        self.count += 1;
        self.total += row.total_amount;
        self.paid += row.paid_amount;
        self.pending += row.pending_amount;
        if AssignmentStatus::derive(row.paid_amount, row.pending_amount, row.due_date, today)
            == AssignmentStatus::Overdue
        {
            self.overdue_count += 1;
        }
    }

    fn merge(&mut self, other: &FeeTotals) {
        self.count += other.count;
        self.overdue_count += other.overdue_count;
        self.total += other.total;
        self.paid += other.paid;
        self.pending += other.pending;
    }
}

/// Totals for one semester. `semester: None` groups the structures that
/// span both semesters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SemesterSummary {
    pub semester: Option<Semester>,
    pub mandatory: FeeTotals,
    pub optional: FeeTotals,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeeSummary {
    pub student_id: Uuid,
    pub mandatory: FeeTotals,
    pub optional: FeeTotals,
    pub grand_total: FeeTotals,
    pub semesters: Vec<SemesterSummary>,
    /// Optional structures in the student's scope not yet taken up.
    pub available_optional: Vec<FeeStructure>,
}

impl FeeSummary {
    /// Fold live assignments into per-semester and overall totals.
    pub fn from_rows(
        student_id: Uuid,
        rows: &[SummaryRow],
        available_optional: Vec<FeeStructure>,
        today: NaiveDate,
    ) -> Self {
        // Semester 1, Semester 2, then both.
        let order = [Some(Semester::First), Some(Semester::Second), None];
        let mut semesters: Vec<SemesterSummary> = order
            .iter()
            .map(|semester| SemesterSummary {
                semester: *semester,
                mandatory: FeeTotals::default(),
                optional: FeeTotals::default(),
            })
            .collect();

        for row in rows {
            if let Some(bucket) = semesters.iter_mut().find(|s| s.semester == row.semester.0) {
                if row.is_mandatory {
                    bucket.mandatory.add(row, today);
                } else {
                    bucket.optional.add(row, today);
                }
            }
        }

        semesters.retain(|s| s.mandatory.count > 0 || s.optional.count > 0);

        let mut mandatory = FeeTotals::default();
        let mut optional = FeeTotals::default();
        for s in &semesters {
            mandatory.merge(&s.mandatory);
            optional.merge(&s.optional);
        }

        let mut grand_total = mandatory;
        grand_total.merge(&optional);

        Self {
            student_id,
            mandatory,
            optional,
            grand_total,
            semesters,
            available_optional,
        }
    }
}

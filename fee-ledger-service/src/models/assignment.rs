//! Student fee assignment: a per-student obligation with its own running balance.

use super::structure::{OptionalSemester, Semester};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
    Cancelled,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Partial => "partial",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
        }
    }

    /// Derive the status of a live assignment from its balances.
    ///
    /// `paid` once nothing is pending; otherwise `overdue` past the due date,
    /// then `partial` if anything was paid, else `pending`.
    pub fn derive(
        paid_amount: Decimal,
        pending_amount: Decimal,
        due_date: NaiveDate,
        today: NaiveDate,
    ) -> Self {
        if pending_amount <= Decimal::ZERO {
            Self::Paid
        } else if due_date < today {
            Self::Overdue
        } else if paid_amount > Decimal::ZERO {
            Self::Partial
        } else {
            Self::Pending
        }
    }
}

impl TryFrom<String> for AssignmentStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(Self::Pending),
            "partial" => Ok(Self::Partial),
            "paid" => Ok(Self::Paid),
            "overdue" => Ok(Self::Overdue),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown assignment status '{}'", other)),
        }
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Assignment row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StudentFeeAssignment {
    pub id: Uuid,
    pub student_id: Uuid,
    pub fee_structure_id: Uuid,
    #[sqlx(try_from = "Option<String>")]
    pub semester: OptionalSemester,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub pending_amount: Decimal,
    pub due_date: NaiveDate,
    #[sqlx(try_from = "String")]
    pub status: AssignmentStatus,
    pub cancelled_reason: Option<String>,
    pub cancelled_utc: Option<DateTime<Utc>>,
    pub assigned_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl StudentFeeAssignment {
    pub fn is_cancelled(&self) -> bool {
        self.status == AssignmentStatus::Cancelled
    }

    pub fn semester(&self) -> Option<Semester> {
        self.semester.0
    }

    /// Status as of `today`. The stored status is only refreshed on mutation,
    /// so an untouched pending row can have slipped past its due date.
    pub fn effective_status(&self, today: NaiveDate) -> AssignmentStatus {
        if self.is_cancelled() {
            return AssignmentStatus::Cancelled;
        }
        AssignmentStatus::derive(self.paid_amount, self.pending_amount, self.due_date, today)
    }

    /// `total == paid + pending` and `pending >= 0` for every live row.
    pub fn balances_reconcile(&self) -> bool {
        self.is_cancelled()
            || (self.total_amount == self.paid_amount + self.pending_amount
                && self.pending_amount >= Decimal::ZERO)
    }
}

/// Result of an idempotent assignment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "assignment_id", rename_all = "snake_case")]
pub enum AssignOutcome {
    Created(Uuid),
    /// A live assignment for the same student and structure already existed.
    Existing(Uuid),
}

impl AssignOutcome {
    pub fn assignment_id(&self) -> Uuid {
        match self {
            Self::Created(id) | Self::Existing(id) => *id,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Per-structure failure inside an assignment batch.
#[derive(Debug, Clone, Serialize)]
pub struct AssignmentFailure {
    pub fee_structure_id: Uuid,
    pub reason: String,
}

/// Outcome of a batch run (enrollment, grade change, structure creation).
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssignmentBatch {
    pub created: Vec<Uuid>,
    pub existing: Vec<Uuid>,
    pub cancelled: Vec<Uuid>,
    pub failed: Vec<AssignmentFailure>,
}

impl AssignmentBatch {
    pub fn record(&mut self, outcome: AssignOutcome) {
        match outcome {
            AssignOutcome::Created(id) => self.created.push(id),
            AssignOutcome::Existing(id) => self.existing.push(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn untouched_assignment_is_pending() {
        let status = AssignmentStatus::derive(dec!(0), dec!(5000), date(2026, 11, 1), date(2026, 10, 1));
        assert_eq!(status, AssignmentStatus::Pending);
    }

    #[test]
    fn partly_paid_assignment_is_partial() {
        let status =
            AssignmentStatus::derive(dec!(3000), dec!(2000), date(2026, 11, 1), date(2026, 10, 1));
        assert_eq!(status, AssignmentStatus::Partial);
    }

    #[test]
    fn nothing_pending_is_paid_even_after_due_date() {
        let status = AssignmentStatus::derive(dec!(5000), dec!(0), date(2026, 9, 1), date(2026, 10, 1));
        assert_eq!(status, AssignmentStatus::Paid);
    }

    #[test]
    fn unpaid_past_due_is_overdue() {
        let status = AssignmentStatus::derive(dec!(0), dec!(5000), date(2026, 9, 1), date(2026, 10, 1));
        assert_eq!(status, AssignmentStatus::Overdue);

        let status =
            AssignmentStatus::derive(dec!(1000), dec!(4000), date(2026, 9, 1), date(2026, 10, 1));
        assert_eq!(status, AssignmentStatus::Overdue);
    }

    #[test]
    fn due_today_is_not_overdue() {
        let status = AssignmentStatus::derive(dec!(0), dec!(5000), date(2026, 10, 1), date(2026, 10, 1));
        assert_eq!(status, AssignmentStatus::Pending);
    }

    #[test]
    fn effective_status_keeps_cancelled() {
        let now = Utc::now();
        let assignment = StudentFeeAssignment {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            fee_structure_id: Uuid::new_v4(),
            semester: OptionalSemester(Some(Semester::First)),
            total_amount: dec!(5000),
            paid_amount: dec!(0),
            pending_amount: dec!(5000),
            due_date: date(2026, 9, 1),
            status: AssignmentStatus::Cancelled,
            cancelled_reason: Some("grade change".to_string()),
            cancelled_utc: Some(now),
            assigned_utc: now,
            updated_utc: now,
        };

        assert_eq!(
            assignment.effective_status(date(2026, 10, 1)),
            AssignmentStatus::Cancelled
        );
        assert!(assignment.balances_reconcile());
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let id = Uuid::nil();
        let json = serde_json::to_value(AssignOutcome::Existing(id)).unwrap();
        assert_eq!(json["outcome"], "existing");
        assert_eq!(json["assignment_id"], id.to_string());
    }
}

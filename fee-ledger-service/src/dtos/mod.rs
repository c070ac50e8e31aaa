//! Request and query types for the HTTP surface.

use crate::models::{
    AssignOutcome, CollectionFilter, CollectionTarget, CustodyStatus, NewCollection,
    NewFeeStructure, PaymentMethod, Semester, StructureFilter, StructureLifecycle,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

pub const DEFAULT_COLLECTION_LIMIT: i64 = 100;
pub const MAX_COLLECTION_LIMIT: i64 = 500;
pub const DEFAULT_LEDGER_LIMIT: i64 = 20;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateStructureRequest {
    pub academic_year_id: Uuid,
    pub fee_category_id: Uuid,
    pub grade_id: Option<Uuid>,
    pub division_id: Option<Uuid>,
    pub semester: Option<Semester>,
    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: Option<String>,
    pub amount: Decimal,
    #[serde(default = "default_true")]
    pub is_mandatory: bool,
    pub due_date: NaiveDate,
}

fn default_true() -> bool {
    true
}

impl CreateStructureRequest {
    pub fn into_new(self, created_by: Uuid) -> NewFeeStructure {
        NewFeeStructure {
            academic_year_id: self.academic_year_id,
            fee_category_id: self.fee_category_id,
            grade_id: self.grade_id,
            division_id: self.division_id,
            semester: self.semester,
            description: self.description,
            amount: self.amount,
            is_mandatory: self.is_mandatory,
            due_date: self.due_date,
            created_by: Some(created_by),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeactivateStructureRequest {
    #[serde(default = "default_retired")]
    pub lifecycle: StructureLifecycle,
}

fn default_retired() -> StructureLifecycle {
    StructureLifecycle::Inactive
}

impl Default for DeactivateStructureRequest {
    fn default() -> Self {
        Self {
            lifecycle: default_retired(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StructureListQuery {
    pub academic_year_id: Option<Uuid>,
    pub grade_id: Option<Uuid>,
    pub fee_category_id: Option<Uuid>,
    pub lifecycle: Option<StructureLifecycle>,
    pub is_mandatory: Option<bool>,
}

impl From<StructureListQuery> for StructureFilter {
    fn from(query: StructureListQuery) -> Self {
        StructureFilter {
            academic_year_id: query.academic_year_id,
            grade_id: query.grade_id,
            fee_category_id: query.fee_category_id,
            lifecycle: query.lifecycle,
            is_mandatory: query.is_mandatory,
        }
    }
}

/// Category-only payment with no structure behind it yet.
#[derive(Debug, Deserialize, Validate)]
pub struct DirectPaymentRequest {
    pub fee_category_id: Uuid,
    #[validate(length(min = 1, max = 500, message = "Description is required"))]
    pub description: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCollectionRequest {
    pub student_id: Uuid,
    pub assignment_id: Option<Uuid>,
    #[serde(default)]
    pub optional_fee_structure_ids: Vec<Uuid>,
    #[validate(nested)]
    pub direct_payment: Option<DirectPaymentRequest>,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    #[validate(length(max = 100, message = "Reference number must be at most 100 characters"))]
    pub reference_number: Option<String>,
    #[validate(length(max = 1000, message = "Remarks must be at most 1000 characters"))]
    pub remarks: Option<String>,
    /// Defaults to the caller.
    pub collected_by_staff_id: Option<Uuid>,
}

impl CreateCollectionRequest {
    /// A direct payment cannot be combined with an assignment selection.
    pub fn has_mixed_target(&self) -> bool {
        self.direct_payment.is_some()
            && (self.assignment_id.is_some() || !self.optional_fee_structure_ids.is_empty())
    }

    pub fn into_new(self, collected_by: Uuid) -> NewCollection {
        let target = match self.direct_payment {
            Some(direct) => CollectionTarget::Direct {
                fee_category_id: direct.fee_category_id,
                description: direct.description,
            },
            None => CollectionTarget::Assignments {
                assignment_id: self.assignment_id,
                optional_fee_structure_ids: self.optional_fee_structure_ids,
            },
        };

        NewCollection {
            student_id: self.student_id,
            target,
            amount: self.amount,
            payment_method: self.payment_method,
            reference_number: self.reference_number,
            remarks: self.remarks,
            collected_by,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CollectionListQuery {
    pub student_id: Option<Uuid>,
    pub staff_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub custody_status: Option<CustodyStatus>,
    pub limit: Option<i64>,
}

impl From<CollectionListQuery> for CollectionFilter {
    fn from(query: CollectionListQuery) -> Self {
        CollectionFilter {
            student_id: query.student_id,
            collected_by: query.staff_id,
            from: query.from,
            to: query.to,
            custody_status: query.custody_status,
            limit: query
                .limit
                .unwrap_or(DEFAULT_COLLECTION_LIMIT)
                .clamp(1, MAX_COLLECTION_LIMIT),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AssignmentQuery {
    #[serde(default)]
    pub include_cancelled: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AssignStructureRequest {
    pub fee_structure_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct AssignStructureResponse {
    pub assignment_id: Uuid,
    pub created: bool,
}

impl From<AssignOutcome> for AssignStructureResponse {
    fn from(outcome: AssignOutcome) -> Self {
        AssignStructureResponse {
            assignment_id: outcome.assignment_id(),
            created: outcome.was_created(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct GradeChangeRequest {
    pub new_grade_id: Uuid,
    pub new_division_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct WithdrawRequest {
    pub amount: Decimal,
    #[validate(length(max = 500, message = "Reason must be at most 500 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WalletQuery {
    pub limit: Option<i64>,
}

impl WalletQuery {
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_LEDGER_LIMIT)
            .clamp(1, MAX_COLLECTION_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn collection_body(extra: serde_json::Value) -> CreateCollectionRequest {
        let mut body = serde_json::json!({
            "student_id": Uuid::new_v4(),
            "amount": "3000.00",
            "payment_method": "cash",
        });
        if let (Some(base), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn collection_request_targets_assignments() {
        let assignment_id = Uuid::new_v4();
        let req = collection_body(serde_json::json!({ "assignment_id": assignment_id }));
        assert!(!req.has_mixed_target());

        let staff = Uuid::new_v4();
        let new = req.into_new(staff);
        assert_eq!(new.amount, dec!(3000.00));
        assert_eq!(new.collected_by, staff);
        match new.target {
            CollectionTarget::Assignments {
                assignment_id: Some(id),
                optional_fee_structure_ids,
            } => {
                assert_eq!(id, assignment_id);
                assert!(optional_fee_structure_ids.is_empty());
            }
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn collection_request_targets_direct_payment() {
        let category = Uuid::new_v4();
        let req = collection_body(serde_json::json!({
            "direct_payment": { "fee_category_id": category, "description": "Lost library book" }
        }));
        assert!(req.validate().is_ok());

        match req.into_new(Uuid::new_v4()).target {
            CollectionTarget::Direct {
                fee_category_id,
                description,
            } => {
                assert_eq!(fee_category_id, category);
                assert_eq!(description, "Lost library book");
            }
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn empty_direct_description_fails_validation() {
        let req = collection_body(serde_json::json!({
            "direct_payment": { "fee_category_id": Uuid::new_v4(), "description": "" }
        }));
        assert!(req.validate().is_err());
    }

    #[test]
    fn mixed_target_is_detected() {
        let req = collection_body(serde_json::json!({
            "assignment_id": Uuid::new_v4(),
            "direct_payment": { "fee_category_id": Uuid::new_v4(), "description": "Trip" }
        }));
        assert!(req.has_mixed_target());
    }

    #[test]
    fn collection_limit_is_clamped() {
        let filter = CollectionFilter::from(CollectionListQuery::default());
        assert_eq!(filter.limit, DEFAULT_COLLECTION_LIMIT);

        let filter = CollectionFilter::from(CollectionListQuery {
            limit: Some(10_000),
            ..CollectionListQuery::default()
        });
        assert_eq!(filter.limit, MAX_COLLECTION_LIMIT);
    }

    #[test]
    fn structure_request_defaults_to_mandatory() {
        let req: CreateStructureRequest = serde_json::from_value(serde_json::json!({
            "academic_year_id": Uuid::new_v4(),
            "fee_category_id": Uuid::new_v4(),
            "grade_id": Uuid::new_v4(),
            "semester": "Semester 1",
            "amount": "5000",
            "due_date": "2026-06-30",
        }))
        .unwrap();

        let new = req.into_new(Uuid::new_v4());
        assert!(new.is_mandatory);
        assert_eq!(new.semester, Some(Semester::First));
    }

    #[test]
    fn deactivate_defaults_to_inactive() {
        let req: DeactivateStructureRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.lifecycle, StructureLifecycle::Inactive);
    }
}

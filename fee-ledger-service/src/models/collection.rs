//! Fee collection model: one payment event and the receipt it produced.

use super::structure::{OptionalSemester, StructureScope};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Manually tagged payment method. No gateway is involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Cheque,
    BankTransfer,
    Upi,
    Card,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Cheque => "cheque",
            Self::BankTransfer => "bank_transfer",
            Self::Upi => "upi",
            Self::Card => "card",
            Self::Other => "other",
        }
    }

    /// Cheques and transfers are traceable only through their bank reference.
    pub fn requires_reference(&self) -> bool {
        matches!(self, Self::Cheque | Self::BankTransfer)
    }
}

impl TryFrom<String> for PaymentMethod {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "cash" => Ok(Self::Cash),
            "cheque" => Ok(Self::Cheque),
            "bank_transfer" => Ok(Self::BankTransfer),
            "upi" => Ok(Self::Upi),
            "card" => Ok(Self::Card),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown payment method '{}'", other)),
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Custody of the cash behind a collection: `collected → verified → withdrawn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustodyStatus {
    Collected,
    Verified,
    Withdrawn,
}

impl CustodyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collected => "collected",
            Self::Verified => "verified",
            Self::Withdrawn => "withdrawn",
        }
    }

    pub fn is_verified(&self) -> bool {
        !matches!(self, Self::Collected)
    }
}

impl TryFrom<String> for CustodyStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "collected" => Ok(Self::Collected),
            "verified" => Ok(Self::Verified),
            "withdrawn" => Ok(Self::Withdrawn),
            other => Err(format!("unknown custody status '{}'", other)),
        }
    }
}

impl std::fmt::Display for CustodyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a line item paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineType {
    /// An assignment the student already owed.
    Assignment,
    /// An optional structure opted into at collection time.
    OptionalFee,
    /// A synthesized structure for a category-only payment.
    DirectPayment,
}

impl LineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assignment => "assignment",
            Self::OptionalFee => "optional_fee",
            Self::DirectPayment => "direct_payment",
        }
    }
}

impl TryFrom<String> for LineType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "assignment" => Ok(Self::Assignment),
            "optional_fee" => Ok(Self::OptionalFee),
            "direct_payment" => Ok(Self::DirectPayment),
            other => Err(format!("unknown line type '{}'", other)),
        }
    }
}

/// Collection row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FeeCollection {
    pub id: Uuid,
    pub receipt_number: String,
    pub student_id: Uuid,
    pub amount: Decimal,
    #[sqlx(try_from = "String")]
    pub payment_method: PaymentMethod,
    pub collected_by: Uuid,
    pub collection_date: NaiveDate,
    pub reference_number: Option<String>,
    pub remarks: Option<String>,
    #[sqlx(try_from = "String")]
    pub custody_status: CustodyStatus,
    pub verified_by: Option<Uuid>,
    pub verified_utc: Option<DateTime<Utc>>,
    pub withdrawn_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

/// Line item row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CollectionLineItem {
    pub id: Uuid,
    pub collection_id: Uuid,
    #[sqlx(try_from = "String")]
    pub line_type: LineType,
    pub assignment_id: Uuid,
    pub fee_structure_id: Uuid,
    pub amount: Decimal,
    pub description: Option<String>,
}

/// Line item joined with the structure it paid for.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ResolvedLineItem {
    pub id: Uuid,
    #[sqlx(try_from = "String")]
    pub line_type: LineType,
    pub assignment_id: Uuid,
    pub fee_structure_id: Uuid,
    pub amount: Decimal,
    pub description: Option<String>,
    pub fee_category_id: Uuid,
    #[sqlx(try_from = "Option<String>")]
    pub semester: OptionalSemester,
    pub is_mandatory: bool,
    #[sqlx(try_from = "String")]
    pub scope: StructureScope,
    pub assignment_total: Decimal,
    pub assignment_pending: Decimal,
}

/// A collection with its resolved breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDetail {
    #[serde(flatten)]
    pub collection: FeeCollection,
    pub line_items: Vec<ResolvedLineItem>,
}

/// What a payment is applied to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CollectionTarget {
    /// An existing assignment and/or optional structures to opt into.
    Assignments {
        assignment_id: Option<Uuid>,
        optional_fee_structure_ids: Vec<Uuid>,
    },
    /// A category-only payment with no pre-existing structure.
    Direct {
        fee_category_id: Uuid,
        description: String,
    },
}

/// Input for recording a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCollection {
    pub student_id: Uuid,
    pub target: CollectionTarget,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub reference_number: Option<String>,
    pub remarks: Option<String>,
    pub collected_by: Uuid,
}

/// What the caller gets back from a successful collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionReceipt {
    pub collection_id: Uuid,
    pub receipt_number: String,
    pub amount: Decimal,
    pub collection_date: NaiveDate,
    pub wallet_balance: Decimal,
    pub line_items: Vec<CollectionLineItem>,
}

/// Filter parameters for listing collections.
#[derive(Debug, Clone, Default)]
pub struct CollectionFilter {
    pub student_id: Option<Uuid>,
    pub collected_by: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub custody_status: Option<CustodyStatus>,
    pub limit: i64,
}

/// Result of a verification request. Verifying twice is not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub collection: FeeCollection,
    pub already_verified: bool,
}

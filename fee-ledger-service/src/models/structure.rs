//! Fee structure model: the template an assignment is materialized from.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Semester a structure applies to. `None` on the owning row means both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Semester {
    #[serde(rename = "Semester 1")]
    First,
    #[serde(rename = "Semester 2")]
    Second,
}

impl Semester {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "Semester 1",
            Self::Second => "Semester 2",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Semester 1" => Some(Self::First),
            "Semester 2" => Some(Self::Second),
            _ => None,
        }
    }
}

impl TryFrom<String> for Semester {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown semester '{}'", value))
    }
}

impl std::fmt::Display for Semester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How widely a structure applies. Derived from grade/division, ordered from
/// most to least specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureScope {
    Division,
    Grade,
    Universal,
    /// Synthesized for a category-only payment; never matches a student.
    Direct,
}

impl StructureScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Division => "division",
            Self::Grade => "grade",
            Self::Universal => "universal",
            Self::Direct => "direct",
        }
    }

    /// Derive the scope of a catalog structure from its grade/division ids.
    /// A division without a grade is not a valid scope.
    pub fn from_ids(grade_id: Option<Uuid>, division_id: Option<Uuid>) -> Option<Self> {
        match (grade_id, division_id) {
            (Some(_), Some(_)) => Some(Self::Division),
            (Some(_), None) => Some(Self::Grade),
            (None, None) => Some(Self::Universal),
            (None, Some(_)) => None,
        }
    }

    /// Higher wins during scope resolution.
    pub fn specificity(&self) -> u8 {
        match self {
            Self::Division => 3,
            Self::Grade => 2,
            Self::Universal => 1,
            Self::Direct => 0,
        }
    }
}

impl TryFrom<String> for StructureScope {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "division" => Ok(Self::Division),
            "grade" => Ok(Self::Grade),
            "universal" => Ok(Self::Universal),
            "direct" => Ok(Self::Direct),
            other => Err(format!("unknown structure scope '{}'", other)),
        }
    }
}

impl std::fmt::Display for StructureScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a structure, replacing a bare active flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureLifecycle {
    Active,
    Inactive,
    Superseded,
}

impl StructureLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Superseded => "superseded",
        }
    }
}

impl TryFrom<String> for StructureLifecycle {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "superseded" => Ok(Self::Superseded),
            other => Err(format!("unknown structure lifecycle '{}'", other)),
        }
    }
}

impl std::fmt::Display for StructureLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fee structure row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FeeStructure {
    pub id: Uuid,
    pub academic_year_id: Uuid,
    pub fee_category_id: Uuid,
    pub grade_id: Option<Uuid>,
    pub division_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub scope: StructureScope,
    #[sqlx(try_from = "Option<String>")]
    pub semester: OptionalSemester,
    pub description: Option<String>,
    pub amount: Decimal,
    pub is_mandatory: bool,
    pub due_date: NaiveDate,
    #[sqlx(try_from = "String")]
    pub lifecycle: StructureLifecycle,
    pub created_by: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl FeeStructure {
    pub fn is_active(&self) -> bool {
        self.lifecycle == StructureLifecycle::Active
    }

    pub fn semester(&self) -> Option<Semester> {
        self.semester.0
    }
}

/// Nullable semester column. Wrapped so the row derive can decode it through
/// `TryFrom<Option<String>>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionalSemester(pub Option<Semester>);

impl TryFrom<Option<String>> for OptionalSemester {
    type Error = String;

    fn try_from(value: Option<String>) -> Result<Self, Self::Error> {
        value
            .map(Semester::try_from)
            .transpose()
            .map(OptionalSemester)
    }
}

impl From<Option<Semester>> for OptionalSemester {
    fn from(value: Option<Semester>) -> Self {
        OptionalSemester(value)
    }
}

impl OptionalSemester {
    pub fn as_db(&self) -> Option<&'static str> {
        self.0.map(|s| s.as_str())
    }
}

/// Input for creating a catalog structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFeeStructure {
    pub academic_year_id: Uuid,
    pub fee_category_id: Uuid,
    pub grade_id: Option<Uuid>,
    pub division_id: Option<Uuid>,
    pub semester: Option<Semester>,
    pub description: Option<String>,
    pub amount: Decimal,
    pub is_mandatory: bool,
    pub due_date: NaiveDate,
    pub created_by: Option<Uuid>,
}

/// Filter parameters for listing structures.
#[derive(Debug, Clone, Default)]
pub struct StructureFilter {
    pub academic_year_id: Option<Uuid>,
    pub grade_id: Option<Uuid>,
    pub fee_category_id: Option<Uuid>,
    pub lifecycle: Option<StructureLifecycle>,
    pub is_mandatory: Option<bool>,
}

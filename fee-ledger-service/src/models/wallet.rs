//! Staff wallet and its append-only ledger.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerTransactionType {
    Collection,
    Withdrawal,
}

impl LedgerTransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collection => "collection",
            Self::Withdrawal => "withdrawal",
        }
    }

    /// Ledger amounts are signed: collections add, withdrawals subtract.
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            Self::Collection => amount,
            Self::Withdrawal => -amount,
        }
    }
}

impl TryFrom<String> for LedgerTransactionType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "collection" => Ok(Self::Collection),
            "withdrawal" => Ok(Self::Withdrawal),
            other => Err(format!("unknown ledger transaction type '{}'", other)),
        }
    }
}

/// What a ledger entry points back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerReference {
    FeeCollection(Uuid),
    Withdrawal(Uuid),
}

impl LedgerReference {
    pub fn id(&self) -> Uuid {
        match self {
            Self::FeeCollection(id) | Self::Withdrawal(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::FeeCollection(_) => "fee_collection",
            Self::Withdrawal(_) => "withdrawal",
        }
    }
}

/// Wallet row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StaffWallet {
    pub staff_id: Uuid,
    pub current_balance: Decimal,
    pub total_collected: Decimal,
    pub total_withdrawn: Decimal,
    pub last_collection_utc: Option<DateTime<Utc>>,
    pub last_withdrawal_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl StaffWallet {
    /// `current_balance == total_collected - total_withdrawn`, never negative.
    pub fn balances_reconcile(&self) -> bool {
        self.current_balance == self.total_collected - self.total_withdrawn
            && self.current_balance >= Decimal::ZERO
    }
}

/// Ledger row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StaffLedgerEntry {
    pub id: Uuid,
    pub entry_seq: i64,
    pub staff_id: Uuid,
    #[sqlx(try_from = "String")]
    pub transaction_type: LedgerTransactionType,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub reference_id: Uuid,
    pub reference_type: String,
    pub performed_by: Option<Uuid>,
    pub description: Option<String>,
    pub transaction_date: DateTime<Utc>,
}

/// Per-staff-per-day custody aggregate.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StaffDailyCollection {
    pub staff_id: Uuid,
    pub collection_date: NaiveDate,
    pub collection_count: i32,
    pub total_amount: Decimal,
    pub pending_verification: Decimal,
    pub pending_transfer: Decimal,
    pub transferred: Decimal,
}

/// Result of a withdrawal or clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub withdrawal_id: Uuid,
    pub staff_id: Uuid,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub entry: StaffLedgerEntry,
    /// Collections moved to `withdrawn` (full clears only).
    pub collections_withdrawn: u64,
}

/// A wallet with its most recent history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletOverview {
    pub wallet: StaffWallet,
    pub pending_verification: Decimal,
    pub pending_transfer: Decimal,
    pub recent_entries: Vec<StaffLedgerEntry>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TopCollector {
    pub staff_id: Uuid,
    pub total_collected: Decimal,
    pub current_balance: Decimal,
    pub collection_count: i64,
}

/// Aggregate view across all wallets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletStatistics {
    pub wallet_count: i64,
    pub total_balance: Decimal,
    pub total_collected: Decimal,
    pub total_withdrawn: Decimal,
    pub pending_verification: Decimal,
    pub pending_transfer: Decimal,
    pub today_collection_count: i64,
    pub today_collection_amount: Decimal,
    pub top_collectors: Vec<TopCollector>,
}

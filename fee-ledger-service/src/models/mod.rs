//! Domain models for fee-ledger-service.

mod assignment;
mod collection;
mod structure;
mod summary;
mod wallet;

pub use assignment::{
    AssignOutcome, AssignmentBatch, AssignmentFailure, AssignmentStatus, StudentFeeAssignment,
};
pub use collection::{
    CollectionDetail, CollectionFilter, CollectionLineItem, CollectionReceipt, CollectionTarget,
    CustodyStatus, FeeCollection, LineType, NewCollection, PaymentMethod, ResolvedLineItem,
    VerificationOutcome,
};
pub use structure::{
    FeeStructure, NewFeeStructure, OptionalSemester, Semester, StructureFilter,
    StructureLifecycle, StructureScope,
};
pub use summary::{FeeSummary, FeeTotals, SemesterSummary, SummaryRow};
pub use wallet::{
    LedgerReference, LedgerTransactionType, StaffDailyCollection, StaffLedgerEntry, StaffWallet,
    TopCollector, WalletOverview, WalletStatistics, Withdrawal,
};

//! Business services for fee-ledger-service.

pub mod assignments;
pub mod collections;
pub mod database;
pub mod directory;
pub mod error;
pub mod metrics;
pub mod receipts;
pub mod structures;
pub mod verification;
pub mod wallets;

pub use assignments::{resolve_structures, AssignmentEngine, AssignmentRepository};
pub use collections::{
    allocate, CollectionHook, CollectionProcessor, CollectionRepository, NoopCollectionHook,
};
pub use database::Database;
pub use directory::{PgStudentDirectory, StudentDirectory, StudentProfile};
pub use error::FeeError;
pub use metrics::{get_metrics, init_metrics};
pub use receipts::{format_receipt_number, ReceiptSequencer};
pub use structures::{
    FeeStructureCatalog, FeeStructureRepository, FeeStructureService, StructureCreated,
};
pub use verification::VerificationWorkflow;
pub use wallets::{DailyCollectionRepository, StaffWalletLedger, WalletRepository, WalletService};

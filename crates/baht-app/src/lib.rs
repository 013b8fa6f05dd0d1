// Business services on top of the store and the AI client: recording entries,
// reading receipts, reimbursements, settlements, notifications and file
// storage.

pub mod access;
pub mod bookkeeping;
pub mod currency;
pub mod directory;
pub mod error;
pub mod fraud;
pub mod notify;
pub mod receipt;
pub mod reimbursement;
pub mod settlement;
pub mod storage;
pub mod vendor;

#[cfg(test)]
mod testutil;

pub use bookkeeping::{Bookkeeping, ExpenseInput, IncomeInput, StatusChange};
pub use error::{ServiceError, ServiceResult};
pub use notify::Notifier;
pub use receipt::{ReceiptService, ReceiptSuggestion};
pub use reimbursement::{ReimbursementInput, Reimbursements};
pub use settlement::{SettleInput, Settlements};
pub use storage::{store_from_config, FileStore};

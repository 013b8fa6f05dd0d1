// Domain records. Tenant-owned records carry `company_id`; deletions are soft
// (`deleted_at`).

pub mod company;
pub mod entry;
pub mod vendor;
pub mod workflow;

pub use company::{
    Account, AccountClass, Company, Contact, ContactKind, Membership, Permission, Role, User,
    DEFAULT_CHART_OF_ACCOUNTS,
};
pub use entry::{DocumentStatus, EntryFilter, Expense, Income, PaidBy, SettlementStatus};
pub use vendor::{ExchangeRate, MatchKind, VendorMapping};
pub use workflow::{
    PendingSettlement, ReimbursementRequest, ReimbursementStatus, SettlementPayment,
    WorkflowError,
};

/// Fresh record identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

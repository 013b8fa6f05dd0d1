// Expense and income entries, who paid for them, and the document workflow
// they move through.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::workflow::WorkflowError;
use crate::money::Currency;

// ---------------------------------------------------------------------------
// Document workflow
// ---------------------------------------------------------------------------

/// Where the supporting paperwork for an entry stands.
///
/// Variants are declared in workflow order; `Ord` follows that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    WaitingTaxInvoice,
    Ready,
    SentToAccountant,
    Completed,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 5] = [
        DocumentStatus::Draft,
        DocumentStatus::WaitingTaxInvoice,
        DocumentStatus::Ready,
        DocumentStatus::SentToAccountant,
        DocumentStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::WaitingTaxInvoice => "waiting_tax_invoice",
            DocumentStatus::Ready => "ready",
            DocumentStatus::SentToAccountant => "sent_to_accountant",
            DocumentStatus::Completed => "completed",
        }
    }

    pub fn from_str_status(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|st| st.as_str() == s)
    }

    /// The status directly after this one, `None` for `Completed`.
    pub fn next(&self) -> Option<Self> {
        match self {
            DocumentStatus::Draft => Some(DocumentStatus::WaitingTaxInvoice),
            DocumentStatus::WaitingTaxInvoice => Some(DocumentStatus::Ready),
            DocumentStatus::Ready => Some(DocumentStatus::SentToAccountant),
            DocumentStatus::SentToAccountant => Some(DocumentStatus::Completed),
            DocumentStatus::Completed => None,
        }
    }

    /// The status directly before this one, `None` for `Draft`.
    pub fn previous(&self) -> Option<Self> {
        match self {
            DocumentStatus::Draft => None,
            DocumentStatus::WaitingTaxInvoice => Some(DocumentStatus::Draft),
            DocumentStatus::Ready => Some(DocumentStatus::WaitingTaxInvoice),
            DocumentStatus::SentToAccountant => Some(DocumentStatus::Ready),
            DocumentStatus::Completed => Some(DocumentStatus::SentToAccountant),
        }
    }

    /// Move forward to `to`. Only the next step is allowed, plus the shortcut
    /// `Draft -> Ready` when the tax invoice is already in hand.
    pub fn advance_to(&self, to: DocumentStatus) -> Result<DocumentStatus, WorkflowError> {
        let allowed = self.next() == Some(to)
            || (*self == DocumentStatus::Draft && to == DocumentStatus::Ready);
        if allowed {
            Ok(to)
        } else {
            Err(WorkflowError::InvalidTransition {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    /// Step back exactly one status.
    pub fn revert(&self) -> Result<DocumentStatus, WorkflowError> {
        self.previous().ok_or_else(|| WorkflowError::InvalidTransition {
            from: self.as_str().to_string(),
            to: "previous".to_string(),
        })
    }

    /// Whether a tax invoice has been received, which is what makes input VAT
    /// claimable.
    pub fn has_tax_invoice(&self) -> bool {
        *self >= DocumentStatus::Ready
    }

    /// Reopening a completed document is reserved for company managers.
    pub fn revert_needs_manager(&self) -> bool {
        *self == DocumentStatus::Completed
    }
}

// ---------------------------------------------------------------------------
// Who paid
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaidBy {
    Company,
    /// An employee paid out of pocket and is owed a settlement.
    Employee { user_id: String },
    PettyCash,
}

impl PaidBy {
    pub fn kind_str(&self) -> &'static str {
        match self {
            PaidBy::Company => "company",
            PaidBy::Employee { .. } => "employee",
            PaidBy::PettyCash => "petty_cash",
        }
    }

    pub fn employee_id(&self) -> Option<&str> {
        match self {
            PaidBy::Employee { user_id } => Some(user_id),
            _ => None,
        }
    }

    pub fn from_parts(kind: &str, user_id: Option<String>) -> Option<Self> {
        match (kind, user_id) {
            ("company", _) => Some(PaidBy::Company),
            ("petty_cash", _) => Some(PaidBy::PettyCash),
            ("employee", Some(user_id)) => Some(PaidBy::Employee { user_id }),
            _ => None,
        }
    }

    /// Settlement status an entry starts with when paid this way.
    pub fn initial_settlement(&self) -> SettlementStatus {
        match self {
            PaidBy::Employee { .. } => SettlementStatus::Pending,
            _ => SettlementStatus::NotRequired,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    NotRequired,
    Pending,
    Settled,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::NotRequired => "not_required",
            SettlementStatus::Pending => "pending",
            SettlementStatus::Settled => "settled",
        }
    }

    pub fn from_str_status(s: &str) -> Option<Self> {
        match s {
            "not_required" => Some(SettlementStatus::NotRequired),
            "pending" => Some(SettlementStatus::Pending),
            "settled" => Some(SettlementStatus::Settled),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: String,
    pub company_id: String,
    pub contact_id: Option<String>,
    pub account_id: Option<String>,
    pub description: String,
    pub issue_date: NaiveDate,
    pub document_number: Option<String>,
    /// Currency the document was issued in. Amounts below are always THB.
    pub currency: Currency,
    pub original_amount: Decimal,
    pub exchange_rate: Decimal,
    pub base_amount: Decimal,
    pub vat_rate: Decimal,
    pub vat_amount: Decimal,
    /// Document total, `base_amount + vat_amount`.
    pub amount: Decimal,
    pub wht_rate: Decimal,
    pub wht_amount: Decimal,
    /// Cash paid to the vendor, `amount - wht_amount`.
    pub net_paid: Decimal,
    pub paid_by: PaidBy,
    pub settlement_status: SettlementStatus,
    pub status: DocumentStatus,
    pub receipt_url: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Expense {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Input VAT that can be claimed on ภ.พ.30 for this expense.
    pub fn claimable_vat(&self) -> Decimal {
        if !self.is_deleted() && self.status.has_tax_invoice() {
            self.vat_amount
        } else {
            Decimal::ZERO
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Income {
    pub id: String,
    pub company_id: String,
    pub contact_id: Option<String>,
    pub account_id: Option<String>,
    pub description: String,
    pub issue_date: NaiveDate,
    pub document_number: Option<String>,
    pub currency: Currency,
    pub original_amount: Decimal,
    pub exchange_rate: Decimal,
    pub base_amount: Decimal,
    pub vat_rate: Decimal,
    pub vat_amount: Decimal,
    pub amount: Decimal,
    pub wht_rate: Decimal,
    pub wht_amount: Decimal,
    /// Cash received from the customer, `amount - wht_amount`.
    pub net_received: Decimal,
    pub status: DocumentStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Income {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Filter for listing entries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryFilter {
    /// Inclusive start date.
    pub from: Option<NaiveDate>,
    /// Inclusive end date.
    pub to: Option<NaiveDate>,
    pub status: Option<DocumentStatus>,
    #[serde(default)]
    pub include_deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_one_step_at_a_time() {
        let s = DocumentStatus::Draft;
        assert_eq!(
            s.advance_to(DocumentStatus::WaitingTaxInvoice),
            Ok(DocumentStatus::WaitingTaxInvoice)
        );
        assert_eq!(
            DocumentStatus::Ready.advance_to(DocumentStatus::SentToAccountant),
            Ok(DocumentStatus::SentToAccountant)
        );
        assert!(DocumentStatus::Ready
            .advance_to(DocumentStatus::Completed)
            .is_err());
        assert!(DocumentStatus::Completed
            .advance_to(DocumentStatus::Draft)
            .is_err());
    }

    #[test]
    fn draft_can_jump_to_ready() {
        assert_eq!(
            DocumentStatus::Draft.advance_to(DocumentStatus::Ready),
            Ok(DocumentStatus::Ready)
        );
        assert!(DocumentStatus::Draft
            .advance_to(DocumentStatus::SentToAccountant)
            .is_err());
    }

    #[test]
    fn revert_steps_back_once() {
        assert_eq!(
            DocumentStatus::Completed.revert(),
            Ok(DocumentStatus::SentToAccountant)
        );
        assert_eq!(DocumentStatus::Ready.revert(), Ok(DocumentStatus::WaitingTaxInvoice));
        assert!(DocumentStatus::Draft.revert().is_err());
        assert!(DocumentStatus::Completed.revert_needs_manager());
        assert!(!DocumentStatus::Ready.revert_needs_manager());
    }

    #[test]
    fn tax_invoice_from_ready_onwards() {
        assert!(!DocumentStatus::Draft.has_tax_invoice());
        assert!(!DocumentStatus::WaitingTaxInvoice.has_tax_invoice());
        assert!(DocumentStatus::Ready.has_tax_invoice());
        assert!(DocumentStatus::Completed.has_tax_invoice());
    }

    #[test]
    fn status_strings_round_trip() {
        for st in DocumentStatus::ALL {
            assert_eq!(DocumentStatus::from_str_status(st.as_str()), Some(st));
        }
    }

    #[test]
    fn paid_by_parts_and_settlement() {
        let emp = PaidBy::from_parts("employee", Some("u1".into())).unwrap();
        assert_eq!(emp.employee_id(), Some("u1"));
        assert_eq!(emp.initial_settlement(), SettlementStatus::Pending);
        assert_eq!(
            PaidBy::Company.initial_settlement(),
            SettlementStatus::NotRequired
        );
        assert!(PaidBy::from_parts("employee", None).is_none());
        assert_eq!(PaidBy::from_parts("petty_cash", None), Some(PaidBy::PettyCash));
    }

    #[test]
    fn paid_by_json_shape() {
        let json = serde_json::to_value(PaidBy::Employee {
            user_id: "u9".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"kind": "employee", "user_id": "u9"}));
        let back: PaidBy = serde_json::from_value(serde_json::json!({"kind": "company"})).unwrap();
        assert_eq!(back, PaidBy::Company);
    }
}

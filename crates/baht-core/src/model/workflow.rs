// Reimbursement requests and settlement payments, with the status rules
// that keep an employee from being paid twice.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("cannot move from `{from}` to `{to}`")]
    InvalidTransition { from: String, to: String },

    #[error("a rejection reason is required")]
    MissingReason,

    #[error("requesters cannot approve their own reimbursement")]
    SelfApproval,

    /// The records involved are not in a state that allows the operation.
    #[error("{0}")]
    Conflict(String),
}

// ---------------------------------------------------------------------------
// Reimbursement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReimbursementStatus {
    Pending,
    Approved,
    Rejected,
    Paid,
}

impl ReimbursementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReimbursementStatus::Pending => "pending",
            ReimbursementStatus::Approved => "approved",
            ReimbursementStatus::Rejected => "rejected",
            ReimbursementStatus::Paid => "paid",
        }
    }

    pub fn from_str_status(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReimbursementStatus::Pending),
            "approved" => Some(ReimbursementStatus::Approved),
            "rejected" => Some(ReimbursementStatus::Rejected),
            "paid" => Some(ReimbursementStatus::Paid),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReimbursementStatus::Rejected | ReimbursementStatus::Paid)
    }

    fn transition(&self, to: ReimbursementStatus) -> Result<ReimbursementStatus, WorkflowError> {
        use ReimbursementStatus::*;
        match (self, to) {
            (Pending, Approved) | (Pending, Rejected) | (Approved, Paid) => Ok(to),
            _ => Err(WorkflowError::InvalidTransition {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
            }),
        }
    }
}

/// An employee asking to be paid back for something they bought for the
/// company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReimbursementRequest {
    pub id: String,
    pub company_id: String,
    pub requester_id: String,
    pub description: String,
    /// Total paid by the employee, VAT included.
    pub amount: Decimal,
    pub vat_amount: Decimal,
    pub issue_date: NaiveDate,
    pub account_id: Option<String>,
    pub receipt_url: Option<String>,
    pub status: ReimbursementStatus,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
    /// Expense created when the request is paid.
    pub expense_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ReimbursementRequest {
    pub fn approve(&mut self, approver_id: &str, at: DateTime<Utc>) -> Result<(), WorkflowError> {
        if approver_id == self.requester_id {
            return Err(WorkflowError::SelfApproval);
        }
        self.status = self.status.transition(ReimbursementStatus::Approved)?;
        self.approved_by = Some(approver_id.to_string());
        self.approved_at = Some(at);
        Ok(())
    }

    pub fn reject(&mut self, approver_id: &str, reason: &str) -> Result<(), WorkflowError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(WorkflowError::MissingReason);
        }
        if approver_id == self.requester_id {
            return Err(WorkflowError::SelfApproval);
        }
        self.status = self.status.transition(ReimbursementStatus::Rejected)?;
        self.approved_by = Some(approver_id.to_string());
        self.rejected_reason = Some(reason.to_string());
        Ok(())
    }

    /// Mark as paid. The status check is the only guard against paying twice.
    pub fn pay(
        &mut self,
        reference: Option<String>,
        expense_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        self.status = self.status.transition(ReimbursementStatus::Paid)?;
        self.paid_at = Some(at);
        self.payment_reference = reference;
        self.expense_id = Some(expense_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// One payout to an employee covering a batch of expenses they paid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementPayment {
    pub id: String,
    pub company_id: String,
    pub payee_id: String,
    pub expense_ids: Vec<String>,
    pub total_amount: Decimal,
    pub paid_at: DateTime<Utc>,
    pub reference: Option<String>,
    pub created_by: String,
    pub reversed_at: Option<DateTime<Utc>>,
    pub reversed_by: Option<String>,
}

impl SettlementPayment {
    pub fn is_reversed(&self) -> bool {
        self.reversed_at.is_some()
    }
}

/// Outstanding amount owed to one employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSettlement {
    pub payee_id: String,
    pub payee_name: String,
    pub expense_count: usize,
    pub total_amount: Decimal,
}

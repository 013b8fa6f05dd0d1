// Employee reimbursement requests: submit, approve or reject, then pay.
//
// Paying a request books a company-paid expense for it, so the purchase shows
// up in the books exactly once.

use baht_core::db::Database;
use baht_core::model::{
    new_id, AccountClass, DocumentStatus, Expense, PaidBy, Permission, ReimbursementRequest,
    ReimbursementStatus, SettlementStatus,
};
use baht_core::money::Currency;
use baht_core::tax::STANDARD_VAT_RATE;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::access::{require_member, require_permission};
use crate::error::{ServiceError, ServiceResult};
use crate::notify::{self, Notice, Notifier};

#[derive(Debug, Clone, Deserialize)]
pub struct ReimbursementInput {
    pub description: String,
    /// VAT-inclusive amount paid.
    pub amount: Decimal,
    #[serde(default)]
    pub vat_amount: Decimal,
    pub issue_date: NaiveDate,
    pub account_id: Option<String>,
    pub receipt_url: Option<String>,
}

/// The expense booked when a request is paid.
fn expense_for(r: &ReimbursementRequest, actor_id: &str, at: DateTime<Utc>) -> Expense {
    let has_vat = r.vat_amount > Decimal::ZERO;
    Expense {
        id: new_id(),
        company_id: r.company_id.clone(),
        contact_id: None,
        account_id: r.account_id.clone(),
        description: r.description.clone(),
        issue_date: r.issue_date,
        document_number: None,
        currency: Currency::thb(),
        original_amount: r.amount,
        exchange_rate: Decimal::ONE,
        base_amount: r.amount - r.vat_amount,
        vat_rate: if has_vat { STANDARD_VAT_RATE } else { Decimal::ZERO },
        vat_amount: r.vat_amount,
        amount: r.amount,
        wht_rate: Decimal::ZERO,
        wht_amount: Decimal::ZERO,
        net_paid: r.amount,
        paid_by: PaidBy::Company,
        settlement_status: SettlementStatus::NotRequired,
        status: if has_vat {
            DocumentStatus::WaitingTaxInvoice
        } else {
            DocumentStatus::Ready
        },
        receipt_url: r.receipt_url.clone(),
        created_by: actor_id.to_string(),
        created_at: at,
        deleted_at: None,
    }
}

pub struct Reimbursements<'a> {
    db: &'a Database,
    notifier: &'a Notifier,
}

impl<'a> Reimbursements<'a> {
    pub fn new(db: &'a Database, notifier: &'a Notifier) -> Self {
        Self { db, notifier }
    }

    fn load(&self, company_id: &str, id: &str) -> ServiceResult<ReimbursementRequest> {
        match self.db.get_reimbursement(company_id, id)? {
            Some(r) if r.deleted_at.is_none() => Ok(r),
            _ => Err(ServiceError::NotFound(format!("reimbursement {id}"))),
        }
    }

    fn tell_requester(&self, r: &ReimbursementRequest, text: String) {
        match self.db.get_user(&r.requester_id) {
            Ok(Some(user)) => self.notifier.dispatch(vec![Notice::user(user, text)]),
            Ok(None) => debug!(user_id = %r.requester_id, "requester gone, skipping notice"),
            Err(e) => warn!(error = %e, "could not load requester for notice"),
        }
    }

    /// File a request on the caller's own behalf. Any member may do this.
    pub async fn submit(
        &self,
        actor_id: &str,
        company_id: &str,
        input: ReimbursementInput,
        now: DateTime<Utc>,
    ) -> ServiceResult<ReimbursementRequest> {
        require_member(self.db, company_id, actor_id)?;
        let description = input.description.trim().to_string();
        if description.is_empty() {
            return Err(ServiceError::Validation("description is required".into()));
        }
        if input.amount <= Decimal::ZERO {
            return Err(ServiceError::Validation("amount must be greater than zero".into()));
        }
        if input.vat_amount < Decimal::ZERO || input.vat_amount >= input.amount {
            return Err(ServiceError::Validation(
                "vat_amount must be at least zero and less than amount".into(),
            ));
        }
        if let Some(account_id) = input.account_id.as_deref() {
            match self.db.get_account(company_id, account_id)? {
                Some(a) if a.class == AccountClass::Expense => {}
                _ => {
                    return Err(ServiceError::Validation(format!(
                        "{account_id} is not an expense account"
                    )))
                }
            }
        }

        let request = ReimbursementRequest {
            id: new_id(),
            company_id: company_id.to_string(),
            requester_id: actor_id.to_string(),
            description,
            amount: input.amount,
            vat_amount: input.vat_amount,
            issue_date: input.issue_date,
            account_id: input.account_id,
            receipt_url: input.receipt_url,
            status: ReimbursementStatus::Pending,
            approved_by: None,
            approved_at: None,
            rejected_reason: None,
            paid_at: None,
            payment_reference: None,
            expense_id: None,
            created_at: now,
            deleted_at: None,
        };
        self.db.insert_reimbursement(&request)?;
        info!(company_id, reimbursement_id = %request.id, amount = %request.amount, "reimbursement submitted");

        let requester = self
            .db
            .get_user(actor_id)?
            .map(|u| u.name)
            .unwrap_or_else(|| actor_id.to_string());
        let text = notify::reimbursement_submitted(&requester, &request);
        let mut notices = vec![Notice::group(text.clone())];
        notices.extend(
            self.db
                .members_with_permission(company_id, Permission::ApproveReimbursements)?
                .into_iter()
                .filter(|approver| approver.id != actor_id)
                .map(|approver| Notice::user(approver, text.clone())),
        );
        self.notifier.dispatch(notices);
        Ok(request)
    }

    /// Requests visible to the caller: everything for approvers and payers,
    /// their own requests for everyone else.
    pub fn list(
        &self,
        actor_id: &str,
        company_id: &str,
        status: Option<ReimbursementStatus>,
    ) -> ServiceResult<Vec<ReimbursementRequest>> {
        let membership = require_member(self.db, company_id, actor_id)?;
        let all = self.db.list_reimbursements(company_id, status)?;
        if membership.can(Permission::ApproveReimbursements) || membership.can(Permission::PaySettlements) {
            return Ok(all);
        }
        Ok(all.into_iter().filter(|r| r.requester_id == actor_id).collect())
    }

    pub async fn approve(
        &self,
        actor_id: &str,
        company_id: &str,
        id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<ReimbursementRequest> {
        require_permission(self.db, company_id, actor_id, Permission::ApproveReimbursements)?;
        let mut request = self.load(company_id, id)?;
        let from = request.status;
        request.approve(actor_id, now)?;
        self.db.update_reimbursement(&request, from)?;
        info!(company_id, reimbursement_id = id, approver = actor_id, "reimbursement approved");
        self.tell_requester(&request, notify::reimbursement_approved(&request));
        Ok(request)
    }

    pub async fn reject(
        &self,
        actor_id: &str,
        company_id: &str,
        id: &str,
        reason: &str,
    ) -> ServiceResult<ReimbursementRequest> {
        require_permission(self.db, company_id, actor_id, Permission::ApproveReimbursements)?;
        let mut request = self.load(company_id, id)?;
        let from = request.status;
        request.reject(actor_id, reason)?;
        self.db.update_reimbursement(&request, from)?;
        info!(company_id, reimbursement_id = id, approver = actor_id, "reimbursement rejected");
        self.tell_requester(&request, notify::reimbursement_rejected(&request));
        Ok(request)
    }

    /// Pay an approved request and book the matching expense. Returns the
    /// paid request and the new expense.
    pub async fn pay(
        &self,
        actor_id: &str,
        company_id: &str,
        id: &str,
        reference: Option<String>,
        now: DateTime<Utc>,
    ) -> ServiceResult<(ReimbursementRequest, Expense)> {
        require_permission(self.db, company_id, actor_id, Permission::PaySettlements)?;
        let mut request = self.load(company_id, id)?;
        let expense = expense_for(&request, actor_id, now);
        let reference = reference.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        request.pay(reference, &expense.id, now)?;
        self.db.pay_reimbursement(&request, &expense)?;
        info!(
            company_id,
            reimbursement_id = id,
            expense_id = %expense.id,
            amount = %expense.amount,
            "reimbursement paid"
        );
        self.tell_requester(&request, notify::reimbursement_paid(&request));
        Ok((request, expense))
    }
}

// Paying employees back for expenses they covered out of pocket.

use std::collections::HashSet;

use baht_core::db::Database;
use baht_core::model::{new_id, PendingSettlement, Permission, SettlementPayment};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};

use crate::access::{require_member, require_permission};
use crate::error::{ServiceError, ServiceResult};
use crate::notify::{self, Notice, Notifier};

#[derive(Debug, Clone, Deserialize)]
pub struct SettleInput {
    pub payee_id: String,
    pub expense_ids: Vec<String>,
    pub reference: Option<String>,
}

pub struct Settlements<'a> {
    db: &'a Database,
    notifier: &'a Notifier,
}

impl<'a> Settlements<'a> {
    pub fn new(db: &'a Database, notifier: &'a Notifier) -> Self {
        Self { db, notifier }
    }

    /// What the company owes each employee, one row per payee.
    ///
    /// Members without `PaySettlements` only see their own row.
    pub fn pending_summary(&self, actor_id: &str, company_id: &str) -> ServiceResult<Vec<PendingSettlement>> {
        let membership = require_member(self.db, company_id, actor_id)?;
        let only = (!membership.can(Permission::PaySettlements)).then_some(actor_id);
        let expenses = self.db.pending_settlement_expenses(company_id, only)?;

        // Rows arrive ordered by payee.
        let mut summary: Vec<PendingSettlement> = Vec::new();
        for expense in expenses {
            let Some(payee_id) = expense.paid_by.employee_id() else {
                continue;
            };
            match summary.last_mut() {
                Some(row) if row.payee_id == payee_id => {
                    row.expense_count += 1;
                    row.total_amount += expense.net_paid;
                }
                _ => {
                    let payee_name = self
                        .db
                        .get_user(payee_id)?
                        .map(|u| u.name)
                        .unwrap_or_else(|| payee_id.to_string());
                    summary.push(PendingSettlement {
                        payee_id: payee_id.to_string(),
                        payee_name,
                        expense_count: 1,
                        total_amount: expense.net_paid,
                    });
                }
            }
        }
        Ok(summary)
    }

    /// Pay `payee_id` for the listed expenses in one payment.
    pub async fn settle(
        &self,
        actor_id: &str,
        company_id: &str,
        input: SettleInput,
        now: DateTime<Utc>,
    ) -> ServiceResult<SettlementPayment> {
        require_permission(self.db, company_id, actor_id, Permission::PaySettlements)?;
        if input.expense_ids.is_empty() {
            return Err(ServiceError::Validation("select at least one expense to settle".into()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = input.expense_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(ServiceError::Validation(format!("expense {dup} is listed twice")));
        }

        let mut total = Decimal::ZERO;
        for id in &input.expense_ids {
            let expense = self
                .db
                .get_expense(company_id, id)?
                .ok_or_else(|| ServiceError::NotFound(format!("expense {id}")))?;
            total += expense.net_paid;
        }

        let payment = SettlementPayment {
            id: new_id(),
            company_id: company_id.to_string(),
            payee_id: input.payee_id,
            expense_ids: input.expense_ids,
            total_amount: total,
            paid_at: now,
            reference: input.reference.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
            created_by: actor_id.to_string(),
            reversed_at: None,
            reversed_by: None,
        };
        // Pending, payee and deletion checks happen inside the write transaction.
        self.db.record_settlement(&payment)?;
        info!(
            company_id,
            settlement_id = %payment.id,
            payee_id = %payment.payee_id,
            expenses = payment.expense_ids.len(),
            total = %payment.total_amount,
            "settlement recorded"
        );

        self.tell_payee(&payment, notify::settlement_paid(&payment));
        Ok(payment)
    }

    /// Undo a settlement; its expenses become pending again.
    pub async fn reverse(
        &self,
        actor_id: &str,
        company_id: &str,
        settlement_id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<SettlementPayment> {
        require_permission(self.db, company_id, actor_id, Permission::PaySettlements)?;
        if self.db.get_settlement(company_id, settlement_id)?.is_none() {
            return Err(ServiceError::NotFound(format!("settlement {settlement_id}")));
        }
        let payment = self.db.reverse_settlement(company_id, settlement_id, actor_id, now)?;
        info!(company_id, settlement_id, by = actor_id, "settlement reversed");
        self.tell_payee(&payment, notify::settlement_reversed(&payment));
        Ok(payment)
    }

    pub fn list(&self, actor_id: &str, company_id: &str) -> ServiceResult<Vec<SettlementPayment>> {
        let membership = require_member(self.db, company_id, actor_id)?;
        let all = self.db.list_settlements(company_id)?;
        if membership.can(Permission::PaySettlements) {
            return Ok(all);
        }
        Ok(all.into_iter().filter(|p| p.payee_id == actor_id).collect())
    }

    fn tell_payee(&self, payment: &SettlementPayment, text: String) {
        match self.db.get_user(&payment.payee_id) {
            Ok(Some(user)) => self.notifier.dispatch(vec![Notice::user(user, text)]),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not load payee for notice"),
        }
    }
}

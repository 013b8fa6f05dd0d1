// Reimbursement requests and settlement payments.
//
// Settlement writes run in a single transaction and re-check every expense's
// status inside it, so two concurrent payouts cannot both settle the same
// expense.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use super::entries::{expense_from_row, insert_expense_with, EXPENSE_COLUMNS};
use super::{
    date_col, date_to_sql, dec_col, enum_col, opt_ts_col, opt_ts_to_sql, ts_col, ts_to_sql,
    Database,
};
use crate::model::{
    Expense, ReimbursementRequest, ReimbursementStatus, SettlementPayment, WorkflowError,
};

const REIMBURSEMENT_COLUMNS: &str = "id, company_id, requester_id, description, amount, \
     vat_amount, issue_date, account_id, receipt_url, status, approved_by, approved_at, \
     rejected_reason, paid_at, payment_reference, expense_id, created_at, deleted_at";

fn reimbursement_from_row(row: &Row<'_>) -> rusqlite::Result<ReimbursementRequest> {
    Ok(ReimbursementRequest {
        id: row.get(0)?,
        company_id: row.get(1)?,
        requester_id: row.get(2)?,
        description: row.get(3)?,
        amount: dec_col(row, 4)?,
        vat_amount: dec_col(row, 5)?,
        issue_date: date_col(row, 6)?,
        account_id: row.get(7)?,
        receipt_url: row.get(8)?,
        status: enum_col(row, 9, ReimbursementStatus::from_str_status)?,
        approved_by: row.get(10)?,
        approved_at: opt_ts_col(row, 11)?,
        rejected_reason: row.get(12)?,
        paid_at: opt_ts_col(row, 13)?,
        payment_reference: row.get(14)?,
        expense_id: row.get(15)?,
        created_at: ts_col(row, 16)?,
        deleted_at: opt_ts_col(row, 17)?,
    })
}

/// Settlement row without its expense ids; those come from `settlement_items`.
fn settlement_from_row(row: &Row<'_>) -> rusqlite::Result<SettlementPayment> {
    Ok(SettlementPayment {
        id: row.get(0)?,
        company_id: row.get(1)?,
        payee_id: row.get(2)?,
        expense_ids: Vec::new(),
        total_amount: dec_col(row, 3)?,
        paid_at: ts_col(row, 4)?,
        reference: row.get(5)?,
        created_by: row.get(6)?,
        reversed_at: opt_ts_col(row, 7)?,
        reversed_by: row.get(8)?,
    })
}

const SETTLEMENT_COLUMNS: &str =
    "id, company_id, payee_id, total_amount, paid_at, reference, created_by, reversed_at, reversed_by";

fn conflict(message: impl Into<String>) -> anyhow::Error {
    let message = message.into();
    debug!(%message, "workflow write refused");
    anyhow::Error::new(WorkflowError::Conflict(message))
}

fn load_settlement_items(conn: &rusqlite::Connection, settlement_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT expense_id FROM settlement_items WHERE settlement_id = ?1 ORDER BY expense_id")
        .context("failed to prepare settlement items query")?;
    let ids = stmt
        .query_map(params![settlement_id], |row| row.get(0))
        .context("failed to query settlement items")?
        .collect::<std::result::Result<Vec<String>, _>>()
        .context("failed to map settlement item rows")?;
    Ok(ids)
}

/// Writes `r` only while the stored row is still in status `from`.
fn update_reimbursement_with(
    conn: &rusqlite::Connection,
    r: &ReimbursementRequest,
    from: ReimbursementStatus,
) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE reimbursements SET
                status = ?3, approved_by = ?4, approved_at = ?5, rejected_reason = ?6,
                paid_at = ?7, payment_reference = ?8, expense_id = ?9, deleted_at = ?10
             WHERE company_id = ?1 AND id = ?2 AND status = ?11",
            params![
            r.company_id,
            r.id,
            r.status.as_str(),
            r.approved_by,
            opt_ts_to_sql(r.approved_at),
            r.rejected_reason,
            opt_ts_to_sql(r.paid_at),
            r.payment_reference,
            r.expense_id,
            opt_ts_to_sql(r.deleted_at),
            from.as_str(),
        ],
    )
    .context("failed to update reimbursement")?;
    if changed == 0 {
        return Err(conflict(format!(
            "reimbursement {} is no longer {}",
            r.id,
            from.as_str()
        )));
    }
    Ok(())
}

impl Database {
    // ------------------------------------------------------------------
    // Reimbursements
    // ------------------------------------------------------------------

    pub fn insert_reimbursement(&self, r: &ReimbursementRequest) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO reimbursements ({REIMBURSEMENT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
            ),
            params![
                r.id,
                r.company_id,
                r.requester_id,
                r.description,
                r.amount.to_string(),
                r.vat_amount.to_string(),
                date_to_sql(r.issue_date),
                r.account_id,
                r.receipt_url,
                r.status.as_str(),
                r.approved_by,
                opt_ts_to_sql(r.approved_at),
                r.rejected_reason,
                opt_ts_to_sql(r.paid_at),
                r.payment_reference,
                r.expense_id,
                ts_to_sql(r.created_at),
                opt_ts_to_sql(r.deleted_at),
            ],
        )
        .context("failed to insert reimbursement")?;
        Ok(())
    }

    pub fn get_reimbursement(&self, company_id: &str, id: &str) -> Result<Option<ReimbursementRequest>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {REIMBURSEMENT_COLUMNS} FROM reimbursements WHERE company_id = ?1 AND id = ?2"
            ),
            params![company_id, id],
            reimbursement_from_row,
        )
        .optional()
        .context("failed to load reimbursement")
    }

    /// Live requests of a company, newest first, optionally narrowed to one
    /// status.
    pub fn list_reimbursements(
        &self,
        company_id: &str,
        status: Option<ReimbursementStatus>,
    ) -> Result<Vec<ReimbursementRequest>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {REIMBURSEMENT_COLUMNS} FROM reimbursements
                 WHERE company_id = ?1 AND deleted_at IS NULL AND (?2 IS NULL OR status = ?2)
                 ORDER BY created_at DESC"
            ))
            .context("failed to prepare list_reimbursements query")?;
        let rows = stmt
            .query_map(
                params![company_id, status.map(|s| s.as_str())],
                reimbursement_from_row,
            )
            .context("failed to query reimbursements")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map reimbursement rows")?;
        Ok(rows)
    }

    /// Persist the mutable fields of a request after a workflow step that
    /// started from status `from`. If another write moved the stored request
    /// on in the meantime nothing is written and a
    /// [`WorkflowError::Conflict`] is returned.
    pub fn update_reimbursement(&self, r: &ReimbursementRequest, from: ReimbursementStatus) -> Result<()> {
        let conn = self.conn();
        update_reimbursement_with(&conn, r, from)
    }

    /// Record payment of an approved request: insert the company-paid expense
    /// and mark the request paid in one transaction. Fails with
    /// [`WorkflowError::Conflict`] if the stored request is no longer approved.
    pub fn pay_reimbursement(&self, paid: &ReimbursementRequest, expense: &Expense) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let stored: Option<String> = tx
            .query_row(
                "SELECT status FROM reimbursements WHERE company_id = ?1 AND id = ?2",
                params![paid.company_id, paid.id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read reimbursement status")?;
        match stored.as_deref() {
            Some("approved") => {}
            Some(other) => return Err(conflict(format!("reimbursement is {other}, not approved"))),
            None => return Err(conflict("reimbursement not found")),
        }

        insert_expense_with(&tx, expense)?;
        update_reimbursement_with(&tx, paid, ReimbursementStatus::Approved)?;

        tx.commit().context("failed to commit pay_reimbursement")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Settlements
    // ------------------------------------------------------------------

    /// Live employee-paid expenses still owed to the employee, optionally for
    /// one payee, ordered by payee then date.
    pub fn pending_settlement_expenses(
        &self,
        company_id: &str,
        payee_id: Option<&str>,
    ) -> Result<Vec<Expense>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EXPENSE_COLUMNS} FROM expenses
                 WHERE company_id = ?1 AND deleted_at IS NULL
                   AND settlement_status = 'pending' AND paid_by_kind = 'employee'
                   AND (?2 IS NULL OR paid_by_user_id = ?2)
                 ORDER BY paid_by_user_id, issue_date, created_at"
            ))
            .context("failed to prepare pending settlement query")?;
        let rows = stmt
            .query_map(params![company_id, payee_id], expense_from_row)
            .context("failed to query pending settlement expenses")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map pending settlement rows")?;
        Ok(rows)
    }

    /// Settle a batch of expenses for one payee.
    ///
    /// Every expense must belong to the payment's company, be live, be paid by
    /// `payment.payee_id` and still be pending, and `total_amount` must equal
    /// the sum of their `net_paid`. Otherwise nothing is written and a
    /// [`WorkflowError::Conflict`] is returned.
    pub fn record_settlement(&self, payment: &SettlementPayment) -> Result<()> {
        if payment.expense_ids.is_empty() {
            return Err(conflict("a settlement needs at least one expense"));
        }

        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let mut total = Decimal::ZERO;
        for expense_id in &payment.expense_ids {
            let expense = tx
                .query_row(
                    &format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE company_id = ?1 AND id = ?2"),
                    params![payment.company_id, expense_id],
                    expense_from_row,
                )
                .optional()
                .context("failed to load expense for settlement")?
                .ok_or_else(|| conflict(format!("expense {expense_id} not found")))?;

            if expense.is_deleted() {
                return Err(conflict(format!("expense {expense_id} is deleted")));
            }
            if expense.paid_by.employee_id() != Some(payment.payee_id.as_str()) {
                return Err(conflict(format!(
                    "expense {expense_id} was not paid by {}",
                    payment.payee_id
                )));
            }
            if expense.settlement_status != crate::model::SettlementStatus::Pending {
                return Err(conflict(format!(
                    "expense {expense_id} is {}, not pending",
                    expense.settlement_status.as_str()
                )));
            }
            total += expense.net_paid;

            tx.execute(
                "UPDATE expenses SET settlement_status = 'settled', settlement_id = ?2 WHERE id = ?1",
                params![expense_id, payment.id],
            )
            .context("failed to mark expense settled")?;
        }

        if total != payment.total_amount {
            return Err(conflict(format!(
                "settlement total {} does not match expenses total {total}",
                payment.total_amount
            )));
        }

        tx.execute(
            &format!(
                "INSERT INTO settlements ({SETTLEMENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                payment.id,
                payment.company_id,
                payment.payee_id,
                payment.total_amount.to_string(),
                ts_to_sql(payment.paid_at),
                payment.reference,
                payment.created_by,
                opt_ts_to_sql(payment.reversed_at),
                payment.reversed_by,
            ],
        )
        .context("failed to insert settlement")?;

        for expense_id in &payment.expense_ids {
            tx.execute(
                "INSERT INTO settlement_items (settlement_id, expense_id) VALUES (?1, ?2)",
                params![payment.id, expense_id],
            )
            .context("failed to insert settlement item")?;
        }

        tx.commit().context("failed to commit settlement")?;
        Ok(())
    }

    /// Undo a settlement: its expenses go back to pending and the payment is
    /// marked reversed. Reversing twice is a [`WorkflowError::Conflict`].
    pub fn reverse_settlement(
        &self,
        company_id: &str,
        settlement_id: &str,
        reversed_by: &str,
        at: DateTime<Utc>,
    ) -> Result<SettlementPayment> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let mut payment = tx
            .query_row(
                &format!("SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE company_id = ?1 AND id = ?2"),
                params![company_id, settlement_id],
                settlement_from_row,
            )
            .optional()
            .context("failed to load settlement")?
            .ok_or_else(|| conflict(format!("settlement {settlement_id} not found")))?;

        if payment.is_reversed() {
            return Err(conflict(format!("settlement {settlement_id} is already reversed")));
        }

        tx.execute(
            "UPDATE expenses SET settlement_status = 'pending', settlement_id = NULL
             WHERE company_id = ?1 AND settlement_id = ?2",
            params![company_id, settlement_id],
        )
        .context("failed to reopen settled expenses")?;

        tx.execute(
            "UPDATE settlements SET reversed_at = ?2, reversed_by = ?3 WHERE id = ?1",
            params![settlement_id, ts_to_sql(at), reversed_by],
        )
        .context("failed to mark settlement reversed")?;

        payment.expense_ids = load_settlement_items(&tx, settlement_id)?;
        payment.reversed_at = Some(at);
        payment.reversed_by = Some(reversed_by.to_string());

        tx.commit().context("failed to commit settlement reversal")?;
        Ok(payment)
    }

    pub fn get_settlement(&self, company_id: &str, id: &str) -> Result<Option<SettlementPayment>> {
        let conn = self.conn();
        let payment = conn
            .query_row(
                &format!("SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE company_id = ?1 AND id = ?2"),
                params![company_id, id],
                settlement_from_row,
            )
            .optional()
            .context("failed to load settlement")?;
        match payment {
            Some(mut p) => {
                p.expense_ids = load_settlement_items(&conn, &p.id)?;
                Ok(Some(p))
            }
            None => Ok(None),
        }
    }

    /// All settlements of a company, newest first, reversed ones included.
    pub fn list_settlements(&self, company_id: &str) -> Result<Vec<SettlementPayment>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE company_id = ?1 ORDER BY paid_at DESC"
            ))
            .context("failed to prepare list_settlements query")?;
        let mut payments = stmt
            .query_map(params![company_id], settlement_from_row)
            .context("failed to query settlements")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map settlement rows")?;
        for p in &mut payments {
            p.expense_ids = load_settlement_items(&conn, &p.id)?;
        }
        Ok(payments)
    }
}

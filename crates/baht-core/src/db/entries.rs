// Expense and income rows.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{
    date_col, date_to_sql, dec_col, enum_col, opt_ts_col, opt_ts_to_sql, ts_col, ts_to_sql,
    Database,
};
use crate::model::{
    DocumentStatus, EntryFilter, Expense, Income, PaidBy, SettlementStatus, WorkflowError,
};
use crate::money::Currency;

pub(super) const EXPENSE_COLUMNS: &str = "id, company_id, contact_id, account_id, description, \
     issue_date, document_number, currency, original_amount, exchange_rate, base_amount, \
     vat_rate, vat_amount, amount, wht_rate, wht_amount, net_paid, paid_by_kind, \
     paid_by_user_id, settlement_status, status, receipt_url, created_by, created_at, deleted_at";

const INCOME_COLUMNS: &str = "id, company_id, contact_id, account_id, description, \
     issue_date, document_number, currency, original_amount, exchange_rate, base_amount, \
     vat_rate, vat_amount, amount, wht_rate, wht_amount, net_received, status, created_by, \
     created_at, deleted_at";

fn currency_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Currency> {
    enum_col(row, idx, Currency::new)
}

pub(super) fn expense_from_row(row: &Row<'_>) -> rusqlite::Result<Expense> {
    let kind: String = row.get(17)?;
    let paid_by_user: Option<String> = row.get(18)?;
    let paid_by = PaidBy::from_parts(&kind, paid_by_user).ok_or_else(|| {
        super::conversion_err(17, format!("unknown paid_by {kind:?}"))
    })?;
    Ok(Expense {
        id: row.get(0)?,
        company_id: row.get(1)?,
        contact_id: row.get(2)?,
        account_id: row.get(3)?,
        description: row.get(4)?,
        issue_date: date_col(row, 5)?,
        document_number: row.get(6)?,
        currency: currency_col(row, 7)?,
        original_amount: dec_col(row, 8)?,
        exchange_rate: dec_col(row, 9)?,
        base_amount: dec_col(row, 10)?,
        vat_rate: dec_col(row, 11)?,
        vat_amount: dec_col(row, 12)?,
        amount: dec_col(row, 13)?,
        wht_rate: dec_col(row, 14)?,
        wht_amount: dec_col(row, 15)?,
        net_paid: dec_col(row, 16)?,
        paid_by,
        settlement_status: enum_col(row, 19, SettlementStatus::from_str_status)?,
        status: enum_col(row, 20, DocumentStatus::from_str_status)?,
        receipt_url: row.get(21)?,
        created_by: row.get(22)?,
        created_at: ts_col(row, 23)?,
        deleted_at: opt_ts_col(row, 24)?,
    })
}

fn income_from_row(row: &Row<'_>) -> rusqlite::Result<Income> {
    Ok(Income {
        id: row.get(0)?,
        company_id: row.get(1)?,
        contact_id: row.get(2)?,
        account_id: row.get(3)?,
        description: row.get(4)?,
        issue_date: date_col(row, 5)?,
        document_number: row.get(6)?,
        currency: currency_col(row, 7)?,
        original_amount: dec_col(row, 8)?,
        exchange_rate: dec_col(row, 9)?,
        base_amount: dec_col(row, 10)?,
        vat_rate: dec_col(row, 11)?,
        vat_amount: dec_col(row, 12)?,
        amount: dec_col(row, 13)?,
        wht_rate: dec_col(row, 14)?,
        wht_amount: dec_col(row, 15)?,
        net_received: dec_col(row, 16)?,
        status: enum_col(row, 17, DocumentStatus::from_str_status)?,
        created_by: row.get(18)?,
        created_at: ts_col(row, 19)?,
        deleted_at: opt_ts_col(row, 20)?,
    })
}

/// Insert an expense using any connection or open transaction.
pub(super) fn insert_expense_with(conn: &rusqlite::Connection, e: &Expense) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO expenses ({EXPENSE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)"
        ),
        params![
            e.id,
            e.company_id,
            e.contact_id,
            e.account_id,
            e.description,
            date_to_sql(e.issue_date),
            e.document_number,
            e.currency.as_str(),
            e.original_amount.to_string(),
            e.exchange_rate.to_string(),
            e.base_amount.to_string(),
            e.vat_rate.to_string(),
            e.vat_amount.to_string(),
            e.amount.to_string(),
            e.wht_rate.to_string(),
            e.wht_amount.to_string(),
            e.net_paid.to_string(),
            e.paid_by.kind_str(),
            e.paid_by.employee_id(),
            e.settlement_status.as_str(),
            e.status.as_str(),
            e.receipt_url,
            e.created_by,
            ts_to_sql(e.created_at),
            opt_ts_to_sql(e.deleted_at),
        ],
    )
    .context("failed to insert expense")?;
    Ok(())
}

impl Database {
    // ------------------------------------------------------------------
    // Expenses
    // ------------------------------------------------------------------

    pub fn insert_expense(&self, expense: &Expense) -> Result<()> {
        let conn = self.conn();
        insert_expense_with(&conn, expense)
    }

    /// Load an expense of `company_id`, including soft-deleted ones.
    pub fn get_expense(&self, company_id: &str, id: &str) -> Result<Option<Expense>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE company_id = ?1 AND id = ?2"),
            params![company_id, id],
            expense_from_row,
        )
        .optional()
        .context("failed to load expense")
    }

    /// Expenses matching `filter`, ordered by issue date then creation time.
    pub fn list_expenses(&self, company_id: &str, filter: &EntryFilter) -> Result<Vec<Expense>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EXPENSE_COLUMNS} FROM expenses
                 WHERE company_id = ?1
                   AND (?2 IS NULL OR issue_date >= ?2)
                   AND (?3 IS NULL OR issue_date <= ?3)
                   AND (?4 IS NULL OR status = ?4)
                   AND (?5 OR deleted_at IS NULL)
                 ORDER BY issue_date, created_at"
            ))
            .context("failed to prepare list_expenses query")?;
        let expenses = stmt
            .query_map(
                params![
                    company_id,
                    filter.from.map(date_to_sql),
                    filter.to.map(date_to_sql),
                    filter.status.map(|s| s.as_str()),
                    filter.include_deleted,
                ],
                expense_from_row,
            )
            .context("failed to query expenses")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map expense rows")?;
        Ok(expenses)
    }

    /// Set the document status of a live expense. Returns `false` when no
    /// such expense exists.
    pub fn update_expense_status(
        &self,
        company_id: &str,
        id: &str,
        status: DocumentStatus,
    ) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE expenses SET status = ?3
                 WHERE company_id = ?1 AND id = ?2 AND deleted_at IS NULL",
                params![company_id, id, status.as_str()],
            )
            .context("failed to update expense status")?;
        Ok(changed > 0)
    }

    /// Soft-delete an expense. Idempotent: returns `false` if it was already
    /// deleted or does not exist. A live expense that sits in a settlement is
    /// left alone and [`WorkflowError::Conflict`] is returned.
    pub fn soft_delete_expense(
        &self,
        company_id: &str,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE expenses SET deleted_at = ?3
                 WHERE company_id = ?1 AND id = ?2 AND deleted_at IS NULL
                   AND settlement_status != 'settled'",
                params![company_id, id, ts_to_sql(at)],
            )
            .context("failed to delete expense")?;
        if changed > 0 {
            return Ok(true);
        }

        let settled: bool = conn
            .query_row(
                "SELECT settlement_status = 'settled' FROM expenses
                 WHERE company_id = ?1 AND id = ?2 AND deleted_at IS NULL",
                params![company_id, id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to check expense settlement")?
            .unwrap_or(false);
        if settled {
            return Err(anyhow::Error::new(WorkflowError::Conflict(format!(
                "expense {id} is settled; reverse its settlement before deleting it"
            ))));
        }
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Incomes
    // ------------------------------------------------------------------

    pub fn insert_income(&self, i: &Income) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO incomes ({INCOME_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                         ?17, ?18, ?19, ?20, ?21)"
            ),
            params![
                i.id,
                i.company_id,
                i.contact_id,
                i.account_id,
                i.description,
                date_to_sql(i.issue_date),
                i.document_number,
                i.currency.as_str(),
                i.original_amount.to_string(),
                i.exchange_rate.to_string(),
                i.base_amount.to_string(),
                i.vat_rate.to_string(),
                i.vat_amount.to_string(),
                i.amount.to_string(),
                i.wht_rate.to_string(),
                i.wht_amount.to_string(),
                i.net_received.to_string(),
                i.status.as_str(),
                i.created_by,
                ts_to_sql(i.created_at),
                opt_ts_to_sql(i.deleted_at),
            ],
        )
        .context("failed to insert income")?;
        Ok(())
    }

    pub fn get_income(&self, company_id: &str, id: &str) -> Result<Option<Income>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {INCOME_COLUMNS} FROM incomes WHERE company_id = ?1 AND id = ?2"),
            params![company_id, id],
            income_from_row,
        )
        .optional()
        .context("failed to load income")
    }

    pub fn list_incomes(&self, company_id: &str, filter: &EntryFilter) -> Result<Vec<Income>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {INCOME_COLUMNS} FROM incomes
                 WHERE company_id = ?1
                   AND (?2 IS NULL OR issue_date >= ?2)
                   AND (?3 IS NULL OR issue_date <= ?3)
                   AND (?4 IS NULL OR status = ?4)
                   AND (?5 OR deleted_at IS NULL)
                 ORDER BY issue_date, created_at"
            ))
            .context("failed to prepare list_incomes query")?;
        let incomes = stmt
            .query_map(
                params![
                    company_id,
                    filter.from.map(date_to_sql),
                    filter.to.map(date_to_sql),
                    filter.status.map(|s| s.as_str()),
                    filter.include_deleted,
                ],
                income_from_row,
            )
            .context("failed to query incomes")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map income rows")?;
        Ok(incomes)
    }

    pub fn update_income_status(
        &self,
        company_id: &str,
        id: &str,
        status: DocumentStatus,
    ) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE incomes SET status = ?3
                 WHERE company_id = ?1 AND id = ?2 AND deleted_at IS NULL",
                params![company_id, id, status.as_str()],
            )
            .context("failed to update income status")?;
        Ok(changed > 0)
    }

    pub fn soft_delete_income(&self, company_id: &str, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE incomes SET deleted_at = ?3
                 WHERE company_id = ?1 AND id = ?2 AND deleted_at IS NULL",
                params![company_id, id, ts_to_sql(at)],
            )
            .context("failed to delete income")?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::super::test_support::*;
    use crate::model::{DocumentStatus, Expense, Income, PaidBy, SettlementStatus};
    use crate::money::Currency;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    /// A THB expense of 1,000 + 7% VAT from the juristic vendor.
    pub fn expense(id: &str, issue_date: NaiveDate) -> Expense {
        Expense {
            id: id.to_string(),
            company_id: COMPANY.to_string(),
            contact_id: Some(VENDOR.to_string()),
            account_id: None,
            description: "Printer paper".to_string(),
            issue_date,
            document_number: Some(format!("INV-{id}")),
            currency: Currency::thb(),
            original_amount: dec!(1070.00),
            exchange_rate: Decimal::ONE,
            base_amount: dec!(1000.00),
            vat_rate: dec!(7),
            vat_amount: dec!(70.00),
            amount: dec!(1070.00),
            wht_rate: Decimal::ZERO,
            wht_amount: Decimal::ZERO,
            net_paid: dec!(1070.00),
            paid_by: PaidBy::Company,
            settlement_status: SettlementStatus::NotRequired,
            status: DocumentStatus::Ready,
            receipt_url: None,
            created_by: OWNER.to_string(),
            created_at: at(2024, 5, 1),
            deleted_at: None,
        }
    }

    /// An expense paid out of pocket by the staff member.
    pub fn staff_paid(id: &str, issue_date: NaiveDate, net: Decimal) -> Expense {
        Expense {
            paid_by: PaidBy::Employee {
                user_id: STAFF.to_string(),
            },
            settlement_status: SettlementStatus::Pending,
            vat_amount: Decimal::ZERO,
            vat_rate: Decimal::ZERO,
            base_amount: net,
            amount: net,
            original_amount: net,
            net_paid: net,
            created_by: STAFF.to_string(),
            ..expense(id, issue_date)
        }
    }

    /// A 10,000 + 7% VAT service income with 3% withheld by the customer.
    pub fn income(id: &str, issue_date: NaiveDate) -> Income {
        Income {
            id: id.to_string(),
            company_id: COMPANY.to_string(),
            contact_id: Some(VENDOR.to_string()),
            account_id: None,
            description: "Consulting".to_string(),
            issue_date,
            document_number: Some(format!("TAX-{id}")),
            currency: Currency::thb(),
            original_amount: dec!(10700.00),
            exchange_rate: Decimal::ONE,
            base_amount: dec!(10000.00),
            vat_rate: dec!(7),
            vat_amount: dec!(700.00),
            amount: dec!(10700.00),
            wht_rate: dec!(3),
            wht_amount: dec!(300.00),
            net_received: dec!(10400.00),
            status: DocumentStatus::Ready,
            created_by: OWNER.to_string(),
            created_at: at(2024, 5, 1),
            deleted_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::fixtures::*;
    use crate::model::{DocumentStatus, EntryFilter, PaidBy, WorkflowError};
    use rust_decimal_macros::dec;

    #[test]
    fn insert_and_get_expense_round_trip() {
        let db = seeded_db();
        let e = staff_paid("e1", date(2024, 5, 3), dec!(250.50));
        db.insert_expense(&e).unwrap();

        let loaded = db.get_expense(COMPANY, "e1").unwrap().unwrap();
        assert_eq!(loaded, e);
        assert_eq!(loaded.net_paid, dec!(250.50));
        assert_eq!(
            loaded.paid_by,
            PaidBy::Employee {
                user_id: STAFF.into()
            }
        );
        assert!(db.get_expense("other", "e1").unwrap().is_none());
    }

    #[test]
    fn list_expenses_filters_by_range_status_and_deletion() {
        let db = seeded_db();
        db.insert_expense(&expense("apr", date(2024, 4, 30))).unwrap();
        db.insert_expense(&expense("may1", date(2024, 5, 1))).unwrap();
        let mut waiting = expense("may2", date(2024, 5, 31));
        waiting.status = DocumentStatus::WaitingTaxInvoice;
        db.insert_expense(&waiting).unwrap();
        db.insert_expense(&expense("jun", date(2024, 6, 1))).unwrap();

        let may = EntryFilter {
            from: Some(date(2024, 5, 1)),
            to: Some(date(2024, 5, 31)),
            ..Default::default()
        };
        let ids: Vec<_> = db
            .list_expenses(COMPANY, &may)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["may1", "may2"]);

        let waiting_only = EntryFilter {
            status: Some(DocumentStatus::WaitingTaxInvoice),
            ..Default::default()
        };
        assert_eq!(db.list_expenses(COMPANY, &waiting_only).unwrap().len(), 1);

        assert!(db.soft_delete_expense(COMPANY, "may1", at(2024, 6, 2)).unwrap());
        assert_eq!(db.list_expenses(COMPANY, &may).unwrap().len(), 1);
        let with_deleted = EntryFilter {
            include_deleted: true,
            ..may
        };
        assert_eq!(db.list_expenses(COMPANY, &with_deleted).unwrap().len(), 2);
    }

    #[test]
    fn soft_delete_is_idempotent() {
        let db = seeded_db();
        db.insert_expense(&expense("e1", date(2024, 5, 1))).unwrap();
        assert!(db.soft_delete_expense(COMPANY, "e1", at(2024, 5, 2)).unwrap());
        assert!(!db.soft_delete_expense(COMPANY, "e1", at(2024, 5, 3)).unwrap());

        let loaded = db.get_expense(COMPANY, "e1").unwrap().unwrap();
        assert_eq!(loaded.deleted_at, Some(at(2024, 5, 2)));
        assert!(!db.soft_delete_expense(COMPANY, "missing", at(2024, 5, 2)).unwrap());
    }

    #[test]
    fn settled_expense_is_not_deleted() {
        let db = seeded_db();
        db.insert_expense(&staff_paid("e1", date(2024, 5, 1), dec!(100))).unwrap();
        db.conn()
            .execute(
                "UPDATE expenses SET settlement_status = 'settled', settlement_id = 's1' WHERE id = 'e1'",
                [],
            )
            .unwrap();

        let err = db.soft_delete_expense(COMPANY, "e1", at(2024, 5, 2)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkflowError>(),
            Some(WorkflowError::Conflict(_))
        ));
        assert!(db.get_expense(COMPANY, "e1").unwrap().unwrap().deleted_at.is_none());
    }

    #[test]
    fn status_update_skips_deleted_entries() {
        let db = seeded_db();
        db.insert_expense(&expense("e1", date(2024, 5, 1))).unwrap();
        assert!(db
            .update_expense_status(COMPANY, "e1", DocumentStatus::SentToAccountant)
            .unwrap());
        assert_eq!(
            db.get_expense(COMPANY, "e1").unwrap().unwrap().status,
            DocumentStatus::SentToAccountant
        );

        db.soft_delete_expense(COMPANY, "e1", at(2024, 5, 2)).unwrap();
        assert!(!db
            .update_expense_status(COMPANY, "e1", DocumentStatus::Completed)
            .unwrap());
    }

    #[test]
    fn incomes_round_trip_and_delete() {
        let db = seeded_db();
        let i = income("i1", date(2024, 5, 10));
        db.insert_income(&i).unwrap();
        assert_eq!(db.get_income(COMPANY, "i1").unwrap().unwrap(), i);

        assert!(db
            .update_income_status(COMPANY, "i1", DocumentStatus::SentToAccountant)
            .unwrap());
        assert!(db.soft_delete_income(COMPANY, "i1", at(2024, 5, 11)).unwrap());
        assert!(db
            .list_incomes(COMPANY, &EntryFilter::default())
            .unwrap()
            .is_empty());
    }
}

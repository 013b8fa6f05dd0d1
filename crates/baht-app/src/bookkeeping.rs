// Recording expenses and income, moving their supporting documents through
// the workflow, and deleting them.

use baht_core::config::Config;
use baht_core::db::Database;
use baht_core::model::{
    new_id, AccountClass, Contact, DocumentStatus, EntryFilter, Expense, Income, Membership,
    PaidBy, Permission, Role, SettlementStatus, WorkflowError,
};
use baht_core::money::Currency;
use baht_core::tax::{entry_amounts, net_receivable, EntryAmounts, VatMode};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::access::{require_member, require_permission};
use crate::currency::{Conversion, CurrencyConverter};
use crate::error::{ServiceError, ServiceResult};
use crate::vendor::{self, LearnInput};

fn company_paid() -> PaidBy {
    PaidBy::Company
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpenseInput {
    pub contact_id: Option<String>,
    pub account_id: Option<String>,
    pub description: String,
    pub issue_date: NaiveDate,
    pub document_number: Option<String>,
    #[serde(default)]
    pub currency: Currency,
    /// Amount as printed, in `currency`.
    pub amount: Decimal,
    #[serde(default)]
    pub vat_mode: VatMode,
    /// Defaults to the configured standard rate.
    pub vat_rate: Option<Decimal>,
    #[serde(default)]
    pub wht_rate: Decimal,
    #[serde(default = "company_paid")]
    pub paid_by: PaidBy,
    /// A full tax invoice is already in hand.
    #[serde(default)]
    pub has_tax_invoice: bool,
    pub status: Option<DocumentStatus>,
    pub receipt_url: Option<String>,
    /// Remember the contact, account and rates for this vendor.
    #[serde(default)]
    pub learn_vendor: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomeInput {
    pub contact_id: Option<String>,
    pub account_id: Option<String>,
    pub description: String,
    pub issue_date: NaiveDate,
    pub document_number: Option<String>,
    #[serde(default)]
    pub currency: Currency,
    pub amount: Decimal,
    #[serde(default)]
    pub vat_mode: VatMode,
    pub vat_rate: Option<Decimal>,
    /// Rate the customer withholds from us.
    #[serde(default)]
    pub wht_rate: Decimal,
    pub status: Option<DocumentStatus>,
}

/// A requested move of an entry's document status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StatusChange {
    Advance { to: DocumentStatus },
    Revert,
}

fn initial_status(
    requested: Option<DocumentStatus>,
    has_tax_invoice: bool,
    vat: Decimal,
) -> ServiceResult<DocumentStatus> {
    use DocumentStatus::*;
    match requested {
        Some(s @ (Draft | WaitingTaxInvoice | Ready)) => Ok(s),
        Some(other) => Err(ServiceError::Validation(format!(
            "new entries cannot start as `{}`",
            other.as_str()
        ))),
        None if vat.is_zero() || has_tax_invoice => Ok(Ready),
        None => Ok(WaitingTaxInvoice),
    }
}

fn next_status(
    membership: &Membership,
    current: DocumentStatus,
    change: StatusChange,
) -> ServiceResult<DocumentStatus> {
    match change {
        StatusChange::Advance { to } => Ok(current.advance_to(to)?),
        StatusChange::Revert => {
            if current.revert_needs_manager() && !membership.can(Permission::ManageCompany) {
                return Err(ServiceError::Forbidden(
                    "only owners and admins can reopen completed documents".into(),
                ));
            }
            Ok(current.revert()?)
        }
    }
}

fn clean_text(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub struct Bookkeeping<'a> {
    db: &'a Database,
    config: &'a Config,
}

impl<'a> Bookkeeping<'a> {
    pub fn new(db: &'a Database, config: &'a Config) -> Self {
        Self { db, config }
    }

    fn check_contact(&self, company_id: &str, id: Option<&str>) -> ServiceResult<Option<Contact>> {
        let Some(id) = id else {
            return Ok(None);
        };
        match self.db.get_contact(company_id, id)? {
            Some(c) if c.deleted_at.is_none() => Ok(Some(c)),
            _ => Err(ServiceError::Validation(format!("unknown contact {id}"))),
        }
    }

    fn check_account(&self, company_id: &str, id: Option<&str>, class: AccountClass) -> ServiceResult<()> {
        let Some(id) = id else {
            return Ok(());
        };
        match self.db.get_account(company_id, id)? {
            Some(a) if a.class == class => Ok(()),
            Some(a) => Err(ServiceError::Validation(format!(
                "account {} is not an {} account",
                a.code,
                class.as_str()
            ))),
            None => Err(ServiceError::Validation(format!("unknown account {id}"))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn amounts(
        &self,
        company_id: &str,
        amount: Decimal,
        currency: &Currency,
        date: NaiveDate,
        vat_mode: VatMode,
        vat_rate: Option<Decimal>,
        wht_rate: Decimal,
    ) -> ServiceResult<(Conversion, EntryAmounts)> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::Validation("amount must be greater than zero".into()));
        }
        let conversion =
            CurrencyConverter::new(self.db, company_id, &self.config.currency).to_thb(amount, currency, date)?;
        let vat_rate = vat_rate.unwrap_or(self.config.tax.default_vat_rate);
        let amounts = entry_amounts(conversion.thb, vat_rate, vat_mode, wht_rate)?;
        Ok((conversion, amounts))
    }

    // ------------------------------------------------------------------
    // Expenses
    // ------------------------------------------------------------------

    /// Record an expense.
    ///
    /// Managers record anything; staff may record expenses they paid out of
    /// pocket, which then wait for settlement.
    pub fn record_expense(
        &self,
        actor_id: &str,
        company_id: &str,
        input: ExpenseInput,
        now: DateTime<Utc>,
    ) -> ServiceResult<Expense> {
        let membership = require_member(self.db, company_id, actor_id)?;
        let paid_own = input.paid_by.employee_id() == Some(actor_id);
        if !membership.can(Permission::ManageEntries) && !paid_own {
            return Err(ServiceError::Forbidden(
                "staff can only record expenses they paid themselves".into(),
            ));
        }
        let description = input.description.trim().to_string();
        if description.is_empty() {
            return Err(ServiceError::Validation("description is required".into()));
        }
        if let Some(payee) = input.paid_by.employee_id() {
            if self.db.membership(company_id, payee)?.is_none() {
                return Err(ServiceError::Validation(format!("{payee} is not a member of this company")));
            }
        }

        let contact = self.check_contact(company_id, input.contact_id.as_deref())?;
        self.check_account(company_id, input.account_id.as_deref(), AccountClass::Expense)?;
        let (conversion, amounts) = self.amounts(
            company_id,
            input.amount,
            &input.currency,
            input.issue_date,
            input.vat_mode,
            input.vat_rate,
            input.wht_rate,
        )?;
        let status = initial_status(input.status, input.has_tax_invoice, amounts.vat)?;

        let expense = Expense {
            id: new_id(),
            company_id: company_id.to_string(),
            contact_id: input.contact_id.clone(),
            account_id: input.account_id.clone(),
            description,
            issue_date: input.issue_date,
            document_number: clean_text(input.document_number),
            currency: conversion.currency.clone(),
            original_amount: conversion.original,
            exchange_rate: conversion.rate,
            base_amount: amounts.base,
            vat_rate: amounts.vat_rate,
            vat_amount: amounts.vat,
            amount: amounts.total,
            wht_rate: amounts.wht_rate,
            wht_amount: amounts.wht,
            net_paid: amounts.net,
            settlement_status: input.paid_by.initial_settlement(),
            paid_by: input.paid_by,
            status,
            receipt_url: clean_text(input.receipt_url),
            created_by: actor_id.to_string(),
            created_at: now,
            deleted_at: None,
        };
        self.db.insert_expense(&expense)?;
        info!(
            company_id,
            expense_id = %expense.id,
            total = %expense.amount,
            vat = %expense.vat_amount,
            wht = %expense.wht_amount,
            paid_by = expense.paid_by.kind_str(),
            status = expense.status.as_str(),
            "expense recorded"
        );

        if input.learn_vendor {
            match contact {
                Some(contact) => {
                    let learned = vendor::learn(
                        self.db,
                        company_id,
                        &LearnInput {
                            vendor_name: contact.name.clone(),
                            vendor_tax_id: contact.tax_id.clone(),
                            contact_id: Some(contact.id.clone()),
                            account_id: expense.account_id.clone(),
                            vat_rate: Some(expense.vat_rate),
                            wht_rate: Some(expense.wht_rate),
                            description_template: Some(expense.description.clone()),
                        },
                        now,
                    );
                    if let Err(e) = learned {
                        warn!(company_id, expense_id = %expense.id, error = %e, "vendor mapping not learned");
                    }
                }
                None => debug!(expense_id = %expense.id, "no contact, nothing to learn"),
            }
        }

        Ok(expense)
    }

    /// Expenses visible to the caller. Staff see the ones they recorded or
    /// paid for.
    pub fn list_expenses(
        &self,
        actor_id: &str,
        company_id: &str,
        filter: &EntryFilter,
    ) -> ServiceResult<Vec<Expense>> {
        let membership = require_member(self.db, company_id, actor_id)?;
        let expenses = self.db.list_expenses(company_id, filter)?;
        if membership.can(Permission::ManageEntries) || membership.can(Permission::ViewReports) {
            return Ok(expenses);
        }
        Ok(expenses
            .into_iter()
            .filter(|e| e.created_by == actor_id || e.paid_by.employee_id() == Some(actor_id))
            .collect())
    }

    pub fn get_expense(&self, actor_id: &str, company_id: &str, id: &str) -> ServiceResult<Expense> {
        let membership = require_member(self.db, company_id, actor_id)?;
        let expense = self
            .db
            .get_expense(company_id, id)?
            .ok_or_else(|| ServiceError::NotFound(format!("expense {id}")))?;
        let own = expense.created_by == actor_id || expense.paid_by.employee_id() == Some(actor_id);
        if membership.role == Role::Staff && !own {
            return Err(ServiceError::NotFound(format!("expense {id}")));
        }
        Ok(expense)
    }

    pub fn change_expense_status(
        &self,
        actor_id: &str,
        company_id: &str,
        id: &str,
        change: StatusChange,
    ) -> ServiceResult<Expense> {
        let membership = require_permission(self.db, company_id, actor_id, Permission::ManageEntries)?;
        let mut expense = match self.db.get_expense(company_id, id)? {
            Some(e) if !e.is_deleted() => e,
            _ => return Err(ServiceError::NotFound(format!("expense {id}"))),
        };
        let next = next_status(&membership, expense.status, change)?;
        if !self.db.update_expense_status(company_id, id, next)? {
            return Err(ServiceError::NotFound(format!("expense {id}")));
        }
        info!(company_id, expense_id = id, from = expense.status.as_str(), to = next.as_str(), "expense status changed");
        expense.status = next;
        Ok(expense)
    }

    /// Soft-delete an expense. Settled expenses must have their settlement
    /// reversed first. Returns `false` if it was already deleted.
    pub fn delete_expense(
        &self,
        actor_id: &str,
        company_id: &str,
        id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        require_permission(self.db, company_id, actor_id, Permission::ManageEntries)?;
        let expense = self
            .db
            .get_expense(company_id, id)?
            .ok_or_else(|| ServiceError::NotFound(format!("expense {id}")))?;
        if expense.settlement_status == SettlementStatus::Settled {
            return Err(WorkflowError::Conflict(format!(
                "expense {id} is settled; reverse its settlement before deleting it"
            ))
            .into());
        }
        let deleted = self.db.soft_delete_expense(company_id, id, now)?;
        if deleted {
            info!(company_id, expense_id = id, "expense deleted");
        }
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Income
    // ------------------------------------------------------------------

    pub fn record_income(
        &self,
        actor_id: &str,
        company_id: &str,
        input: IncomeInput,
        now: DateTime<Utc>,
    ) -> ServiceResult<Income> {
        require_permission(self.db, company_id, actor_id, Permission::ManageEntries)?;
        let description = input.description.trim().to_string();
        if description.is_empty() {
            return Err(ServiceError::Validation("description is required".into()));
        }
        self.check_contact(company_id, input.contact_id.as_deref())?;
        self.check_account(company_id, input.account_id.as_deref(), AccountClass::Income)?;
        let (conversion, amounts) = self.amounts(
            company_id,
            input.amount,
            &input.currency,
            input.issue_date,
            input.vat_mode,
            input.vat_rate,
            input.wht_rate,
        )?;
        // We issue the tax invoice ourselves, so income starts ready.
        let status = initial_status(input.status, true, amounts.vat)?;

        let income = Income {
            id: new_id(),
            company_id: company_id.to_string(),
            contact_id: input.contact_id,
            account_id: input.account_id,
            description,
            issue_date: input.issue_date,
            document_number: clean_text(input.document_number),
            currency: conversion.currency.clone(),
            original_amount: conversion.original,
            exchange_rate: conversion.rate,
            base_amount: amounts.base,
            vat_rate: amounts.vat_rate,
            vat_amount: amounts.vat,
            amount: amounts.total,
            wht_rate: amounts.wht_rate,
            wht_amount: amounts.wht,
            net_received: net_receivable(amounts.total, amounts.wht),
            status,
            created_by: actor_id.to_string(),
            created_at: now,
            deleted_at: None,
        };
        self.db.insert_income(&income)?;
        info!(
            company_id,
            income_id = %income.id,
            total = %income.amount,
            vat = %income.vat_amount,
            wht = %income.wht_amount,
            "income recorded"
        );
        Ok(income)
    }

    pub fn list_incomes(
        &self,
        actor_id: &str,
        company_id: &str,
        filter: &EntryFilter,
    ) -> ServiceResult<Vec<Income>> {
        require_permission(self.db, company_id, actor_id, Permission::ViewReports)?;
        Ok(self.db.list_incomes(company_id, filter)?)
    }

    pub fn change_income_status(
        &self,
        actor_id: &str,
        company_id: &str,
        id: &str,
        change: StatusChange,
    ) -> ServiceResult<Income> {
        let membership = require_permission(self.db, company_id, actor_id, Permission::ManageEntries)?;
        let mut income = match self.db.get_income(company_id, id)? {
            Some(i) if !i.is_deleted() => i,
            _ => return Err(ServiceError::NotFound(format!("income {id}"))),
        };
        let next = next_status(&membership, income.status, change)?;
        if !self.db.update_income_status(company_id, id, next)? {
            return Err(ServiceError::NotFound(format!("income {id}")));
        }
        info!(company_id, income_id = id, from = income.status.as_str(), to = next.as_str(), "income status changed");
        income.status = next;
        Ok(income)
    }

    pub fn delete_income(
        &self,
        actor_id: &str,
        company_id: &str,
        id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        require_permission(self.db, company_id, actor_id, Permission::ManageEntries)?;
        if self.db.get_income(company_id, id)?.is_none() {
            return Err(ServiceError::NotFound(format!("income {id}")));
        }
        let deleted = self.db.soft_delete_income(company_id, id, now)?;
        if deleted {
            info!(company_id, income_id = id, "income deleted");
        }
        Ok(deleted)
    }
}

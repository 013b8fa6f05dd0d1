// Company set-up records: the company itself, its members, contacts, chart of
// accounts, vendor mappings and exchange rates.

use baht_core::db::Database;
use baht_core::model::{
    new_id, Account, AccountClass, Company, Contact, ContactKind, ExchangeRate, Membership,
    Permission, Role, VendorMapping,
};
use baht_core::money::Currency;
use baht_core::tax::{normalize_tax_id, validate_tax_id};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use crate::access::{require_member, require_permission};
use crate::currency::record_rate;
use crate::error::{ServiceError, ServiceResult};
use crate::vendor::{self, LearnInput};

const HEAD_OFFICE_BRANCH: &str = "00000";

fn checked_tax_id(raw: Option<&str>) -> ServiceResult<Option<String>> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    match normalize_tax_id(raw) {
        Some(id) if validate_tax_id(&id) => Ok(Some(id)),
        _ => Err(ServiceError::Validation(format!("{raw} is not a valid 13-digit tax ID"))),
    }
}

fn required(value: &str, field: &str) -> ServiceResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ServiceError::Validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

// ---------------------------------------------------------------------------
// Companies and members
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct NewCompany {
    pub name: String,
    pub tax_id: Option<String>,
    pub branch_code: Option<String>,
    pub address: Option<String>,
}

/// Create a company owned by the caller, with the default chart of accounts.
pub fn create_company(
    db: &Database,
    actor_id: &str,
    input: NewCompany,
    now: DateTime<Utc>,
) -> ServiceResult<Company> {
    if db.get_user(actor_id)?.is_none() {
        return Err(ServiceError::NotFound(format!("user {actor_id}")));
    }
    let company = Company {
        id: new_id(),
        name: required(&input.name, "name")?,
        tax_id: checked_tax_id(input.tax_id.as_deref())?,
        branch_code: input
            .branch_code
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| HEAD_OFFICE_BRANCH.to_string()),
        address: input.address,
        created_at: now,
    };
    db.create_company(&company, actor_id)?;
    info!(company_id = %company.id, owner = actor_id, "company created");
    Ok(company)
}

pub fn get_company(db: &Database, actor_id: &str, company_id: &str) -> ServiceResult<Company> {
    require_member(db, company_id, actor_id)?;
    db.get_company(company_id)?
        .ok_or_else(|| ServiceError::NotFound(format!("company {company_id}")))
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMember {
    pub user_id: String,
    pub role: Role,
}

/// Add a user to the company or change their role. Only owners hand out the
/// owner role.
pub fn add_member(
    db: &Database,
    actor_id: &str,
    company_id: &str,
    input: NewMember,
) -> ServiceResult<Membership> {
    let actor = require_permission(db, company_id, actor_id, Permission::ManageCompany)?;
    if input.role == Role::Owner && actor.role != Role::Owner {
        return Err(ServiceError::Forbidden("only owners can add owners".into()));
    }
    if input.user_id == actor_id {
        return Err(ServiceError::Validation("you cannot change your own role".into()));
    }
    if db.get_user(&input.user_id)?.is_none() {
        return Err(ServiceError::Validation(format!("unknown user {}", input.user_id)));
    }
    let membership = Membership {
        company_id: company_id.to_string(),
        user_id: input.user_id,
        role: input.role,
    };
    db.add_member(&membership)?;
    info!(company_id, user_id = %membership.user_id, role = membership.role.as_str(), "member saved");
    Ok(membership)
}

// ---------------------------------------------------------------------------
// Contacts and accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct NewContact {
    pub name: String,
    pub tax_id: Option<String>,
    pub branch_code: Option<String>,
    #[serde(default)]
    pub kind: ContactKind,
    pub address: Option<String>,
}

pub fn list_contacts(db: &Database, actor_id: &str, company_id: &str) -> ServiceResult<Vec<Contact>> {
    require_member(db, company_id, actor_id)?;
    Ok(db.list_contacts(company_id)?)
}

pub fn add_contact(
    db: &Database,
    actor_id: &str,
    company_id: &str,
    input: NewContact,
    now: DateTime<Utc>,
) -> ServiceResult<Contact> {
    require_permission(db, company_id, actor_id, Permission::ManageEntries)?;
    let contact = Contact {
        id: new_id(),
        company_id: company_id.to_string(),
        name: required(&input.name, "name")?,
        tax_id: checked_tax_id(input.tax_id.as_deref())?,
        branch_code: input.branch_code,
        kind: input.kind,
        address: input.address,
        created_at: now,
        deleted_at: None,
    };
    db.insert_contact(&contact)?;
    info!(company_id, contact_id = %contact.id, kind = contact.kind.as_str(), "contact added");
    Ok(contact)
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAccount {
    pub code: String,
    pub name: String,
}

pub fn list_accounts(db: &Database, actor_id: &str, company_id: &str) -> ServiceResult<Vec<Account>> {
    require_member(db, company_id, actor_id)?;
    Ok(db.list_accounts(company_id)?)
}

/// Add an account. Its class follows the leading digit of the code.
pub fn add_account(
    db: &Database,
    actor_id: &str,
    company_id: &str,
    input: NewAccount,
) -> ServiceResult<Account> {
    require_permission(db, company_id, actor_id, Permission::ManageCompany)?;
    let code = required(&input.code, "code")?;
    if code.len() != 4 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(ServiceError::Validation(format!("account code {code} must be 4 digits")));
    }
    let class = AccountClass::from_code(&code)
        .ok_or_else(|| ServiceError::Validation(format!("no account class for code {code}")))?;
    if db.list_accounts(company_id)?.iter().any(|a| a.code == code) {
        return Err(ServiceError::Validation(format!("account {code} already exists")));
    }
    let account = Account {
        id: new_id(),
        company_id: company_id.to_string(),
        code,
        name: required(&input.name, "name")?,
        class,
    };
    db.insert_account(&account)?;
    info!(company_id, code = %account.code, class = class.as_str(), "account added");
    Ok(account)
}

// ---------------------------------------------------------------------------
// Vendor mappings
// ---------------------------------------------------------------------------

pub fn list_vendor_mappings(
    db: &Database,
    actor_id: &str,
    company_id: &str,
) -> ServiceResult<Vec<VendorMapping>> {
    require_member(db, company_id, actor_id)?;
    Ok(db.list_vendor_mappings(company_id)?)
}

/// Teach a vendor mapping by hand. The contact and account must belong to
/// the company.
pub fn save_vendor_mapping(
    db: &Database,
    actor_id: &str,
    company_id: &str,
    input: LearnInput,
    now: DateTime<Utc>,
) -> ServiceResult<VendorMapping> {
    require_permission(db, company_id, actor_id, Permission::ManageEntries)?;
    if let Some(id) = input.contact_id.as_deref() {
        if db.get_contact(company_id, id)?.is_none() {
            return Err(ServiceError::Validation(format!("unknown contact {id}")));
        }
    }
    if let Some(id) = input.account_id.as_deref() {
        match db.get_account(company_id, id)? {
            Some(a) if a.class == AccountClass::Expense => {}
            _ => return Err(ServiceError::Validation(format!("{id} is not an expense account"))),
        }
    }
    vendor::learn(db, company_id, &input, now)
}

pub fn delete_vendor_mapping(
    db: &Database,
    actor_id: &str,
    company_id: &str,
    mapping_id: &str,
) -> ServiceResult<()> {
    require_permission(db, company_id, actor_id, Permission::ManageCompany)?;
    if !db.delete_vendor_mapping(company_id, mapping_id)? {
        return Err(ServiceError::NotFound(format!("vendor mapping {mapping_id}")));
    }
    info!(company_id, mapping_id, "vendor mapping deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Exchange rates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RateInput {
    pub currency: Currency,
    pub rate_date: NaiveDate,
    pub thb_per_unit: Decimal,
}

pub fn set_exchange_rate(
    db: &Database,
    actor_id: &str,
    company_id: &str,
    input: RateInput,
) -> ServiceResult<ExchangeRate> {
    require_permission(db, company_id, actor_id, Permission::ManageEntries)?;
    let rate = ExchangeRate {
        company_id: company_id.to_string(),
        currency: input.currency,
        rate_date: input.rate_date,
        thb_per_unit: input.thb_per_unit,
    };
    record_rate(db, &rate)?;
    info!(company_id, currency = %rate.currency, date = %rate.rate_date, rate = %rate.thb_per_unit, "exchange rate set");
    Ok(rate)
}

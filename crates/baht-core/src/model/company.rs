// Tenants and the people and parties attached to them: companies, users,
// memberships with roles, contacts and the chart of accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tax::WhtForm;

/// A tenant. Every bookkeeping record belongs to exactly one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub tax_id: Option<String>,
    /// Revenue Department branch code, `"00000"` for head office.
    pub branch_code: String,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    /// LINE user ID used for push notifications, if the user linked LINE.
    pub line_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Roles and permissions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Accountant,
    Staff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Company profile, members, vendor mappings, reopening completed documents.
    ManageCompany,
    /// Create, edit and delete expenses and incomes of anyone.
    ManageEntries,
    ApproveReimbursements,
    PaySettlements,
    ViewReports,
}

impl Role {
    pub fn can(&self, permission: Permission) -> bool {
        use Permission::*;
        match self {
            Role::Owner => true,
            Role::Admin => true,
            Role::Accountant => matches!(
                permission,
                ManageEntries | ApproveReimbursements | PaySettlements | ViewReports
            ),
            Role::Staff => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Accountant => "accountant",
            Role::Staff => "staff",
        }
    }

    pub fn from_str_role(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Role::Owner),
            "admin" => Some(Role::Admin),
            "accountant" => Some(Role::Accountant),
            "staff" => Some(Role::Staff),
            _ => None,
        }
    }
}

/// A user's role inside one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub company_id: String,
    pub user_id: String,
    pub role: Role,
}

impl Membership {
    pub fn can(&self, permission: Permission) -> bool {
        self.role.can(permission)
    }
}

// ---------------------------------------------------------------------------
// Contacts
// ---------------------------------------------------------------------------

/// Legal form of a counterparty. Decides which WHT return a payment goes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContactKind {
    #[default]
    Juristic,
    Individual,
}

impl ContactKind {
    pub fn wht_form(&self) -> WhtForm {
        match self {
            ContactKind::Juristic => WhtForm::Pnd53,
            ContactKind::Individual => WhtForm::Pnd3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContactKind::Juristic => "juristic",
            ContactKind::Individual => "individual",
        }
    }

    pub fn from_str_kind(s: &str) -> Option<Self> {
        match s {
            "juristic" => Some(ContactKind::Juristic),
            "individual" => Some(ContactKind::Individual),
            _ => None,
        }
    }
}

/// A vendor or customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub tax_id: Option<String>,
    pub branch_code: Option<String>,
    pub kind: ContactKind,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Chart of accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountClass {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

impl AccountClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountClass::Asset => "asset",
            AccountClass::Liability => "liability",
            AccountClass::Equity => "equity",
            AccountClass::Income => "income",
            AccountClass::Expense => "expense",
        }
    }

    pub fn from_str_class(s: &str) -> Option<Self> {
        match s {
            "asset" => Some(AccountClass::Asset),
            "liability" => Some(AccountClass::Liability),
            "equity" => Some(AccountClass::Equity),
            "income" => Some(AccountClass::Income),
            "expense" => Some(AccountClass::Expense),
            _ => None,
        }
    }

    /// Thai chart-of-accounts codes start with the class digit.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.chars().next()? {
            '1' => Some(AccountClass::Asset),
            '2' => Some(AccountClass::Liability),
            '3' => Some(AccountClass::Equity),
            '4' => Some(AccountClass::Income),
            '5' | '6' => Some(AccountClass::Expense),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub company_id: String,
    pub code: String,
    pub name: String,
    pub class: AccountClass,
}

/// Accounts every new company starts with: (code, name).
pub const DEFAULT_CHART_OF_ACCOUNTS: &[(&str, &str)] = &[
    ("1110", "เงินสด (Cash)"),
    ("1120", "เงินฝากธนาคาร (Bank deposits)"),
    ("1150", "ภาษีซื้อ (Input VAT)"),
    ("1160", "ภาษีถูกหัก ณ ที่จ่าย (WHT receivable)"),
    ("2150", "ภาษีขาย (Output VAT)"),
    ("2160", "ภาษีหัก ณ ที่จ่ายค้างจ่าย (WHT payable)"),
    ("2170", "เงินทดรองจ่ายพนักงาน (Due to employees)"),
    ("4100", "รายได้จากการขาย (Sales)"),
    ("4200", "รายได้จากการบริการ (Service income)"),
    ("4900", "รายได้อื่น (Other income)"),
    ("5100", "ต้นทุนขาย (Cost of goods sold)"),
    ("5210", "เงินเดือนและค่าจ้าง (Salaries and wages)"),
    ("5220", "ค่าเช่า (Rent)"),
    ("5230", "ค่าสาธารณูปโภค (Utilities)"),
    ("5240", "ค่าเดินทาง (Travel)"),
    ("5250", "ค่าโฆษณา (Advertising)"),
    ("5260", "ค่าบริการวิชาชีพ (Professional fees)"),
    ("5270", "ค่าวัสดุสำนักงาน (Office supplies)"),
    ("5280", "ค่าอาหารและรับรอง (Meals and entertainment)"),
    ("5290", "ค่าซอฟต์แวร์และบริการออนไลน์ (Software and subscriptions)"),
    ("5900", "ค่าใช้จ่ายเบ็ดเตล็ด (Miscellaneous expenses)"),
];

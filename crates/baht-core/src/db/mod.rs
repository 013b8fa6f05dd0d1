// SQLite persistence layer for companies, entries, reimbursements,
// settlements, vendor mappings and exchange rates.
//
// Money is stored as TEXT so decimals survive exactly; dates as ISO-8601 text.

mod companies;
mod entries;
mod vendors;
mod workflow;

pub use vendors::DuplicateQuery;

#[cfg(test)]
pub(crate) use entries::fixtures as entries_fixtures;

use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rusqlite::types::Type;
use rusqlite::{Connection, Row};

/// SQLite-backed persistence for every tenant's books.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(SCHEMA)
            .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS companies (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    tax_id      TEXT,
    branch_code TEXT NOT NULL DEFAULT '00000',
    address     TEXT,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    email        TEXT NOT NULL UNIQUE,
    line_user_id TEXT,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memberships (
    company_id TEXT NOT NULL REFERENCES companies(id),
    user_id    TEXT NOT NULL REFERENCES users(id),
    role       TEXT NOT NULL,
    PRIMARY KEY (company_id, user_id)
);

CREATE TABLE IF NOT EXISTS contacts (
    id          TEXT PRIMARY KEY,
    company_id  TEXT NOT NULL REFERENCES companies(id),
    name        TEXT NOT NULL,
    tax_id      TEXT,
    branch_code TEXT,
    kind        TEXT NOT NULL,
    address     TEXT,
    created_at  TEXT NOT NULL,
    deleted_at  TEXT
);

CREATE TABLE IF NOT EXISTS accounts (
    id         TEXT PRIMARY KEY,
    company_id TEXT NOT NULL REFERENCES companies(id),
    code       TEXT NOT NULL,
    name       TEXT NOT NULL,
    class      TEXT NOT NULL,
    UNIQUE (company_id, code)
);

CREATE TABLE IF NOT EXISTS expenses (
    id                TEXT PRIMARY KEY,
    company_id        TEXT NOT NULL REFERENCES companies(id),
    contact_id        TEXT REFERENCES contacts(id),
    account_id        TEXT REFERENCES accounts(id),
    description       TEXT NOT NULL,
    issue_date        TEXT NOT NULL,
    document_number   TEXT,
    currency          TEXT NOT NULL,
    original_amount   TEXT NOT NULL,
    exchange_rate     TEXT NOT NULL,
    base_amount       TEXT NOT NULL,
    vat_rate          TEXT NOT NULL,
    vat_amount        TEXT NOT NULL,
    amount            TEXT NOT NULL,
    wht_rate          TEXT NOT NULL,
    wht_amount        TEXT NOT NULL,
    net_paid          TEXT NOT NULL,
    paid_by_kind      TEXT NOT NULL,
    paid_by_user_id   TEXT REFERENCES users(id),
    settlement_status TEXT NOT NULL,
    settlement_id     TEXT,
    status            TEXT NOT NULL,
    receipt_url       TEXT,
    created_by        TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    deleted_at        TEXT
);

CREATE TABLE IF NOT EXISTS incomes (
    id              TEXT PRIMARY KEY,
    company_id      TEXT NOT NULL REFERENCES companies(id),
    contact_id      TEXT REFERENCES contacts(id),
    account_id      TEXT REFERENCES accounts(id),
    description     TEXT NOT NULL,
    issue_date      TEXT NOT NULL,
    document_number TEXT,
    currency        TEXT NOT NULL,
    original_amount TEXT NOT NULL,
    exchange_rate   TEXT NOT NULL,
    base_amount     TEXT NOT NULL,
    vat_rate        TEXT NOT NULL,
    vat_amount      TEXT NOT NULL,
    amount          TEXT NOT NULL,
    wht_rate        TEXT NOT NULL,
    wht_amount      TEXT NOT NULL,
    net_received    TEXT NOT NULL,
    status          TEXT NOT NULL,
    created_by      TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    deleted_at      TEXT
);

CREATE TABLE IF NOT EXISTS reimbursements (
    id                TEXT PRIMARY KEY,
    company_id        TEXT NOT NULL REFERENCES companies(id),
    requester_id      TEXT NOT NULL REFERENCES users(id),
    description       TEXT NOT NULL,
    amount            TEXT NOT NULL,
    vat_amount        TEXT NOT NULL,
    issue_date        TEXT NOT NULL,
    account_id        TEXT REFERENCES accounts(id),
    receipt_url       TEXT,
    status            TEXT NOT NULL,
    approved_by       TEXT,
    approved_at       TEXT,
    rejected_reason   TEXT,
    paid_at           TEXT,
    payment_reference TEXT,
    expense_id        TEXT REFERENCES expenses(id),
    created_at        TEXT NOT NULL,
    deleted_at        TEXT
);

CREATE TABLE IF NOT EXISTS settlements (
    id           TEXT PRIMARY KEY,
    company_id   TEXT NOT NULL REFERENCES companies(id),
    payee_id     TEXT NOT NULL REFERENCES users(id),
    total_amount TEXT NOT NULL,
    paid_at      TEXT NOT NULL,
    reference    TEXT,
    created_by   TEXT NOT NULL,
    reversed_at  TEXT,
    reversed_by  TEXT
);

CREATE TABLE IF NOT EXISTS settlement_items (
    settlement_id TEXT NOT NULL REFERENCES settlements(id),
    expense_id    TEXT NOT NULL REFERENCES expenses(id),
    PRIMARY KEY (settlement_id, expense_id)
);

CREATE TABLE IF NOT EXISTS vendor_mappings (
    id                   TEXT PRIMARY KEY,
    company_id           TEXT NOT NULL REFERENCES companies(id),
    vendor_name          TEXT NOT NULL,
    vendor_tax_id        TEXT,
    normalized_name      TEXT NOT NULL,
    match_kind           TEXT NOT NULL,
    contact_id           TEXT REFERENCES contacts(id),
    account_id           TEXT REFERENCES accounts(id),
    vat_rate             TEXT,
    wht_rate             TEXT,
    description_template TEXT,
    use_count            INTEGER NOT NULL DEFAULT 0,
    last_used_at         TEXT,
    created_at           TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS exchange_rates (
    company_id   TEXT NOT NULL REFERENCES companies(id),
    currency     TEXT NOT NULL,
    rate_date    TEXT NOT NULL,
    thb_per_unit TEXT NOT NULL,
    PRIMARY KEY (company_id, currency, rate_date)
);

CREATE INDEX IF NOT EXISTS idx_expenses_company_date ON expenses(company_id, issue_date);
CREATE INDEX IF NOT EXISTS idx_incomes_company_date ON incomes(company_id, issue_date);
CREATE INDEX IF NOT EXISTS idx_expenses_settlement ON expenses(company_id, settlement_status);
CREATE INDEX IF NOT EXISTS idx_vendor_mappings_company ON vendor_mappings(company_id);
";

// ---------------------------------------------------------------------------
// Column codecs
// ---------------------------------------------------------------------------

const DATE_FMT: &str = "%Y-%m-%d";

fn date_to_sql(d: NaiveDate) -> String {
    d.format(DATE_FMT).to_string()
}

fn ts_to_sql(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn opt_ts_to_sql(t: Option<DateTime<Utc>>) -> Option<String> {
    t.map(ts_to_sql)
}

fn opt_dec_to_sql(d: Option<Decimal>) -> Option<String> {
    d.map(|d| d.to_string())
}

fn conversion_err(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn dec_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| conversion_err(idx, format!("bad decimal {raw:?}: {e}")))
}

fn opt_dec_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        Decimal::from_str(&raw)
            .map_err(|e| conversion_err(idx, format!("bad decimal {raw:?}: {e}")))
    })
    .transpose()
}

fn date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FMT)
        .map_err(|e| conversion_err(idx, format!("bad date {raw:?}: {e}")))
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, format!("bad timestamp {raw:?}: {e}")))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| parse_ts(idx, &raw)).transpose()
}

/// Decode a text enum column with one of the model's `from_str_*` parsers.
fn enum_col<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_err(idx, format!("unknown value {raw:?}")))
}

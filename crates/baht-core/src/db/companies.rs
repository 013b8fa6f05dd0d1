// Companies, users, memberships, contacts and accounts.

use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Row};

use super::{enum_col, ts_col, ts_to_sql, opt_ts_col, opt_ts_to_sql, Database};
use crate::model::{
    new_id, Account, AccountClass, Company, Contact, ContactKind, Membership, Permission, Role,
    User, DEFAULT_CHART_OF_ACCOUNTS,
};

fn company_from_row(row: &Row<'_>) -> rusqlite::Result<Company> {
    Ok(Company {
        id: row.get(0)?,
        name: row.get(1)?,
        tax_id: row.get(2)?,
        branch_code: row.get(3)?,
        address: row.get(4)?,
        created_at: ts_col(row, 5)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        line_user_id: row.get(3)?,
        created_at: ts_col(row, 4)?,
    })
}

const CONTACT_COLUMNS: &str =
    "id, company_id, name, tax_id, branch_code, kind, address, created_at, deleted_at";

fn contact_from_row(row: &Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: row.get(0)?,
        company_id: row.get(1)?,
        name: row.get(2)?,
        tax_id: row.get(3)?,
        branch_code: row.get(4)?,
        kind: enum_col(row, 5, ContactKind::from_str_kind)?,
        address: row.get(6)?,
        created_at: ts_col(row, 7)?,
        deleted_at: opt_ts_col(row, 8)?,
    })
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        company_id: row.get(1)?,
        code: row.get(2)?,
        name: row.get(3)?,
        class: enum_col(row, 4, AccountClass::from_str_class)?,
    })
}

impl Database {
    // ------------------------------------------------------------------
    // Companies and members
    // ------------------------------------------------------------------

    /// Create a company, make `owner_id` its owner and seed the default
    /// chart of accounts, all in one transaction.
    pub fn create_company(&self, company: &Company, owner_id: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        tx.execute(
            "INSERT INTO companies (id, name, tax_id, branch_code, address, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                company.id,
                company.name,
                company.tax_id,
                company.branch_code,
                company.address,
                ts_to_sql(company.created_at),
            ],
        )
        .context("failed to insert company")?;

        tx.execute(
            "INSERT INTO memberships (company_id, user_id, role) VALUES (?1, ?2, ?3)",
            params![company.id, owner_id, Role::Owner.as_str()],
        )
        .context("failed to insert owner membership")?;

        for (code, name) in DEFAULT_CHART_OF_ACCOUNTS {
            let class = AccountClass::from_code(code).unwrap_or(AccountClass::Expense);
            tx.execute(
                "INSERT INTO accounts (id, company_id, code, name, class)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![new_id(), company.id, code, name, class.as_str()],
            )
            .context("failed to seed chart of accounts")?;
        }

        tx.commit().context("failed to commit create_company")?;
        Ok(())
    }

    pub fn get_company(&self, id: &str) -> Result<Option<Company>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, tax_id, branch_code, address, created_at
             FROM companies WHERE id = ?1",
            params![id],
            company_from_row,
        )
        .optional()
        .context("failed to load company")
    }

    /// Add a user to a company, or change their role if already a member.
    pub fn add_member(&self, membership: &Membership) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO memberships (company_id, user_id, role) VALUES (?1, ?2, ?3)
             ON CONFLICT(company_id, user_id) DO UPDATE SET role = excluded.role",
            params![
                membership.company_id,
                membership.user_id,
                membership.role.as_str()
            ],
        )
        .context("failed to upsert membership")?;
        Ok(())
    }

    pub fn membership(&self, company_id: &str, user_id: &str) -> Result<Option<Membership>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT company_id, user_id, role FROM memberships
             WHERE company_id = ?1 AND user_id = ?2",
            params![company_id, user_id],
            |row| {
                Ok(Membership {
                    company_id: row.get(0)?,
                    user_id: row.get(1)?,
                    role: enum_col(row, 2, Role::from_str_role)?,
                })
            },
        )
        .optional()
        .context("failed to load membership")
    }

    /// Users of a company whose role grants `permission`, ordered by name.
    pub fn members_with_permission(
        &self,
        company_id: &str,
        permission: Permission,
    ) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT u.id, u.name, u.email, u.line_user_id, u.created_at, m.role
                 FROM memberships m JOIN users u ON u.id = m.user_id
                 WHERE m.company_id = ?1
                 ORDER BY u.name",
            )
            .context("failed to prepare members query")?;

        let rows = stmt
            .query_map(params![company_id], |row| {
                Ok((user_from_row(row)?, enum_col(row, 5, Role::from_str_role)?))
            })
            .context("failed to query members")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map member rows")?;

        Ok(rows
            .into_iter()
            .filter(|(_, role)| role.can(permission))
            .map(|(user, _)| user)
            .collect())
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO users (id, name, email, line_user_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id,
                user.name,
                user.email,
                user.line_user_id,
                ts_to_sql(user.created_at)
            ],
        )
        .context("failed to insert user")?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, email, line_user_id, created_at FROM users WHERE id = ?1",
            params![id],
            user_from_row,
        )
        .optional()
        .context("failed to load user")
    }

    // ------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------

    pub fn insert_contact(&self, contact: &Contact) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO contacts (id, company_id, name, tax_id, branch_code, kind, address, created_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                contact.id,
                contact.company_id,
                contact.name,
                contact.tax_id,
                contact.branch_code,
                contact.kind.as_str(),
                contact.address,
                ts_to_sql(contact.created_at),
                opt_ts_to_sql(contact.deleted_at),
            ],
        )
        .context("failed to insert contact")?;
        Ok(())
    }

    /// Load a contact of `company_id`. Contacts of other companies are
    /// invisible.
    pub fn get_contact(&self, company_id: &str, id: &str) -> Result<Option<Contact>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE company_id = ?1 AND id = ?2"),
            params![company_id, id],
            contact_from_row,
        )
        .optional()
        .context("failed to load contact")
    }

    /// Live contacts of a company, ordered by name.
    pub fn list_contacts(&self, company_id: &str) -> Result<Vec<Contact>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts
                 WHERE company_id = ?1 AND deleted_at IS NULL ORDER BY name"
            ))
            .context("failed to prepare list_contacts query")?;
        let contacts = stmt
            .query_map(params![company_id], contact_from_row)
            .context("failed to query contacts")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map contact rows")?;
        Ok(contacts)
    }

    // ------------------------------------------------------------------
    // Chart of accounts
    // ------------------------------------------------------------------

    pub fn insert_account(&self, account: &Account) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO accounts (id, company_id, code, name, class) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                account.id,
                account.company_id,
                account.code,
                account.name,
                account.class.as_str()
            ],
        )
        .with_context(|| format!("failed to insert account {}", account.code))?;
        Ok(())
    }

    pub fn get_account(&self, company_id: &str, id: &str) -> Result<Option<Account>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, company_id, code, name, class FROM accounts
             WHERE company_id = ?1 AND id = ?2",
            params![company_id, id],
            account_from_row,
        )
        .optional()
        .context("failed to load account")
    }

    /// Accounts of a company ordered by code.
    pub fn list_accounts(&self, company_id: &str) -> Result<Vec<Account>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, company_id, code, name, class FROM accounts
                 WHERE company_id = ?1 ORDER BY code",
            )
            .context("failed to prepare list_accounts query")?;
        let accounts = stmt
            .query_map(params![company_id], account_from_row)
            .context("failed to query accounts")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map account rows")?;
        Ok(accounts)
    }
}

// Vendor mappings, exchange rates and duplicate-document lookups.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rusqlite::{params, OptionalExtension, Row};

use super::entries::{expense_from_row, EXPENSE_COLUMNS};
use super::{
    date_col, date_to_sql, dec_col, enum_col, opt_dec_col, opt_dec_to_sql, opt_ts_col,
    opt_ts_to_sql, ts_col, ts_to_sql, Database,
};
use crate::model::{ExchangeRate, Expense, MatchKind, VendorMapping};
use crate::money::Currency;

const MAPPING_COLUMNS: &str = "id, company_id, vendor_name, vendor_tax_id, normalized_name, \
     match_kind, contact_id, account_id, vat_rate, wht_rate, description_template, use_count, \
     last_used_at, created_at";

fn mapping_from_row(row: &Row<'_>) -> rusqlite::Result<VendorMapping> {
    Ok(VendorMapping {
        id: row.get(0)?,
        company_id: row.get(1)?,
        vendor_name: row.get(2)?,
        vendor_tax_id: row.get(3)?,
        normalized_name: row.get(4)?,
        match_kind: enum_col(row, 5, MatchKind::from_str_kind)?,
        contact_id: row.get(6)?,
        account_id: row.get(7)?,
        vat_rate: opt_dec_col(row, 8)?,
        wht_rate: opt_dec_col(row, 9)?,
        description_template: row.get(10)?,
        use_count: row.get(11)?,
        last_used_at: opt_ts_col(row, 12)?,
        created_at: ts_col(row, 13)?,
    })
}

/// What a new document looks like, for finding earlier copies of it.
#[derive(Debug, Clone)]
pub struct DuplicateQuery<'a> {
    pub vendor_tax_id: Option<&'a str>,
    pub document_number: Option<&'a str>,
    pub issue_date: NaiveDate,
    pub amount: Decimal,
}

impl Database {
    // ------------------------------------------------------------------
    // Vendor mappings
    // ------------------------------------------------------------------

    /// Insert `mapping`, or merge it into the company's existing mapping for
    /// the same vendor (same tax ID, else same normalized name). A name match
    /// never merges two different tax IDs: a mapping for another tax ID under
    /// the same name is stored as a separate vendor. A merge
    /// overwrites the defaults that `mapping` sets, bumps `use_count` and
    /// stamps `last_used_at`. Returns the stored mapping.
    pub fn upsert_vendor_mapping(&self, mapping: &VendorMapping) -> Result<VendorMapping> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let existing = match mapping.vendor_tax_id.as_deref() {
            Some(tax_id) => tx
                .query_row(
                    &format!(
                        "SELECT {MAPPING_COLUMNS} FROM vendor_mappings
                         WHERE company_id = ?1 AND vendor_tax_id = ?2"
                    ),
                    params![mapping.company_id, tax_id],
                    mapping_from_row,
                )
                .optional()
                .context("failed to look up mapping by tax id")?,
            None => None,
        };
        let existing = match existing {
            Some(found) => Some(found),
            None => tx
                .query_row(
                    &format!(
                        "SELECT {MAPPING_COLUMNS} FROM vendor_mappings
                         WHERE company_id = ?1 AND normalized_name = ?2
                           AND (?3 IS NULL OR vendor_tax_id IS NULL)
                         ORDER BY last_used_at DESC LIMIT 1"
                    ),
                    params![mapping.company_id, mapping.normalized_name, mapping.vendor_tax_id],
                    mapping_from_row,
                )
                .optional()
                .context("failed to look up mapping by name")?,
        };

        let stored = match existing {
            Some(old) => {
                let merged = VendorMapping {
                    id: old.id.clone(),
                    company_id: old.company_id.clone(),
                    vendor_name: mapping.vendor_name.clone(),
                    vendor_tax_id: mapping.vendor_tax_id.clone().or(old.vendor_tax_id),
                    normalized_name: mapping.normalized_name.clone(),
                    match_kind: mapping.match_kind,
                    contact_id: mapping.contact_id.clone().or(old.contact_id),
                    account_id: mapping.account_id.clone().or(old.account_id),
                    vat_rate: mapping.vat_rate.or(old.vat_rate),
                    wht_rate: mapping.wht_rate.or(old.wht_rate),
                    description_template: mapping
                        .description_template
                        .clone()
                        .or(old.description_template),
                    use_count: old.use_count + 1,
                    last_used_at: mapping.last_used_at.or(old.last_used_at),
                    created_at: old.created_at,
                };
                tx.execute(
                    "UPDATE vendor_mappings SET
                        vendor_name = ?2, vendor_tax_id = ?3, normalized_name = ?4, match_kind = ?5,
                        contact_id = ?6, account_id = ?7, vat_rate = ?8, wht_rate = ?9,
                        description_template = ?10, use_count = ?11, last_used_at = ?12
                     WHERE id = ?1",
                    params![
                        merged.id,
                        merged.vendor_name,
                        merged.vendor_tax_id,
                        merged.normalized_name,
                        merged.match_kind.as_str(),
                        merged.contact_id,
                        merged.account_id,
                        opt_dec_to_sql(merged.vat_rate),
                        opt_dec_to_sql(merged.wht_rate),
                        merged.description_template,
                        merged.use_count,
                        opt_ts_to_sql(merged.last_used_at),
                    ],
                )
                .context("failed to update vendor mapping")?;
                merged
            }
            None => {
                tx.execute(
                    &format!(
                        "INSERT INTO vendor_mappings ({MAPPING_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                    ),
                    params![
                        mapping.id,
                        mapping.company_id,
                        mapping.vendor_name,
                        mapping.vendor_tax_id,
                        mapping.normalized_name,
                        mapping.match_kind.as_str(),
                        mapping.contact_id,
                        mapping.account_id,
                        opt_dec_to_sql(mapping.vat_rate),
                        opt_dec_to_sql(mapping.wht_rate),
                        mapping.description_template,
                        mapping.use_count,
                        opt_ts_to_sql(mapping.last_used_at),
                        ts_to_sql(mapping.created_at),
                    ],
                )
                .context("failed to insert vendor mapping")?;
                mapping.clone()
            }
        };

        tx.commit().context("failed to commit vendor mapping")?;
        Ok(stored)
    }

    /// Mappings of a company, most used first.
    pub fn list_vendor_mappings(&self, company_id: &str) -> Result<Vec<VendorMapping>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MAPPING_COLUMNS} FROM vendor_mappings
                 WHERE company_id = ?1 ORDER BY use_count DESC, vendor_name"
            ))
            .context("failed to prepare list_vendor_mappings query")?;
        let rows = stmt
            .query_map(params![company_id], mapping_from_row)
            .context("failed to query vendor mappings")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map vendor mapping rows")?;
        Ok(rows)
    }

    pub fn get_vendor_mapping(&self, company_id: &str, id: &str) -> Result<Option<VendorMapping>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {MAPPING_COLUMNS} FROM vendor_mappings WHERE company_id = ?1 AND id = ?2"),
            params![company_id, id],
            mapping_from_row,
        )
        .optional()
        .context("failed to load vendor mapping")
    }

    /// Remove a mapping. Returns `false` if it did not exist.
    pub fn delete_vendor_mapping(&self, company_id: &str, id: &str) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "DELETE FROM vendor_mappings WHERE company_id = ?1 AND id = ?2",
                params![company_id, id],
            )
            .context("failed to delete vendor mapping")?;
        Ok(changed > 0)
    }

    /// Record that a mapping was applied to a new document.
    pub fn touch_vendor_mapping(&self, company_id: &str, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE vendor_mappings SET use_count = use_count + 1, last_used_at = ?3
                 WHERE company_id = ?1 AND id = ?2",
                params![company_id, id, ts_to_sql(at)],
            )
            .context("failed to touch vendor mapping")?;
        Ok(changed > 0)
    }

    // ------------------------------------------------------------------
    // Exchange rates
    // ------------------------------------------------------------------

    /// Store the rate for a currency and day, replacing any earlier value.
    pub fn set_exchange_rate(&self, rate: &ExchangeRate) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO exchange_rates (company_id, currency, rate_date, thb_per_unit)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                rate.company_id,
                rate.currency.as_str(),
                date_to_sql(rate.rate_date),
                rate.thb_per_unit.to_string(),
            ],
        )
        .context("failed to store exchange rate")?;
        Ok(())
    }

    /// The latest stored rate for `currency` dated on or before `date`.
    pub fn exchange_rate_on_or_before(
        &self,
        company_id: &str,
        currency: &Currency,
        date: NaiveDate,
    ) -> Result<Option<ExchangeRate>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT company_id, currency, rate_date, thb_per_unit FROM exchange_rates
             WHERE company_id = ?1 AND currency = ?2 AND rate_date <= ?3
             ORDER BY rate_date DESC LIMIT 1",
            params![company_id, currency.as_str(), date_to_sql(date)],
            |row| {
                Ok(ExchangeRate {
                    company_id: row.get(0)?,
                    currency: enum_col(row, 1, Currency::new)?,
                    rate_date: date_col(row, 2)?,
                    thb_per_unit: dec_col(row, 3)?,
                })
            },
        )
        .optional()
        .context("failed to look up exchange rate")
    }

    // ------------------------------------------------------------------
    // Duplicates
    // ------------------------------------------------------------------

    /// Live expenses that look like the same document: the same document
    /// number from the same vendor, or the same issue date and total.
    pub fn find_duplicate_expenses(
        &self,
        company_id: &str,
        query: &DuplicateQuery<'_>,
    ) -> Result<Vec<Expense>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EXPENSE_COLUMNS} FROM expenses
                 WHERE company_id = ?1 AND deleted_at IS NULL
                   AND ((?2 IS NOT NULL AND document_number = ?2
                         AND (?3 IS NULL OR contact_id IN
                              (SELECT id FROM contacts WHERE company_id = ?1 AND tax_id = ?3)))
                        OR issue_date = ?4)
                 ORDER BY issue_date, created_at"
            ))
            .context("failed to prepare duplicate query")?;
        let candidates = stmt
            .query_map(
                params![
                    company_id,
                    query.document_number.map(str::trim),
                    query.vendor_tax_id,
                    date_to_sql(query.issue_date),
                ],
                expense_from_row,
            )
            .context("failed to query duplicate candidates")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map duplicate rows")?;

        // Same-day candidates only count when the totals agree; amounts are
        // compared as decimals since stored scale can differ.
        Ok(candidates
            .into_iter()
            .filter(|e| {
                let same_number = query.document_number.is_some()
                    && e.document_number.as_deref().map(str::trim)
                        == query.document_number.map(str::trim);
                same_number || (e.issue_date == query.issue_date && e.amount == query.amount)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::entries::fixtures::*;
    use super::super::test_support::*;
    use super::DuplicateQuery;
    use crate::model::{ExchangeRate, MatchKind, VendorMapping};
    use crate::money::Currency;
    use rust_decimal_macros::dec;

    fn mapping(id: &str, name: &str, tax_id: Option<&str>) -> VendorMapping {
        VendorMapping {
            id: id.into(),
            company_id: COMPANY.into(),
            vendor_name: name.into(),
            vendor_tax_id: tax_id.map(str::to_string),
            normalized_name: name.to_lowercase(),
            match_kind: if tax_id.is_some() {
                MatchKind::TaxId
            } else {
                MatchKind::Exact
            },
            contact_id: None,
            account_id: None,
            vat_rate: Some(dec!(7)),
            wht_rate: None,
            description_template: None,
            use_count: 1,
            last_used_at: Some(at(2024, 5, 1)),
            created_at: at(2024, 5, 1),
        }
    }

    #[test]
    fn upsert_merges_by_tax_id_then_name() {
        let db = seeded_db();
        let first = db
            .upsert_vendor_mapping(&mapping("m1", "Makro", Some("0105536112014")))
            .unwrap();
        assert_eq!(first.use_count, 1);

        let mut update = mapping("m2", "Siam Makro", Some("0105536112014"));
        update.wht_rate = Some(dec!(3));
        update.vat_rate = None;
        let merged = db.upsert_vendor_mapping(&update).unwrap();
        assert_eq!(merged.id, "m1");
        assert_eq!(merged.use_count, 2);
        assert_eq!(merged.vendor_name, "Siam Makro");
        assert_eq!(merged.vat_rate, Some(dec!(7)));
        assert_eq!(merged.wht_rate, Some(dec!(3)));

        db.upsert_vendor_mapping(&mapping("m3", "7-eleven", None)).unwrap();
        let again = db.upsert_vendor_mapping(&mapping("m4", "7-eleven", None)).unwrap();
        assert_eq!(again.id, "m3");

        let all = db.list_vendor_mappings(COMPANY).unwrap();
        let ids: Vec<_> = all.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m1"]);
    }

    #[test]
    fn same_name_with_other_tax_id_is_a_new_vendor() {
        let db = seeded_db();
        let mut first = mapping("m1", "Makro", Some("0105536092641"));
        first.contact_id = Some(VENDOR.into());
        db.upsert_vendor_mapping(&first).unwrap();

        let second = db
            .upsert_vendor_mapping(&mapping("m2", "Makro", Some("0107537000254")))
            .unwrap();
        assert_eq!(second.id, "m2");
        assert_eq!(second.contact_id, None);

        let all = db.list_vendor_mappings(COMPANY).unwrap();
        assert_eq!(all.len(), 2);
        let m1 = db.get_vendor_mapping(COMPANY, "m1").unwrap().unwrap();
        assert_eq!(m1.vendor_tax_id.as_deref(), Some("0105536092641"));
        assert_eq!(m1.contact_id.as_deref(), Some(VENDOR));

        // A name-only sighting still lands on an existing mapping.
        let named = db.upsert_vendor_mapping(&mapping("m3", "Makro", None)).unwrap();
        assert_ne!(named.id, "m3");
        assert_eq!(db.list_vendor_mappings(COMPANY).unwrap().len(), 2);
    }

    #[test]
    fn touch_and_delete_mapping() {
        let db = seeded_db();
        db.upsert_vendor_mapping(&mapping("m1", "Makro", None)).unwrap();
        assert!(db.touch_vendor_mapping(COMPANY, "m1", at(2024, 6, 1)).unwrap());

        let m = db.get_vendor_mapping(COMPANY, "m1").unwrap().unwrap();
        assert_eq!(m.use_count, 2);
        assert_eq!(m.last_used_at, Some(at(2024, 6, 1)));

        assert!(db.delete_vendor_mapping(COMPANY, "m1").unwrap());
        assert!(!db.delete_vendor_mapping(COMPANY, "m1").unwrap());
    }

    #[test]
    fn exchange_rate_uses_latest_on_or_before() {
        let db = seeded_db();
        let usd = Currency::new("USD").unwrap();
        for (day, rate) in [(1, dec!(36.10)), (10, dec!(36.55))] {
            db.set_exchange_rate(&ExchangeRate {
                company_id: COMPANY.into(),
                currency: usd.clone(),
                rate_date: date(2024, 5, day),
                thb_per_unit: rate,
            })
            .unwrap();
        }

        let on_5th = db
            .exchange_rate_on_or_before(COMPANY, &usd, date(2024, 5, 5))
            .unwrap()
            .unwrap();
        assert_eq!(on_5th.thb_per_unit, dec!(36.10));
        let on_20th = db
            .exchange_rate_on_or_before(COMPANY, &usd, date(2024, 5, 20))
            .unwrap()
            .unwrap();
        assert_eq!(on_20th.rate_date, date(2024, 5, 10));
        assert!(db
            .exchange_rate_on_or_before(COMPANY, &usd, date(2024, 4, 30))
            .unwrap()
            .is_none());
    }

    #[test]
    fn duplicates_by_number_or_same_day_amount() {
        let db = seeded_db();
        db.insert_expense(&expense("e1", date(2024, 5, 1))).unwrap();

        let same_number = DuplicateQuery {
            vendor_tax_id: Some("0105536112014"),
            document_number: Some(" INV-e1 "),
            issue_date: date(2024, 6, 1),
            amount: dec!(5),
        };
        assert_eq!(db.find_duplicate_expenses(COMPANY, &same_number).unwrap().len(), 1);

        let other_vendor = DuplicateQuery {
            vendor_tax_id: Some("1103700012346"),
            ..same_number.clone()
        };
        assert!(db.find_duplicate_expenses(COMPANY, &other_vendor).unwrap().is_empty());

        let same_day_amount = DuplicateQuery {
            vendor_tax_id: None,
            document_number: None,
            issue_date: date(2024, 5, 1),
            amount: dec!(1070),
        };
        assert_eq!(
            db.find_duplicate_expenses(COMPANY, &same_day_amount).unwrap().len(),
            1
        );

        let same_day_other_amount = DuplicateQuery {
            amount: dec!(1071),
            ..same_day_amount
        };
        assert!(db
            .find_duplicate_expenses(COMPANY, &same_day_other_amount)
            .unwrap()
            .is_empty());
    }
}

// Tax reports: ภ.พ.30 VAT, ภ.ง.ด.3/53 withholding, WHT credits and a period
// summary, plus CSV export for the filing forms.

use std::collections::HashMap;
use std::fmt;

use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::db::Database;
use crate::model::{Contact, ContactKind, EntryFilter};
use crate::tax::WhtForm;

/// Years at or above this are Buddhist Era.
pub const BE_THRESHOLD: i32 = 2400;
/// BE year minus this is the CE year.
pub const BE_OFFSET: i32 = 543;

// ---------------------------------------------------------------------------
// Month
// ---------------------------------------------------------------------------

/// A calendar month, the filing period for every Thai monthly return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Month {
    pub year: i32,
    pub month: u32,
}

impl Month {
    /// Parse `YYYY-MM`. Buddhist-Era years such as `2567-05` are converted.
    pub fn parse(raw: &str) -> Result<Self> {
        let (y, m) = raw
            .trim()
            .split_once('-')
            .with_context(|| format!("month must look like YYYY-MM, got {raw:?}"))?;
        let mut year: i32 = y.parse().with_context(|| format!("bad year in {raw:?}"))?;
        let month: u32 = m.parse().with_context(|| format!("bad month in {raw:?}"))?;
        if year >= BE_THRESHOLD {
            year -= BE_OFFSET;
        }
        if !(1..=12).contains(&month) {
            bail!("month must be 01-12, got {month}");
        }
        Ok(Self { year, month })
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        let (y, m) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(y, m, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    fn filter(&self) -> EntryFilter {
        EntryFilter {
            from: Some(self.first_day()),
            to: Some(self.last_day()),
            ..Default::default()
        }
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// `dd/mm/yyyy` with the Buddhist-Era year, as printed on Revenue Department
/// forms.
pub fn thai_date(d: NaiveDate) -> String {
    format!("{:02}/{:02}/{}", d.day(), d.month(), d.year() + BE_OFFSET)
}

fn contact_index(db: &Database, company_id: &str) -> Result<HashMap<String, Contact>> {
    Ok(db
        .list_contacts(company_id)?
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect())
}

// ---------------------------------------------------------------------------
// VAT (ภ.พ.30)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VatLine {
    pub entry_id: String,
    pub issue_date: NaiveDate,
    pub document_number: Option<String>,
    pub counterparty_name: Option<String>,
    pub counterparty_tax_id: Option<String>,
    pub base_amount: Decimal,
    pub vat_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VatReport {
    pub company_id: String,
    pub month: Month,
    /// Sales tax invoices issued (ภาษีขาย).
    pub output_lines: Vec<VatLine>,
    /// Purchase tax invoices received (ภาษีซื้อ).
    pub input_lines: Vec<VatLine>,
    pub output_vat: Decimal,
    pub input_vat: Decimal,
    /// `output_vat - input_vat`.
    pub net: Decimal,
    pub payable: Decimal,
    pub credit_carried_forward: Decimal,
}

/// Build the monthly VAT return. Input VAT only counts once the tax invoice
/// is in hand.
pub fn vat_report(db: &Database, company_id: &str, month: Month) -> Result<VatReport> {
    let contacts = contact_index(db, company_id)?;
    let filter = month.filter();
    let party = |contact_id: &Option<String>| {
        let c = contact_id.as_ref().and_then(|id| contacts.get(id));
        (c.map(|c| c.name.clone()), c.and_then(|c| c.tax_id.clone()))
    };

    let output_lines: Vec<VatLine> = db
        .list_incomes(company_id, &filter)?
        .into_iter()
        .filter(|i| i.vat_amount > Decimal::ZERO)
        .map(|i| {
            let (name, tax_id) = party(&i.contact_id);
            VatLine {
                entry_id: i.id,
                issue_date: i.issue_date,
                document_number: i.document_number,
                counterparty_name: name,
                counterparty_tax_id: tax_id,
                base_amount: i.base_amount,
                vat_amount: i.vat_amount,
            }
        })
        .collect();

    let input_lines: Vec<VatLine> = db
        .list_expenses(company_id, &filter)?
        .into_iter()
        .filter(|e| e.claimable_vat() > Decimal::ZERO)
        .map(|e| {
            let (name, tax_id) = party(&e.contact_id);
            VatLine {
                entry_id: e.id,
                issue_date: e.issue_date,
                document_number: e.document_number,
                counterparty_name: name,
                counterparty_tax_id: tax_id,
                base_amount: e.base_amount,
                vat_amount: e.vat_amount,
            }
        })
        .collect();

    let output_vat: Decimal = output_lines.iter().map(|l| l.vat_amount).sum();
    let input_vat: Decimal = input_lines.iter().map(|l| l.vat_amount).sum();
    let net = output_vat - input_vat;

    Ok(VatReport {
        company_id: company_id.to_string(),
        month,
        output_lines,
        input_lines,
        output_vat,
        input_vat,
        net,
        payable: net.max(Decimal::ZERO),
        credit_carried_forward: (-net).max(Decimal::ZERO),
    })
}

// ---------------------------------------------------------------------------
// Withholding tax (ภ.ง.ด.3 / ภ.ง.ด.53)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhtLine {
    pub expense_id: String,
    pub payee_name: String,
    pub payee_tax_id: Option<String>,
    pub payee_address: Option<String>,
    pub issue_date: NaiveDate,
    pub description: String,
    pub wht_rate: Decimal,
    pub base_amount: Decimal,
    pub wht_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhtReport {
    pub company_id: String,
    pub month: Month,
    pub form: WhtForm,
    pub lines: Vec<WhtLine>,
    pub total_base: Decimal,
    pub total_wht: Decimal,
}

/// Tax the company withheld from payees in `month`, for one filing form.
/// Expenses without a contact are treated as paid to a juristic person.
pub fn wht_report(db: &Database, company_id: &str, month: Month, form: WhtForm) -> Result<WhtReport> {
    let contacts = contact_index(db, company_id)?;

    let lines: Vec<WhtLine> = db
        .list_expenses(company_id, &month.filter())?
        .into_iter()
        .filter(|e| e.wht_amount > Decimal::ZERO)
        .filter_map(|e| {
            let contact = e.contact_id.as_ref().and_then(|id| contacts.get(id));
            let kind = contact.map(|c| c.kind).unwrap_or(ContactKind::Juristic);
            if kind.wht_form() != form {
                return None;
            }
            Some(WhtLine {
                payee_name: contact
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| e.description.clone()),
                payee_tax_id: contact.and_then(|c| c.tax_id.clone()),
                payee_address: contact.and_then(|c| c.address.clone()),
                expense_id: e.id,
                issue_date: e.issue_date,
                description: e.description,
                wht_rate: e.wht_rate,
                base_amount: e.base_amount,
                wht_amount: e.wht_amount,
            })
        })
        .collect();

    Ok(WhtReport {
        company_id: company_id.to_string(),
        month,
        form,
        total_base: lines.iter().map(|l| l.base_amount).sum(),
        total_wht: lines.iter().map(|l| l.wht_amount).sum(),
        lines,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhtCreditLine {
    pub income_id: String,
    pub customer_name: Option<String>,
    pub customer_tax_id: Option<String>,
    pub issue_date: NaiveDate,
    pub wht_rate: Decimal,
    pub base_amount: Decimal,
    pub wht_amount: Decimal,
}

/// Tax customers withheld from the company, claimable against income tax.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhtCreditSummary {
    pub company_id: String,
    pub month: Month,
    pub lines: Vec<WhtCreditLine>,
    pub total_wht: Decimal,
}

pub fn wht_credit_summary(db: &Database, company_id: &str, month: Month) -> Result<WhtCreditSummary> {
    let contacts = contact_index(db, company_id)?;
    let lines: Vec<WhtCreditLine> = db
        .list_incomes(company_id, &month.filter())?
        .into_iter()
        .filter(|i| i.wht_amount > Decimal::ZERO)
        .map(|i| {
            let c = i.contact_id.as_ref().and_then(|id| contacts.get(id));
            WhtCreditLine {
                customer_name: c.map(|c| c.name.clone()),
                customer_tax_id: c.and_then(|c| c.tax_id.clone()),
                income_id: i.id,
                issue_date: i.issue_date,
                wht_rate: i.wht_rate,
                base_amount: i.base_amount,
                wht_amount: i.wht_amount,
            }
        })
        .collect();
    Ok(WhtCreditSummary {
        company_id: company_id.to_string(),
        month,
        total_wht: lines.iter().map(|l| l.wht_amount).sum(),
        lines,
    })
}

// ---------------------------------------------------------------------------
// Period summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub company_id: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub income_count: usize,
    pub expense_count: usize,
    /// Pre-VAT totals.
    pub income_base: Decimal,
    pub expense_base: Decimal,
    pub output_vat: Decimal,
    /// Claimable input VAT only.
    pub input_vat: Decimal,
    /// WHT the company withheld from payees and must remit.
    pub wht_withheld: Decimal,
    /// WHT customers withheld from the company.
    pub wht_credited: Decimal,
    pub profit_before_tax: Decimal,
}

pub fn period_summary(
    db: &Database,
    company_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<PeriodSummary> {
    if from > to {
        bail!("period start {from} is after end {to}");
    }
    let filter = EntryFilter {
        from: Some(from),
        to: Some(to),
        ..Default::default()
    };
    let incomes = db.list_incomes(company_id, &filter)?;
    let expenses = db.list_expenses(company_id, &filter)?;

    let income_base: Decimal = incomes.iter().map(|i| i.base_amount).sum();
    let expense_base: Decimal = expenses.iter().map(|e| e.base_amount).sum();

    Ok(PeriodSummary {
        company_id: company_id.to_string(),
        from,
        to,
        income_count: incomes.len(),
        expense_count: expenses.len(),
        income_base,
        expense_base,
        output_vat: incomes.iter().map(|i| i.vat_amount).sum(),
        input_vat: expenses.iter().map(|e| e.claimable_vat()).sum(),
        wht_withheld: expenses.iter().map(|e| e.wht_amount).sum(),
        wht_credited: incomes.iter().map(|i| i.wht_amount).sum(),
        profit_before_tax: income_base - expense_base,
    })
}

// ---------------------------------------------------------------------------
// CSV export
// ---------------------------------------------------------------------------

/// Excel only detects UTF-8 (and so renders Thai) when the file starts
/// with a byte-order mark.
const UTF8_BOM: &str = "\u{feff}";

fn finish_csv(writer: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush csv: {}", e.error()))?;
    let body = String::from_utf8(bytes).context("csv output is not utf-8")?;
    Ok(format!("{UTF8_BOM}{body}"))
}

pub fn vat_report_csv(report: &VatReport) -> Result<String> {
    let mut w = csv::Writer::from_writer(Vec::new());
    w.write_record([
        "ประเภท (Type)",
        "ลำดับ (No.)",
        "วันที่ (Date)",
        "เลขที่เอกสาร (Document No.)",
        "ชื่อคู่ค้า (Name)",
        "เลขประจำตัวผู้เสียภาษี (Tax ID)",
        "มูลค่า (Base)",
        "ภาษีมูลค่าเพิ่ม (VAT)",
    ])
    .context("failed to write csv header")?;

    for (kind, lines) in [
        ("ภาษีขาย (Output)", &report.output_lines),
        ("ภาษีซื้อ (Input)", &report.input_lines),
    ] {
        for (n, line) in lines.iter().enumerate() {
            w.write_record([
                kind.to_string(),
                (n + 1).to_string(),
                thai_date(line.issue_date),
                line.document_number.clone().unwrap_or_default(),
                line.counterparty_name.clone().unwrap_or_default(),
                line.counterparty_tax_id.clone().unwrap_or_default(),
                line.base_amount.to_string(),
                line.vat_amount.to_string(),
            ])
            .context("failed to write csv row")?;
        }
    }

    for (label, value) in [
        ("ภาษีขาย รวม (Output VAT)", report.output_vat),
        ("ภาษีซื้อ รวม (Input VAT)", report.input_vat),
        ("ภาษีที่ต้องชำระ (Payable)", report.payable),
        ("ภาษีชำระเกินยกไป (Credit carried forward)", report.credit_carried_forward),
    ] {
        let value = value.to_string();
        w.write_record([label, "", "", "", "", "", "", value.as_str()])
            .context("failed to write csv total")?;
    }

    finish_csv(w)
}

pub fn wht_report_csv(report: &WhtReport) -> Result<String> {
    let mut w = csv::Writer::from_writer(Vec::new());
    w.write_record([
        "ลำดับ (No.)",
        "เลขประจำตัวผู้เสียภาษี (Tax ID)",
        "ชื่อผู้มีเงินได้ (Payee)",
        "ที่อยู่ (Address)",
        "วันที่จ่าย (Date paid)",
        "ประเภทเงินได้ (Description)",
        "อัตราภาษี % (Rate)",
        "จำนวนเงินที่จ่าย (Amount paid)",
        "ภาษีที่หักไว้ (Tax withheld)",
    ])
    .context("failed to write csv header")?;

    for (n, line) in report.lines.iter().enumerate() {
        w.write_record([
            (n + 1).to_string(),
            line.payee_tax_id.clone().unwrap_or_default(),
            line.payee_name.clone(),
            line.payee_address.clone().unwrap_or_default(),
            thai_date(line.issue_date),
            line.description.clone(),
            line.wht_rate.to_string(),
            line.base_amount.to_string(),
            line.wht_amount.to_string(),
        ])
        .context("failed to write csv row")?;
    }

    w.write_record([
        format!("รวม {} (Total)", report.form.thai_name()),
        String::new(),
        String::new(),
        String::new(),
        String::new(),
        String::new(),
        String::new(),
        report.total_base.to_string(),
        report.total_wht.to_string(),
    ])
    .context("failed to write csv total")?;

    finish_csv(w)
}

// Heuristic risk scoring for a read receipt.
//
// Each flag carries a fixed weight; the score is their sum capped at 100 and
// the level comes from the configured thresholds.

use baht_core::config::FraudConfig;
use baht_core::model::Company;
use baht_core::tax::{validate_tax_id, TaxBreakdown, BREAKDOWN_TOLERANCE};
use baht_llm::ReceiptAnalysis;
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::vendor::normalize_vendor_name;

/// Totals at or above this that are whole thousands are flagged.
const ROUND_AMOUNT_MIN: Decimal = dec!(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudFlag {
    /// The same document was already recorded.
    DuplicateDocument,
    /// The vendor is the company itself.
    SelfIssued,
    /// Subtotal, VAT, total or line items do not add up.
    AmountMismatch,
    FutureDate,
    /// The vendor tax ID fails the checksum or is not 13 digits.
    InvalidTaxId,
    /// VAT is charged but no vendor tax ID is printed.
    VatWithoutTaxId,
    StaleDocument,
    LowConfidence,
    RoundAmount,
}

impl FraudFlag {
    pub fn weight(&self) -> u8 {
        match self {
            FraudFlag::DuplicateDocument => 40,
            FraudFlag::SelfIssued => 25,
            FraudFlag::AmountMismatch => 20,
            FraudFlag::FutureDate => 20,
            FraudFlag::InvalidTaxId => 15,
            FraudFlag::VatWithoutTaxId => 15,
            FraudFlag::StaleDocument => 10,
            FraudFlag::LowConfidence => 10,
            FraudFlag::RoundAmount => 5,
        }
    }

    /// Short Thai explanation for reviewers.
    pub fn describe(&self) -> &'static str {
        match self {
            FraudFlag::DuplicateDocument => "เอกสารนี้อาจถูกบันทึกไปแล้ว",
            FraudFlag::SelfIssued => "ผู้ขายเป็นบริษัทเดียวกับผู้ซื้อ",
            FraudFlag::AmountMismatch => "ยอดรวมไม่ตรงกับยอดก่อนภาษีและภาษี",
            FraudFlag::FutureDate => "วันที่เอกสารอยู่ในอนาคต",
            FraudFlag::InvalidTaxId => "เลขประจำตัวผู้เสียภาษีไม่ถูกต้อง",
            FraudFlag::VatWithoutTaxId => "มีภาษีมูลค่าเพิ่มแต่ไม่มีเลขประจำตัวผู้เสียภาษี",
            FraudFlag::StaleDocument => "เอกสารเก่าเกินกำหนด",
            FraudFlag::LowConfidence => "ระบบอ่านเอกสารได้ไม่ชัดเจน",
            FraudFlag::RoundAmount => "ยอดเงินเป็นตัวเลขกลม",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FraudAssessment {
    pub score: u8,
    pub level: RiskLevel,
    pub flags: Vec<FraudFlag>,
}

/// Facts about the receipt that the analysis alone does not carry.
pub struct FraudContext<'a> {
    pub company: &'a Company,
    pub today: NaiveDate,
    /// Live expenses that look like this document.
    pub duplicate_count: usize,
    pub thresholds: &'a FraudConfig,
}

fn amounts_disagree(a: &ReceiptAnalysis) -> bool {
    if let (Some(base), Some(vat), Some(total)) = (a.subtotal, a.vat_amount, a.total) {
        if (TaxBreakdown { base, vat, total }).validate().is_err() {
            return true;
        }
    }
    let item_amounts: Option<Vec<Decimal>> = a.line_items.iter().map(|i| i.amount).collect();
    match (item_amounts, a.subtotal.or(a.total)) {
        (Some(amounts), Some(expected)) if !amounts.is_empty() => {
            let sum: Decimal = amounts.iter().sum();
            (sum - expected).abs() > BREAKDOWN_TOLERANCE
                // Line items printed VAT-inclusive against a VAT-exclusive subtotal.
                && a.total.map_or(true, |t| (sum - t).abs() > BREAKDOWN_TOLERANCE)
        }
        _ => false,
    }
}

fn self_issued(a: &ReceiptAnalysis, company: &Company) -> bool {
    if let (Some(vendor), Some(own)) = (a.vendor_tax_id.as_deref(), company.tax_id.as_deref()) {
        if vendor == own {
            return true;
        }
    }
    match a.vendor_name.as_deref() {
        Some(name) => {
            let vendor = normalize_vendor_name(name);
            !vendor.is_empty() && vendor == normalize_vendor_name(&company.name)
        }
        None => false,
    }
}

/// Score `analysis` for signs of a fake, altered or re-used document.
pub fn assess(analysis: &ReceiptAnalysis, ctx: &FraudContext<'_>) -> FraudAssessment {
    let mut flags = Vec::new();

    if ctx.duplicate_count > 0 {
        flags.push(FraudFlag::DuplicateDocument);
    }
    if self_issued(analysis, ctx.company) {
        flags.push(FraudFlag::SelfIssued);
    }
    if amounts_disagree(analysis) {
        flags.push(FraudFlag::AmountMismatch);
    }
    if let Some(issued) = analysis.issue_date {
        if issued > ctx.today {
            flags.push(FraudFlag::FutureDate);
        } else if issued < ctx.today - Duration::days(ctx.thresholds.stale_after_days) {
            flags.push(FraudFlag::StaleDocument);
        }
    }
    let bad_tax_id = analysis.unparsed_vendor_tax_id.is_some()
        || analysis
            .vendor_tax_id
            .as_deref()
            .is_some_and(|id| !validate_tax_id(id));
    if bad_tax_id {
        flags.push(FraudFlag::InvalidTaxId);
    } else if analysis.vendor_tax_id.is_none()
        && analysis.vat_amount.is_some_and(|vat| vat > Decimal::ZERO)
    {
        flags.push(FraudFlag::VatWithoutTaxId);
    }
    if analysis.confidence < ctx.thresholds.low_confidence {
        flags.push(FraudFlag::LowConfidence);
    }
    if analysis
        .total
        .is_some_and(|t| t >= ROUND_AMOUNT_MIN && (t % ROUND_AMOUNT_MIN).is_zero())
    {
        flags.push(FraudFlag::RoundAmount);
    }

    let score = flags
        .iter()
        .map(|f| u32::from(f.weight()))
        .sum::<u32>()
        .min(100) as u8;
    let level = if score >= ctx.thresholds.high_threshold {
        RiskLevel::High
    } else if score >= ctx.thresholds.medium_threshold {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    FraudAssessment { score, level, flags }
}

// Learned vendor defaults and stored exchange rates.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::money::Currency;

/// Which rule made a vendor mapping match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Same 13-digit tax ID.
    TaxId,
    /// Same normalized vendor name.
    Exact,
    /// Normalized name contains the mapping's pattern.
    Contains,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::TaxId => "tax_id",
            MatchKind::Exact => "exact",
            MatchKind::Contains => "contains",
        }
    }

    pub fn from_str_kind(s: &str) -> Option<Self> {
        match s {
            "tax_id" => Some(MatchKind::TaxId),
            "exact" => Some(MatchKind::Exact),
            "contains" => Some(MatchKind::Contains),
            _ => None,
        }
    }
}

/// Defaults remembered for a vendor so the next receipt from them is
/// prefilled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorMapping {
    pub id: String,
    pub company_id: String,
    pub vendor_name: String,
    pub vendor_tax_id: Option<String>,
    /// Normalized form of `vendor_name` used as the match pattern.
    pub normalized_name: String,
    pub match_kind: MatchKind,
    pub contact_id: Option<String>,
    pub account_id: Option<String>,
    pub vat_rate: Option<Decimal>,
    pub wht_rate: Option<Decimal>,
    pub description_template: Option<String>,
    pub use_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// THB value of one unit of `currency` on `rate_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub company_id: String,
    pub currency: Currency,
    pub rate_date: NaiveDate,
    pub thb_per_unit: Decimal,
}

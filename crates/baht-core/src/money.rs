// Money helpers: satang rounding, percentages, lenient amount parsing and
// currency codes.

use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Number of decimal places kept for baht amounts (1 baht = 100 satang).
pub const SATANG_DP: u32 = 2;

/// Round an amount to satang, half away from zero (the Revenue Department
/// convention for tax amounts).
pub fn round_satang(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(SATANG_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// `base * rate_pct / 100`, rounded to satang.
pub fn percent_of(base: Decimal, rate_pct: Decimal) -> Decimal {
    round_satang(base * rate_pct / Decimal::ONE_HUNDRED)
}

/// Parse a human or model supplied amount such as `"1,234.50"`, `"฿ 99"`,
/// `"THB 1 200"` or `"-15.5"`.
///
/// Returns `None` for empty input or anything that is not a number once
/// separators and currency markers are removed.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let mut cleaned = raw.trim().to_string();
    for marker in ["THB", "thb", "บาท", "฿", "$", "USD"] {
        cleaned = cleaned.replace(marker, "");
    }
    let cleaned: String = cleaned
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned).ok()
}

// ---------------------------------------------------------------------------
// Currency
// ---------------------------------------------------------------------------

/// ISO-4217 style currency code (three upper-case ASCII letters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn thb() -> Self {
        Currency("THB".to_string())
    }

    pub fn new(code: &str) -> Option<Self> {
        let code = code.trim().to_ascii_uppercase();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()) {
            Some(Currency(code))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_thb(&self) -> bool {
        self.0 == "THB"
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::thb()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(&value).ok_or_else(|| format!("invalid currency code: {value}"))
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.0
    }
}

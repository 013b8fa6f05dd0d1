// Thai VAT and withholding-tax arithmetic.
//
// Amounts are split into base + VAT, withholding tax is taken on the pre-VAT
// base, and the net cash movement is `total - WHT` for both expenses (what we
// pay the vendor) and income (what the customer pays us).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::{percent_of, round_satang};

/// Standard Thai VAT rate in percent.
pub const STANDARD_VAT_RATE: Decimal = dec!(7);

/// Largest difference tolerated between `base + vat` and `total` when the
/// parts come from a user or from OCR.
pub const BREAKDOWN_TOLERANCE: Decimal = dec!(0.01);

/// Withholding-tax rates accepted by the Revenue Department forms, in percent.
pub const ALLOWED_WHT_RATES: [Decimal; 8] = [
    dec!(0),
    dec!(1),
    dec!(1.5),
    dec!(2),
    dec!(3),
    dec!(5),
    dec!(10),
    dec!(15),
];

#[derive(Debug, Error, PartialEq)]
pub enum TaxError {
    #[error("VAT rate must be between 0 and 100, got {0}")]
    InvalidVatRate(Decimal),

    #[error("withholding tax rate {0}% is not an allowed rate")]
    InvalidWhtRate(Decimal),

    #[error("amount must not be negative, got {0}")]
    NegativeAmount(Decimal),

    #[error("base {base} + VAT {vat} does not equal total {total}")]
    BreakdownMismatch {
        base: Decimal,
        vat: Decimal,
        total: Decimal,
    },
}

// ---------------------------------------------------------------------------
// VAT
// ---------------------------------------------------------------------------

/// How an entered amount relates to VAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VatMode {
    /// The entered amount is the pre-VAT base; VAT is added on top.
    #[default]
    Exclusive,
    /// The entered amount already includes VAT.
    Inclusive,
    /// No VAT applies (non-registered vendor, exempt goods).
    None,
}

/// A document amount split into base and VAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxBreakdown {
    pub base: Decimal,
    pub vat: Decimal,
    pub total: Decimal,
}

impl TaxBreakdown {
    /// Check the `amount = base + VAT` invariant for a breakdown supplied from
    /// outside (user input or OCR).
    pub fn validate(&self) -> Result<(), TaxError> {
        for v in [self.base, self.vat, self.total] {
            if v.is_sign_negative() && !v.is_zero() {
                return Err(TaxError::NegativeAmount(v));
            }
        }
        if (self.base + self.vat - self.total).abs() > BREAKDOWN_TOLERANCE {
            return Err(TaxError::BreakdownMismatch {
                base: self.base,
                vat: self.vat,
                total: self.total,
            });
        }
        Ok(())
    }
}

/// Split `amount` into base and VAT according to `mode`.
pub fn compute_vat(amount: Decimal, rate: Decimal, mode: VatMode) -> Result<TaxBreakdown, TaxError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(TaxError::NegativeAmount(amount));
    }
    if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
        return Err(TaxError::InvalidVatRate(rate));
    }
    let amount = round_satang(amount);

    let breakdown = match mode {
        VatMode::Exclusive => {
            let vat = percent_of(amount, rate);
            TaxBreakdown {
                base: amount,
                vat,
                total: amount + vat,
            }
        }
        VatMode::Inclusive => {
            let base = round_satang(amount * Decimal::ONE_HUNDRED / (Decimal::ONE_HUNDRED + rate));
            TaxBreakdown {
                base,
                vat: amount - base,
                total: amount,
            }
        }
        VatMode::None => TaxBreakdown {
            base: amount,
            vat: Decimal::ZERO,
            total: amount,
        },
    };
    Ok(breakdown)
}

// ---------------------------------------------------------------------------
// Withholding tax
// ---------------------------------------------------------------------------

/// Whether `rate` is one of the withholding rates the forms accept.
pub fn is_allowed_wht_rate(rate: Decimal) -> bool {
    ALLOWED_WHT_RATES.iter().any(|r| *r == rate)
}

/// Withholding tax on a pre-VAT `base`.
pub fn compute_wht(base: Decimal, rate: Decimal) -> Result<Decimal, TaxError> {
    if !is_allowed_wht_rate(rate) {
        return Err(TaxError::InvalidWhtRate(rate));
    }
    if base.is_sign_negative() && !base.is_zero() {
        return Err(TaxError::NegativeAmount(base));
    }
    Ok(percent_of(base, rate))
}

/// Cash actually paid to a vendor: document total less the tax we withhold.
pub fn net_payable(total: Decimal, wht: Decimal) -> Decimal {
    total - wht
}

/// Cash actually received from a customer: document total less the tax the
/// customer withholds on our behalf.
pub fn net_receivable(total: Decimal, wht: Decimal) -> Decimal {
    total - wht
}

/// Everything a bookkeeping entry needs from the tax rules in one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryAmounts {
    pub base: Decimal,
    pub vat_rate: Decimal,
    pub vat: Decimal,
    pub total: Decimal,
    pub wht_rate: Decimal,
    pub wht: Decimal,
    pub net: Decimal,
}

/// Compute base, VAT, WHT and net for an entered amount.
pub fn entry_amounts(
    amount: Decimal,
    vat_rate: Decimal,
    mode: VatMode,
    wht_rate: Decimal,
) -> Result<EntryAmounts, TaxError> {
    let effective_rate = if mode == VatMode::None { Decimal::ZERO } else { vat_rate };
    let breakdown = compute_vat(amount, effective_rate, mode)?;
    let wht = compute_wht(breakdown.base, wht_rate)?;
    Ok(EntryAmounts {
        base: breakdown.base,
        vat_rate: effective_rate,
        vat: breakdown.vat,
        total: breakdown.total,
        wht_rate,
        wht,
        net: net_payable(breakdown.total, wht),
    })
}

// ---------------------------------------------------------------------------
// Filing forms and tax IDs
// ---------------------------------------------------------------------------

/// Withholding-tax return a payment is filed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhtForm {
    /// ภ.ง.ด.3: payments to individuals.
    Pnd3,
    /// ภ.ง.ด.53: payments to juristic persons.
    Pnd53,
}

impl WhtForm {
    pub fn from_str_form(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pnd3" | "pnd_3" | "3" => Some(WhtForm::Pnd3),
            "pnd53" | "pnd_53" | "53" => Some(WhtForm::Pnd53),
            _ => None,
        }
    }

    pub fn thai_name(&self) -> &'static str {
        match self {
            WhtForm::Pnd3 => "ภ.ง.ด.3",
            WhtForm::Pnd53 => "ภ.ง.ด.53",
        }
    }
}

/// Validate a 13-digit Thai tax identification number (the citizen ID for
/// individuals, the juristic registration number for companies).
///
/// The last digit is a mod-11 check over the first twelve, weighted 13..2.
pub fn validate_tax_id(raw: &str) -> bool {
    let digits: Vec<u32> = raw
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .map(|c| c.to_digit(10))
        .collect::<Option<Vec<_>>>()
        .unwrap_or_default();
    if digits.len() != 13 {
        return false;
    }
    let sum: u32 = digits[..12]
        .iter()
        .enumerate()
        .map(|(i, d)| d * (13 - i as u32))
        .sum();
    let check = (11 - sum % 11) % 10;
    check == digits[12]
}

/// Strip separators from a tax ID, returning `None` unless 13 digits remain.
pub fn normalize_tax_id(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 13 {
        Some(digits)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_vat_adds_on_top() {
        let b = compute_vat(dec!(1000), STANDARD_VAT_RATE, VatMode::Exclusive).unwrap();
        assert_eq!(b.base, dec!(1000));
        assert_eq!(b.vat, dec!(70));
        assert_eq!(b.total, dec!(1070));
    }

    #[test]
    fn inclusive_vat_backs_out_base() {
        let b = compute_vat(dec!(1070), STANDARD_VAT_RATE, VatMode::Inclusive).unwrap();
        assert_eq!(b.base, dec!(1000));
        assert_eq!(b.vat, dec!(70));
        assert_eq!(b.total, dec!(1070));

        // 100 / 1.07 = 93.457... -> 93.46, VAT takes the remainder.
        let b = compute_vat(dec!(100), STANDARD_VAT_RATE, VatMode::Inclusive).unwrap();
        assert_eq!(b.base, dec!(93.46));
        assert_eq!(b.vat, dec!(6.54));
        assert_eq!(b.base + b.vat, b.total);
    }

    #[test]
    fn no_vat_mode_keeps_amount() {
        let b = compute_vat(dec!(250.5), STANDARD_VAT_RATE, VatMode::None).unwrap();
        assert_eq!(b.vat, Decimal::ZERO);
        assert_eq!(b.base, b.total);
    }

    #[test]
    fn rejects_negative_amount_and_bad_rate() {
        assert_eq!(
            compute_vat(dec!(-1), STANDARD_VAT_RATE, VatMode::Exclusive),
            Err(TaxError::NegativeAmount(dec!(-1)))
        );
        assert!(matches!(
            compute_vat(dec!(1), dec!(101), VatMode::Exclusive),
            Err(TaxError::InvalidVatRate(_))
        ));
    }

    #[test]
    fn breakdown_validation_tolerates_one_satang() {
        let ok = TaxBreakdown {
            base: dec!(93.45),
            vat: dec!(6.54),
            total: dec!(100),
        };
        assert!(ok.validate().is_ok());

        let bad = TaxBreakdown {
            base: dec!(90),
            vat: dec!(6.54),
            total: dec!(100),
        };
        assert!(matches!(bad.validate(), Err(TaxError::BreakdownMismatch { .. })));
    }

    #[test]
    fn wht_is_taken_on_base() {
        assert_eq!(compute_wht(dec!(10000), dec!(3)).unwrap(), dec!(300));
        assert_eq!(compute_wht(dec!(1000), dec!(1.5)).unwrap(), dec!(15));
        assert_eq!(
            compute_wht(dec!(1000), dec!(4)),
            Err(TaxError::InvalidWhtRate(dec!(4)))
        );
    }

    #[test]
    fn entry_amounts_service_fee_with_vat_and_wht() {
        // Service fee 10,000 + 7% VAT, 3% WHT -> pay 10,700 - 300 = 10,400.
        let a = entry_amounts(dec!(10000), dec!(7), VatMode::Exclusive, dec!(3)).unwrap();
        assert_eq!(a.vat, dec!(700));
        assert_eq!(a.total, dec!(10700));
        assert_eq!(a.wht, dec!(300));
        assert_eq!(a.net, dec!(10400));
    }

    #[test]
    fn entry_amounts_without_vat_zeroes_rate() {
        let a = entry_amounts(dec!(5000), dec!(7), VatMode::None, dec!(5)).unwrap();
        assert_eq!(a.vat_rate, Decimal::ZERO);
        assert_eq!(a.wht, dec!(250));
        assert_eq!(a.net, dec!(4750));
    }

    #[test]
    fn net_helpers_subtract_wht() {
        assert_eq!(net_payable(dec!(1070), dec!(30)), dec!(1040));
        assert_eq!(net_receivable(dec!(1070), dec!(30)), dec!(1040));
    }

    #[test]
    fn tax_id_checksum() {
        // 0105536112014: weighted sum 194, (11 - 194 % 11) % 10 = 4.
        assert!(validate_tax_id("0105536112014"));
        assert!(validate_tax_id("0-1055-36112-01-4"));
        assert!(!validate_tax_id("0105536112015"));
        assert!(!validate_tax_id("12345"));
        assert!(!validate_tax_id("abcdefghijklm"));
    }

    #[test]
    fn normalize_tax_id_strips_separators() {
        assert_eq!(
            normalize_tax_id("0-1055-36112-01-4").as_deref(),
            Some("0105536112014")
        );
        assert_eq!(normalize_tax_id("123"), None);
    }

    #[test]
    fn wht_form_parsing() {
        assert_eq!(WhtForm::from_str_form("PND53"), Some(WhtForm::Pnd53));
        assert_eq!(WhtForm::from_str_form("3"), Some(WhtForm::Pnd3));
        assert_eq!(WhtForm::from_str_form("pnd1"), None);
        assert_eq!(WhtForm::Pnd53.thai_name(), "ภ.ง.ด.53");
    }
}

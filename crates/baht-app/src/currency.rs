// Conversion of foreign-currency documents to baht.
//
// Stored rates win: the latest rate dated on or before the document date.
// Without one, the configured fallback table is used.

use std::collections::BTreeMap;

use baht_core::config::CurrencyConfig;
use baht_core::db::Database;
use baht_core::model::ExchangeRate;
use baht_core::money::{round_satang, Currency};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CurrencyError {
    #[error("no exchange rate for {0}")]
    UnknownCurrency(String),

    #[error("exchange rate for {currency} must be positive, got {rate}")]
    InvalidRate { currency: String, rate: Decimal },

    #[error("exchange rate lookup failed: {0}")]
    Lookup(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    /// A rate stored for the company.
    Stored,
    /// The configured fallback table.
    Fallback,
    /// The amount was already in baht.
    Identity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversion {
    pub original: Decimal,
    pub currency: Currency,
    /// THB per unit of `currency`.
    pub rate: Decimal,
    pub thb: Decimal,
    pub source: RateSource,
    /// Date of the stored rate used, if any.
    pub rate_date: Option<NaiveDate>,
}

pub struct CurrencyConverter<'a> {
    db: &'a Database,
    company_id: &'a str,
    fallback: &'a BTreeMap<String, Decimal>,
}

impl<'a> CurrencyConverter<'a> {
    pub fn new(db: &'a Database, company_id: &'a str, config: &'a CurrencyConfig) -> Self {
        Self {
            db,
            company_id,
            fallback: &config.fallback_rates,
        }
    }

    /// Convert `amount` in `currency` on `date` to baht, rounded to satang.
    pub fn to_thb(
        &self,
        amount: Decimal,
        currency: &Currency,
        date: NaiveDate,
    ) -> Result<Conversion, CurrencyError> {
        if currency.is_thb() {
            return Ok(Conversion {
                original: amount,
                currency: currency.clone(),
                rate: Decimal::ONE,
                thb: round_satang(amount),
                source: RateSource::Identity,
                rate_date: None,
            });
        }

        let stored = self
            .db
            .exchange_rate_on_or_before(self.company_id, currency, date)
            .map_err(|e| CurrencyError::Lookup(format!("{e:#}")))?;

        let (rate, source, rate_date) = match stored {
            Some(r) => (r.thb_per_unit, RateSource::Stored, Some(r.rate_date)),
            None => match self.fallback.get(currency.as_str()) {
                Some(rate) => (*rate, RateSource::Fallback, None),
                None => return Err(CurrencyError::UnknownCurrency(currency.to_string())),
            },
        };
        check_rate(currency, rate)?;

        let thb = round_satang(amount * rate);
        debug!(currency = %currency, %rate, ?source, %amount, %thb, "converted to THB");
        Ok(Conversion {
            original: amount,
            currency: currency.clone(),
            rate,
            thb,
            source,
            rate_date,
        })
    }
}

fn check_rate(currency: &Currency, rate: Decimal) -> Result<(), CurrencyError> {
    if rate <= Decimal::ZERO {
        return Err(CurrencyError::InvalidRate {
            currency: currency.to_string(),
            rate,
        });
    }
    Ok(())
}

/// Store a company rate after checking it is positive. Baht itself has no
/// rate to store.
pub fn record_rate(db: &Database, rate: &ExchangeRate) -> Result<(), CurrencyError> {
    if rate.currency.is_thb() {
        return Err(CurrencyError::InvalidRate {
            currency: rate.currency.to_string(),
            rate: rate.thb_per_unit,
        });
    }
    check_rate(&rate.currency, rate.thb_per_unit)?;
    db.set_exchange_rate(rate)
        .map_err(|e| CurrencyError::Lookup(format!("{e:#}")))
}

// Structured receipt data and the lenient parser that turns the model's text
// into it.
//
// Models wrap JSON in code fences, print amounts as "1,234.50", mix Buddhist
// and Gregorian years and occasionally return numbers as strings. Every field
// is optional except `confidence`, which falls back to 0.

use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use baht_core::model::Account;
use baht_core::money::{parse_amount, Currency};
use baht_core::tax::normalize_tax_id;

use crate::client::{InlineImage, LlmClient};
use crate::error::LlmError;
use crate::prompt;
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Years at or above this are Buddhist Era.
const BE_THRESHOLD: i32 = 2400;
const BE_OFFSET: i32 = 543;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    TaxInvoice,
    Receipt,
    Invoice,
    #[default]
    Other,
}

impl DocumentKind {
    fn from_model(s: &str) -> Self {
        let s = s.to_lowercase();
        if s.contains("tax") || s.contains("ใบกำกับภาษี") {
            DocumentKind::TaxInvoice
        } else if s.contains("receipt") || s.contains("ใบเสร็จ") {
            DocumentKind::Receipt
        } else if s.contains("invoice") || s.contains("ใบแจ้งหนี้") {
            DocumentKind::Invoice
        } else {
            DocumentKind::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub amount: Option<Decimal>,
}

/// What the model read from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReceiptAnalysis {
    pub vendor_name: Option<String>,
    /// 13 digits when present; anything else the model returned is dropped.
    pub vendor_tax_id: Option<String>,
    pub vendor_branch: Option<String>,
    pub vendor_address: Option<String>,
    pub buyer_name: Option<String>,
    pub buyer_tax_id: Option<String>,
    pub document_kind: DocumentKind,
    pub document_number: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub currency: Currency,
    pub subtotal: Option<Decimal>,
    pub vat_rate: Option<Decimal>,
    pub vat_amount: Option<Decimal>,
    pub total: Option<Decimal>,
    pub wht_rate: Option<Decimal>,
    pub wht_amount: Option<Decimal>,
    pub line_items: Vec<LineItem>,
    pub suggested_account_code: Option<String>,
    /// Model's self-reported confidence, clamped to `[0, 1]`.
    pub confidence: f64,
    /// The raw tax ID string when it did not normalize to 13 digits.
    pub unparsed_vendor_tax_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Slice the JSON object out of model text: strip code fences and take
/// everything from the first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a date as `YYYY-MM-DD`, `DD/MM/YYYY` or `DD-MM-YYYY`, converting
/// Buddhist-Era years.
pub fn parse_receipt_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let parts: Vec<&str> = raw.split(['-', '/', '.']).map(str::trim).collect();
    if parts.len() != 3 {
        return None;
    }
    let nums: Vec<i32> = parts
        .iter()
        .map(|p| p.parse::<i32>().ok())
        .collect::<Option<Vec<_>>>()?;

    let (year, month, day) = if parts[0].len() == 4 {
        (nums[0], nums[1], nums[2])
    } else if parts[2].len() == 4 {
        (nums[2], nums[1], nums[0])
    } else {
        return None;
    };
    let year = if year >= BE_THRESHOLD { year - BE_OFFSET } else { year };
    NaiveDate::from_ymd_opt(year, u32::try_from(month).ok()?, u32::try_from(day).ok()?)
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty() && !s.eq_ignore_ascii_case("null")).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn decimal_value(v: &Value) -> Option<Decimal> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .map(Decimal::from)
            .or_else(|| n.as_f64().and_then(Decimal::from_f64))
            .map(|d| d.normalize()),
        Value::String(s) => parse_amount(s.trim_end_matches('%')),
        _ => None,
    }
}

fn decimal_field(v: &Value, key: &str) -> Option<Decimal> {
    v.get(key).and_then(decimal_value)
}

fn line_items(v: &Value) -> Vec<LineItem> {
    v.get("line_items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let description = str_field(item, "description")?;
                    Some(LineItem {
                        description,
                        quantity: decimal_field(item, "quantity"),
                        unit_price: decimal_field(item, "unit_price"),
                        amount: decimal_field(item, "amount"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse the model's answer into a [`ReceiptAnalysis`].
pub fn parse_receipt_response(text: &str) -> Result<ReceiptAnalysis, LlmError> {
    let json = extract_json_object(text)
        .ok_or_else(|| LlmError::InvalidResponse("no JSON object in model output".into()))?;
    let v: Value = serde_json::from_str(json)
        .map_err(|e| LlmError::InvalidResponse(format!("model output is not valid JSON: {e}")))?;

    let raw_tax_id = str_field(&v, "vendor_tax_id");
    let vendor_tax_id = raw_tax_id.as_deref().and_then(normalize_tax_id);
    let unparsed_vendor_tax_id = match (&raw_tax_id, &vendor_tax_id) {
        (Some(raw), None) => Some(raw.clone()),
        _ => None,
    };

    let confidence = v
        .get("confidence")
        .and_then(|c| match c {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .filter(|c: &f64| c.is_finite())
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);

    Ok(ReceiptAnalysis {
        vendor_name: str_field(&v, "vendor_name"),
        vendor_tax_id,
        vendor_branch: str_field(&v, "vendor_branch"),
        vendor_address: str_field(&v, "vendor_address"),
        buyer_name: str_field(&v, "buyer_name"),
        buyer_tax_id: str_field(&v, "buyer_tax_id").as_deref().and_then(normalize_tax_id),
        document_kind: str_field(&v, "document_type")
            .map(|s| DocumentKind::from_model(&s))
            .unwrap_or_default(),
        document_number: str_field(&v, "document_number"),
        issue_date: str_field(&v, "issue_date").as_deref().and_then(parse_receipt_date),
        currency: str_field(&v, "currency")
            .as_deref()
            .and_then(Currency::new)
            .unwrap_or_default(),
        subtotal: decimal_field(&v, "subtotal"),
        vat_rate: decimal_field(&v, "vat_rate"),
        vat_amount: decimal_field(&v, "vat_amount"),
        total: decimal_field(&v, "total"),
        wht_rate: decimal_field(&v, "wht_rate"),
        wht_amount: decimal_field(&v, "wht_amount"),
        line_items: line_items(&v),
        suggested_account_code: str_field(&v, "suggested_account_code"),
        confidence,
        unparsed_vendor_tax_id,
    })
}

// ---------------------------------------------------------------------------
// End-to-end call
// ---------------------------------------------------------------------------

/// Send a document image to the model (retrying transient failures) and
/// parse what it read.
pub async fn read_receipt(
    client: &LlmClient,
    policy: &RetryPolicy,
    image: &InlineImage,
    accounts: &[Account],
) -> Result<ReceiptAnalysis, LlmError> {
    let system = prompt::system_prompt();
    let user = prompt::receipt_prompt(accounts);
    let (system, user) = (system.as_str(), user.as_str());

    let generation = retry_with_backoff(policy, "read_receipt", || {
        client.generate(system, user, Some(image))
    })
    .await?;
    debug!(chars = generation.text.len(), "receipt text received");

    let analysis = parse_receipt_response(&generation.text)?;
    info!(
        vendor = analysis.vendor_name.as_deref().unwrap_or("-"),
        confidence = analysis.confidence,
        input_tokens = generation.input_tokens,
        output_tokens = generation.output_tokens,
        "receipt read"
    );
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn extracts_json_from_code_fence() {
        let text = "Here you go:\n```json\n{\"a\": {\"b\": 1}}\n```\n";
        assert_eq!(extract_json_object(text), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json_object("no json"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn dates_in_both_orders_and_eras() {
        assert_eq!(parse_receipt_date("2024-05-03"), Some(date(2024, 5, 3)));
        assert_eq!(parse_receipt_date("2567-05-03"), Some(date(2024, 5, 3)));
        assert_eq!(parse_receipt_date("03/05/2567"), Some(date(2024, 5, 3)));
        assert_eq!(parse_receipt_date("3/5/2024"), Some(date(2024, 5, 3)));
        assert_eq!(parse_receipt_date("03.05.2567"), Some(date(2024, 5, 3)));
        assert_eq!(parse_receipt_date("31/02/2024"), None);
        assert_eq!(parse_receipt_date("03/05/67"), None);
        assert_eq!(parse_receipt_date("yesterday"), None);
    }

    #[test]
    fn parses_full_thai_tax_invoice() {
        let text = r#"```json
{
  "vendor_name": "บริษัท สยามแม็คโคร จำกัด (มหาชน)",
  "vendor_tax_id": "0-1055-36112-01-4",
  "vendor_branch": "00000",
  "buyer_name": "Acme Trading",
  "buyer_tax_id": null,
  "document_type": "tax_invoice",
  "document_number": "TI2405-0001",
  "issue_date": "03/05/2567",
  "currency": "thb",
  "subtotal": "1,000.00",
  "vat_rate": 7,
  "vat_amount": 70,
  "total": "1,070.00",
  "line_items": [
    {"description": "กระดาษ A4", "quantity": 2, "unit_price": "500", "amount": 1000},
    {"quantity": 1}
  ],
  "suggested_account_code": "5270",
  "confidence": 0.93
}
```"#;
        let r = parse_receipt_response(text).unwrap();
        assert_eq!(r.vendor_name.as_deref(), Some("บริษัท สยามแม็คโคร จำกัด (มหาชน)"));
        assert_eq!(r.vendor_tax_id.as_deref(), Some("0105536112014"));
        assert_eq!(r.unparsed_vendor_tax_id, None);
        assert_eq!(r.buyer_tax_id, None);
        assert_eq!(r.document_kind, DocumentKind::TaxInvoice);
        assert_eq!(r.issue_date, Some(date(2024, 5, 3)));
        assert!(r.currency.is_thb());
        assert_eq!(r.subtotal, Some(dec!(1000)));
        assert_eq!(r.vat_rate, Some(dec!(7)));
        assert_eq!(r.vat_amount, Some(dec!(70)));
        assert_eq!(r.total, Some(dec!(1070)));
        assert_eq!(r.line_items.len(), 1);
        assert_eq!(r.line_items[0].unit_price, Some(dec!(500)));
        assert_eq!(r.suggested_account_code.as_deref(), Some("5270"));
        assert!((r.confidence - 0.93).abs() < 1e-9);
    }

    #[test]
    fn lenient_on_missing_and_odd_values() {
        let r = parse_receipt_response(
            r#"{"vendor_tax_id": "12345", "total": 99.5, "currency": "US dollars", "confidence": 7, "wht_rate": "3%"}"#,
        )
        .unwrap();
        assert_eq!(r.vendor_tax_id, None);
        assert_eq!(r.unparsed_vendor_tax_id.as_deref(), Some("12345"));
        assert_eq!(r.total, Some(dec!(99.5)));
        assert!(r.currency.is_thb());
        assert_eq!(r.confidence, 1.0);
        assert_eq!(r.wht_rate, Some(dec!(3)));
        assert_eq!(r.document_kind, DocumentKind::Other);

        let r = parse_receipt_response(r#"{"confidence": -0.5, "vendor_name": "  "}"#).unwrap();
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.vendor_name, None);
    }

    #[test]
    fn non_json_output_is_invalid_response() {
        assert!(matches!(
            parse_receipt_response("I could not read this image."),
            Err(LlmError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_receipt_response("{not: json}"),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn read_receipt_disabled_client() {
        let image = InlineImage {
            mime_type: "image/jpeg".into(),
            data: vec![1, 2, 3],
        };
        let err = read_receipt(&LlmClient::Disabled, &RetryPolicy::default(), &image, &[])
            .await
            .unwrap_err();
        assert_eq!(err, LlmError::NotConfigured);
    }
}

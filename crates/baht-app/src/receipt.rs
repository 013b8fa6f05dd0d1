// Receipt pipeline: store the uploaded document, read it with the vision
// model, then prefill what we can (vendor mapping, account, baht amount) and
// check it against earlier expenses and the fraud rules.

use baht_core::config::Config;
use baht_core::db::{Database, DuplicateQuery};
use baht_core::model::{Account, AccountClass};
use baht_llm::{read_receipt, InlineImage, LlmClient, ReceiptAnalysis, RetryPolicy};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::access::require_member;
use crate::currency::{Conversion, CurrencyConverter};
use crate::error::{ServiceError, ServiceResult};
use crate::fraud::{assess, FraudAssessment, FraudContext};
use crate::storage::{extension_for, object_key, FileStore, StoredFile};
use crate::vendor::{find_best_match, VendorSuggestion};

/// Everything the client needs to show a prefilled expense form.
#[derive(Debug, Clone, Serialize)]
pub struct ReceiptSuggestion {
    pub file: StoredFile,
    pub analysis: ReceiptAnalysis,
    /// Remembered defaults for this vendor, if one matched.
    pub vendor: Option<VendorSuggestion>,
    pub contact_id: Option<String>,
    pub account_id: Option<String>,
    pub vat_rate: Option<Decimal>,
    pub wht_rate: Option<Decimal>,
    /// The document total in baht.
    pub conversion: Option<Conversion>,
    /// Live expenses that look like this document.
    pub duplicate_expense_ids: Vec<String>,
    pub fraud: FraudAssessment,
    /// Steps that could not be completed; the rest of the suggestion stands.
    pub warnings: Vec<String>,
}

pub struct ReceiptService<'a> {
    db: &'a Database,
    config: &'a Config,
    llm: &'a LlmClient,
    store: &'a dyn FileStore,
    retry: &'a RetryPolicy,
}

impl<'a> ReceiptService<'a> {
    pub fn new(
        db: &'a Database,
        config: &'a Config,
        llm: &'a LlmClient,
        store: &'a dyn FileStore,
        retry: &'a RetryPolicy,
    ) -> Self {
        Self {
            db,
            config,
            llm,
            store,
            retry,
        }
    }

    fn check_upload(&self, data: &[u8], content_type: &str) -> ServiceResult<()> {
        if extension_for(content_type).is_none() {
            return Err(ServiceError::Validation(format!(
                "unsupported file type `{content_type}`; send JPEG, PNG, WebP, HEIC or PDF"
            )));
        }
        if data.is_empty() {
            return Err(ServiceError::Validation("the uploaded file is empty".into()));
        }
        let limit = self.config.storage.max_upload_bytes;
        if data.len() > limit {
            return Err(ServiceError::Validation(format!(
                "file is {} bytes; the limit is {limit}",
                data.len()
            )));
        }
        Ok(())
    }

    /// Read an uploaded receipt for `company_id`.
    ///
    /// Storage and model failures abort. A missing exchange rate only adds a
    /// warning.
    pub async fn analyze(
        &self,
        actor_id: &str,
        company_id: &str,
        data: &[u8],
        content_type: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<ReceiptSuggestion> {
        require_member(self.db, company_id, actor_id)?;
        self.check_upload(data, content_type)?;
        let company = self
            .db
            .get_company(company_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("company {company_id}")))?;
        let today: NaiveDate = now.date_naive();

        let accounts: Vec<Account> = self
            .db
            .list_accounts(company_id)?
            .into_iter()
            .filter(|a| a.class == AccountClass::Expense)
            .collect();

        let key = object_key(company_id, today, content_type)?;
        let file = self.store.put(&key, content_type, data).await?;
        info!(company_id, key = %file.key, bytes = file.size, backend = self.store.backend(), "receipt stored");

        let image = InlineImage {
            mime_type: content_type.to_string(),
            data: data.to_vec(),
        };
        let analysis = match read_receipt(self.llm, self.retry, &image, &accounts).await {
            Ok(analysis) => analysis,
            Err(e) => {
                // Nothing refers to the file yet.
                if let Err(remove_err) = self.store.remove(&file.key).await {
                    warn!(company_id, key = %file.key, error = %remove_err, "unread receipt left in storage");
                }
                return Err(e.into());
            }
        };

        let mut warnings = Vec::new();

        let mappings = self.db.list_vendor_mappings(company_id)?;
        let vendor: Option<VendorSuggestion> = find_best_match(
            &mappings,
            analysis.vendor_name.as_deref(),
            analysis.vendor_tax_id.as_deref(),
        )
        .map(VendorSuggestion::from);
        if let Some(v) = &vendor {
            self.db.touch_vendor_mapping(company_id, &v.mapping_id, now)?;
        }

        let suggested_account = analysis
            .suggested_account_code
            .as_deref()
            .and_then(|code| accounts.iter().find(|a| a.code == code))
            .map(|a| a.id.clone());
        let account_id = vendor
            .as_ref()
            .and_then(|v| v.account_id.clone())
            .or(suggested_account);
        let contact_id = vendor.as_ref().and_then(|v| v.contact_id.clone());
        let vat_rate = vendor.as_ref().and_then(|v| v.vat_rate).or(analysis.vat_rate);
        let wht_rate = vendor.as_ref().and_then(|v| v.wht_rate).or(analysis.wht_rate);

        let document_date = analysis.issue_date.unwrap_or(today);
        let conversion = match analysis.total {
            Some(total) => {
                match CurrencyConverter::new(self.db, company_id, &self.config.currency).to_thb(
                    total,
                    &analysis.currency,
                    document_date,
                ) {
                    Ok(c) => Some(c),
                    Err(e) => {
                        warn!(company_id, currency = %analysis.currency, error = %e, "receipt total not converted");
                        warnings.push(e.to_string());
                        None
                    }
                }
            }
            None => None,
        };

        let duplicate_expense_ids = match (analysis.issue_date, analysis.total) {
            (Some(issue_date), Some(total)) => self
                .db
                .find_duplicate_expenses(
                    company_id,
                    &DuplicateQuery {
                        vendor_tax_id: analysis.vendor_tax_id.as_deref(),
                        document_number: analysis.document_number.as_deref(),
                        issue_date,
                        amount: conversion.as_ref().map_or(total, |c| c.thb),
                    },
                )?
                .into_iter()
                .map(|e| e.id)
                .collect(),
            _ => Vec::new(),
        };

        let fraud = assess(
            &analysis,
            &FraudContext {
                company: &company,
                today,
                duplicate_count: duplicate_expense_ids.len(),
                thresholds: &self.config.fraud,
            },
        );
        info!(
            company_id,
            vendor = analysis.vendor_name.as_deref().unwrap_or("-"),
            matched = vendor.is_some(),
            duplicates = duplicate_expense_ids.len(),
            score = fraud.score,
            level = ?fraud.level,
            "receipt analyzed"
        );

        Ok(ReceiptSuggestion {
            file,
            analysis,
            vendor,
            contact_id,
            account_id,
            vat_rate,
            wht_rate,
            conversion,
            duplicate_expense_ids,
            fraud,
            warnings,
        })
    }
}

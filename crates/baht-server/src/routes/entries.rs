// Expenses, incomes and receipt reading.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use baht_app::{
    Bookkeeping, ExpenseInput, IncomeInput, ReceiptService, ReceiptSuggestion, StatusChange,
};
use baht_core::model::{DocumentStatus, EntryFilter, Expense, Income};
use baht_core::report::Month;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use super::{created, ok, ApiResult, Created, Deleted};
use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::SharedState;

/// Query string for entry listings. `month` is shorthand for a from/to pair.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub month: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<DocumentStatus>,
    #[serde(default)]
    pub include_deleted: bool,
}

impl ListQuery {
    fn into_filter(self) -> Result<EntryFilter, ApiError> {
        let (from, to) = match self.month.as_deref() {
            Some(_) if self.from.is_some() || self.to.is_some() => {
                return Err(ApiError::bad_request("use either month or from/to, not both"));
            }
            Some(raw) => {
                let month = Month::parse(raw).map_err(|e| ApiError::bad_request(e.to_string()))?;
                (Some(month.first_day()), Some(month.last_day()))
            }
            None => (self.from, self.to),
        };
        Ok(EntryFilter {
            from,
            to,
            status: self.status,
            include_deleted: self.include_deleted,
        })
    }
}

// ---------------------------------------------------------------------------
// Expenses
// ---------------------------------------------------------------------------

pub async fn list_expenses(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<Expense>> {
    let filter = query.into_filter()?;
    let books = Bookkeeping::new(&state.db, &state.config);
    Ok(ok(books.list_expenses(&caller.user_id, &company_id, &filter)?))
}

pub async fn record_expense(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
    Json(input): Json<ExpenseInput>,
) -> Created<Expense> {
    let books = Bookkeeping::new(&state.db, &state.config);
    let expense = books.record_expense(&caller.user_id, &company_id, input, Utc::now())?;
    Ok(created(expense))
}

pub async fn get_expense(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path((company_id, expense_id)): Path<(String, String)>,
) -> ApiResult<Expense> {
    let books = Bookkeeping::new(&state.db, &state.config);
    Ok(ok(books.get_expense(&caller.user_id, &company_id, &expense_id)?))
}

pub async fn delete_expense(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path((company_id, expense_id)): Path<(String, String)>,
) -> ApiResult<Deleted> {
    let books = Bookkeeping::new(&state.db, &state.config);
    let deleted = books.delete_expense(&caller.user_id, &company_id, &expense_id, Utc::now())?;
    Ok(ok(Deleted {
        id: expense_id,
        deleted,
    }))
}

/// POST .../expenses/{expense_id}/status with `{"action":"advance","to":...}`
/// or `{"action":"revert"}`.
pub async fn change_expense_status(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path((company_id, expense_id)): Path<(String, String)>,
    Json(change): Json<StatusChange>,
) -> ApiResult<Expense> {
    let books = Bookkeeping::new(&state.db, &state.config);
    let expense = books.change_expense_status(&caller.user_id, &company_id, &expense_id, change)?;
    Ok(ok(expense))
}

// ---------------------------------------------------------------------------
// Incomes
// ---------------------------------------------------------------------------

pub async fn list_incomes(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<Income>> {
    let filter = query.into_filter()?;
    let books = Bookkeeping::new(&state.db, &state.config);
    Ok(ok(books.list_incomes(&caller.user_id, &company_id, &filter)?))
}

pub async fn record_income(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
    Json(input): Json<IncomeInput>,
) -> Created<Income> {
    let books = Bookkeeping::new(&state.db, &state.config);
    let income = books.record_income(&caller.user_id, &company_id, input, Utc::now())?;
    Ok(created(income))
}

pub async fn delete_income(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path((company_id, income_id)): Path<(String, String)>,
) -> ApiResult<Deleted> {
    let books = Bookkeeping::new(&state.db, &state.config);
    let deleted = books.delete_income(&caller.user_id, &company_id, &income_id, Utc::now())?;
    Ok(ok(Deleted {
        id: income_id,
        deleted,
    }))
}

pub async fn change_income_status(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path((company_id, income_id)): Path<(String, String)>,
    Json(change): Json<StatusChange>,
) -> ApiResult<Income> {
    let books = Bookkeeping::new(&state.db, &state.config);
    let income = books.change_income_status(&caller.user_id, &company_id, &income_id, change)?;
    Ok(ok(income))
}

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ReceiptUpload {
    pub mime_type: String,
    /// Base64 file content; a `data:` URL is accepted too.
    pub data: String,
}

fn decode_upload(raw: &str) -> Result<Vec<u8>, ApiError> {
    let payload = match raw.strip_prefix("data:") {
        Some(url) => url
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| ApiError::bad_request("malformed data URL"))?,
        None => raw,
    };
    STANDARD
        .decode(payload.trim())
        .map_err(|e| ApiError::bad_request(format!("data is not valid base64: {e}")))
}

/// POST .../receipts/analyze - store the file and suggest how to book it.
pub async fn analyze_receipt(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
    Json(upload): Json<ReceiptUpload>,
) -> ApiResult<ReceiptSuggestion> {
    let data = decode_upload(&upload.data)?;
    let service = ReceiptService::new(
        &state.db,
        &state.config,
        &state.llm,
        state.store.as_ref(),
        &state.retry,
    );
    let suggestion = service
        .analyze(
            &caller.user_id,
            &company_id,
            &data,
            upload.mime_type.trim(),
            Utc::now(),
        )
        .await?;
    Ok(ok(suggestion))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_expands_to_a_date_range() {
        let query = ListQuery {
            month: Some("2567-02".into()),
            ..Default::default()
        };
        let filter = query.into_filter().unwrap();
        assert_eq!(filter.from, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(filter.to, NaiveDate::from_ymd_opt(2024, 2, 29));

        let both = ListQuery {
            month: Some("2024-02".into()),
            from: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..Default::default()
        };
        assert!(both.into_filter().is_err());
    }

    #[test]
    fn uploads_accept_plain_base64_and_data_urls() {
        assert_eq!(decode_upload("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(decode_upload("data:image/png;base64,aGVsbG8=").unwrap(), b"hello");
        assert!(decode_upload("data:image/png;base64").is_err());
        assert!(decode_upload("not base64!").is_err());
    }
}

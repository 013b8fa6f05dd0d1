// Monthly tax returns and period summaries, as JSON or CSV.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Extension,
};
use baht_app::access::require_permission;
use baht_core::model::Permission;
use baht_core::report::{self, Month, PeriodSummary, WhtCreditSummary};
use baht_core::tax::WhtForm;
use chrono::NaiveDate;
use serde::Deserialize;

use super::{ok, ApiResult};
use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub month: String,
    pub form: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Format {
    Json,
    Csv,
}

impl ReportQuery {
    fn month(&self) -> Result<Month, ApiError> {
        Month::parse(&self.month).map_err(|e| ApiError::bad_request(e.to_string()))
    }

    fn format(&self) -> Result<Format, ApiError> {
        match self.format.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("json") => Ok(Format::Json),
            Some("csv") => Ok(Format::Csv),
            Some(other) => Err(ApiError::bad_request(format!(
                "unknown format `{other}`; use json or csv"
            ))),
        }
    }
}

fn csv_download(filename: String, body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}

/// GET .../reports/vat?month=YYYY-MM[&format=csv] - ภ.พ.30.
pub async fn vat(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    require_permission(&state.db, &company_id, &caller.user_id, Permission::ViewReports)?;
    let month = query.month()?;
    let format = query.format()?;
    let vat = report::vat_report(&state.db, &company_id, month)?;
    Ok(match format {
        Format::Json => ok(vat).into_response(),
        Format::Csv => csv_download(format!("vat-{month}.csv"), report::vat_report_csv(&vat)?),
    })
}

/// GET .../reports/wht?month=YYYY-MM&form=pnd3|pnd53[&format=csv]
pub async fn wht(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    require_permission(&state.db, &company_id, &caller.user_id, Permission::ViewReports)?;
    let month = query.month()?;
    let format = query.format()?;
    let form = query
        .form
        .as_deref()
        .and_then(WhtForm::from_str_form)
        .ok_or_else(|| ApiError::bad_request("form must be pnd3 or pnd53"))?;
    let wht = report::wht_report(&state.db, &company_id, month, form)?;
    Ok(match format {
        Format::Json => ok(wht).into_response(),
        Format::Csv => {
            let tag = match form {
                WhtForm::Pnd3 => "pnd3",
                WhtForm::Pnd53 => "pnd53",
            };
            csv_download(format!("wht-{tag}-{month}.csv"), report::wht_report_csv(&wht)?)
        }
    })
}

/// GET .../reports/wht-credits?month=YYYY-MM - tax customers withheld from us.
pub async fn wht_credits(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<WhtCreditSummary> {
    require_permission(&state.db, &company_id, &caller.user_id, Permission::ViewReports)?;
    let month = query.month()?;
    Ok(ok(report::wht_credit_summary(&state.db, &company_id, month)?))
}

/// GET .../reports/summary?from=YYYY-MM-DD&to=YYYY-MM-DD
pub async fn summary(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
    Query(query): Query<SummaryQuery>,
) -> ApiResult<PeriodSummary> {
    require_permission(&state.db, &company_id, &caller.user_id, Permission::ViewReports)?;
    if query.from > query.to {
        return Err(ApiError::bad_request(format!(
            "period start {} is after end {}",
            query.from, query.to
        )));
    }
    Ok(ok(report::period_summary(
        &state.db,
        &company_id,
        query.from,
        query.to,
    )?))
}

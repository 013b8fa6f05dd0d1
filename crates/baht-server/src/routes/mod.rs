// Router assembly and the JSON envelope shared by every handler.

mod companies;
mod entries;
mod reports;
mod workflow;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::auth_middleware;
use crate::error::ApiError;
use crate::state::SharedState;

/// Successful responses are wrapped as `{"success": true, "data": ...}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;
pub type Created<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { success: true, data })
}

pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, ok(data))
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub id: String,
    /// False when the record was already deleted.
    pub deleted: bool,
}

/// Base64 inflates uploads by a third; leave room for the JSON around it.
fn receipt_body_limit(max_upload_bytes: usize) -> usize {
    max_upload_bytes / 3 * 4 + 64 * 1024
}

pub fn build_router(state: SharedState) -> Router {
    let company = Router::new()
        .route("/", get(companies::get_company))
        .route("/members", post(companies::add_member))
        .route(
            "/contacts",
            get(companies::list_contacts).post(companies::add_contact),
        )
        .route(
            "/accounts",
            get(companies::list_accounts).post(companies::add_account),
        )
        .route(
            "/vendor-mappings",
            get(companies::list_vendor_mappings).post(companies::save_vendor_mapping),
        )
        .route(
            "/vendor-mappings/{mapping_id}",
            delete(companies::delete_vendor_mapping),
        )
        .route("/exchange-rates", put(companies::set_exchange_rate))
        .route(
            "/expenses",
            get(entries::list_expenses).post(entries::record_expense),
        )
        .route(
            "/expenses/{expense_id}",
            get(entries::get_expense).delete(entries::delete_expense),
        )
        .route(
            "/expenses/{expense_id}/status",
            post(entries::change_expense_status),
        )
        .route(
            "/incomes",
            get(entries::list_incomes).post(entries::record_income),
        )
        .route("/incomes/{income_id}", delete(entries::delete_income))
        .route(
            "/incomes/{income_id}/status",
            post(entries::change_income_status),
        )
        .route(
            "/receipts/analyze",
            post(entries::analyze_receipt).layer(DefaultBodyLimit::max(receipt_body_limit(
                state.config.storage.max_upload_bytes,
            ))),
        )
        .route(
            "/reimbursements",
            get(workflow::list_reimbursements).post(workflow::submit_reimbursement),
        )
        .route(
            "/reimbursements/{request_id}/approve",
            post(workflow::approve_reimbursement),
        )
        .route(
            "/reimbursements/{request_id}/reject",
            post(workflow::reject_reimbursement),
        )
        .route(
            "/reimbursements/{request_id}/pay",
            post(workflow::pay_reimbursement),
        )
        .route("/settlements/pending", get(workflow::pending_settlements))
        .route(
            "/settlements",
            get(workflow::list_settlements).post(workflow::settle),
        )
        .route(
            "/settlements/{settlement_id}/reverse",
            post(workflow::reverse_settlement),
        )
        .route("/reports/vat", get(reports::vat))
        .route("/reports/wht", get(reports::wht))
        .route("/reports/wht-credits", get(reports::wht_credits))
        .route("/reports/summary", get(reports::summary));

    let api = Router::new()
        .route("/companies", post(companies::create_company))
        .nest("/companies/{company_id}", company)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - liveness plus which integrations are switched on.
async fn health(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "ai": state.llm.is_enabled(),
        "line": state.notifier.is_enabled(),
        "storage": state.store.backend(),
    }))
}

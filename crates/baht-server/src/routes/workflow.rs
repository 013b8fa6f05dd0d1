// Reimbursement requests and settlement payments.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use baht_app::{ReimbursementInput, Reimbursements, SettleInput, Settlements};
use baht_core::model::{
    Expense, PendingSettlement, ReimbursementRequest, ReimbursementStatus, SettlementPayment,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{created, ok, ApiResult, Created};
use crate::auth::Caller;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct ReimbursementQuery {
    pub status: Option<ReimbursementStatus>,
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct PayBody {
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaidReimbursement {
    pub reimbursement: ReimbursementRequest,
    pub expense: Expense,
}

pub async fn list_reimbursements(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
    Query(query): Query<ReimbursementQuery>,
) -> ApiResult<Vec<ReimbursementRequest>> {
    let svc = Reimbursements::new(&state.db, &state.notifier);
    Ok(ok(svc.list(&caller.user_id, &company_id, query.status)?))
}

pub async fn submit_reimbursement(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
    Json(input): Json<ReimbursementInput>,
) -> Created<ReimbursementRequest> {
    let svc = Reimbursements::new(&state.db, &state.notifier);
    let request = svc
        .submit(&caller.user_id, &company_id, input, Utc::now())
        .await?;
    Ok(created(request))
}

pub async fn approve_reimbursement(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path((company_id, request_id)): Path<(String, String)>,
) -> ApiResult<ReimbursementRequest> {
    let svc = Reimbursements::new(&state.db, &state.notifier);
    let request = svc
        .approve(&caller.user_id, &company_id, &request_id, Utc::now())
        .await?;
    Ok(ok(request))
}

pub async fn reject_reimbursement(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path((company_id, request_id)): Path<(String, String)>,
    Json(body): Json<RejectBody>,
) -> ApiResult<ReimbursementRequest> {
    let svc = Reimbursements::new(&state.db, &state.notifier);
    let request = svc
        .reject(&caller.user_id, &company_id, &request_id, &body.reason)
        .await?;
    Ok(ok(request))
}

/// POST .../reimbursements/{request_id}/pay - pays the request and books the
/// matching expense.
pub async fn pay_reimbursement(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path((company_id, request_id)): Path<(String, String)>,
    Json(body): Json<PayBody>,
) -> ApiResult<PaidReimbursement> {
    let svc = Reimbursements::new(&state.db, &state.notifier);
    let (reimbursement, expense) = svc
        .pay(
            &caller.user_id,
            &company_id,
            &request_id,
            body.reference,
            Utc::now(),
        )
        .await?;
    Ok(ok(PaidReimbursement {
        reimbursement,
        expense,
    }))
}

pub async fn pending_settlements(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
) -> ApiResult<Vec<PendingSettlement>> {
    let svc = Settlements::new(&state.db, &state.notifier);
    Ok(ok(svc.pending_summary(&caller.user_id, &company_id)?))
}

pub async fn list_settlements(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
) -> ApiResult<Vec<SettlementPayment>> {
    let svc = Settlements::new(&state.db, &state.notifier);
    Ok(ok(svc.list(&caller.user_id, &company_id)?))
}

pub async fn settle(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
    Json(input): Json<SettleInput>,
) -> Created<SettlementPayment> {
    let svc = Settlements::new(&state.db, &state.notifier);
    let payment = svc
        .settle(&caller.user_id, &company_id, input, Utc::now())
        .await?;
    Ok(created(payment))
}

pub async fn reverse_settlement(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path((company_id, settlement_id)): Path<(String, String)>,
) -> ApiResult<SettlementPayment> {
    let svc = Settlements::new(&state.db, &state.notifier);
    let payment = svc
        .reverse(&caller.user_id, &company_id, &settlement_id, Utc::now())
        .await?;
    Ok(ok(payment))
}

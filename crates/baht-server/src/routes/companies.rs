// Companies, members, contacts, the chart of accounts, vendor mappings and
// exchange rates.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use baht_app::directory::{self, NewAccount, NewCompany, NewContact, NewMember, RateInput};
use baht_app::vendor::LearnInput;
use baht_core::model::{Account, Company, Contact, ExchangeRate, Membership, VendorMapping};
use chrono::Utc;

use super::{created, ok, ApiResult, Created, Deleted};
use crate::auth::Caller;
use crate::state::SharedState;

/// POST /api/companies - the caller becomes the owner.
pub async fn create_company(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Json(input): Json<NewCompany>,
) -> Created<Company> {
    let company = directory::create_company(&state.db, &caller.user_id, input, Utc::now())?;
    Ok(created(company))
}

pub async fn get_company(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
) -> ApiResult<Company> {
    Ok(ok(directory::get_company(&state.db, &caller.user_id, &company_id)?))
}

pub async fn add_member(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
    Json(input): Json<NewMember>,
) -> ApiResult<Membership> {
    Ok(ok(directory::add_member(&state.db, &caller.user_id, &company_id, input)?))
}

pub async fn list_contacts(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
) -> ApiResult<Vec<Contact>> {
    Ok(ok(directory::list_contacts(&state.db, &caller.user_id, &company_id)?))
}

pub async fn add_contact(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
    Json(input): Json<NewContact>,
) -> Created<Contact> {
    let contact =
        directory::add_contact(&state.db, &caller.user_id, &company_id, input, Utc::now())?;
    Ok(created(contact))
}

pub async fn list_accounts(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
) -> ApiResult<Vec<Account>> {
    Ok(ok(directory::list_accounts(&state.db, &caller.user_id, &company_id)?))
}

pub async fn add_account(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
    Json(input): Json<NewAccount>,
) -> Created<Account> {
    let account = directory::add_account(&state.db, &caller.user_id, &company_id, input)?;
    Ok(created(account))
}

pub async fn list_vendor_mappings(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
) -> ApiResult<Vec<VendorMapping>> {
    Ok(ok(directory::list_vendor_mappings(
        &state.db,
        &caller.user_id,
        &company_id,
    )?))
}

pub async fn save_vendor_mapping(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
    Json(input): Json<LearnInput>,
) -> ApiResult<VendorMapping> {
    let mapping = directory::save_vendor_mapping(
        &state.db,
        &caller.user_id,
        &company_id,
        input,
        Utc::now(),
    )?;
    Ok(ok(mapping))
}

pub async fn delete_vendor_mapping(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path((company_id, mapping_id)): Path<(String, String)>,
) -> ApiResult<Deleted> {
    directory::delete_vendor_mapping(&state.db, &caller.user_id, &company_id, &mapping_id)?;
    Ok(ok(Deleted {
        id: mapping_id,
        deleted: true,
    }))
}

/// PUT /api/companies/{company_id}/exchange-rates - store one day's rate.
pub async fn set_exchange_rate(
    State(state): State<SharedState>,
    Extension(caller): Extension<Caller>,
    Path(company_id): Path<String>,
    Json(input): Json<RateInput>,
) -> ApiResult<ExchangeRate> {
    Ok(ok(directory::set_exchange_rate(
        &state.db,
        &caller.user_id,
        &company_id,
        input,
    )?))
}

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::state::SharedState;

/// Authenticated caller, available to handlers via request extensions.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub name: String,
}

#[derive(Serialize)]
struct AuthError {
    success: bool,
    error: String,
}

fn unauthorized(error: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(AuthError {
            success: false,
            error: error.to_string(),
        }),
    )
        .into_response()
}

pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Response {
    let api_key = req
        .headers()
        .get("X-API-Key")
        .or_else(|| req.headers().get(header::AUTHORIZATION))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.strip_prefix("Bearer ").unwrap_or(s).trim());

    let Some(key) = api_key.filter(|k| !k.is_empty()) else {
        return unauthorized(
            "Missing API key. Provide X-API-Key header or Authorization: Bearer <key>",
        );
    };

    let found = state
        .config
        .credentials
        .api_keys
        .iter()
        .find(|entry| entry.key.as_bytes().ct_eq(key.as_bytes()).into());

    match found {
        Some(entry) => {
            tracing::debug!(caller = %entry.name, user_id = %entry.user_id, "authenticated request");
            req.extensions_mut().insert(Caller {
                user_id: entry.user_id.clone(),
                name: entry.name.clone(),
            });
            next.run(req).await
        }
        None => {
            tracing::warn!("invalid API key presented");
            unauthorized("Invalid API key")
        }
    }
}

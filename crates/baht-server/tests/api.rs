// End-to-end tests driving the router in memory.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use baht_app::storage::LocalFileStore;
use baht_app::Notifier;
use baht_core::config::{
    AiConfig, ApiKeyEntry, Config, CredentialsConfig, CurrencyConfig, FraudConfig, ServerConfig,
    StorageBackend, StorageConfig, TaxConfig,
};
use baht_core::db::Database;
use baht_llm::{LlmClient, RetryPolicy};
use baht_server::{build_router, AppState};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::ServiceExt;

const OWNER_KEY: &str = "owner-key";
const STAFF_KEY: &str = "staff-key";
const STAFF: &str = "u-staff";

fn config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        },
        db_path: ":memory:".into(),
        storage: StorageConfig {
            backend: StorageBackend::Local,
            local_dir: "receipts".into(),
            bucket: "receipts".into(),
            max_upload_bytes: 1024 * 1024,
        },
        log_filter: "baht=debug".into(),
        tax: TaxConfig {
            default_vat_rate: dec!(7),
        },
        ai: AiConfig {
            model: "gemini-2.0-flash".into(),
            max_output_tokens: 2048,
            temperature: 0.1,
            max_attempts: 1,
            initial_backoff_ms: 5,
            backoff_multiplier: 2,
            timeout_secs: 5,
        },
        currency: CurrencyConfig {
            base: "THB".into(),
            fallback_rates: BTreeMap::from([("USD".to_string(), dec!(36.00))]),
        },
        fraud: FraudConfig {
            medium_threshold: 30,
            high_threshold: 60,
            stale_after_days: 180,
            low_confidence: 0.6,
        },
        credentials: CredentialsConfig {
            api_keys: vec![
                ApiKeyEntry {
                    name: "Somchai".into(),
                    key: OWNER_KEY.into(),
                    user_id: "u-owner".into(),
                },
                ApiKeyEntry {
                    name: "Malee".into(),
                    key: STAFF_KEY.into(),
                    user_id: STAFF.into(),
                },
            ],
            ..Default::default()
        },
    }
}

fn app() -> Router {
    let state = AppState {
        db: Database::open(":memory:").unwrap(),
        config: config(),
        llm: LlmClient::Disabled,
        notifier: Notifier::Disabled,
        store: Arc::new(LocalFileStore::new(std::env::temp_dir().join("baht-api-tests"))),
        retry: RetryPolicy::default(),
    };
    state.seed_api_users().unwrap();
    build_router(Arc::new(state))
}

async fn send(app: &Router, method: &str, uri: &str, key: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send_raw(app, method, uri, key, body).await;
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn send_raw(
    app: &Router,
    method: &str,
    uri: &str,
    key: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Vec<u8>) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        req = req.header("X-API-Key", key);
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => req.body(Body::empty()),
    }
    .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

fn decimal(v: &Value) -> Decimal {
    v.as_str().unwrap().parse().unwrap()
}

/// Create a company owned by the owner key, with the staff key as staff.
async fn company(app: &Router) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/companies",
        Some(OWNER_KEY),
        Some(json!({"name": "Acme Trading Co., Ltd.", "tax_id": "0105559123454"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        app,
        "POST",
        &format!("/api/companies/{id}/members"),
        Some(OWNER_KEY),
        Some(json!({"user_id": STAFF, "role": "staff"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    id
}

async fn account_id(app: &Router, company: &str, code: &str) -> String {
    let (_, body) = send(app, "GET", &format!("/api/companies/{company}/accounts"), Some(OWNER_KEY), None).await;
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["code"] == code)
        .map(|a| a["id"].as_str().unwrap().to_string())
        .unwrap()
}

#[tokio::test]
async fn health_needs_no_key() {
    let app = app();
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["ai"], false);
    assert_eq!(body["storage"], "local");
}

#[tokio::test]
async fn api_rejects_missing_or_wrong_keys() {
    let app = app();
    let (status, body) = send(&app, "POST", "/api/companies", None, Some(json!({"name": "x"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, body) = send(&app, "GET", "/api/companies/c1", Some("wrong"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid API key");

    let req = Request::builder()
        .uri("/api/companies/c1")
        .header(header::AUTHORIZATION, format!("Bearer {OWNER_KEY}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    // Authenticated, but not a member of a company that does not exist.
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn expense_moves_into_the_vat_report() {
    let app = app();
    let company = company(&app).await;
    let account = account_id(&app, &company, "5260").await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/companies/{company}/expenses"),
        Some(OWNER_KEY),
        Some(json!({
            "description": "Legal advice",
            "issue_date": "2024-05-03",
            "document_number": "INV-001",
            "amount": "10000",
            "wht_rate": "3",
            "account_id": account,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let expense = &body["data"];
    assert_eq!(decimal(&expense["amount"]), dec!(10700));
    assert_eq!(decimal(&expense["wht_amount"]), dec!(300));
    assert_eq!(decimal(&expense["net_paid"]), dec!(10400));
    assert_eq!(expense["status"], "waiting_tax_invoice");
    let expense_id = expense["id"].as_str().unwrap().to_string();

    let vat_uri = format!("/api/companies/{company}/reports/vat?month=2024-05");
    let (_, body) = send(&app, "GET", &vat_uri, Some(OWNER_KEY), None).await;
    assert_eq!(decimal(&body["data"]["input_vat"]), Decimal::ZERO);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/companies/{company}/expenses/{expense_id}/status"),
        Some(OWNER_KEY),
        Some(json!({"action": "advance", "to": "ready"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "ready");

    let (_, body) = send(&app, "GET", &vat_uri, Some(OWNER_KEY), None).await;
    assert_eq!(decimal(&body["data"]["input_vat"]), dec!(700));
    assert_eq!(decimal(&body["data"]["credit_carried_forward"]), dec!(700));

    let (status, bytes) = send_raw(&app, "GET", &format!("{vat_uri}&format=csv"), Some(OWNER_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    let csv = String::from_utf8(bytes).unwrap();
    assert!(csv.starts_with('\u{feff}'));
    assert!(csv.contains("INV-001"));

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/companies/{company}/reports/wht?month=2567-05&form=pnd53"),
        Some(OWNER_KEY),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(decimal(&body["data"]["total_wht"]), dec!(300));

    let (status, _) = send(
        &app,
        "GET",
        &format!("/api/companies/{company}/reports/wht?month=2024-05&form=pnd1"),
        Some(OWNER_KEY),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn staff_are_limited_to_their_own_spending() {
    let app = app();
    let company = company(&app).await;
    let expenses = format!("/api/companies/{company}/expenses");

    let (status, body) = send(
        &app,
        "POST",
        &expenses,
        Some(STAFF_KEY),
        Some(json!({"description": "Taxi", "issue_date": "2024-05-03", "amount": "250"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");

    let (status, body) = send(
        &app,
        "POST",
        &expenses,
        Some(STAFF_KEY),
        Some(json!({
            "description": "Taxi",
            "issue_date": "2024-05-03",
            "amount": "250",
            "vat_mode": "none",
            "paid_by": {"kind": "employee", "user_id": STAFF},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let expense_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        "GET",
        &format!("/api/companies/{company}/reports/vat?month=2024-05"),
        Some(STAFF_KEY),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = send(&app, "GET", &format!("/api/companies/{company}/settlements/pending"), Some(OWNER_KEY), None).await;
    assert_eq!(body["data"][0]["payee_name"], "Malee");
    assert_eq!(body["data"][0]["expense_count"], 1);

    let settle = json!({"payee_id": STAFF, "expense_ids": [expense_id], "reference": "TRF-9"});
    let settlements = format!("/api/companies/{company}/settlements");
    let (status, _) = send(&app, "POST", &settlements, Some(STAFF_KEY), Some(settle.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, "POST", &settlements, Some(OWNER_KEY), Some(settle.clone())).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(decimal(&body["data"]["total_amount"]), dec!(250));

    let (status, body) = send(&app, "POST", &settlements, Some(OWNER_KEY), Some(settle)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);

    let (_, body) = send(&app, "GET", &format!("/api/companies/{company}/settlements/pending"), Some(STAFF_KEY), None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn reimbursement_round_trip() {
    let app = app();
    let company = company(&app).await;
    let base = format!("/api/companies/{company}/reimbursements");

    let (status, body) = send(
        &app,
        "POST",
        &base,
        Some(STAFF_KEY),
        Some(json!({"description": "Printer ink", "amount": "1070", "vat_amount": "70", "issue_date": "2024-05-02"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(&app, "POST", &format!("{base}/{id}/approve"), Some(STAFF_KEY), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, "POST", &format!("{base}/{id}/reject"), Some(OWNER_KEY), Some(json!({}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    let (status, body) = send(&app, "POST", &format!("{base}/{id}/approve"), Some(OWNER_KEY), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "approved");

    let (status, body) = send(
        &app,
        "POST",
        &format!("{base}/{id}/pay"),
        Some(OWNER_KEY),
        Some(json!({"reference": "TRF-77"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["reimbursement"]["status"], "paid");
    assert_eq!(decimal(&body["data"]["expense"]["base_amount"]), dec!(1000));

    let (_, body) = send(&app, "GET", &format!("{base}?status=paid"), Some(STAFF_KEY), None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

// Fixtures for service tests: an in-memory company with members of every
// role, two contacts and the seeded chart of accounts.

use std::collections::BTreeMap;

use baht_core::config::{
    AiConfig, Config, CredentialsConfig, CurrencyConfig, FraudConfig, ServerConfig,
    StorageBackend, StorageConfig, TaxConfig,
};
use baht_core::db::Database;
use baht_core::model::{Company, Contact, ContactKind, Membership, Role, User};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal_macros::dec;

pub const COMPANY: &str = "c-acme";
pub const COMPANY_TAX_ID: &str = "0105559123454";
pub const OWNER: &str = "u-owner";
pub const ACCOUNTANT: &str = "u-accountant";
pub const STAFF: &str = "u-staff";
pub const VENDOR: &str = "ct-vendor";
pub const VENDOR_TAX_ID: &str = "0105536112014";
pub const FREELANCER: &str = "ct-freelancer";

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 8080,
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
            max_attempts: 2,
            initial_backoff_ms: 5,
            backoff_multiplier: 2,
            timeout_secs: 10,
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
        credentials: CredentialsConfig::default(),
    }
}

fn user(id: &str, name: &str) -> User {
    User {
        id: id.to_string(),
        name: name.to_string(),
        email: format!("{id}@example.co.th"),
        line_user_id: Some(format!("L{id}")),
        created_at: at(2024, 1, 1),
    }
}

fn contact(id: &str, name: &str, kind: ContactKind, tax_id: &str) -> Contact {
    Contact {
        id: id.to_string(),
        company_id: COMPANY.to_string(),
        name: name.to_string(),
        tax_id: Some(tax_id.to_string()),
        branch_code: Some("00000".to_string()),
        kind,
        address: Some("Bangkok".to_string()),
        created_at: at(2024, 1, 1),
        deleted_at: None,
    }
}

pub fn company() -> Company {
    Company {
        id: COMPANY.to_string(),
        name: "Acme Trading Co., Ltd.".to_string(),
        tax_id: Some(COMPANY_TAX_ID.to_string()),
        branch_code: "00000".to_string(),
        address: Some("Bangkok".to_string()),
        created_at: at(2024, 1, 1),
    }
}

pub fn seeded() -> Database {
    let db = Database::open(":memory:").unwrap();
    db.create_user(&user(OWNER, "Somchai")).unwrap();
    db.create_user(&user(ACCOUNTANT, "Pim")).unwrap();
    db.create_user(&user(STAFF, "Malee")).unwrap();
    db.create_company(&company(), OWNER).unwrap();
    for (user_id, role) in [(ACCOUNTANT, Role::Accountant), (STAFF, Role::Staff)] {
        db.add_member(&Membership {
            company_id: COMPANY.to_string(),
            user_id: user_id.to_string(),
            role,
        })
        .unwrap();
    }
    db.insert_contact(&contact(VENDOR, "Siam Office Supply Co., Ltd.", ContactKind::Juristic, VENDOR_TAX_ID))
        .unwrap();
    db.insert_contact(&contact(FREELANCER, "Nattapong Designer", ContactKind::Individual, "1103700012346"))
        .unwrap();
    db
}

/// ID of the seeded account with `code`.
pub fn account_id(db: &Database, code: &str) -> String {
    db.list_accounts(COMPANY)
        .unwrap()
        .into_iter()
        .find(|a| a.code == code)
        .map(|a| a.id)
        .unwrap()
}

/// Read one HTTP request from `socket`, waiting for the whole body announced
/// by `Content-Length`.
pub async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    use tokio::io::AsyncReadExt;

    let mut request = Vec::new();
    let mut buf = vec![0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&request).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let len = text[..end]
                .lines()
                .find_map(|l| {
                    let (k, v) = l.split_once(':')?;
                    k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            if request.len() >= end + 4 + len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&request).to_string()
}

/// A server that answers every request with `status` and `body` and records
/// the raw requests it received. Returns its base URL.
pub async fn mock_server(
    status: &'static str,
    body: String,
) -> (String, std::sync::Arc<std::sync::Mutex<Vec<String>>>) {
    use tokio::io::AsyncWriteExt;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let log = seen.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let log = log.clone();
            let body = body.clone();
            tokio::spawn(async move {
                let request = read_request(&mut socket).await;
                log.lock().unwrap().push(request);
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });
    (format!("http://{addr}"), seen)
}

/// Wait until `seen` holds at least `count` requests (or about two seconds
/// pass) and return them. Notices are sent from a background task.
pub async fn wait_for_requests(
    seen: &std::sync::Arc<std::sync::Mutex<Vec<String>>>,
    count: usize,
) -> Vec<String> {
    for _ in 0..200 {
        if seen.lock().unwrap().len() >= count {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    seen.lock().unwrap().clone()
}

/// A LINE push endpoint that accepts everything.
pub async fn line_mock() -> (String, std::sync::Arc<std::sync::Mutex<Vec<String>>>) {
    let (base, seen) = mock_server("200 OK", "{}".to_string()).await;
    (format!("{base}/v2/bot/message/push"), seen)
}

/// An active notifier posting to `endpoint`, with a company group.
pub fn line_notifier(endpoint: &str) -> crate::notify::Notifier {
    crate::notify::Notifier::Active {
        client: crate::notify::LineClient::new("line-token".into()).with_endpoint(endpoint),
        group_id: Some("Cgroup".into()),
    }
}

// LINE push notifications.
//
// Sending is best effort: a failed push is logged and the business operation
// that triggered it still succeeds.

use std::time::Duration;

use baht_core::config::Config;
use baht_core::model::{ReimbursementRequest, SettlementPayment, User};
use rust_decimal::{Decimal, RoundingStrategy};
use futures_util::future::join_all;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const LINE_PUSH_URL: &str = "https://api.line.me/v2/bot/message/push";

/// LINE rejects text messages longer than this.
const MAX_TEXT_CHARS: usize = 5000;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("LINE API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("LINE request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct LineClient {
    http: reqwest::Client,
    token: String,
    endpoint: String,
}

impl LineClient {
    pub fn new(token: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            token,
            endpoint: LINE_PUSH_URL.to_string(),
        }
    }

    /// Point at another push endpoint (tests use a local server).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Push one text message to a user, group or room.
    pub async fn push_text(&self, to: &str, text: &str) -> Result<(), NotifyError> {
        let text: String = text.chars().take(MAX_TEXT_CHARS).collect();
        let body = json!({
            "to": to,
            "messages": [{ "type": "text", "text": text }],
        });
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Who a queued notice goes to.
#[derive(Debug, Clone)]
pub enum Recipient {
    User(User),
    Group,
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub to: Recipient,
    pub text: String,
}

impl Notice {
    pub fn user(user: User, text: impl Into<String>) -> Self {
        Notice {
            to: Recipient::User(user),
            text: text.into(),
        }
    }

    pub fn group(text: impl Into<String>) -> Self {
        Notice {
            to: Recipient::Group,
            text: text.into(),
        }
    }
}

#[derive(Clone)]
pub enum Notifier {
    Active {
        client: LineClient,
        /// Company-wide group; `None` skips group notices.
        group_id: Option<String>,
    },
    Disabled,
}

impl Notifier {
    pub fn from_config(config: &Config) -> Self {
        match &config.credentials.line_channel_access_token {
            Some(token) if !token.is_empty() => {
                info!("LINE notifications enabled");
                Notifier::Active {
                    client: LineClient::new(token.clone()),
                    group_id: config.credentials.line_group_id.clone(),
                }
            }
            _ => Notifier::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Notifier::Active { .. })
    }

    /// Message a user through their linked LINE account, if any.
    pub async fn notify_user(&self, user: &User, text: &str) {
        let Notifier::Active { client, .. } = self else {
            return;
        };
        let Some(line_id) = user.line_user_id.as_deref() else {
            debug!(user_id = %user.id, "user has no LINE account, skipping notice");
            return;
        };
        if let Err(e) = client.push_text(line_id, text).await {
            warn!(user_id = %user.id, error = %e, "LINE notice to user failed");
        }
    }

    /// Send `notices` concurrently on a background task and return without
    /// waiting for LINE. Must be called inside a Tokio runtime.
    pub fn dispatch(&self, notices: Vec<Notice>) {
        if !self.is_enabled() || notices.is_empty() {
            return;
        }
        let notifier = self.clone();
        tokio::spawn(async move {
            join_all(notices.iter().map(|notice| notifier.send(notice))).await;
            debug!(count = notices.len(), "LINE notices sent");
        });
    }

    async fn send(&self, notice: &Notice) {
        match &notice.to {
            Recipient::User(user) => self.notify_user(user, &notice.text).await,
            Recipient::Group => self.notify_group(&notice.text).await,
        }
    }

    /// Post to the company group, if one is configured.
    pub async fn notify_group(&self, text: &str) {
        let Notifier::Active {
            client,
            group_id: Some(group_id),
        } = self
        else {
            return;
        };
        if let Err(e) = client.push_text(group_id, text).await {
            warn!(error = %e, "LINE group notice failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Message templates
// ---------------------------------------------------------------------------

/// `1234.5` -> `"1,234.50"`.
pub fn format_baht(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let text = format!("{:.2}", rounded.abs());
    let (int_part, frac) = text.split_once('.').unwrap_or((text.as_str(), "00"));
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    format!("{sign}{grouped}.{frac}")
}

pub fn reimbursement_submitted(requester: &str, r: &ReimbursementRequest) -> String {
    format!(
        "📝 คำขอเบิกเงินใหม่\nผู้ขอ: {requester}\nรายการ: {}\nจำนวน: {} บาท\nวันที่: {}",
        r.description,
        format_baht(r.amount),
        r.issue_date.format("%d/%m/%Y")
    )
}

pub fn reimbursement_approved(r: &ReimbursementRequest) -> String {
    format!(
        "✅ คำขอเบิก \"{}\" จำนวน {} บาท ได้รับการอนุมัติแล้ว",
        r.description,
        format_baht(r.amount)
    )
}

pub fn reimbursement_rejected(r: &ReimbursementRequest) -> String {
    format!(
        "❌ คำขอเบิก \"{}\" จำนวน {} บาท ไม่ได้รับการอนุมัติ\nเหตุผล: {}",
        r.description,
        format_baht(r.amount),
        r.rejected_reason.as_deref().unwrap_or("-")
    )
}

pub fn reimbursement_paid(r: &ReimbursementRequest) -> String {
    let mut text = format!(
        "💸 โอนเงินคืนค่า \"{}\" จำนวน {} บาท แล้ว",
        r.description,
        format_baht(r.amount)
    );
    if let Some(reference) = r.payment_reference.as_deref() {
        text.push_str(&format!("\nอ้างอิง: {reference}"));
    }
    text
}

pub fn settlement_paid(payment: &SettlementPayment) -> String {
    let mut text = format!(
        "💸 ชำระคืนค่าใช้จ่ายที่สำรองจ่าย {} รายการ รวม {} บาท",
        payment.expense_ids.len(),
        format_baht(payment.total_amount)
    );
    if let Some(reference) = payment.reference.as_deref() {
        text.push_str(&format!("\nอ้างอิง: {reference}"));
    }
    text
}

pub fn settlement_reversed(payment: &SettlementPayment) -> String {
    format!(
        "↩️ ยกเลิกการชำระคืน {} บาท รายการจะกลับไปรอชำระ",
        format_baht(payment.total_amount)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{at, date, line_mock, line_notifier, read_request, wait_for_requests};
    use baht_core::model::ReimbursementStatus;
    use rust_decimal_macros::dec;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn request() -> ReimbursementRequest {
        ReimbursementRequest {
            id: "r1".into(),
            company_id: "c1".into(),
            requester_id: "u1".into(),
            description: "ค่าแท็กซี่ไปพบลูกค้า".into(),
            amount: dec!(1320.5),
            vat_amount: Decimal::ZERO,
            issue_date: date(2024, 5, 3),
            account_id: None,
            receipt_url: None,
            status: ReimbursementStatus::Pending,
            approved_by: None,
            approved_at: None,
            rejected_reason: Some("ไม่มีใบเสร็จ".into()),
            paid_at: None,
            payment_reference: Some("TRF-0001".into()),
            expense_id: None,
            created_at: at(2024, 5, 3),
            deleted_at: None,
        }
    }

    #[test]
    fn baht_formatting() {
        assert_eq!(format_baht(dec!(0)), "0.00");
        assert_eq!(format_baht(dec!(999.999)), "1,000.00");
        assert_eq!(format_baht(dec!(1234567.5)), "1,234,567.50");
        assert_eq!(format_baht(dec!(-1500)), "-1,500.00");
    }

    #[test]
    fn templates_carry_the_details() {
        let r = request();
        let submitted = reimbursement_submitted("Malee", &r);
        assert!(submitted.contains("Malee"));
        assert!(submitted.contains("1,320.50 บาท"));
        assert!(submitted.contains("03/05/2024"));
        assert!(reimbursement_rejected(&r).contains("ไม่มีใบเสร็จ"));
        assert!(reimbursement_paid(&r).contains("TRF-0001"));
    }

    #[tokio::test]
    async fn dispatch_sends_every_notice_in_background() {
        let (endpoint, seen) = line_mock().await;
        let notifier = line_notifier(&endpoint);
        let user = User {
            id: "u1".into(),
            name: "Malee".into(),
            email: "malee@example.com".into(),
            line_user_id: Some("Lmalee".into()),
            created_at: at(2024, 5, 1),
        };
        notifier.dispatch(vec![Notice::group("group text"), Notice::user(user, "user text")]);

        let requests = wait_for_requests(&seen, 2).await;
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().any(|r| r.contains("\"to\":\"Cgroup\"") && r.contains("group text")));
        assert!(requests.iter().any(|r| r.contains("\"to\":\"Lmalee\"") && r.contains("user text")));
    }

    #[tokio::test]
    async fn disabled_notifier_is_silent() {
        let notifier = Notifier::Disabled;
        assert!(!notifier.is_enabled());
        notifier.notify_group("hello").await;
    }

    #[tokio::test]
    async fn push_sends_bearer_token_and_message() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}")
                .await
                .unwrap();
            request
        });

        let client = LineClient::new("line-token".into()).with_endpoint(format!("http://{addr}/v2/bot/message/push"));
        client.push_text("Uabc", "สวัสดี").await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v2/bot/message/push"));
        assert!(request.to_lowercase().contains("authorization: bearer line-token"));
        assert!(request.contains("\"to\":\"Uabc\""));
    }

    #[tokio::test]
    async fn push_error_status_is_an_api_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let body = r#"{"message":"Authentication failed"}"#;
            let response = format!(
                "HTTP/1.1 401 Unauthorized\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });

        let client = LineClient::new("bad".into()).with_endpoint(format!("http://{addr}/push"));
        match client.push_text("Uabc", "hi").await {
            Err(NotifyError::Api { status, message }) => {
                assert_eq!(status, 401);
                assert!(message.contains("Authentication failed"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}

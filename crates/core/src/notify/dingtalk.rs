//! DingTalk custom robot sender.
//!
//! When a signing secret is configured, each request carries `timestamp`
//! and `sign` query parameters, where `sign` is the base64 HMAC-SHA256 of
//! `"{timestamp}\n{secret}"` keyed by the secret.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::errors::NotificationError;

type HmacSha256 = Hmac<Sha256>;

const ROBOT_ENDPOINT: &str = "https://oapi.dingtalk.com/robot/send";

#[derive(Debug, Deserialize)]
struct RobotResponse {
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

pub struct DingTalkNotifier {
    endpoint: String,
    access_token: String,
    secret: Option<String>,
    http: reqwest::Client,
}

impl DingTalkNotifier {
    pub fn new(access_token: String, secret: Option<String>) -> Self {
        Self {
            endpoint: ROBOT_ENDPOINT.to_string(),
            access_token,
            secret,
            http: reqwest::Client::new(),
        }
    }

    /// Query parameters for one request at `timestamp_ms`.
    fn query(&self, timestamp_ms: i64) -> Result<Vec<(&'static str, String)>, NotificationError> {
        let mut params = vec![("access_token", self.access_token.clone())];
        if let Some(ref secret) = self.secret {
            params.push(("timestamp", timestamp_ms.to_string()));
            params.push(("sign", sign(timestamp_ms, secret)?));
        }
        Ok(params)
    }

    pub async fn send_markdown(&self, title: &str, text: &str) -> Result<(), NotificationError> {
        debug!(len = text.len(), "sending DingTalk markdown message");

        let payload = serde_json::json!({
            "msgtype": "markdown",
            "markdown": { "title": title, "text": text },
            "at": { "isAtAll": false },
        });
        let query = self.query(chrono::Utc::now().timestamp_millis())?;

        let resp = self
            .http
            .post(&self.endpoint)
            .query(&query)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "DingTalk robot returned error");
            return Err(NotificationError::DingTalkError(format!("HTTP {}: {}", status, body)));
        }

        // The robot answers 200 even when it rejects the message.
        let answer: RobotResponse = resp.json().await?;
        if answer.errcode != 0 {
            warn!(errcode = answer.errcode, errmsg = %answer.errmsg, "DingTalk robot rejected message");
            return Err(NotificationError::DingTalkError(format!(
                "errcode {}: {}",
                answer.errcode, answer.errmsg
            )));
        }

        info!("DingTalk message sent");
        Ok(())
    }
}

fn sign(timestamp_ms: i64, secret: &str) -> Result<String, NotificationError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotificationError::DingTalkError(format!("invalid signing key: {}", e)))?;
    mac.update(format!("{}\n{}", timestamp_ms, secret).as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

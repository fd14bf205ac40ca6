use crate::config::AlertConfig;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub const UNKNOWN_FACE_MESSAGE: &str = "Alert! An unknown face has been detected.";
pub const TEST_MESSAGE: &str = "ALERT: Unknown face detected!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Success,
    Error,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Success => "success",
            AlertStatus::Error => "error",
        }
    }
}

/// Result of one send attempt, reported back to the caller instead of failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertOutcome {
    pub status: AlertStatus,
    pub detail: String,
}

impl AlertOutcome {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            status: AlertStatus::Success,
            detail: detail.into(),
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: AlertStatus::Error,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AlertStatus::Success
    }
}

pub trait AlertSender: Send + Sync {
    fn send<'a>(&'a self, destination: &'a str, message: &'a str) -> BoxFuture<'a, AlertOutcome>;
}

/// SMS through the Twilio Messages REST endpoint.
pub struct TwilioAlertSender {
    client: reqwest::Client,
    messages_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

#[derive(Deserialize)]
struct MessageCreated {
    sid: String,
}

#[derive(Deserialize)]
struct ProviderError {
    message: String,
}

impl TwilioAlertSender {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            messages_url: config.get_messages_url(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.from_number.clone(),
        }
    }

    fn form<'a>(&'a self, destination: &'a str, message: &'a str) -> [(&'static str, &'a str); 3] {
        [
            ("To", destination),
            ("From", self.from_number.as_str()),
            ("Body", message),
        ]
    }

    async fn deliver(&self, destination: &str, message: &str) -> AlertOutcome {
        let destination = destination.trim();
        if destination.is_empty() {
            return AlertOutcome::error("destination address is empty");
        }

        let response = self
            .client
            .post(&self.messages_url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&self.form(destination, message))
            .send()
            .await;

        let outcome = match response {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.text().await {
                    Ok(body) => outcome_from_response(status, &body),
                    Err(e) => AlertOutcome::error(format!("failed to read response: {}", e)),
                }
            }
            Err(e) => AlertOutcome::error(format!("request failed: {}", e)),
        };

        if outcome.is_success() {
            tracing::info!("Alert SMS sent: {}", outcome.detail);
        } else {
            tracing::error!("Alert SMS error: {}", outcome.detail);
        }
        outcome
    }
}

impl AlertSender for TwilioAlertSender {
    fn send<'a>(&'a self, destination: &'a str, message: &'a str) -> BoxFuture<'a, AlertOutcome> {
        Box::pin(self.deliver(destination, message))
    }
}

fn outcome_from_response(status: u16, body: &str) -> AlertOutcome {
    if (200..300).contains(&status) {
        match serde_json::from_str::<MessageCreated>(body) {
            Ok(created) => AlertOutcome::success(created.sid),
            Err(_) => AlertOutcome::success(format!("accepted with status {}", status)),
        }
    } else {
        match serde_json::from_str::<ProviderError>(body) {
            Ok(err) => AlertOutcome::error(err.message),
            Err(_) => AlertOutcome::error(format!("provider returned status {}", status)),
        }
    }
}

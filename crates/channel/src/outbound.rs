//! Outbound text messages against the ready session.

use std::sync::Arc;

use {
    serde::Serialize,
    tracing::{info, warn},
};

use crate::{lifecycle::ConnectionManager, phone::PhoneNormalizer};

/// Error texts that mean the recipient has no account.
const NOT_REGISTERED: &[&str] = &["number does not exist", "phone number is not registered"];
/// Error texts that mean the network is throttling us.
const THROTTLED: &[&str] = &["rate limit", "too many"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Sent,
    NotReady,
    InvalidInput,
    InvalidPhone,
    /// The recipient is not on the network. Nothing was sent.
    Skipped,
    RateLimited,
    Failed,
}

/// Structured result of a send. Every send produces one, errors included.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub status: SendStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile_number: Option<String>,
    pub sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendOutcome {
    fn rejected(status: SendStatus, error: &str) -> Self {
        Self {
            status,
            mobile_number: None,
            sent: false,
            exists: None,
            message: None,
            error: Some(error.to_string()),
        }
    }

    fn for_number(status: SendStatus, number: &str, exists: bool, message: &str) -> Self {
        Self {
            status,
            mobile_number: Some(number.to_string()),
            sent: status == SendStatus::Sent,
            exists: Some(exists),
            message: Some(message.to_string()),
            error: None,
        }
    }

    fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

pub struct MessageDispatcher {
    connection: Arc<ConnectionManager>,
    normalizer: Arc<dyn PhoneNormalizer>,
    address_suffix: String,
}

impl MessageDispatcher {
    pub fn new(
        connection: Arc<ConnectionManager>,
        normalizer: Arc<dyn PhoneNormalizer>,
        address_suffix: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            normalizer,
            address_suffix: address_suffix.into(),
        }
    }

    /// Send `body` to `raw_phone`. Never touches the connection state.
    pub async fn send(&self, raw_phone: &str, body: &str) -> SendOutcome {
        let Some(transport) = self.connection.ready_transport() else {
            return SendOutcome::rejected(SendStatus::NotReady, "client not ready");
        };

        let raw_phone = raw_phone.trim();
        if raw_phone.is_empty() {
            return SendOutcome::rejected(SendStatus::InvalidInput, "phone number is required");
        }
        let body = body.trim();
        if body.is_empty() {
            return SendOutcome::rejected(SendStatus::InvalidInput, "message is required");
        }

        let Some(number) = self.normalizer.normalize(raw_phone) else {
            return SendOutcome::rejected(SendStatus::InvalidPhone, "invalid phone number format");
        };
        let address = format!("{number}{}", self.address_suffix);

        match transport.recipient_exists(&address).await {
            Ok(true) => {},
            Ok(false) => {
                info!(%number, "recipient not on the network, skipping");
                return SendOutcome::for_number(
                    SendStatus::Skipped,
                    &number,
                    false,
                    "number does not exist on the network",
                );
            },
            Err(e) => {
                warn!(%number, error = %e, "recipient lookup failed, skipping");
                return SendOutcome::for_number(
                    SendStatus::Skipped,
                    &number,
                    false,
                    "could not verify recipient",
                )
                .with_error(e.to_string());
            },
        }

        match transport.send_text(&address, body).await {
            Ok(()) => {
                info!(%number, "message sent");
                SendOutcome::for_number(SendStatus::Sent, &number, true, "message sent")
            },
            Err(e) => {
                let text = e.to_string();
                let status = classify_send_error(&text);
                warn!(%number, error = %text, ?status, "send failed");
                match status {
                    SendStatus::Skipped => SendOutcome::for_number(
                        status,
                        &number,
                        false,
                        "number does not exist",
                    ),
                    SendStatus::RateLimited => SendOutcome::for_number(
                        status,
                        &number,
                        true,
                        "rate limited, try again later",
                    )
                    .with_error("rate limited"),
                    _ => SendOutcome::for_number(status, &number, true, "failed to send message")
                        .with_error(text),
                }
            },
        }
    }
}

fn classify_send_error(message: &str) -> SendStatus {
    let lower = message.to_lowercase();
    if NOT_REGISTERED.iter().any(|s| lower.contains(s)) {
        SendStatus::Skipped
    } else if THROTTLED.iter().any(|s| lower.contains(s)) {
        SendStatus::RateLimited
    } else {
        SendStatus::Failed
    }
}

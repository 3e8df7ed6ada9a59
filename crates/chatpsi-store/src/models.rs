use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chatpsi_shared::UserId;

/// A registered user.  `subscription_active` is the entitlement that gates
/// dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub user_id: UserId,
    pub nickname: Option<String>,
    /// Conversation handle on the processor side, forwarded with each dispatch.
    pub openai_thread_id: Option<String>,
    pub subscription_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(user_id: UserId) -> Self {
        let now = chatpsi_shared::message::now_micros();
        Self {
            user_id,
            nickname: None,
            openai_thread_id: None,
            subscription_active: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookDirection {
    /// Gateway to processor.
    Outbound,
    /// Processor callback into the gateway.
    Inbound,
}

impl WebhookDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookDirection::Outbound => "outbound",
            WebhookDirection::Inbound => "inbound",
        }
    }
}

impl std::str::FromStr for WebhookDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "outbound" => Ok(WebhookDirection::Outbound),
            "inbound" => Ok(WebhookDirection::Inbound),
            other => Err(format!("unknown webhook direction: {other}")),
        }
    }
}

/// Audit row to be written for one processor exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWebhookEvent {
    pub direction: WebhookDirection,
    pub user_id: Option<UserId>,
    pub payload: serde_json::Value,
    /// HTTP status, 0 when the request never got a response.
    pub status_code: u16,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub id: i64,
    pub direction: WebhookDirection,
    pub user_id: Option<UserId>,
    pub payload: serde_json::Value,
    pub status_code: u16,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

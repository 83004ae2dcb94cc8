//! models/webhook_model.rs
//! Forma canónica de las actualizaciones de estado que llegan por webhook.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::campaign_model::DeliveryStatus;

/// Tenant usado en la auditoría cuando no se puede resolver la compañía.
pub const UNKNOWN_COMPANY_ID: &str = "00000000-0000-0000-0000-000000000000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    Meta,
    Twilio,
    SendGrid,
    MessageBird,
    Resend,
    Unknown(String),
}

impl Provider {
    /// Resuelve el parámetro `?provider=`; ausente equivale a `meta`.
    pub fn from_query(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            None => Provider::Meta,
            Some(v) => match v.as_str() {
                "" | "meta" => Provider::Meta,
                "twilio" => Provider::Twilio,
                "sendgrid" => Provider::SendGrid,
                "messagebird" => Provider::MessageBird,
                "resend" => Provider::Resend,
                _ => Provider::Unknown(v),
            },
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Provider::Meta => "meta",
            Provider::Twilio => "twilio",
            Provider::SendGrid => "sendgrid",
            Provider::MessageBird => "messagebird",
            Provider::Resend => "resend",
            Provider::Unknown(name) => name.as_str(),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookUpdate {
    pub message_id: String,
    pub status: DeliveryStatus,
    /// RFC 3339
    pub timestamp: String,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub recipient_phone: Option<String>,
    pub recipient_email: Option<String>,
    pub company_id: Option<String>,
}

/// Resultado de normalizar un payload de proveedor.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeOutcome {
    Updates(Vec<WebhookUpdate>),
    /// El payload es JSON válido pero no tiene la forma esperada
    /// (o el proveedor es desconocido).
    Unrecognized { reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookQuery {
    pub provider: Option<String>,
    pub company_id: Option<String>,
    #[serde(rename = "hub.mode")]
    pub hub_mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub hub_verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub hub_challenge: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub processed: usize,
}

//! models/campaign_model.rs
//! Campañas, destinatarios y bitácora.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum CampaignStatus {
    Scheduled,
    Sending,
    Sent,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Sent => "sent",
            CampaignStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Whatsapp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Whatsapp => "whatsapp",
        }
    }
}

impl FromStr for Channel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            "whatsapp" => Ok(Channel::Whatsapp),
            other => Err(anyhow!("Canal no soportado: {}", other)),
        }
    }
}

/// Estado de entrega de un destinatario.
///
/// Orden de avance: `queued < sent < delivered < read`. `failed` y `bounced`
/// son terminales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Queued,
    Sent,
    Delivered,
    Read,
    Failed,
    Bounced,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 6] = [
        DeliveryStatus::Queued,
        DeliveryStatus::Sent,
        DeliveryStatus::Delivered,
        DeliveryStatus::Read,
        DeliveryStatus::Failed,
        DeliveryStatus::Bounced,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Bounced => "bounced",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Failed | DeliveryStatus::Bounced)
    }

    fn rank(&self) -> u8 {
        match self {
            DeliveryStatus::Queued => 0,
            DeliveryStatus::Sent => 1,
            DeliveryStatus::Delivered => 2,
            DeliveryStatus::Read => 3,
            DeliveryStatus::Failed | DeliveryStatus::Bounced => u8::MAX,
        }
    }

    /// Indica si un registro en `self` puede pasar a `next`.
    pub fn can_advance_to(&self, next: DeliveryStatus) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CampaignRecord {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub channel: Channel,
    pub subject: Option<String>,
    pub body: String,
    pub status: CampaignStatus,
    pub scheduled_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CampaignRecipientRecord {
    pub id: String,
    pub campaign_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub delivery_status: DeliveryStatus,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub sent_at: Option<String>,
    pub delivered_at: Option<String>,
    pub read_at: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CampaignLogRecord {
    pub id: String,
    pub campaign_id: String,
    pub level: String,
    pub action: String,
    pub message: String,
    pub details: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRecipient {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Request para crear una campaña
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCampaignRequest {
    pub company_id: String,
    pub name: String,
    pub channel: String,
    pub subject: Option<String>,
    pub body: String,
    /// RFC 3339; si falta, la campaña queda vencida de inmediato.
    pub scheduled_at: Option<String>,
    pub recipients: Vec<NewRecipient>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateCampaignResponse {
    pub id: String,
    pub recipients: usize,
    pub scheduled_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignDetailResponse {
    pub campaign: CampaignRecord,
    pub recipient_counts: serde_json::Map<String, serde_json::Value>,
}

/// Body que recibe el executor de lotes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteBatchRequest {
    pub campaign_id: String,
    pub action: String,
}

pub const PROCESS_BATCH_ACTION: &str = "process_batch";

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerResponse {
    pub success: bool,
    pub processed: usize,
    pub results: Vec<serde_json::Value>,
}

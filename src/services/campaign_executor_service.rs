//! services/campaign_executor_service.rs
//! Executor de lotes: toma destinatarios en cola de una campaña en `sending`
//! y los envía por el canal de la campaña.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use crate::{
    models::{
        campaign_model::{CampaignRecipientRecord, CampaignRecord, CampaignStatus, Channel, DeliveryStatus},
        db_timestamp,
    },
    services::{
        batch_executor::BatchExecutor,
        campaign_service::CampaignService,
        channel_sender::{ChannelSender, OutboundMessage},
    },
};

pub const BATCH_SIZE: i64 = 50;
/// Un reclamo más viejo que esto se considera abandonado.
const CLAIM_TTL_MINUTES: i64 = 15;

#[derive(Clone)]
pub struct CampaignExecutorService {
    campaign_service: CampaignService,
    sender: Arc<dyn ChannelSender>,
    site_url: String,
}

impl CampaignExecutorService {
    pub fn new(campaign_service: CampaignService, sender: Arc<dyn ChannelSender>, site_url: String) -> Self {
        Self {
            campaign_service,
            sender,
            site_url,
        }
    }

    pub async fn run_batch(&self, campaign_id: &str) -> Result<Value> {
        let campaign = self
            .campaign_service
            .find_campaign(campaign_id)
            .await?
            .ok_or_else(|| anyhow!("Campaign {} not found", campaign_id))?;

        if campaign.status != CampaignStatus::Sending {
            log::info!(
                "(run_batch) Campaña {} en estado {}, nada que hacer",
                campaign_id,
                campaign.status.as_str()
            );
            return Ok(json!({
                "success": false,
                "skipped": true,
                "campaign_id": campaign_id,
                "status": campaign.status.as_str(),
            }));
        }

        let stale_before = db_timestamp(Utc::now() - Duration::minutes(CLAIM_TTL_MINUTES));
        let batch = self
            .campaign_service
            .list_claimable_queued(campaign_id, &stale_before, BATCH_SIZE)
            .await?;
        log::info!("(run_batch) Campaña {}: lote de {} destinatarios", campaign_id, batch.len());

        let (mut sent, mut failed) = (0u32, 0u32);
        for recipient in &batch {
            if !self
                .campaign_service
                .claim_recipient(&recipient.id, &stale_before)
                .await?
            {
                continue;
            }

            let message = self.build_message(&campaign, recipient);
            match self.sender.send(&message).await {
                Ok(provider_message_id) => {
                    self.campaign_service
                        .mark_recipient_sent(&recipient.id, provider_message_id.as_deref())
                        .await?;
                    sent += 1;
                }
                Err(e) => {
                    log::warn!(
                        "(run_batch) Fallo enviando a destinatario {}: {:#}",
                        recipient.id,
                        e
                    );
                    self.campaign_service
                        .mark_recipient_failed(&recipient.id, &format!("{:#}", e))
                        .await?;
                    failed += 1;
                }
            }
        }

        let remaining = self
            .campaign_service
            .count_recipients(campaign_id, DeliveryStatus::Queued)
            .await?;

        self.campaign_service
            .append_log(
                campaign_id,
                "info",
                "batch_processed",
                &format!("Batch processed: {} sent, {} failed", sent, failed),
                Some(&json!({ "sent": sent, "failed": failed, "remaining": remaining })),
            )
            .await?;

        let final_status = if remaining == 0 {
            self.campaign_service.finalize_if_drained(campaign_id).await?
        } else {
            None
        };

        Ok(json!({
            "success": true,
            "campaign_id": campaign_id,
            "sent": sent,
            "failed": failed,
            "remaining": remaining,
            "completed": final_status.map(|s| s.as_str()),
        }))
    }

    fn build_message(&self, campaign: &CampaignRecord, recipient: &CampaignRecipientRecord) -> OutboundMessage {
        let mut body = campaign
            .body
            .replace("{{name}}", recipient.name.as_deref().unwrap_or_default());

        if campaign.channel == Channel::Email {
            if let Some(email) = &recipient.email {
                body.push_str(&format!(
                    "<p style=\"font-size:12px\"><a href=\"{}\">Unsubscribe</a></p>",
                    unsubscribe_link(&self.site_url, &campaign.id, email)
                ));
            }
        }

        OutboundMessage {
            channel: campaign.channel,
            to_name: recipient.name.clone(),
            to_email: recipient.email.clone(),
            to_phone: recipient.phone.clone(),
            subject: campaign.subject.clone(),
            body,
        }
    }
}

pub fn unsubscribe_link(site_url: &str, campaign_id: &str, email: &str) -> String {
    format!(
        "{}/unsubscribe?campaign={}&email={}",
        site_url,
        urlencoding::encode(campaign_id),
        urlencoding::encode(email)
    )
}

#[async_trait]
impl BatchExecutor for CampaignExecutorService {
    async fn process_batch(&self, campaign_id: &str) -> Result<Value> {
        self.run_batch(campaign_id).await
    }
}

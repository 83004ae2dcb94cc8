//! services/scheduler_service.rs
//! Tick del scheduler de campañas. Lo dispara un reloj externo (cron) vía HTTP.

use std::collections::HashSet;

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::{json, Value};

use crate::{
    models::campaign_model::{CampaignRecord, DeliveryStatus, SchedulerResponse},
    services::{
        campaign_service::CampaignService,
        dispatch_service::{DispatchOutcome, DispatchService},
    },
};

/// Campañas vencidas que se toman por tick.
pub const DUE_CAMPAIGNS_PER_TICK: i64 = 10;
/// Campañas en `sending` que se reanudan por tick.
pub const RESUMED_CAMPAIGNS_PER_TICK: usize = 5;

#[derive(Clone)]
pub struct SchedulerService {
    campaign_service: CampaignService,
    dispatch_service: DispatchService,
}

impl SchedulerService {
    pub fn new(campaign_service: CampaignService, dispatch_service: DispatchService) -> Self {
        Self {
            campaign_service,
            dispatch_service,
        }
    }

    /// Un tick completo. Los fallos de una campaña no detienen a las demás;
    /// sólo un error de DB al listar aborta el tick.
    pub async fn run_tick(&self) -> Result<SchedulerResponse> {
        let due = self
            .campaign_service
            .list_due_campaigns(Utc::now(), DUE_CAMPAIGNS_PER_TICK)
            .await?;
        log::info!("(run_tick) {} campañas vencidas", due.len());

        let mut results = vec![];
        let mut handled = HashSet::new();

        for campaign in &due {
            handled.insert(campaign.id.clone());
            match self.start_campaign(campaign).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => {
                    let error = format!("{:#}", e);
                    log::error!("(run_tick) Campaña {} falló: {}", campaign.id, error);
                    self.fail_campaign(&campaign.id, "campaign_failed", &error).await;
                    results.push(json!({
                        "campaign_id": campaign.id,
                        "success": false,
                        "error": error,
                    }));
                }
            }
        }

        // Las que se acaban de despachar en este tick no se reanudan.
        let sending = self
            .campaign_service
            .list_sending_campaigns(RESUMED_CAMPAIGNS_PER_TICK as i64 + handled.len() as i64)
            .await?;
        for campaign in sending
            .iter()
            .filter(|c| !handled.contains(&c.id))
            .take(RESUMED_CAMPAIGNS_PER_TICK)
        {
            match self.resume_campaign(campaign).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => {
                    log::error!("(run_tick) Reanudación de {} falló: {:#}", campaign.id, e);
                    results.push(json!({
                        "campaign_id": campaign.id,
                        "resumed": true,
                        "success": false,
                        "error": format!("{:#}", e),
                    }));
                }
            }
        }

        Ok(SchedulerResponse {
            success: true,
            processed: results.len(),
            results,
        })
    }

    /// `None` si otra invocación ya reclamó la campaña.
    async fn start_campaign(&self, campaign: &CampaignRecord) -> Result<Option<Value>> {
        if !self.campaign_service.claim_for_sending(&campaign.id).await? {
            log::info!(
                "(start_campaign) Campaña {} ya reclamada por otra invocación",
                campaign.id
            );
            return Ok(None);
        }

        self.campaign_service
            .append_log(
                &campaign.id,
                "info",
                "campaign_started",
                "Campaign processing started",
                Some(&json!({
                    "scheduled_at": campaign.scheduled_at,
                    "channel": campaign.channel.as_str(),
                })),
            )
            .await?;

        match self.dispatch_service.dispatch(&campaign.id).await? {
            DispatchOutcome::Completed(result) => Ok(Some(json!({
                "campaign_id": campaign.id,
                "success": true,
                "result": result,
            }))),
            DispatchOutcome::Failed { error, .. } | DispatchOutcome::DeadLettered { error, .. } => {
                Err(anyhow!("Executor falló: {}", error))
            }
        }
    }

    /// Vuelve a despachar una campaña en `sending` que aún tiene cola; si ya
    /// no la tiene, la cierra.
    async fn resume_campaign(&self, campaign: &CampaignRecord) -> Result<Option<Value>> {
        let queued = self
            .campaign_service
            .count_recipients(&campaign.id, DeliveryStatus::Queued)
            .await?;
        if queued == 0 {
            // Executor que terminó la cola pero no llegó a cerrar la campaña.
            return Ok(self
                .campaign_service
                .finalize_if_drained(&campaign.id)
                .await?
                .map(|status| {
                    json!({
                        "campaign_id": campaign.id,
                        "finalized": status.as_str(),
                    })
                }));
        }

        log::info!(
            "(resume_campaign) Campaña {} con {} destinatarios en cola",
            campaign.id,
            queued
        );

        let result = match self.dispatch_service.dispatch(&campaign.id).await? {
            DispatchOutcome::Completed(result) => json!({
                "campaign_id": campaign.id,
                "resumed": true,
                "queued": queued,
                "success": true,
                "result": result,
            }),
            DispatchOutcome::Failed { attempts, error } => {
                self.campaign_service
                    .append_log(
                        &campaign.id,
                        "error",
                        "batch_dispatch_failed",
                        &error,
                        Some(&json!({ "attempts": attempts })),
                    )
                    .await?;
                json!({
                    "campaign_id": campaign.id,
                    "resumed": true,
                    "queued": queued,
                    "success": false,
                    "attempts": attempts,
                    "error": error,
                })
            }
            DispatchOutcome::DeadLettered { attempts, error } => {
                self.fail_campaign(&campaign.id, "dispatch_dead_lettered", &error)
                    .await;
                json!({
                    "campaign_id": campaign.id,
                    "resumed": true,
                    "queued": queued,
                    "success": false,
                    "attempts": attempts,
                    "dead_lettered": true,
                    "error": error,
                })
            }
        };
        Ok(Some(result))
    }

    /// Marca `failed` y deja el error en la bitácora. Sólo loguea si esto
    /// también falla.
    async fn fail_campaign(&self, campaign_id: &str, action: &str, error: &str) {
        if let Err(e) = self
            .campaign_service
            .mark_campaign_failed(campaign_id, error)
            .await
        {
            log::error!("(fail_campaign) No se pudo marcar {} como failed: {:?}", campaign_id, e);
        }
        if let Err(e) = self
            .campaign_service
            .append_log(campaign_id, "error", action, error, None)
            .await
        {
            log::error!("(fail_campaign) No se pudo registrar log de {}: {:?}", campaign_id, e);
        }
    }
}

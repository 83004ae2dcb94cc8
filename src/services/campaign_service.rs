use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::models::{
    campaign_model::{
        CampaignDetailResponse, CampaignLogRecord, CampaignRecipientRecord, CampaignRecord,
        CampaignStatus, Channel, CreateCampaignRequest, CreateCampaignResponse, DeliveryStatus,
    },
    db_timestamp, now_timestamp,
};

const CAMPAIGN_COLUMNS: &str = r#"
    id, company_id, name, channel, subject, body, status, scheduled_at,
    started_at, completed_at, error_message, created_at, updated_at
"#;

const RECIPIENT_COLUMNS: &str = r#"
    id, campaign_id, name, email, phone, delivery_status, provider_message_id,
    error_message, error_code, sent_at, delivered_at, read_at, updated_at
"#;

#[derive(Clone, Debug)]
pub struct CampaignService {
    db_pool: Pool<Sqlite>,
}

impl CampaignService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        CampaignService { db_pool }
    }

    /// Corre migraciones con sqlx
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db_pool)
            .await
            .context("Fallo al correr migraciones")?;
        Ok(())
    }

    /// Valida el request y devuelve el canal y `scheduled_at` normalizado.
    pub fn validate_request(req: &CreateCampaignRequest) -> Result<(Channel, String)> {
        let channel: Channel = req.channel.parse()?;
        if req.company_id.trim().is_empty() {
            return Err(anyhow!("company_id es obligatorio"));
        }
        if req.name.trim().is_empty() {
            return Err(anyhow!("El nombre de la campaña es obligatorio"));
        }
        if req.recipients.is_empty() {
            return Err(anyhow!("La campaña necesita al menos un destinatario"));
        }
        for (i, r) in req.recipients.iter().enumerate() {
            let has_address = match channel {
                Channel::Email => r.email.is_some(),
                Channel::Sms | Channel::Whatsapp => r.phone.is_some(),
            };
            if !has_address {
                return Err(anyhow!(
                    "Destinatario #{} sin dirección para el canal {}",
                    i,
                    channel.as_str()
                ));
            }
        }

        let scheduled_at = match req.scheduled_at.as_deref() {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|dt| db_timestamp(dt.with_timezone(&Utc)))
                .with_context(|| format!("scheduled_at inválido: {}", raw))?,
            None => now_timestamp(),
        };
        Ok((channel, scheduled_at))
    }

    /// Crea la campaña en estado `scheduled` junto con sus destinatarios en `queued`.
    pub async fn create_campaign(&self, req: CreateCampaignRequest) -> Result<CreateCampaignResponse> {
        let (channel, scheduled_at) = Self::validate_request(&req)?;

        let campaign_id = Uuid::new_v4().to_string();
        let now = now_timestamp();

        let mut tx = self.db_pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, company_id, name, channel, subject, body, status,
                scheduled_at, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'scheduled', ?7, ?8, ?8)
            "#,
        )
        .bind(&campaign_id)
        .bind(&req.company_id)
        .bind(req.name.trim())
        .bind(channel)
        .bind(&req.subject)
        .bind(&req.body)
        .bind(&scheduled_at)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .context("Fallo al insertar campaña")?;

        for r in &req.recipients {
            sqlx::query(
                r#"
                INSERT INTO campaign_recipients (
                    id, campaign_id, name, email, phone, delivery_status,
                    created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, 'queued', ?6, ?6)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&campaign_id)
            .bind(&r.name)
            .bind(&r.email)
            .bind(&r.phone)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .context("Fallo al insertar destinatario")?;
        }
        tx.commit().await?;

        log::info!(
            "Campaña {} creada ({} destinatarios, scheduled_at={})",
            campaign_id,
            req.recipients.len(),
            scheduled_at
        );

        Ok(CreateCampaignResponse {
            id: campaign_id,
            recipients: req.recipients.len(),
            scheduled_at,
        })
    }

    pub async fn find_campaign(&self, campaign_id: &str) -> Result<Option<CampaignRecord>> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1");
        sqlx::query_as::<_, CampaignRecord>(&sql)
            .bind(campaign_id)
            .fetch_optional(&self.db_pool)
            .await
            .context("Fallo al consultar campaña")
    }

    pub async fn get_campaign_detail(&self, campaign_id: &str) -> Result<Option<CampaignDetailResponse>> {
        let Some(campaign) = self.find_campaign(campaign_id).await? else {
            return Ok(None);
        };

        let rows: Vec<(DeliveryStatus, i64)> = sqlx::query_as(
            r#"
            SELECT delivery_status, COUNT(*)
            FROM campaign_recipients
            WHERE campaign_id = ?1
            GROUP BY delivery_status
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.db_pool)
        .await?;

        let mut recipient_counts = Map::new();
        for status in DeliveryStatus::ALL {
            let count = rows
                .iter()
                .find(|(s, _)| *s == status)
                .map(|(_, c)| *c)
                .unwrap_or(0);
            recipient_counts.insert(status.as_str().to_string(), Value::from(count));
        }

        Ok(Some(CampaignDetailResponse {
            campaign,
            recipient_counts,
        }))
    }

    /// Campañas `scheduled` vencidas, la más antigua primero.
    pub async fn list_due_campaigns(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<CampaignRecord>> {
        let sql = format!(
            r#"
            SELECT {CAMPAIGN_COLUMNS}
            FROM campaigns
            WHERE status = 'scheduled' AND scheduled_at <= ?1
            ORDER BY scheduled_at ASC, id ASC
            LIMIT ?2
            "#
        );
        sqlx::query_as::<_, CampaignRecord>(&sql)
            .bind(db_timestamp(now))
            .bind(limit)
            .fetch_all(&self.db_pool)
            .await
            .context("Fallo al listar campañas vencidas")
    }

    pub async fn list_sending_campaigns(&self, limit: i64) -> Result<Vec<CampaignRecord>> {
        let sql = format!(
            r#"
            SELECT {CAMPAIGN_COLUMNS}
            FROM campaigns
            WHERE status = 'sending'
            ORDER BY started_at ASC, id ASC
            LIMIT ?1
            "#
        );
        sqlx::query_as::<_, CampaignRecord>(&sql)
            .bind(limit)
            .fetch_all(&self.db_pool)
            .await
            .context("Fallo al listar campañas en envío")
    }

    /// `scheduled -> sending` sólo si sigue `scheduled`. Devuelve `false` si
    /// otra invocación ya la tomó.
    pub async fn claim_for_sending(&self, campaign_id: &str) -> Result<bool> {
        let now = now_timestamp();
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'sending', started_at = ?2, updated_at = ?2
            WHERE id = ?1 AND status = 'scheduled'
            "#,
        )
        .bind(campaign_id)
        .bind(&now)
        .execute(&self.db_pool)
        .await
        .context("Fallo al reclamar campaña")?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_campaign_failed(&self, campaign_id: &str, error: &str) -> Result<()> {
        let now = now_timestamp();
        sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'failed', error_message = ?2, completed_at = ?3, updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(campaign_id)
        .bind(error)
        .bind(&now)
        .execute(&self.db_pool)
        .await
        .context("Fallo al marcar campaña como failed")?;
        Ok(())
    }

    /// Cierra una campaña en `sending` con su estado final.
    pub async fn complete_campaign(&self, campaign_id: &str, status: CampaignStatus) -> Result<bool> {
        let now = now_timestamp();
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = ?2, completed_at = ?3, updated_at = ?3
            WHERE id = ?1 AND status = 'sending'
            "#,
        )
        .bind(campaign_id)
        .bind(status)
        .bind(&now)
        .execute(&self.db_pool)
        .await
        .context("Fallo al completar campaña")?;
        Ok(result.rows_affected() == 1)
    }

    /// Si la campaña ya no tiene destinatarios en cola la cierra: `failed` si
    /// todos fallaron, `sent` en otro caso. Devuelve el estado final aplicado.
    pub async fn finalize_if_drained(&self, campaign_id: &str) -> Result<Option<CampaignStatus>> {
        let (total, queued, failed): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN delivery_status = 'queued' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN delivery_status IN ('failed', 'bounced') THEN 1 ELSE 0 END), 0)
            FROM campaign_recipients
            WHERE campaign_id = ?1
            "#,
        )
        .bind(campaign_id)
        .fetch_one(&self.db_pool)
        .await
        .context("Fallo al contar destinatarios")?;

        if queued > 0 {
            return Ok(None);
        }

        let final_status = if total > 0 && failed == total {
            CampaignStatus::Failed
        } else {
            CampaignStatus::Sent
        };
        if !self.complete_campaign(campaign_id, final_status).await? {
            return Ok(None);
        }

        self.append_log(
            campaign_id,
            "info",
            "campaign_completed",
            &format!("Campaign finished with status {}", final_status.as_str()),
            Some(&serde_json::json!({ "total": total, "failed": failed })),
        )
        .await?;
        Ok(Some(final_status))
    }

    pub async fn count_recipients(&self, campaign_id: &str, status: DeliveryStatus) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM campaign_recipients WHERE campaign_id = ?1 AND delivery_status = ?2",
        )
        .bind(campaign_id)
        .bind(status)
        .fetch_one(&self.db_pool)
        .await
        .context("Fallo al contar destinatarios")?;
        Ok(count)
    }

    /// Destinatarios en cola sin reclamar, o con un reclamo anterior a
    /// `stale_before` (executor que murió a mitad de lote).
    pub async fn list_claimable_queued(
        &self,
        campaign_id: &str,
        stale_before: &str,
        limit: i64,
    ) -> Result<Vec<CampaignRecipientRecord>> {
        let sql = format!(
            r#"
            SELECT {RECIPIENT_COLUMNS}
            FROM campaign_recipients
            WHERE campaign_id = ?1
              AND delivery_status = 'queued'
              AND (claimed_at IS NULL OR claimed_at < ?2)
            ORDER BY created_at ASC, id ASC
            LIMIT ?3
            "#
        );
        sqlx::query_as::<_, CampaignRecipientRecord>(&sql)
            .bind(campaign_id)
            .bind(stale_before)
            .bind(limit)
            .fetch_all(&self.db_pool)
            .await
            .context("Fallo al listar destinatarios en cola")
    }

    pub async fn claim_recipient(&self, recipient_id: &str, stale_before: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_recipients
            SET claimed_at = ?2
            WHERE id = ?1
              AND delivery_status = 'queued'
              AND (claimed_at IS NULL OR claimed_at < ?3)
            "#,
        )
        .bind(recipient_id)
        .bind(now_timestamp())
        .bind(stale_before)
        .execute(&self.db_pool)
        .await
        .context("Fallo al reclamar destinatario")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_recipient_sent(
        &self,
        recipient_id: &str,
        provider_message_id: Option<&str>,
    ) -> Result<()> {
        let now = now_timestamp();
        sqlx::query(
            r#"
            UPDATE campaign_recipients
            SET delivery_status = 'sent', provider_message_id = ?2, sent_at = ?3, updated_at = ?3
            WHERE id = ?1 AND delivery_status = 'queued'
            "#,
        )
        .bind(recipient_id)
        .bind(provider_message_id)
        .bind(&now)
        .execute(&self.db_pool)
        .await
        .context("Fallo al marcar destinatario como sent")?;
        Ok(())
    }

    pub async fn mark_recipient_failed(&self, recipient_id: &str, error: &str) -> Result<()> {
        let now = now_timestamp();
        sqlx::query(
            r#"
            UPDATE campaign_recipients
            SET delivery_status = 'failed', error_message = ?2, updated_at = ?3
            WHERE id = ?1 AND delivery_status = 'queued'
            "#,
        )
        .bind(recipient_id)
        .bind(error)
        .bind(&now)
        .execute(&self.db_pool)
        .await
        .context("Fallo al marcar destinatario como failed")?;
        Ok(())
    }

    /// Agrega una entrada a la bitácora. Nunca se actualiza ni se borra.
    pub async fn append_log(
        &self,
        campaign_id: &str,
        level: &str,
        action: &str,
        message: &str,
        details: Option<&Value>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaign_logs (id, campaign_id, level, action, message, details, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(campaign_id)
        .bind(level)
        .bind(action)
        .bind(message)
        .bind(details.map(|d| d.to_string()))
        .bind(now_timestamp())
        .execute(&self.db_pool)
        .await
        .context("Fallo al insertar campaign_log")?;
        Ok(())
    }

    pub async fn list_logs(&self, campaign_id: &str) -> Result<Vec<CampaignLogRecord>> {
        sqlx::query_as::<_, CampaignLogRecord>(
            r#"
            SELECT id, campaign_id, level, action, message, details, created_at
            FROM campaign_logs
            WHERE campaign_id = ?1
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.db_pool)
        .await
        .context("Fallo al listar campaign_logs")
    }
}

//! services/status_update_service.rs
//! Aplica las actualizaciones de estado de los proveedores sobre los
//! destinatarios de campaña y deja la auditoría del webhook crudo.

use anyhow::{Context, Result};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::models::{
    campaign_model::DeliveryStatus,
    now_timestamp,
    webhook_model::{NormalizeOutcome, Provider, WebhookUpdate, UNKNOWN_COMPANY_ID},
};

/// Reintentos del compare-and-set cuando otro webhook cambió la fila en medio.
const MAX_CAS_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, sqlx::FromRow)]
struct MatchedRecipient {
    id: String,
    delivery_status: DeliveryStatus,
    company_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub recipient_id: Option<String>,
    /// `false` si el estado no avanzó (duplicado, regresión o sin destinatario).
    pub applied: bool,
    pub company_id: String,
}

#[derive(Clone, Debug)]
pub struct StatusUpdateService {
    db_pool: Pool<Sqlite>,
}

impl StatusUpdateService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        StatusUpdateService { db_pool }
    }

    /// Procesa todo lo que produjo el normalizador. Cada update se aísla:
    /// si uno falla se audita como no procesado y se sigue con el resto.
    /// Devuelve cuántos se procesaron sin error.
    pub async fn apply_outcome(
        &self,
        provider: &Provider,
        outcome: &NormalizeOutcome,
        raw_payload: &str,
        company_hint: Option<&str>,
    ) -> Result<usize> {
        let updates = match outcome {
            NormalizeOutcome::Updates(updates) => updates,
            NormalizeOutcome::Unrecognized { reason } => {
                self.record_audit(
                    company_hint.unwrap_or(UNKNOWN_COMPANY_ID),
                    provider,
                    None,
                    raw_payload,
                    false,
                    Some(reason),
                )
                .await?;
                return Ok(0);
            }
        };

        let mut processed = 0;
        for update in updates {
            match self.apply_update(provider, update, raw_payload).await {
                Ok(result) => {
                    log::info!(
                        "(apply_outcome) {} message_id={} status={} applied={}",
                        provider,
                        update.message_id,
                        update.status,
                        result.applied
                    );
                    processed += 1;
                }
                Err(e) => {
                    log::error!(
                        "(apply_outcome) Error aplicando message_id={}: {:#}",
                        update.message_id,
                        e
                    );
                    let company = update
                        .company_id
                        .as_deref()
                        .or(company_hint)
                        .unwrap_or(UNKNOWN_COMPANY_ID);
                    if let Err(audit_err) = self
                        .record_audit(
                            company,
                            provider,
                            Some(&update.message_id),
                            raw_payload,
                            false,
                            Some(&format!("{:#}", e)),
                        )
                        .await
                    {
                        log::error!("(apply_outcome) Tampoco se pudo auditar: {:#}", audit_err);
                    }
                }
            }
        }
        Ok(processed)
    }

    /// Aplica un update. Haya o no destinatario, queda una fila de auditoría.
    pub async fn apply_update(
        &self,
        provider: &Provider,
        update: &WebhookUpdate,
        raw_payload: &str,
    ) -> Result<ApplyOutcome> {
        let recipient = self.find_recipient(update).await?;

        let (recipient_id, applied, resolved_company) = match &recipient {
            Some(rec) => {
                let applied = self.transition(rec, update).await?;
                (Some(rec.id.clone()), applied, Some(rec.company_id.clone()))
            }
            None => {
                log::info!(
                    "(apply_update) Sin destinatario para message_id={} ({})",
                    update.message_id,
                    provider
                );
                (None, false, None)
            }
        };

        let company_id = update
            .company_id
            .clone()
            .or(resolved_company)
            .unwrap_or_else(|| UNKNOWN_COMPANY_ID.to_string());

        self.record_audit(&company_id, provider, Some(&update.message_id), raw_payload, true, None)
            .await?;

        Ok(ApplyOutcome {
            recipient_id,
            applied,
            company_id,
        })
    }

    /// Busca por id del proveedor; si no, por contacto: el destinatario ya
    /// enviado más reciente con ese teléfono o email.
    async fn find_recipient(&self, update: &WebhookUpdate) -> Result<Option<MatchedRecipient>> {
        let by_id = sqlx::query_as::<_, MatchedRecipient>(
            r#"
            SELECT r.id, r.delivery_status, c.company_id
            FROM campaign_recipients r
            JOIN campaigns c ON c.id = r.campaign_id
            WHERE r.provider_message_id = ?1
            LIMIT 1
            "#,
        )
        .bind(&update.message_id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Fallo al buscar destinatario por message_id")?;

        if by_id.is_some() || (update.recipient_phone.is_none() && update.recipient_email.is_none()) {
            return Ok(by_id);
        }

        let phone = update
            .recipient_phone
            .as_deref()
            .map(|p| p.trim_start_matches('+').to_string());
        sqlx::query_as::<_, MatchedRecipient>(
            r#"
            SELECT r.id, r.delivery_status, c.company_id
            FROM campaign_recipients r
            JOIN campaigns c ON c.id = r.campaign_id
            WHERE r.delivery_status <> 'queued'
              AND (
                (?1 IS NOT NULL AND REPLACE(r.phone, '+', '') = ?1)
                OR (?2 IS NOT NULL AND LOWER(r.email) = LOWER(?2))
              )
            ORDER BY COALESCE(r.sent_at, r.updated_at) DESC
            LIMIT 1
            "#,
        )
        .bind(phone)
        .bind(&update.recipient_email)
        .fetch_optional(&self.db_pool)
        .await
        .context("Fallo al buscar destinatario por contacto")
    }

    /// Compare-and-set sobre `delivery_status`: sólo escribe si la fila sigue
    /// en el estado observado y la transición es hacia adelante.
    async fn transition(&self, recipient: &MatchedRecipient, update: &WebhookUpdate) -> Result<bool> {
        let mut current = recipient.delivery_status;

        for _ in 0..MAX_CAS_ATTEMPTS {
            if !current.can_advance_to(update.status) {
                return Ok(false);
            }

            let (error_message, error_code) = if update.status.is_terminal() {
                (update.error_message.as_deref(), update.error_code.as_deref())
            } else {
                (None, None)
            };

            let result = sqlx::query(
                r#"
                UPDATE campaign_recipients
                SET delivery_status = ?2,
                    provider_message_id = COALESCE(provider_message_id, ?3),
                    error_message = COALESCE(?4, error_message),
                    error_code = COALESCE(?5, error_code),
                    sent_at = CASE WHEN ?2 = 'sent' THEN COALESCE(sent_at, ?6) ELSE sent_at END,
                    delivered_at = CASE WHEN ?2 IN ('delivered', 'read')
                        THEN COALESCE(delivered_at, ?6) ELSE delivered_at END,
                    read_at = CASE WHEN ?2 = 'read' THEN COALESCE(read_at, ?6) ELSE read_at END,
                    updated_at = ?7
                WHERE id = ?1 AND delivery_status = ?8
                "#,
            )
            .bind(&recipient.id)
            .bind(update.status)
            .bind(&update.message_id)
            .bind(error_message)
            .bind(error_code)
            .bind(&update.timestamp)
            .bind(now_timestamp())
            .bind(current)
            .execute(&self.db_pool)
            .await
            .context("Fallo al actualizar delivery_status")?;

            if result.rows_affected() == 1 {
                return Ok(true);
            }

            // Otro webhook se adelantó; releer y reevaluar.
            let (latest,): (DeliveryStatus,) = sqlx::query_as(
                "SELECT delivery_status FROM campaign_recipients WHERE id = ?1",
            )
            .bind(&recipient.id)
            .fetch_one(&self.db_pool)
            .await
            .context("Fallo al releer delivery_status")?;
            current = latest;
        }

        log::warn!(
            "(transition) Destinatario {} cambió {} veces durante el update, se descarta",
            recipient.id,
            MAX_CAS_ATTEMPTS
        );
        Ok(false)
    }

    async fn record_audit(
        &self,
        company_id: &str,
        provider: &Provider,
        message_id: Option<&str>,
        raw_payload: &str,
        processed: bool,
        error_message: Option<&str>,
    ) -> Result<()> {
        let now = now_timestamp();
        sqlx::query(
            r#"
            INSERT INTO marketing_webhooks (
                id, company_id, provider, message_id, payload,
                processed, processed_at, error_message, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(company_id)
        .bind(provider.as_str())
        .bind(message_id)
        .bind(raw_payload)
        .bind(processed)
        .bind(if processed { Some(now.clone()) } else { None })
        .bind(error_message)
        .bind(&now)
        .execute(&self.db_pool)
        .await
        .context("Fallo al insertar marketing_webhook")?;
        Ok(())
    }
}

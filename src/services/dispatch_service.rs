//! services/dispatch_service.rs
//! Registro de invocaciones al executor por campaña: intentos, último error
//! y estado `dead` tras demasiados fallos seguidos.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{Pool, Sqlite};

use crate::{models::now_timestamp, services::batch_executor::BatchExecutor};

pub const MAX_DISPATCH_ATTEMPTS: i64 = 3;

#[derive(Debug)]
pub enum DispatchOutcome {
    Completed(Value),
    /// Falló, pero quedan intentos; el siguiente tick lo reintenta.
    Failed { attempts: i64, error: String },
    /// Se agotaron los intentos.
    DeadLettered { attempts: i64, error: String },
}

#[derive(Clone)]
pub struct DispatchService {
    db_pool: Pool<Sqlite>,
    executor: Arc<dyn BatchExecutor>,
}

impl DispatchService {
    pub fn new(db_pool: Pool<Sqlite>, executor: Arc<dyn BatchExecutor>) -> Self {
        Self { db_pool, executor }
    }

    /// Invoca el executor esperando su respuesta y deja constancia en el ledger.
    /// Los errores del executor no se propagan; sí los de la DB.
    pub async fn dispatch(&self, campaign_id: &str) -> Result<DispatchOutcome> {
        self.ensure_row(campaign_id).await?;

        match self.executor.process_batch(campaign_id).await {
            Ok(result) => {
                self.record_success(campaign_id).await?;
                Ok(DispatchOutcome::Completed(result))
            }
            Err(e) => {
                let error = format!("{:#}", e);
                let attempts = self.record_failure(campaign_id, &error).await?;
                log::warn!(
                    "(dispatch) campaign_id={} intento {} fallido: {}",
                    campaign_id,
                    attempts,
                    error
                );
                if attempts >= MAX_DISPATCH_ATTEMPTS {
                    self.set_status(campaign_id, "dead").await?;
                    Ok(DispatchOutcome::DeadLettered { attempts, error })
                } else {
                    Ok(DispatchOutcome::Failed { attempts, error })
                }
            }
        }
    }

    pub async fn attempts(&self, campaign_id: &str) -> Result<Option<(i64, String)>> {
        sqlx::query_as::<_, (i64, String)>(
            "SELECT attempts, status FROM campaign_dispatches WHERE campaign_id = ?1",
        )
        .bind(campaign_id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Fallo al consultar campaign_dispatches")
    }

    async fn ensure_row(&self, campaign_id: &str) -> Result<()> {
        let now = now_timestamp();
        sqlx::query(
            r#"
            INSERT INTO campaign_dispatches (campaign_id, attempts, status, created_at, updated_at)
            VALUES (?1, 0, 'pending', ?2, ?2)
            ON CONFLICT (campaign_id) DO NOTHING
            "#,
        )
        .bind(campaign_id)
        .bind(&now)
        .execute(&self.db_pool)
        .await
        .context("Fallo al registrar dispatch")?;
        Ok(())
    }

    /// Un éxito reinicia el contador: sólo cuentan fallos consecutivos.
    async fn record_success(&self, campaign_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaign_dispatches
            SET attempts = 0, status = 'done', last_error = NULL, updated_at = ?2
            WHERE campaign_id = ?1
            "#,
        )
        .bind(campaign_id)
        .bind(now_timestamp())
        .execute(&self.db_pool)
        .await
        .context("Fallo al actualizar dispatch")?;
        Ok(())
    }

    async fn record_failure(&self, campaign_id: &str, error: &str) -> Result<i64> {
        let (attempts,): (i64,) = sqlx::query_as(
            r#"
            UPDATE campaign_dispatches
            SET attempts = attempts + 1, status = 'pending', last_error = ?2, updated_at = ?3
            WHERE campaign_id = ?1
            RETURNING attempts
            "#,
        )
        .bind(campaign_id)
        .bind(error)
        .bind(now_timestamp())
        .fetch_one(&self.db_pool)
        .await
        .context("Fallo al actualizar dispatch")?;
        Ok(attempts)
    }

    async fn set_status(&self, campaign_id: &str, status: &str) -> Result<()> {
        sqlx::query("UPDATE campaign_dispatches SET status = ?2, updated_at = ?3 WHERE campaign_id = ?1")
            .bind(campaign_id)
            .bind(status)
            .bind(now_timestamp())
            .execute(&self.db_pool)
            .await
            .context("Fallo al actualizar dispatch")?;
        Ok(())
    }
}

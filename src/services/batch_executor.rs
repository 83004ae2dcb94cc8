//! services/batch_executor.rs
//! Punto de invocación del executor de lotes: remoto (HTTP) o en proceso.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::models::campaign_model::{ExecuteBatchRequest, PROCESS_BATCH_ACTION};

#[async_trait]
pub trait BatchExecutor: Send + Sync {
    /// Procesa un lote de la campaña y devuelve el JSON del executor tal cual.
    async fn process_batch(&self, campaign_id: &str) -> Result<Value>;
}

/// Executor desplegado aparte; se le llama con `{campaign_id, action}`.
#[derive(Clone)]
pub struct HttpBatchExecutor {
    http_client: Client,
    url: String,
    service_role_key: Option<String>,
}

impl HttpBatchExecutor {
    pub fn new(url: String, service_role_key: Option<String>) -> Self {
        Self {
            http_client: Client::new(),
            url,
            service_role_key,
        }
    }
}

#[async_trait]
impl BatchExecutor for HttpBatchExecutor {
    async fn process_batch(&self, campaign_id: &str) -> Result<Value> {
        let body = ExecuteBatchRequest {
            campaign_id: campaign_id.to_string(),
            action: PROCESS_BATCH_ACTION.to_string(),
        };

        let mut request = self.http_client.post(&self.url).json(&body);
        if let Some(key) = &self.service_role_key {
            request = request.bearer_auth(key);
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("Fallo al invocar executor en {}", self.url))?;

        let status = resp.status();
        if !status.is_success() {
            let body_txt = resp.text().await.unwrap_or_default();
            log::error!(
                "(HttpBatchExecutor) campaign_id={} status={} body='{}'",
                campaign_id,
                status,
                body_txt
            );
            return Err(anyhow!("Executor respondió {}: {}", status, body_txt));
        }

        resp.json::<Value>()
            .await
            .context("Respuesta del executor no es JSON")
    }
}

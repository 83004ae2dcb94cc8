//! services/portal_service.rs
//! Ingesta de leads desde portales inmobiliarios (Property Finder y similares).

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::models::{
    now_timestamp,
    portal_model::{PortalIngestResult, PortalLead, DEFAULT_PORTAL_SOURCE},
};

#[derive(Clone, Debug)]
pub struct PortalService {
    db_pool: Pool<Sqlite>,
}

impl PortalService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        PortalService { db_pool }
    }

    /// Valida los secretos recibidos contra el de la compañía; basta con que
    /// uno coincida. Sin secreto configurado no se exige nada.
    pub fn secret_matches(stored: Option<&str>, provided: &[&str]) -> bool {
        match stored.filter(|s| !s.is_empty()) {
            None => true,
            Some(expected) => provided.iter().any(|p| p.trim() == expected),
        }
    }

    pub async fn ingest(&self, company_id: &str, payload: &Value) -> Result<PortalIngestResult> {
        let Some(lead) = extract_lead(payload) else {
            return Ok(PortalIngestResult {
                success: false,
                duplicate: false,
                lead_id: None,
                message: "Lead must include at least an email or a phone number".to_string(),
            });
        };

        if let Some(existing) = self.find_duplicate(company_id, &lead).await? {
            log::info!(
                "(portal ingest) Lead duplicado para compañía {} (lead {})",
                company_id,
                existing
            );
            return Ok(PortalIngestResult {
                success: true,
                duplicate: true,
                lead_id: Some(existing),
                message: "Lead already registered".to_string(),
            });
        }

        let lead_id = Uuid::new_v4().to_string();
        let result = sqlx::query(
            r#"
            INSERT INTO leads (
                id, company_id, source, external_id, name, email, phone,
                message, property_reference, raw_payload, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&lead_id)
        .bind(company_id)
        .bind(&lead.source)
        .bind(&lead.external_id)
        .bind(&lead.name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(&lead.message)
        .bind(&lead.property_reference)
        .bind(payload.to_string())
        .bind(now_timestamp())
        .execute(&self.db_pool)
        .await;

        match result {
            Ok(_) => {
                log::info!("(portal ingest) Lead {} creado para compañía {}", lead_id, company_id);
                Ok(PortalIngestResult {
                    success: true,
                    duplicate: false,
                    lead_id: Some(lead_id),
                    message: "Lead created".to_string(),
                })
            }
            // Carrera con otra entrega del mismo lead.
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(PortalIngestResult {
                success: true,
                duplicate: true,
                lead_id: None,
                message: "Lead already registered".to_string(),
            }),
            Err(e) => Err(e).context("Fallo al insertar lead"),
        }
    }

    async fn find_duplicate(&self, company_id: &str, lead: &PortalLead) -> Result<Option<String>> {
        let row = match &lead.external_id {
            Some(external_id) => {
                sqlx::query_as::<_, (String,)>(
                    "SELECT id FROM leads WHERE company_id = ?1 AND source = ?2 AND external_id = ?3",
                )
                .bind(company_id)
                .bind(&lead.source)
                .bind(external_id)
                .fetch_optional(&self.db_pool)
                .await
            }
            None => {
                sqlx::query_as::<_, (String,)>(
                    r#"
                    SELECT id FROM leads
                    WHERE company_id = ?1
                      AND COALESCE(LOWER(email), '') = COALESCE(LOWER(?2), '')
                      AND COALESCE(phone, '') = COALESCE(?3, '')
                    LIMIT 1
                    "#,
                )
                .bind(company_id)
                .bind(&lead.email)
                .bind(&lead.phone)
                .fetch_optional(&self.db_pool)
                .await
            }
        }
        .context("Fallo al buscar lead duplicado")?;

        Ok(row.map(|(id,)| id))
    }
}

/// Extrae el lead del payload. `None` si no trae ni email ni teléfono.
pub fn extract_lead(payload: &Value) -> Option<PortalLead> {
    // Algunos portales anidan el lead en `data` o `lead`.
    let body = payload
        .get("lead")
        .or_else(|| payload.get("data"))
        .filter(|v| v.is_object())
        .unwrap_or(payload);

    let pick = |keys: &[&str]| -> Option<String> {
        keys.iter().find_map(|k| match body.get(*k) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    };

    let email = pick(&["email", "client_email"]).map(|e| e.to_ascii_lowercase());
    let phone = pick(&["phone", "mobile", "client_phone"]);
    if email.is_none() && phone.is_none() {
        return None;
    }

    Some(PortalLead {
        source: pick(&["source", "portal"]).unwrap_or_else(|| DEFAULT_PORTAL_SOURCE.to_string()),
        external_id: pick(&["id", "lead_id"]),
        name: pick(&["name", "client_name", "full_name"]),
        email,
        phone,
        message: pick(&["message", "comments"]),
        property_reference: pick(&["property_reference", "listing_id", "reference"]),
    })
}

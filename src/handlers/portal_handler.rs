//! handlers/portal_handler.rs
//! Webhook de leads de portales inmobiliarios.

use std::time::Instant;

use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse};
use serde_json::{json, Value};

use crate::{
    handlers::processing_failed,
    models::portal_model::PortalQuery,
    services::{company_service::CompanyService, portal_service::PortalService},
};

const SECRET_HEADERS: [&str; 2] = ["x-webhook-secret", "x-pf-signature"];

/// POST /api/webhooks/portal?company_id=<id>
pub async fn portal_webhook_endpoint(
    req: HttpRequest,
    query: web::Query<PortalQuery>,
    body: web::Bytes,
    company_service: web::Data<CompanyService>,
    portal_service: web::Data<PortalService>,
) -> HttpResponse {
    let started = Instant::now();

    let Some(company_id) = query.company_id.as_deref().filter(|c| !c.trim().is_empty()) else {
        return HttpResponse::BadRequest().json(json!({
            "error": "Missing company_id query parameter. Append ?company_id=<your company id> to the webhook URL."
        }));
    };

    let company = match company_service.find_company(company_id).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({ "error": "Company not found" }));
        }
        Err(e) => {
            log::error!("(portal_webhook_endpoint) Error buscando compañía {}: {:?}", company_id, e);
            return processing_failed();
        }
    };

    let provided: Vec<&str> = SECRET_HEADERS
        .iter()
        .filter_map(|h| req.headers().get(*h).and_then(|v| v.to_str().ok()))
        .collect();
    if !PortalService::secret_matches(company.portal_webhook_secret.as_deref(), &provided) {
        log::warn!("(portal_webhook_endpoint) Secreto inválido para compañía {}", company_id);
        return HttpResponse::Unauthorized().json(json!({ "error": "Invalid webhook secret" }));
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            log::error!("(portal_webhook_endpoint) JSON inválido: {:?}", e);
            return processing_failed();
        }
    };

    let result = match portal_service.ingest(company_id, &payload).await {
        Ok(r) => r,
        Err(e) => {
            log::error!("(portal_webhook_endpoint) Error ingresando lead: {:?}", e);
            return processing_failed();
        }
    };

    let status = if !result.success {
        StatusCode::UNPROCESSABLE_ENTITY
    } else if result.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    let mut response = match serde_json::to_value(&result) {
        Ok(v) => v,
        Err(e) => {
            log::error!("(portal_webhook_endpoint) No se pudo serializar: {:?}", e);
            return processing_failed();
        }
    };
    if let Some(obj) = response.as_object_mut() {
        obj.insert(
            "processing_time_ms".to_string(),
            json!(started.elapsed().as_millis() as u64),
        );
    }

    HttpResponse::build(status).json(response)
}

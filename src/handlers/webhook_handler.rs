//! handlers/webhook_handler.rs
//! Webhook de estados de entrega de los proveedores de mensajería.

use actix_web::{http::header, web, HttpRequest, HttpResponse};

use crate::{
    config::app_config::AppConfig,
    handlers::{method_not_allowed, processing_failed},
    models::webhook_model::{Provider, WebhookQuery, WebhookResponse},
    services::{
        status_update_service::StatusUpdateService,
        webhook_normalizer::{decode_body, normalize},
    },
};

const SUBSCRIBE_MODE: &str = "subscribe";

/// POST /api/webhooks/marketing?provider=<p>&company_id=<id>
pub async fn marketing_webhook_endpoint(
    req: HttpRequest,
    query: web::Query<WebhookQuery>,
    body: web::Bytes,
    status_service: web::Data<StatusUpdateService>,
) -> HttpResponse {
    let provider = Provider::from_query(query.provider.as_deref());
    let is_form = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);

    let payload = match decode_body(&provider, &body, is_form) {
        Ok(v) => v,
        Err(e) => {
            log::error!("(marketing_webhook_endpoint) Body inválido de {}: {:?}", provider, e);
            return processing_failed();
        }
    };

    let outcome = normalize(&provider, &payload, query.company_id.as_deref());
    let raw = String::from_utf8_lossy(&body);

    match status_service
        .apply_outcome(&provider, &outcome, &raw, query.company_id.as_deref())
        .await
    {
        Ok(processed) => HttpResponse::Ok().json(WebhookResponse {
            success: true,
            processed,
        }),
        Err(e) => {
            log::error!("(marketing_webhook_endpoint) Error procesando {}: {:?}", provider, e);
            processing_failed()
        }
    }
}

/// GET /api/webhooks/marketing (handshake de suscripción de Meta)
pub async fn meta_verification_endpoint(
    query: web::Query<WebhookQuery>,
    config: web::Data<AppConfig>,
) -> HttpResponse {
    let provider = Provider::from_query(query.provider.as_deref());
    if provider != Provider::Meta || query.hub_mode.as_deref() != Some(SUBSCRIBE_MODE) {
        return method_not_allowed().await;
    }

    let matches = match (config.meta_verify_token.as_deref(), query.hub_verify_token.as_deref()) {
        (Some(expected), Some(provided)) => expected == provided,
        _ => false,
    };

    if matches {
        log::info!("(meta_verification_endpoint) Suscripción verificada");
        HttpResponse::Ok()
            .content_type("text/plain")
            .body(query.hub_challenge.clone().unwrap_or_default())
    } else {
        log::warn!("(meta_verification_endpoint) verify_token no coincide");
        HttpResponse::Forbidden().body("Forbidden")
    }
}

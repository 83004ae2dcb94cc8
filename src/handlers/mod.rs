//! handlers/mod.rs
//! Handlers HTTP (scheduler, webhooks, campañas, compañías) y helpers comunes.

use actix_web::{middleware::DefaultHeaders, HttpResponse};
use serde_json::json;

pub mod campaign_handler;
pub mod company_handler;
pub mod portal_handler;
pub mod scheduler_handler;
pub mod webhook_handler;

pub const CORS_ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";

/// Cabeceras CORS que llevan todas las respuestas de `/api`.
pub fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Access-Control-Allow-Origin", "*"))
        .add(("Access-Control-Allow-Headers", CORS_ALLOW_HEADERS))
}

/// OPTIONS (preflight)
pub async fn preflight() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

pub async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().json(json!({ "error": "Method not allowed" }))
}

/// 500 genérico: el detalle sólo va al log.
pub fn processing_failed() -> HttpResponse {
    HttpResponse::InternalServerError().json(json!({ "error": "Processing failed" }))
}

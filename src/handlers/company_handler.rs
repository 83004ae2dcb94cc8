//! handlers/company_handler.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::{models::company_model::ProvisionCompanyRequest, services::company_service::CompanyService};

/// POST /api/companies/provision
pub async fn provision_company_endpoint(
    company_service: web::Data<CompanyService>,
    body: web::Json<ProvisionCompanyRequest>,
) -> HttpResponse {
    let user_id = body.into_inner().user_id;

    match company_service.ensure_company(&user_id).await {
        Ok(Some(resp)) => HttpResponse::Ok().json(resp),
        Ok(None) => HttpResponse::NotFound().json(json!({ "error": "Profile not found" })),
        Err(e) => {
            log::error!("(provision_company_endpoint) user_id={} error={:?}", user_id, e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Could not provision company"
            }))
        }
    }
}

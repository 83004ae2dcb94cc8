//! handlers/campaign_handler.rs
use actix_web::{http::header, web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::{
    config::app_config::AppConfig,
    models::campaign_model::{CreateCampaignRequest, ExecuteBatchRequest, PROCESS_BATCH_ACTION},
    services::{campaign_executor_service::CampaignExecutorService, campaign_service::CampaignService},
};

fn internal_error() -> HttpResponse {
    HttpResponse::InternalServerError().json(json!({ "error": "Internal server error" }))
}

/// POST /api/campaigns
pub async fn create_campaign_endpoint(
    campaign_service: web::Data<CampaignService>,
    body: web::Json<CreateCampaignRequest>,
) -> HttpResponse {
    let req = body.into_inner();
    if let Err(e) = CampaignService::validate_request(&req) {
        return HttpResponse::BadRequest().json(json!({ "error": e.to_string() }));
    }

    match campaign_service.create_campaign(req).await {
        Ok(resp) => HttpResponse::Created().json(resp),
        Err(e) => {
            log::error!("(create_campaign_endpoint) {:?}", e);
            internal_error()
        }
    }
}

/// GET /api/campaigns/{id}
pub async fn get_campaign_endpoint(
    campaign_service: web::Data<CampaignService>,
    path: web::Path<String>,
) -> HttpResponse {
    let campaign_id = path.into_inner();

    match campaign_service.get_campaign_detail(&campaign_id).await {
        Ok(Some(detail)) => HttpResponse::Ok().json(detail),
        Ok(None) => HttpResponse::NotFound().json(json!({ "error": "Campaign not found" })),
        Err(e) => {
            log::error!("(get_campaign_endpoint) campaign_id={} error={:?}", campaign_id, e);
            internal_error()
        }
    }
}

/// GET /api/campaigns/{id}/logs
pub async fn list_campaign_logs_endpoint(
    campaign_service: web::Data<CampaignService>,
    path: web::Path<String>,
) -> HttpResponse {
    let campaign_id = path.into_inner();

    match campaign_service.find_campaign(&campaign_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return HttpResponse::NotFound().json(json!({ "error": "Campaign not found" })),
        Err(e) => {
            log::error!("(list_campaign_logs_endpoint) campaign_id={} error={:?}", campaign_id, e);
            return internal_error();
        }
    }

    match campaign_service.list_logs(&campaign_id).await {
        Ok(logs) => HttpResponse::Ok().json(logs),
        Err(e) => {
            log::error!("(list_campaign_logs_endpoint) campaign_id={} error={:?}", campaign_id, e);
            internal_error()
        }
    }
}

/// POST /api/campaigns/execute
pub async fn execute_batch_endpoint(
    req: HttpRequest,
    config: web::Data<AppConfig>,
    campaign_service: web::Data<CampaignService>,
    executor: web::Data<CampaignExecutorService>,
    body: web::Json<ExecuteBatchRequest>,
) -> HttpResponse {
    if let Some(key) = config.service_role_key.as_deref() {
        let bearer = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if bearer != Some(key) {
            return HttpResponse::Unauthorized().json(json!({ "error": "Unauthorized" }));
        }
    }

    let body = body.into_inner();
    if body.action != PROCESS_BATCH_ACTION {
        return HttpResponse::BadRequest().json(json!({
            "error": format!("Unknown action '{}'", body.action)
        }));
    }

    match campaign_service.find_campaign(&body.campaign_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return HttpResponse::NotFound().json(json!({ "error": "Campaign not found" })),
        Err(e) => {
            log::error!("(execute_batch_endpoint) {:?}", e);
            return HttpResponse::InternalServerError().json(json!({ "error": "Batch failed" }));
        }
    }

    match executor.run_batch(&body.campaign_id).await {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(e) => {
            log::error!("(execute_batch_endpoint) campaign_id={} error={:?}", body.campaign_id, e);
            HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": "Batch failed"
            }))
        }
    }
}

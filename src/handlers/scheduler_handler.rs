//! handlers/scheduler_handler.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::services::scheduler_service::SchedulerService;

/// POST /api/scheduler/run
pub async fn run_scheduler_endpoint(scheduler: web::Data<SchedulerService>) -> HttpResponse {
    match scheduler.run_tick().await {
        Ok(resp) => HttpResponse::Ok().json(resp),
        Err(e) => {
            log::error!("(run_scheduler_endpoint) Scheduler falló: {:?}", e);
            HttpResponse::InternalServerError().json(json!({ "error": "Scheduler failed" }))
        }
    }
}

//! app.rs
use actix_web::{http::Method, web};

use crate::handlers::{
    campaign_handler, company_handler, cors_headers, method_not_allowed, portal_handler, preflight,
    scheduler_handler, webhook_handler,
};

pub fn init_app(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .wrap(cors_headers())
            .service(
                web::resource("/scheduler/run")
                    .route(web::post().to(scheduler_handler::run_scheduler_endpoint))
                    .route(web::method(Method::OPTIONS).to(preflight))
                    .default_service(web::to(method_not_allowed)),
            )
            .service(
                web::resource("/webhooks/marketing")
                    .route(web::post().to(webhook_handler::marketing_webhook_endpoint))
                    .route(web::get().to(webhook_handler::meta_verification_endpoint))
                    .route(web::method(Method::OPTIONS).to(preflight))
                    .default_service(web::to(method_not_allowed)),
            )
            .service(
                web::resource("/webhooks/portal")
                    .route(web::post().to(portal_handler::portal_webhook_endpoint))
                    .route(web::method(Method::OPTIONS).to(preflight))
                    .default_service(web::to(method_not_allowed)),
            )
            // Antes que `/campaigns/{id}`.
            .service(
                web::resource("/campaigns/execute")
                    .route(web::post().to(campaign_handler::execute_batch_endpoint))
                    .default_service(web::to(method_not_allowed)),
            )
            .service(
                web::resource("/campaigns")
                    .route(web::post().to(campaign_handler::create_campaign_endpoint)),
            )
            .service(
                web::resource("/campaigns/{id}")
                    .route(web::get().to(campaign_handler::get_campaign_endpoint)),
            )
            .service(
                web::resource("/campaigns/{id}/logs")
                    .route(web::get().to(campaign_handler::list_campaign_logs_endpoint)),
            )
            .service(
                web::resource("/companies/provision")
                    .route(web::post().to(company_handler::provision_company_endpoint)),
            ),
    );
}

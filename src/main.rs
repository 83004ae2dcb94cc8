use std::{path::Path, str::FromStr, sync::Arc, time::Duration};

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use dotenv::dotenv;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};

use crate::config::app_config::AppConfig;
use crate::logger::init_logger;
use crate::services::{
    batch_executor::{BatchExecutor, HttpBatchExecutor},
    campaign_executor_service::CampaignExecutorService,
    campaign_service::CampaignService,
    channel_sender::ProviderChannelSender,
    company_service::CompanyService,
    dispatch_service::DispatchService,
    portal_service::PortalService,
    scheduler_service::SchedulerService,
    status_update_service::StatusUpdateService,
};

mod app;
mod config;
mod handlers;
mod logger;
mod models;
mod services;

#[cfg(test)]
mod tests;

/// Abre (o crea) la base SQLite. Crea el directorio del archivo si hace falta.
pub(crate) async fn setup_database(database_url: &str) -> Result<Pool<Sqlite>> {
    let file = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    if let Some(parent) = Path::new(file).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("No se pudo crear directorio {}", parent.display()))?;
    }

    log::info!("Conectando a SQLite en {}", database_url);

    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("DATABASE_URL inválida: {}", database_url))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("No se pudo conectar a la base de datos SQLite")
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv().ok(); // Cargar .env al inicio
    init_logger();

    let config = AppConfig::from_env();
    let db_pool = setup_database(&config.database_url).await?;

    let campaign_service = CampaignService::new(db_pool.clone());
    campaign_service
        .run_migrations()
        .await
        .context("Fallo en migraciones")?;

    let sender = Arc::new(ProviderChannelSender::new(&config));
    let executor_service =
        CampaignExecutorService::new(campaign_service.clone(), sender, config.site_url.clone());

    // Executor remoto si está configurado; si no, en proceso.
    let batch_executor: Arc<dyn BatchExecutor> = match &config.executor_url {
        Some(url) => {
            log::info!("Executor de lotes remoto en {}", url);
            Arc::new(HttpBatchExecutor::new(url.clone(), config.service_role_key.clone()))
        }
        None => {
            log::info!("Executor de lotes en proceso");
            Arc::new(executor_service.clone())
        }
    };
    if config.meta_verify_token.is_none() {
        log::warn!("META_VERIFY_TOKEN no definido; el handshake de Meta siempre responderá 403");
    }

    let dispatch_service = DispatchService::new(db_pool.clone(), batch_executor);
    let scheduler_service = SchedulerService::new(campaign_service.clone(), dispatch_service);
    let status_update_service = StatusUpdateService::new(db_pool.clone());
    let company_service = CompanyService::new(db_pool.clone());
    let portal_service = PortalService::new(db_pool.clone());

    let bind = (config.bind_address.clone(), config.port);
    log::info!("Levantando servidor en {}:{}", bind.0, bind.1);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(campaign_service.clone()))
            .app_data(web::Data::new(executor_service.clone()))
            .app_data(web::Data::new(scheduler_service.clone()))
            .app_data(web::Data::new(status_update_service.clone()))
            .app_data(web::Data::new(company_service.clone()))
            .app_data(web::Data::new(portal_service.clone()))
            .configure(app::init_app)
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}

//! tests/support.rs
//! Helpers compartidos: base temporal, fakes del executor y del sender,
//! y fixtures para insertar filas directamente.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use sqlx::{Pool, Sqlite};
use tempfile::TempDir;
use uuid::Uuid;

use crate::{
    config::app_config::AppConfig,
    logger::init_test_logger,
    models::{db_timestamp, now_timestamp},
    services::{
        batch_executor::BatchExecutor,
        campaign_executor_service::CampaignExecutorService,
        campaign_service::CampaignService,
        channel_sender::{ChannelSender, OutboundMessage},
        company_service::CompanyService,
        dispatch_service::DispatchService,
        portal_service::PortalService,
        scheduler_service::SchedulerService,
        status_update_service::StatusUpdateService,
    },
};

pub const SITE_URL: &str = "https://crm.test";

/// Mantiene vivo el directorio temporal mientras se use el pool.
pub struct TestDb {
    pub pool: Pool<Sqlite>,
    _dir: TempDir,
}

pub async fn test_db() -> TestDb {
    init_test_logger();
    let dir = tempfile::tempdir().expect("No se pudo crear tempdir");
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let pool = crate::setup_database(&url)
        .await
        .expect("No se pudo abrir la base de prueba");
    CampaignService::new(pool.clone())
        .run_migrations()
        .await
        .expect("Fallo en migraciones");
    TestDb { pool, _dir: dir }
}

// ----------------------------------------------------------------
// Fakes
// ----------------------------------------------------------------

/// Executor que registra las llamadas y puede fallar a pedido.
#[derive(Default)]
pub struct FakeExecutor {
    pub calls: Mutex<Vec<String>>,
    pub failing: Mutex<HashSet<String>>,
    pub fail_all: Mutex<bool>,
}

impl FakeExecutor {
    pub fn fail_for(&self, campaign_id: &str) {
        self.failing.lock().unwrap().insert(campaign_id.to_string());
    }

    pub fn fail_everything(&self) {
        *self.fail_all.lock().unwrap() = true;
    }

    pub fn calls_for(&self, campaign_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == campaign_id)
            .count()
    }
}

#[async_trait]
impl BatchExecutor for FakeExecutor {
    async fn process_batch(&self, campaign_id: &str) -> Result<Value> {
        self.calls.lock().unwrap().push(campaign_id.to_string());
        if *self.fail_all.lock().unwrap() || self.failing.lock().unwrap().contains(campaign_id) {
            return Err(anyhow!("executor unavailable"));
        }
        Ok(json!({ "success": true, "campaign_id": campaign_id, "sent": 0 }))
    }
}

/// Sender que guarda los mensajes; falla para las direcciones marcadas.
#[derive(Default)]
pub struct FakeSender {
    pub sent: Mutex<Vec<OutboundMessage>>,
    pub failing: Mutex<HashSet<String>>,
    pub without_id: Mutex<HashSet<String>>,
}

impl FakeSender {
    pub fn fail_for(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    /// El proveedor acepta el envío pero no devuelve id.
    pub fn no_id_for(&self, address: &str) {
        self.without_id.lock().unwrap().insert(address.to_string());
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelSender for FakeSender {
    async fn send(&self, message: &OutboundMessage) -> Result<Option<String>> {
        let address = message
            .to_email
            .clone()
            .or_else(|| message.to_phone.clone())
            .unwrap_or_default();
        if self.failing.lock().unwrap().contains(&address) {
            return Err(anyhow!("provider rejected {}", address));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        if self.without_id.lock().unwrap().contains(&address) {
            return Ok(None);
        }
        Ok(Some(format!("msg-{}", sent.len())))
    }
}

// ----------------------------------------------------------------
// Servicios armados sobre la base de prueba
// ----------------------------------------------------------------

pub struct TestServices {
    pub config: AppConfig,
    pub campaign: CampaignService,
    pub executor: CampaignExecutorService,
    pub dispatch: DispatchService,
    pub scheduler: SchedulerService,
    pub status: StatusUpdateService,
    pub company: CompanyService,
    pub portal: PortalService,
    pub fake_executor: Arc<FakeExecutor>,
    pub fake_sender: Arc<FakeSender>,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        site_url: SITE_URL.to_string(),
        meta_verify_token: Some("verify-me".to_string()),
        ..AppConfig::default()
    }
}

/// El scheduler usa `FakeExecutor`; el executor real usa `FakeSender`.
pub fn build_services(pool: &Pool<Sqlite>, config: AppConfig) -> TestServices {
    let fake_executor = Arc::new(FakeExecutor::default());
    let fake_sender = Arc::new(FakeSender::default());

    let campaign = CampaignService::new(pool.clone());
    let executor = CampaignExecutorService::new(
        campaign.clone(),
        fake_sender.clone(),
        config.site_url.clone(),
    );
    let dispatch = DispatchService::new(pool.clone(), fake_executor.clone());
    let scheduler = SchedulerService::new(campaign.clone(), dispatch.clone());

    TestServices {
        config,
        campaign,
        executor,
        dispatch,
        scheduler,
        status: StatusUpdateService::new(pool.clone()),
        company: CompanyService::new(pool.clone()),
        portal: PortalService::new(pool.clone()),
        fake_executor,
        fake_sender,
    }
}

/// Levanta la app completa con los servicios de prueba.
macro_rules! test_app {
    ($svc:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new($svc.config.clone()))
                .app_data(actix_web::web::Data::new($svc.campaign.clone()))
                .app_data(actix_web::web::Data::new($svc.executor.clone()))
                .app_data(actix_web::web::Data::new($svc.scheduler.clone()))
                .app_data(actix_web::web::Data::new($svc.status.clone()))
                .app_data(actix_web::web::Data::new($svc.company.clone()))
                .app_data(actix_web::web::Data::new($svc.portal.clone()))
                .configure(crate::app::init_app),
        )
        .await
    };
}

// ----------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------

pub fn minutes_from_now(minutes: i64) -> String {
    db_timestamp(Utc::now() + Duration::minutes(minutes))
}

pub async fn insert_company(pool: &Pool<Sqlite>, name: &str, secret: Option<&str>) -> String {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO companies (id, name, portal_webhook_secret, created_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(&id)
    .bind(name)
    .bind(secret)
    .bind(now_timestamp())
    .execute(pool)
    .await
    .expect("insert company");
    id
}

pub async fn insert_profile(
    pool: &Pool<Sqlite>,
    email: Option<&str>,
    full_name: Option<&str>,
    company_id: Option<&str>,
) -> String {
    let id = Uuid::new_v4().to_string();
    let now = now_timestamp();
    sqlx::query(
        r#"
        INSERT INTO profiles (id, email, full_name, company_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?5)
        "#,
    )
    .bind(&id)
    .bind(email)
    .bind(full_name)
    .bind(company_id)
    .bind(&now)
    .execute(pool)
    .await
    .expect("insert profile");
    id
}

pub async fn insert_campaign(
    pool: &Pool<Sqlite>,
    company_id: &str,
    channel: &str,
    status: &str,
    scheduled_at: &str,
    body: &str,
) -> String {
    let id = Uuid::new_v4().to_string();
    let now = now_timestamp();
    let started_at = if status == "sending" { Some(now.clone()) } else { None };
    sqlx::query(
        r#"
        INSERT INTO campaigns (
            id, company_id, name, channel, subject, body, status,
            scheduled_at, started_at, created_at, updated_at
        )
        VALUES (?1, ?2, 'Test campaign', ?3, 'Hello', ?4, ?5, ?6, ?7, ?8, ?8)
        "#,
    )
    .bind(&id)
    .bind(company_id)
    .bind(channel)
    .bind(body)
    .bind(status)
    .bind(scheduled_at)
    .bind(started_at)
    .bind(&now)
    .execute(pool)
    .await
    .expect("insert campaign");
    id
}

pub struct RecipientFixture<'a> {
    pub name: Option<&'a str>,
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub status: &'a str,
    pub provider_message_id: Option<&'a str>,
}

impl Default for RecipientFixture<'_> {
    fn default() -> Self {
        RecipientFixture {
            name: None,
            email: None,
            phone: None,
            status: "queued",
            provider_message_id: None,
        }
    }
}

pub async fn insert_recipient(pool: &Pool<Sqlite>, campaign_id: &str, r: RecipientFixture<'_>) -> String {
    let id = Uuid::new_v4().to_string();
    let now = now_timestamp();
    sqlx::query(
        r#"
        INSERT INTO campaign_recipients (
            id, campaign_id, name, email, phone, delivery_status,
            provider_message_id, created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
        "#,
    )
    .bind(&id)
    .bind(campaign_id)
    .bind(r.name)
    .bind(r.email)
    .bind(r.phone)
    .bind(r.status)
    .bind(r.provider_message_id)
    .bind(&now)
    .execute(pool)
    .await
    .expect("insert recipient");
    id
}

// ----------------------------------------------------------------
// Lecturas
// ----------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
pub struct RecipientRow {
    pub delivery_status: String,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub sent_at: Option<String>,
    pub delivered_at: Option<String>,
    pub read_at: Option<String>,
}

pub async fn recipient_row(pool: &Pool<Sqlite>, recipient_id: &str) -> RecipientRow {
    sqlx::query_as::<_, RecipientRow>(
        r#"
        SELECT delivery_status, provider_message_id, error_message, error_code,
               sent_at, delivered_at, read_at
        FROM campaign_recipients WHERE id = ?1
        "#,
    )
    .bind(recipient_id)
    .fetch_one(pool)
    .await
    .expect("select recipient")
}

pub async fn campaign_status(pool: &Pool<Sqlite>, campaign_id: &str) -> (String, Option<String>) {
    sqlx::query_as::<_, (String, Option<String>)>(
        "SELECT status, error_message FROM campaigns WHERE id = ?1",
    )
    .bind(campaign_id)
    .fetch_one(pool)
    .await
    .expect("select campaign")
}

pub async fn log_actions(pool: &Pool<Sqlite>, campaign_id: &str) -> Vec<String> {
    sqlx::query_as::<_, (String,)>(
        "SELECT action FROM campaign_logs WHERE campaign_id = ?1 ORDER BY created_at, rowid",
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await
    .expect("select logs")
    .into_iter()
    .map(|(a,)| a)
    .collect()
}

#[derive(Debug, sqlx::FromRow)]
pub struct AuditRow {
    pub company_id: String,
    pub provider: String,
    pub message_id: Option<String>,
    pub processed: bool,
    pub error_message: Option<String>,
}

pub async fn audit_rows(pool: &Pool<Sqlite>) -> Vec<AuditRow> {
    sqlx::query_as::<_, AuditRow>(
        r#"
        SELECT company_id, provider, message_id, processed, error_message
        FROM marketing_webhooks ORDER BY created_at, rowid
        "#,
    )
    .fetch_all(pool)
    .await
    .expect("select audits")
}

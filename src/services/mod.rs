//! services/mod.rs
//! Módulo que agrupa los servicios (capa de negocio) de la app.

pub mod batch_executor;
pub mod campaign_executor_service;
pub mod campaign_service;
pub mod channel_sender;
pub mod company_service;
pub mod dispatch_service;
pub mod portal_service;
pub mod scheduler_service;
pub mod status_update_service;
pub mod webhook_normalizer;

//! models/mod.rs
//! Módulo raíz para modelos/estructuras compartidas.

use chrono::{DateTime, SecondsFormat, Utc};

pub mod campaign_model;
pub mod company_model;
pub mod portal_model;
pub mod webhook_model;

/// Formato único de timestamps en DB: RFC 3339, segundos, sufijo `Z`.
/// Así la comparación de texto en SQL coincide con la cronológica.
pub fn db_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn now_timestamp() -> String {
    db_timestamp(Utc::now())
}

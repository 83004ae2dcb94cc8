//! models/portal_model.rs
//! Leads entrantes desde portales inmobiliarios.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PORTAL_SOURCE: &str = "property_finder";

#[derive(Debug, Clone, Deserialize)]
pub struct PortalQuery {
    pub company_id: Option<String>,
}

/// Lead ya extraído del payload del portal.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalLead {
    pub source: String,
    pub external_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub message: Option<String>,
    pub property_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortalIngestResult {
    pub success: bool,
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
    pub message: String,
}

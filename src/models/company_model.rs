//! models/company_model.rs

use serde::{Deserialize, Serialize};

pub const OWNER_ROLE: &str = "admin";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CompanyRecord {
    pub id: String,
    pub name: String,
    pub created_by: Option<String>,
    pub portal_webhook_secret: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProfileRecord {
    pub id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub company_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionCompanyRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionCompanyResponse {
    pub success: bool,
    pub company_id: String,
    /// `false` cuando el usuario ya tenía compañía (o la creó otra petición).
    pub created: bool,
    pub role: String,
}

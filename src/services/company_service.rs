//! services/company_service.rs
//! Aprovisionamiento automático de la compañía (tenant) de un usuario.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::models::{
    company_model::{CompanyRecord, ProfileRecord, ProvisionCompanyResponse, OWNER_ROLE},
    now_timestamp,
};

const FALLBACK_COMPANY_NAME: &str = "My Company";

enum InsertCompany {
    Created,
    NameTaken,
    /// Ya existe una compañía creada por este usuario.
    OwnerTaken,
}

#[derive(Clone, Debug)]
pub struct CompanyService {
    db_pool: Pool<Sqlite>,
}

impl CompanyService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        CompanyService { db_pool }
    }

    pub async fn find_profile(&self, user_id: &str) -> Result<Option<ProfileRecord>> {
        sqlx::query_as::<_, ProfileRecord>(
            "SELECT id, email, full_name, company_id FROM profiles WHERE id = ?1",
        )
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Fallo al consultar perfil")
    }

    pub async fn find_company(&self, company_id: &str) -> Result<Option<CompanyRecord>> {
        sqlx::query_as::<_, CompanyRecord>(
            r#"
            SELECT id, name, created_by, portal_webhook_secret, created_at
            FROM companies
            WHERE id = ?1
            "#,
        )
        .bind(company_id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Fallo al consultar compañía")
    }

    async fn find_company_created_by(&self, user_id: &str) -> Result<Option<CompanyRecord>> {
        sqlx::query_as::<_, CompanyRecord>(
            r#"
            SELECT id, name, created_by, portal_webhook_secret, created_at
            FROM companies
            WHERE created_by = ?1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Fallo al consultar compañía del usuario")
    }

    /// Garantiza que el usuario tenga exactamente una compañía.
    ///
    /// No usa candados en proceso: la unicidad la dan el índice único sobre
    /// `companies.created_by` y el `UPDATE ... WHERE company_id IS NULL` del
    /// perfil, así que dos llamadas concurrentes (en el mismo proceso o no)
    /// terminan con la misma compañía.
    /// Devuelve `None` si el perfil no existe.
    pub async fn ensure_company(&self, user_id: &str) -> Result<Option<ProvisionCompanyResponse>> {
        // Releer el perfil; el cliente puede tener datos viejos.
        let Some(profile) = self.find_profile(user_id).await? else {
            return Ok(None);
        };

        if let Some(company_id) = profile.company_id.clone() {
            log::info!("(ensure_company) Usuario {} ya tiene compañía {}", user_id, company_id);
            self.grant_owner_role(user_id, &company_id).await?;
            return Ok(Some(ProvisionCompanyResponse {
                success: true,
                company_id,
                created: false,
                role: OWNER_ROLE.to_string(),
            }));
        }

        let base_name = company_name_for(&profile);
        let candidate_id = Uuid::new_v4().to_string();

        let mut outcome = self.insert_company(&candidate_id, &base_name, user_id).await?;
        if let InsertCompany::NameTaken = outcome {
            let suffixed = format!("{} {}", base_name, Utc::now().timestamp());
            log::info!(
                "(ensure_company) Nombre '{}' ocupado, reintentando como '{}'",
                base_name,
                suffixed
            );
            outcome = self.insert_company(&candidate_id, &suffixed, user_id).await?;
        }

        let (company_id, mut created) = match outcome {
            InsertCompany::Created => (candidate_id, true),
            InsertCompany::OwnerTaken => {
                let existing = self
                    .find_company_created_by(user_id)
                    .await?
                    .ok_or_else(|| anyhow!("Compañía de {} desapareció", user_id))?;
                log::info!(
                    "(ensure_company) Otra petición ya creó la compañía {} para {}",
                    existing.id,
                    user_id
                );
                (existing.id, false)
            }
            InsertCompany::NameTaken => {
                return Err(anyhow!(
                    "No se pudo crear compañía '{}' para {}: nombre en uso",
                    base_name,
                    user_id
                ));
            }
        };

        let company_id = if self.attach_company(user_id, &company_id).await? {
            company_id
        } else {
            // El perfil ya tenía compañía cuando llegamos al UPDATE.
            created = false;
            self.find_profile(user_id)
                .await?
                .and_then(|p| p.company_id)
                .ok_or_else(|| anyhow!("Perfil {} sin compañía tras adjuntar", user_id))?
        };

        self.grant_owner_role(user_id, &company_id).await?;

        log::info!(
            "(ensure_company) Usuario {} -> compañía {} (creada={})",
            user_id,
            company_id,
            created
        );
        Ok(Some(ProvisionCompanyResponse {
            success: true,
            company_id,
            created,
            role: OWNER_ROLE.to_string(),
        }))
    }

    async fn insert_company(&self, company_id: &str, name: &str, user_id: &str) -> Result<InsertCompany> {
        let result = sqlx::query(
            r#"
            INSERT INTO companies (id, name, created_by, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(company_id)
        .bind(name)
        .bind(user_id)
        .bind(now_timestamp())
        .execute(&self.db_pool)
        .await;

        match result {
            Ok(_) => Ok(InsertCompany::Created),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                if db_err.message().contains("companies.created_by") {
                    Ok(InsertCompany::OwnerTaken)
                } else {
                    Ok(InsertCompany::NameTaken)
                }
            }
            Err(e) => Err(e).context("Fallo al insertar compañía"),
        }
    }

    async fn attach_company(&self, user_id: &str, company_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET company_id = ?2, updated_at = ?3
            WHERE id = ?1 AND company_id IS NULL
            "#,
        )
        .bind(user_id)
        .bind(company_id)
        .bind(now_timestamp())
        .execute(&self.db_pool)
        .await
        .context("Fallo al asociar compañía al perfil")?;
        Ok(result.rows_affected() == 1)
    }

    async fn grant_owner_role(&self, user_id: &str, company_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, company_id, role, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (user_id, company_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(company_id)
        .bind(OWNER_ROLE)
        .bind(now_timestamp())
        .execute(&self.db_pool)
        .await
        .context("Fallo al asignar rol")?;
        Ok(())
    }
}

/// Nombre determinístico: nombre visible, si no la parte local del email.
pub fn company_name_for(profile: &ProfileRecord) -> String {
    let from_name = profile
        .full_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|n| format!("{}'s Company", n));

    let from_email = || {
        profile
            .email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .map(str::trim)
            .filter(|local| !local.is_empty())
            .map(|local| format!("{}'s Company", local))
    };

    from_name
        .or_else(from_email)
        .unwrap_or_else(|| FALLBACK_COMPANY_NAME.to_string())
}

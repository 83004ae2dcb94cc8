//! config/app_config.rs
//! Configuración global del servicio, leída de variables de entorno (.env).

use std::env;

/// Credenciales SMTP para el canal email.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from: String,
}

/// Sesión de la API de WhatsApp (mismo gateway HTTP que usa el canal whatsapp).
#[derive(Debug, Clone)]
pub struct WhatsAppApiConfig {
    pub base_url: String,
    pub session_id: String,
}

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_address: String,
    pub port: u16,
    /// Credencial privilegiada; se envía como bearer al executor remoto.
    pub service_role_key: Option<String>,
    /// Si no está definida, el scheduler invoca el executor en proceso.
    pub executor_url: Option<String>,
    pub meta_verify_token: Option<String>,
    /// URL pública del sitio, para links (p.e. baja de suscripción).
    pub site_url: String,
    pub smtp: Option<SmtpConfig>,
    pub whatsapp: Option<WhatsAppApiConfig>,
    pub twilio: Option<TwilioConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_url: "sqlite:data/crm.db".to_string(),
            bind_address: "0.0.0.0".to_string(),
            port: 5022,
            service_role_key: None,
            executor_url: None,
            meta_verify_token: None,
            site_url: "http://localhost:5022".to_string(),
            smtp: None,
            whatsapp: None,
            twilio: None,
        }
    }
}

impl AppConfig {
    /// Construye la configuración desde el entorno. Las variables vacías
    /// se tratan como no definidas.
    pub fn from_env() -> Self {
        let defaults = AppConfig::default();

        let port = non_empty("PORT")
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(defaults.port);

        let smtp = match (non_empty("SMTP_HOST"), non_empty("SMTP_USER"), non_empty("SMTP_PASS")) {
            (Some(host), Some(user), Some(pass)) => Some(SmtpConfig {
                host,
                port: non_empty("SMTP_PORT")
                    .and_then(|p| p.parse::<u16>().ok())
                    .unwrap_or(587),
                from: non_empty("EMAIL_FROM").unwrap_or_else(|| user.clone()),
                user,
                pass,
            }),
            _ => None,
        };

        let whatsapp = match (non_empty("WHATSAPP_API_URL"), non_empty("WHATSAPP_API_SESSION_ID")) {
            (Some(base_url), Some(session_id)) => Some(WhatsAppApiConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                session_id,
            }),
            _ => None,
        };

        let twilio = match (
            non_empty("TWILIO_ACCOUNT_SID"),
            non_empty("TWILIO_AUTH_TOKEN"),
            non_empty("TWILIO_FROM_NUMBER"),
        ) {
            (Some(account_sid), Some(auth_token), Some(from_number)) => Some(TwilioConfig {
                account_sid,
                auth_token,
                from_number,
            }),
            _ => None,
        };

        AppConfig {
            database_url: non_empty("DATABASE_URL").unwrap_or(defaults.database_url),
            bind_address: non_empty("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            port,
            service_role_key: non_empty("SERVICE_ROLE_KEY"),
            executor_url: non_empty("EXECUTOR_URL"),
            meta_verify_token: non_empty("META_VERIFY_TOKEN"),
            site_url: non_empty("SITE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.site_url),
            smtp,
            whatsapp,
            twilio,
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

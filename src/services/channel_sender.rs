//! services/channel_sender.rs
//! Envío real de un mensaje por canal (email, WhatsApp, SMS).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, SinglePart},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use reqwest::Client;
use uuid::Uuid;

use crate::{
    config::app_config::{AppConfig, SmtpConfig, TwilioConfig, WhatsAppApiConfig},
    models::campaign_model::Channel,
};

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub channel: Channel,
    pub to_name: Option<String>,
    pub to_email: Option<String>,
    pub to_phone: Option<String>,
    pub subject: Option<String>,
    pub body: String,
}

#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Envía el mensaje y devuelve el id que el proveedor usará en sus webhooks,
    /// `None` si el proveedor no devolvió ninguno.
    async fn send(&self, message: &OutboundMessage) -> Result<Option<String>>;
}

/// Sender que usa los proveedores configurados en el entorno.
#[derive(Clone)]
pub struct ProviderChannelSender {
    http_client: Client,
    smtp: Option<SmtpConfig>,
    whatsapp: Option<WhatsAppApiConfig>,
    twilio: Option<TwilioConfig>,
}

impl ProviderChannelSender {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            http_client: Client::new(),
            smtp: config.smtp.clone(),
            whatsapp: config.whatsapp.clone(),
            twilio: config.twilio.clone(),
        }
    }

    async fn send_email(&self, msg: &OutboundMessage) -> Result<Option<String>> {
        let smtp = self
            .smtp
            .as_ref()
            .ok_or_else(|| anyhow!("SMTP no configurado para canal email"))?;
        let to_addr = msg
            .to_email
            .as_deref()
            .ok_or_else(|| anyhow!("Destinatario sin email"))?;

        let from = smtp.from.parse::<Mailbox>().context("Invalid from address")?;
        let to = match &msg.to_name {
            Some(name) => format!("{} <{}>", name, to_addr).parse::<Mailbox>(),
            None => to_addr.parse::<Mailbox>(),
        }
        .context("Invalid recipient address")?;

        let domain = smtp.from.rsplit('@').next().unwrap_or("localhost").trim_end_matches('>');
        let message_id = format!("{}@{}", Uuid::new_v4(), domain);

        let html_part = SinglePart::builder()
            .header(ContentType::parse("text/html; charset=utf-8")?)
            .body(msg.body.clone());

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(msg.subject.clone().unwrap_or_default())
            .message_id(Some(format!("<{}>", message_id)))
            .singlepart(html_part)?;

        let tls_params = TlsParameters::new(smtp.host.clone())?;
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)?
            .port(smtp.port)
            .credentials(Credentials::new(smtp.user.clone(), smtp.pass.clone()))
            .tls(Tls::Required(tls_params))
            .build();

        tokio::time::timeout(SMTP_TIMEOUT, mailer.send(email))
            .await
            .context("Timeout enviando email")??;

        Ok(Some(message_id))
    }

    async fn send_whatsapp(&self, msg: &OutboundMessage) -> Result<Option<String>> {
        let wa = self
            .whatsapp
            .as_ref()
            .ok_or_else(|| anyhow!("No se definió WHATSAPP_API_URL / WHATSAPP_API_SESSION_ID"))?;
        let phone = msg
            .to_phone
            .as_deref()
            .ok_or_else(|| anyhow!("Destinatario sin teléfono"))?;

        let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        let chat_id = format!("{}@c.us", digits);
        let send_url = format!("{}/client/sendMessage/{}", wa.base_url, wa.session_id);
        let payload = serde_json::json!({
            "chatId": chat_id,
            "contentType": "string",
            "content": msg.body
        });

        let r = self
            .http_client
            .post(&send_url)
            .json(&payload)
            .send()
            .await
            .context("Fallo al POST sendMessage")?;

        if !r.status().is_success() {
            let e = r.text().await.unwrap_or_default();
            return Err(anyhow!("Fallo al enviar texto WhatsApp: {}", e));
        }

        let json_val = r.json::<serde_json::Value>().await.unwrap_or_default();
        let message_id = json_val
            .pointer("/message/id/_serialized")
            .or_else(|| json_val.pointer("/messages/0/id"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        if message_id.is_none() {
            log::warn!("(send_whatsapp) Respuesta sin id de mensaje para {}", chat_id);
        }
        Ok(message_id)
    }

    async fn send_sms(&self, msg: &OutboundMessage) -> Result<Option<String>> {
        let twilio = self
            .twilio
            .as_ref()
            .ok_or_else(|| anyhow!("Twilio no configurado para canal sms"))?;
        let phone = msg
            .to_phone
            .as_deref()
            .ok_or_else(|| anyhow!("Destinatario sin teléfono"))?;

        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            twilio.account_sid
        );
        let r = self
            .http_client
            .post(&url)
            .basic_auth(&twilio.account_sid, Some(&twilio.auth_token))
            .form(&[
                ("To", phone),
                ("From", twilio.from_number.as_str()),
                ("Body", msg.body.as_str()),
            ])
            .send()
            .await
            .context("Fallo al POST a Twilio")?;

        if !r.status().is_success() {
            let e = r.text().await.unwrap_or_default();
            return Err(anyhow!("Twilio rechazó el SMS: {}", e));
        }

        let json_val = r.json::<serde_json::Value>().await?;
        json_val
            .get("sid")
            .and_then(|v| v.as_str())
            .map(|sid| Some(sid.to_string()))
            .ok_or_else(|| anyhow!("Respuesta de Twilio sin sid"))
    }
}

#[async_trait]
impl ChannelSender for ProviderChannelSender {
    async fn send(&self, message: &OutboundMessage) -> Result<Option<String>> {
        match message.channel {
            Channel::Email => self.send_email(message).await,
            Channel::Whatsapp => self.send_whatsapp(message).await,
            Channel::Sms => self.send_sms(message).await,
        }
    }
}

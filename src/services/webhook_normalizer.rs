//! services/webhook_normalizer.rs
//! Convierte los payloads de cada proveedor en `WebhookUpdate` canónicos.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::models::{
    campaign_model::DeliveryStatus,
    db_timestamp, now_timestamp,
    webhook_model::{NormalizeOutcome, Provider, WebhookUpdate},
};

/// Decodifica el body crudo. Twilio manda `application/x-www-form-urlencoded`;
/// el resto JSON. Un body que no es ninguna de las dos cosas es un error.
pub fn decode_body(provider: &Provider, body: &[u8], is_form: bool) -> Result<Value> {
    if is_form || (*provider == Provider::Twilio && !looks_like_json(body)) {
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_bytes(body).context("Body form-urlencoded inválido")?;
        let map: Map<String, Value> = pairs
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        return Ok(Value::Object(map));
    }
    serde_json::from_slice(body).context("Body JSON inválido")
}

fn looks_like_json(body: &[u8]) -> bool {
    body.iter()
        .find(|b| !b.is_ascii_whitespace())
        .map(|b| *b == b'{' || *b == b'[')
        .unwrap_or(false)
}

/// Normaliza un payload ya decodificado.
pub fn normalize(provider: &Provider, payload: &Value, company_id: Option<&str>) -> NormalizeOutcome {
    let outcome = match provider {
        Provider::Meta => parse_meta(payload),
        Provider::Twilio => parse_twilio(payload),
        Provider::SendGrid => parse_sendgrid(payload),
        Provider::MessageBird => parse_messagebird(payload),
        Provider::Resend => parse_resend(payload),
        Provider::Unknown(name) => {
            log::warn!("(normalize) Proveedor desconocido '{}', se ignora el payload", name);
            return NormalizeOutcome::Unrecognized {
                reason: format!("unknown provider: {}", name),
            };
        }
    };

    match outcome {
        NormalizeOutcome::Updates(mut updates) => {
            if let Some(company) = company_id {
                for u in updates.iter_mut() {
                    u.company_id.get_or_insert_with(|| company.to_string());
                }
            }
            NormalizeOutcome::Updates(updates)
        }
        other => other,
    }
}

fn unrecognized(provider: &str, reason: &str) -> NormalizeOutcome {
    log::warn!("(normalize) Payload de {} no reconocido: {}", provider, reason);
    NormalizeOutcome::Unrecognized {
        reason: format!("{}: {}", provider, reason),
    }
}

// ----------------------------------------------------------------
// Meta (WhatsApp Cloud API)
// ----------------------------------------------------------------
fn parse_meta(payload: &Value) -> NormalizeOutcome {
    let Some(entries) = payload.get("entry").and_then(Value::as_array) else {
        return unrecognized("meta", "missing entry[]");
    };

    let mut updates = vec![];
    for entry in entries {
        let changes = entry
            .get("changes")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for change in changes {
            let statuses = change
                .pointer("/value/statuses")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for st in statuses {
                let Some(message_id) = str_field(st, "id") else {
                    continue;
                };
                let Some(status) = str_field(st, "status").and_then(|s| map_meta_status(&s)) else {
                    continue;
                };
                let first_error = st.pointer("/errors/0");
                updates.push(WebhookUpdate {
                    message_id,
                    status,
                    timestamp: unix_or_now(st.get("timestamp")),
                    error_message: first_error.and_then(|e| {
                        str_field(e, "message")
                            .or_else(|| str_field(e, "title"))
                            .or_else(|| e.pointer("/error_data/details").and_then(as_string))
                    }),
                    error_code: first_error.and_then(|e| e.get("code")).and_then(as_string),
                    recipient_phone: str_field(st, "recipient_id"),
                    recipient_email: None,
                    company_id: None,
                });
            }
        }
    }
    NormalizeOutcome::Updates(updates)
}

fn map_meta_status(status: &str) -> Option<DeliveryStatus> {
    match status {
        "sent" => Some(DeliveryStatus::Sent),
        "delivered" => Some(DeliveryStatus::Delivered),
        "read" => Some(DeliveryStatus::Read),
        "failed" => Some(DeliveryStatus::Failed),
        _ => None,
    }
}

// ----------------------------------------------------------------
// Twilio
// ----------------------------------------------------------------
fn parse_twilio(payload: &Value) -> NormalizeOutcome {
    let message_id = str_field(payload, "MessageSid").or_else(|| str_field(payload, "SmsSid"));
    let raw_status = str_field(payload, "MessageStatus").or_else(|| str_field(payload, "SmsStatus"));

    let (Some(message_id), Some(raw_status)) = (message_id, raw_status) else {
        return unrecognized("twilio", "missing MessageSid/MessageStatus");
    };

    let status = match raw_status.to_ascii_lowercase().as_str() {
        "queued" | "accepted" | "scheduled" | "sending" => DeliveryStatus::Queued,
        "sent" => DeliveryStatus::Sent,
        "delivered" => DeliveryStatus::Delivered,
        "read" => DeliveryStatus::Read,
        "undelivered" | "failed" => DeliveryStatus::Failed,
        other => {
            log::info!("(parse_twilio) Estado '{}' ignorado", other);
            return NormalizeOutcome::Updates(vec![]);
        }
    };

    NormalizeOutcome::Updates(vec![WebhookUpdate {
        message_id,
        status,
        timestamp: now_timestamp(),
        error_message: str_field(payload, "ErrorMessage"),
        error_code: payload.get("ErrorCode").and_then(as_string),
        recipient_phone: str_field(payload, "To"),
        recipient_email: None,
        company_id: None,
    }])
}

// ----------------------------------------------------------------
// SendGrid (array de eventos)
// ----------------------------------------------------------------
fn parse_sendgrid(payload: &Value) -> NormalizeOutcome {
    let Some(events) = payload.as_array() else {
        return unrecognized("sendgrid", "expected an array of events");
    };

    let mut updates = vec![];
    for ev in events {
        let Some(message_id) = sendgrid_message_id(ev) else {
            continue;
        };
        let status = match str_field(ev, "event").as_deref() {
            Some("processed") => DeliveryStatus::Sent,
            Some("delivered") => DeliveryStatus::Delivered,
            Some("open") | Some("click") => DeliveryStatus::Read,
            Some("bounce") => DeliveryStatus::Bounced,
            Some("dropped") => DeliveryStatus::Failed,
            _ => continue,
        };
        let error_message = if status.is_terminal() {
            str_field(ev, "reason").or_else(|| str_field(ev, "type"))
        } else {
            None
        };
        updates.push(WebhookUpdate {
            message_id,
            status,
            timestamp: unix_or_now(ev.get("timestamp")),
            error_message,
            error_code: if status.is_terminal() {
                ev.get("status").and_then(as_string)
            } else {
                None
            },
            recipient_phone: None,
            recipient_email: str_field(ev, "email"),
            company_id: None,
        });
    }
    NormalizeOutcome::Updates(updates)
}

/// `smtp-id` trae el Message-ID que pusimos al enviar; si falta se usa
/// `sg_message_id` sin el sufijo ".filterXXXX".
fn sendgrid_message_id(ev: &Value) -> Option<String> {
    let from_smtp = str_field(ev, "smtp-id")
        .map(|id| id.trim_start_matches('<').trim_end_matches('>').trim().to_string())
        .filter(|id| !id.is_empty());

    from_smtp.or_else(|| {
        str_field(ev, "sg_message_id")
            .map(|raw| match raw.find(".filter") {
                Some(idx) => raw[..idx].to_string(),
                None => raw,
            })
            .filter(|id| !id.is_empty())
    })
}

// ----------------------------------------------------------------
// MessageBird (conversations o reporte SMS plano)
// ----------------------------------------------------------------
fn parse_messagebird(payload: &Value) -> NormalizeOutcome {
    let (source, phone_key, time_key) = match payload.get("message") {
        Some(msg) if msg.is_object() => (msg, "to", "updatedDatetime"),
        _ => (payload, "recipient", "statusDatetime"),
    };

    let (Some(message_id), Some(raw_status)) = (str_field(source, "id"), str_field(source, "status"))
    else {
        return unrecognized("messagebird", "missing id/status");
    };

    let status = match raw_status.to_ascii_lowercase().as_str() {
        "buffered" | "pending" | "accepted" => DeliveryStatus::Queued,
        "sent" => DeliveryStatus::Sent,
        "delivered" => DeliveryStatus::Delivered,
        "read" => DeliveryStatus::Read,
        "delivery_failed" | "failed" | "expired" | "rejected" => DeliveryStatus::Failed,
        other => {
            log::info!("(parse_messagebird) Estado '{}' ignorado", other);
            return NormalizeOutcome::Updates(vec![]);
        }
    };

    let error_code = source
        .get("statusErrorCode")
        .or_else(|| source.pointer("/error/code"))
        .and_then(as_string);
    let error_message = source.pointer("/error/description").and_then(as_string).or_else(|| {
        if status.is_terminal() {
            Some(format!("MessageBird status: {}", raw_status))
        } else {
            None
        }
    });

    NormalizeOutcome::Updates(vec![WebhookUpdate {
        message_id,
        status,
        timestamp: iso_or_now(source.get(time_key)),
        error_message,
        error_code,
        recipient_phone: source.get(phone_key).and_then(as_string),
        recipient_email: None,
        company_id: None,
    }])
}

// ----------------------------------------------------------------
// Resend
// ----------------------------------------------------------------
fn parse_resend(payload: &Value) -> NormalizeOutcome {
    let (Some(event_type), Some(data)) = (str_field(payload, "type"), payload.get("data")) else {
        return unrecognized("resend", "missing type/data");
    };
    let Some(message_id) = str_field(data, "email_id") else {
        return unrecognized("resend", "missing data.email_id");
    };

    let status = match event_type.as_str() {
        "email.sent" => DeliveryStatus::Sent,
        "email.delivered" => DeliveryStatus::Delivered,
        "email.opened" | "email.clicked" => DeliveryStatus::Read,
        "email.bounced" => DeliveryStatus::Bounced,
        "email.complained" => DeliveryStatus::Failed,
        other => {
            log::info!("(parse_resend) Evento '{}' ignorado", other);
            return NormalizeOutcome::Updates(vec![]);
        }
    };

    let recipient_email = match data.get("to") {
        Some(Value::Array(list)) => list.first().and_then(as_string),
        Some(other) => as_string(other),
        None => None,
    };
    let error_message = match status {
        DeliveryStatus::Bounced => data
            .pointer("/bounce/message")
            .and_then(as_string)
            .or_else(|| Some("Email bounced".to_string())),
        DeliveryStatus::Failed => Some("Recipient marked the email as spam".to_string()),
        _ => None,
    };

    NormalizeOutcome::Updates(vec![WebhookUpdate {
        message_id,
        status,
        timestamp: iso_or_now(payload.get("created_at")),
        error_message,
        error_code: data.pointer("/bounce/type").and_then(as_string),
        recipient_phone: None,
        recipient_email,
        company_id: None,
    }])
}

// ----------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------
fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(as_string)
}

/// Acepta strings no vacíos y números.
fn as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn unix_or_now(v: Option<&Value>) -> String {
    let secs = match v {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    secs.and_then(|s| Utc.timestamp_opt(s, 0).single())
        .map(db_timestamp)
        .unwrap_or_else(now_timestamp)
}

fn iso_or_now(v: Option<&Value>) -> String {
    v.and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| db_timestamp(dt.with_timezone(&Utc)))
        .unwrap_or_else(now_timestamp)
}

//! tests/normalizer_tests.rs
//! Normalización de payloads de proveedores y reglas de transición.

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::models::campaign_model::DeliveryStatus;
    use crate::models::webhook_model::{NormalizeOutcome, Provider, WebhookUpdate};
    use crate::services::webhook_normalizer::{decode_body, normalize};

    fn updates(outcome: NormalizeOutcome) -> Vec<WebhookUpdate> {
        match outcome {
            NormalizeOutcome::Updates(u) => u,
            NormalizeOutcome::Unrecognized { reason } => panic!("payload no reconocido: {}", reason),
        }
    }

    #[test]
    fn test_provider_from_query() {
        assert_eq!(Provider::from_query(None), Provider::Meta);
        assert_eq!(Provider::from_query(Some("")), Provider::Meta);
        assert_eq!(Provider::from_query(Some("Twilio")), Provider::Twilio);
        assert_eq!(Provider::from_query(Some("sendgrid")), Provider::SendGrid);
        assert_eq!(Provider::from_query(Some("messagebird")), Provider::MessageBird);
        assert_eq!(Provider::from_query(Some("resend")), Provider::Resend);
        assert_eq!(
            Provider::from_query(Some("mailgun")),
            Provider::Unknown("mailgun".to_string())
        );
    }

    #[test]
    fn test_meta_statuses() {
        let payload = json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "123",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "statuses": [
                            {
                                "id": "wamid.A",
                                "status": "delivered",
                                "timestamp": "1700000000",
                                "recipient_id": "5215551234567"
                            },
                            {
                                "id": "wamid.B",
                                "status": "failed",
                                "timestamp": "1700000100",
                                "recipient_id": "5215550000000",
                                "errors": [{ "code": 131026, "title": "Message undeliverable" }]
                            }
                        ]
                    }
                }]
            }]
        });

        let list = updates(normalize(&Provider::Meta, &payload, Some("company-1")));
        assert_eq!(list.len(), 2);

        assert_eq!(list[0].message_id, "wamid.A");
        assert_eq!(list[0].status, DeliveryStatus::Delivered);
        assert_eq!(list[0].timestamp, "2023-11-14T22:13:20Z");
        assert_eq!(list[0].recipient_phone.as_deref(), Some("5215551234567"));
        assert_eq!(list[0].company_id.as_deref(), Some("company-1"));
        assert!(list[0].error_code.is_none());

        assert_eq!(list[1].status, DeliveryStatus::Failed);
        assert_eq!(list[1].error_code.as_deref(), Some("131026"));
        assert_eq!(list[1].error_message.as_deref(), Some("Message undeliverable"));
    }

    #[test]
    fn test_meta_inbound_message_is_empty() {
        // Mensaje entrante: sin statuses, no es un error.
        let payload = json!({
            "entry": [{
                "changes": [{
                    "value": { "messages": [{ "from": "5215551234567", "text": { "body": "hola" } }] }
                }]
            }]
        });
        assert_eq!(
            normalize(&Provider::Meta, &payload, None),
            NormalizeOutcome::Updates(vec![])
        );
    }

    #[test]
    fn test_meta_without_entry_is_unrecognized() {
        let outcome = normalize(&Provider::Meta, &json!({ "hello": "world" }), None);
        assert!(matches!(outcome, NormalizeOutcome::Unrecognized { .. }));
    }

    #[test]
    fn test_twilio_form_body() {
        let body = b"MessageSid=SM123&MessageStatus=undelivered&To=%2B15551234567&ErrorCode=30003&ErrorMessage=Unreachable";
        let payload = decode_body(&Provider::Twilio, body, true).expect("form válido");

        let list = updates(normalize(&Provider::Twilio, &payload, None));
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].message_id, "SM123");
        assert_eq!(list[0].status, DeliveryStatus::Failed);
        assert_eq!(list[0].recipient_phone.as_deref(), Some("+15551234567"));
        assert_eq!(list[0].error_code.as_deref(), Some("30003"));
        assert_eq!(list[0].error_message.as_deref(), Some("Unreachable"));
    }

    #[test]
    fn test_twilio_form_detected_without_content_type() {
        let payload = decode_body(&Provider::Twilio, b"SmsSid=SM9&SmsStatus=delivered", false)
            .expect("form válido");
        let list = updates(normalize(&Provider::Twilio, &payload, None));
        assert_eq!(list[0].message_id, "SM9");
        assert_eq!(list[0].status, DeliveryStatus::Delivered);
    }

    #[test]
    fn test_twilio_status_mapping() {
        for (raw, expected) in [
            ("accepted", DeliveryStatus::Queued),
            ("sending", DeliveryStatus::Queued),
            ("sent", DeliveryStatus::Sent),
            ("read", DeliveryStatus::Read),
            ("failed", DeliveryStatus::Failed),
        ] {
            let payload = json!({ "MessageSid": "SM1", "MessageStatus": raw });
            let list = updates(normalize(&Provider::Twilio, &payload, None));
            assert_eq!(list[0].status, expected, "estado twilio {}", raw);
        }
    }

    #[test]
    fn test_sendgrid_events() {
        let payload = json!([
            { "sg_message_id": "14c5d75ce93.filter0001.16648.5515E0B88.0", "event": "processed", "email": "ana@example.com", "timestamp": 1700000000 },
            { "sg_message_id": "14c5d75ce93.filter0001", "event": "delivered", "email": "ana@example.com", "timestamp": 1700000010 },
            { "sg_message_id": "14c5d75ce93", "event": "open", "email": "ana@example.com" },
            { "sg_message_id": "99aa", "event": "bounce", "email": "bob@example.com", "reason": "550 mailbox unavailable", "status": "5.1.1" },
            { "sg_message_id": "99bb", "event": "deferred", "email": "eve@example.com" },
            { "event": "delivered", "email": "sin-id@example.com" }
        ]);

        let list = updates(normalize(&Provider::SendGrid, &payload, None));
        assert_eq!(list.len(), 4);
        assert!(list[..3].iter().all(|u| u.message_id == "14c5d75ce93"));
        assert_eq!(list[0].status, DeliveryStatus::Sent);
        assert_eq!(list[1].status, DeliveryStatus::Delivered);
        assert_eq!(list[2].status, DeliveryStatus::Read);
        assert_eq!(list[2].recipient_email.as_deref(), Some("ana@example.com"));

        assert_eq!(list[3].status, DeliveryStatus::Bounced);
        assert_eq!(list[3].error_message.as_deref(), Some("550 mailbox unavailable"));
        assert_eq!(list[3].error_code.as_deref(), Some("5.1.1"));
    }

    #[test]
    fn test_sendgrid_message_id_sources() {
        let payload = json!([
            { "sg_message_id": "14c5d75ce93.dfd.64b469.filter0001.16648.5515E0B88.0", "event": "delivered" },
            { "sg_message_id": "sgXYZ.filter001", "smtp-id": "<abc-123@crm.test>", "event": "delivered" },
            { "sg_message_id": "sgXYZ.filter001", "smtp-id": "  ", "event": "delivered" }
        ]);

        let list = updates(normalize(&Provider::SendGrid, &payload, None));
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].message_id, "14c5d75ce93.dfd.64b469");
        assert_eq!(list[1].message_id, "abc-123@crm.test");
        assert_eq!(list[2].message_id, "sgXYZ");
    }

    #[test]
    fn test_sendgrid_object_is_unrecognized() {
        let outcome = normalize(&Provider::SendGrid, &json!({ "event": "delivered" }), None);
        assert!(matches!(outcome, NormalizeOutcome::Unrecognized { .. }));
    }

    #[test]
    fn test_messagebird_shapes() {
        let conversation = json!({
            "type": "message.updated",
            "message": {
                "id": "mb-conv-1",
                "status": "delivered",
                "to": "+31612345678",
                "updatedDatetime": "2024-03-01T10:00:00+01:00"
            }
        });
        let list = updates(normalize(&Provider::MessageBird, &conversation, None));
        assert_eq!(list[0].message_id, "mb-conv-1");
        assert_eq!(list[0].status, DeliveryStatus::Delivered);
        assert_eq!(list[0].recipient_phone.as_deref(), Some("+31612345678"));
        assert_eq!(list[0].timestamp, "2024-03-01T09:00:00Z");

        let flat = json!({
            "id": "mb-sms-1",
            "status": "delivery_failed",
            "recipient": 31612345678u64,
            "statusErrorCode": 104
        });
        let list = updates(normalize(&Provider::MessageBird, &flat, None));
        assert_eq!(list[0].status, DeliveryStatus::Failed);
        assert_eq!(list[0].recipient_phone.as_deref(), Some("31612345678"));
        assert_eq!(list[0].error_code.as_deref(), Some("104"));
        assert!(list[0].error_message.is_some());
    }

    #[test]
    fn test_resend_events() {
        let bounced = json!({
            "type": "email.bounced",
            "created_at": "2024-05-01T12:00:00.000Z",
            "data": {
                "email_id": "re_123",
                "to": ["ana@example.com"],
                "bounce": { "message": "Mailbox full", "type": "Transient" }
            }
        });
        let list = updates(normalize(&Provider::Resend, &bounced, None));
        assert_eq!(list[0].message_id, "re_123");
        assert_eq!(list[0].status, DeliveryStatus::Bounced);
        assert_eq!(list[0].recipient_email.as_deref(), Some("ana@example.com"));
        assert_eq!(list[0].error_message.as_deref(), Some("Mailbox full"));
        assert_eq!(list[0].timestamp, "2024-05-01T12:00:00Z");

        let delayed = json!({ "type": "email.delivery_delayed", "data": { "email_id": "re_123" } });
        assert_eq!(
            normalize(&Provider::Resend, &delayed, None),
            NormalizeOutcome::Updates(vec![])
        );
    }

    #[test]
    fn test_unknown_provider_is_unrecognized() {
        let outcome = normalize(&Provider::Unknown("mailgun".to_string()), &json!({}), None);
        match outcome {
            NormalizeOutcome::Unrecognized { reason } => assert!(reason.contains("mailgun")),
            other => panic!("se esperaba Unrecognized, llegó {:?}", other),
        }
    }

    #[test]
    fn test_malformed_json_fails_to_decode() {
        assert!(decode_body(&Provider::Meta, b"{not json", false).is_err());
        assert!(decode_body(&Provider::Meta, b"", false).is_err());
    }

    #[test]
    fn test_delivery_status_transitions() {
        use DeliveryStatus::*;

        assert!(Queued.can_advance_to(Sent));
        assert!(Sent.can_advance_to(Delivered));
        assert!(Sent.can_advance_to(Read));
        assert!(Delivered.can_advance_to(Read));
        assert!(Delivered.can_advance_to(Failed));
        assert!(Queued.can_advance_to(Bounced));

        assert!(!Read.can_advance_to(Delivered));
        assert!(!Delivered.can_advance_to(Sent));
        assert!(!Delivered.can_advance_to(Delivered));
        assert!(!Failed.can_advance_to(Delivered));
        assert!(!Bounced.can_advance_to(Failed));
    }
}

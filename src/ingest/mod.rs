use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::shared::models::{ImageAttachment, TicketSource, UnifiedTicket};

/// Voice calls arrive without address data beyond the city; the whole
/// deployment is single-country, so the normalizer pins it.
const VOICE_DEFAULT_COUNTRY: &str = "Казахстан";

/// Raw channel payloads. A closed union: an unknown channel is a
/// deserialization error at the boundary, never a runtime default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", content = "payload", rename_all = "snake_case")]
pub enum RawPayload {
    Import(ImportRecord),
    Voice(VoicePayload),
    Chat(ChatPayload),
}

/// One record from a CSV/JSON import. Column mapping happens upstream; by
/// the time it reaches the pipeline the fields are already named.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportRecord {
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub house: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptTurn {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoicePayload {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub transcript: Vec<TranscriptTurn>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatPayload {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub messages: Vec<TranscriptTurn>,
    #[serde(default)]
    pub images: Vec<ImageAttachment>,
}

/// Converts any channel payload into the one shape the pipeline consumes.
///
/// Total by contract: malformed or missing fields degrade to empty/absent.
/// Guid uniqueness is not this function's job; callers run `ensure_guid`
/// before enqueueing.
pub fn normalize(payload: RawPayload, company_id: i64) -> UnifiedTicket {
    match payload {
        RawPayload::Import(record) => {
            let mut meta = Map::new();
            if let Some(guid) = &record.guid {
                meta.insert("guid".to_string(), Value::String(guid.clone()));
            }
            UnifiedTicket {
                text: record.description.unwrap_or_default(),
                source: TicketSource::Import,
                company_id,
                guid: record.guid,
                segment: record.segment,
                language: None,
                gender: record.gender,
                birth_date: record.birth_date,
                country: record.country,
                city: record.city,
                street: record.street,
                house: record.house,
                contact: record.contact,
                status: record.status,
                images: Vec::new(),
                meta,
            }
        }
        RawPayload::Voice(call) => {
            let text = call
                .transcript
                .iter()
                .map(|t| t.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let mut meta = Map::new();
            if let Some(phone) = &call.phone {
                meta.insert("phone".to_string(), Value::String(phone.clone()));
            }
            if let Some(call_id) = &call.call_id {
                meta.insert("call_id".to_string(), Value::String(call_id.clone()));
            }
            if let Some(duration) = call.duration {
                meta.insert("duration".to_string(), Value::from(duration));
            }
            UnifiedTicket {
                text,
                source: TicketSource::Voice,
                company_id,
                guid: None,
                segment: None,
                language: None,
                gender: None,
                birth_date: None,
                country: Some(VOICE_DEFAULT_COUNTRY.to_string()),
                city: call.city,
                street: None,
                house: None,
                contact: call.phone,
                status: call.status,
                images: Vec::new(),
                meta,
            }
        }
        RawPayload::Chat(chat) => {
            let text = chat
                .messages
                .iter()
                .map(|m| m.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let mut meta = Map::new();
            if let Some(session_id) = &chat.session_id {
                meta.insert("session_id".to_string(), Value::String(session_id.clone()));
            }
            if let Some(user_id) = chat.user_id {
                meta.insert("user_id".to_string(), Value::from(user_id));
            }
            UnifiedTicket {
                text,
                source: TicketSource::Chat,
                company_id,
                guid: None,
                segment: None,
                language: None,
                gender: None,
                birth_date: None,
                country: None,
                city: chat.city,
                street: None,
                house: None,
                contact: None,
                status: chat.status,
                images: chat.images,
                meta,
            }
        }
    }
}

/// Synthesizes `{channel}-{unix_millis}-{8-char suffix}` when the channel
/// delivered no external identifier. Run before enqueueing.
pub fn ensure_guid(ticket: &mut UnifiedTicket) {
    if ticket.guid.is_some() {
        return;
    }
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: String = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    ticket.guid = Some(format!("{}-{}-{}", ticket.source, millis, suffix));
}

/// Guid synthesis used by the analysis step for tickets that reached the
/// queue without one (the normalizer does not guarantee it).
pub fn synthesize_guid(source: TicketSource) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen_range(0x1000_0000..=0xffff_ffff);
    format!("{}-{}-{:x}", source, millis, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_concatenates_transcript_and_pins_country() {
        let payload = RawPayload::Voice(VoicePayload {
            phone: Some("+77001234567".to_string()),
            call_id: Some("call-42".to_string()),
            duration: Some(180),
            city: Some("Алматы".to_string()),
            status: None,
            transcript: vec![
                TranscriptTurn {
                    role: "user".to_string(),
                    text: "Не работает приложение".to_string(),
                },
                TranscriptTurn {
                    role: "bot".to_string(),
                    text: "Уточните версию".to_string(),
                },
            ],
        });

        let ticket = normalize(payload, 1);
        assert_eq!(ticket.text, "Не работает приложение Уточните версию");
        assert_eq!(ticket.country.as_deref(), Some("Казахстан"));
        assert_eq!(ticket.source, TicketSource::Voice);
        assert_eq!(ticket.meta.get("duration").and_then(|v| v.as_u64()), Some(180));
    }

    #[test]
    fn chat_joins_messages_and_keeps_images() {
        let payload = RawPayload::Chat(ChatPayload {
            session_id: Some("s-1".to_string()),
            messages: vec![
                TranscriptTurn {
                    role: "user".to_string(),
                    text: "first".to_string(),
                },
                TranscriptTurn {
                    role: "user".to_string(),
                    text: "second".to_string(),
                },
            ],
            images: vec![ImageAttachment::Url {
                data: "https://example.com/shot.png".to_string(),
            }],
            ..Default::default()
        });

        let ticket = normalize(payload, 9);
        assert_eq!(ticket.text, "first\nsecond");
        assert_eq!(ticket.images.len(), 1);
        assert!(ticket.guid.is_none());
    }

    #[test]
    fn import_passes_structured_fields_through() {
        let payload = RawPayload::Import(ImportRecord {
            guid: Some("ext-1".to_string()),
            description: Some("жалоба".to_string()),
            segment: Some("VIP".to_string()),
            city: Some("Астана".to_string()),
            ..Default::default()
        });

        let ticket = normalize(payload, 2);
        assert_eq!(ticket.guid.as_deref(), Some("ext-1"));
        assert_eq!(ticket.segment.as_deref(), Some("VIP"));
        assert_eq!(ticket.text, "жалоба");
    }

    #[test]
    fn malformed_import_degrades_to_empty() {
        let ticket = normalize(RawPayload::Import(ImportRecord::default()), 3);
        assert_eq!(ticket.text, "");
        assert!(ticket.guid.is_none());
    }

    #[test]
    fn ensure_guid_synthesizes_channel_prefixed_id() {
        let mut ticket = normalize(RawPayload::Chat(ChatPayload::default()), 1);
        ensure_guid(&mut ticket);
        let guid = ticket.guid.clone().unwrap();
        assert!(guid.starts_with("chat-"));

        // Idempotent: a second call keeps the existing guid.
        ensure_guid(&mut ticket);
        assert_eq!(ticket.guid.as_deref(), Some(guid.as_str()));
    }

    #[test]
    fn raw_payload_rejects_unknown_channel() {
        let err = serde_json::from_value::<RawPayload>(serde_json::json!({
            "source": "fax",
            "payload": {}
        }));
        assert!(err.is_err());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved per-tenant manager representing full automation. Excluded from
/// scoring, but the direct target for tickets already closed upstream.
pub const BOT_MANAGER_NAME: &str = "Voice Agent Robot";

/// Status a ticket enters the system with when the channel did not set one.
pub const STATUS_NEW: &str = "Новый";

/// Status sentinel meaning an upstream channel already closed the loop.
pub const STATUS_RESOLVED: &str = "Завершен";

/// Segment tier that triggers the VIP scoring term.
pub const VIP_SEGMENT: &str = "VIP";

/// Meta key marking a ticket that already consumed its single retry.
const RETRIED_KEY: &str = "__retried";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketSource {
    Import,
    Voice,
    Chat,
}

impl std::fmt::Display for TicketSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Import => write!(f, "import"),
            Self::Voice => write!(f, "voice"),
            Self::Chat => write!(f, "chat"),
        }
    }
}

/// Image attached to a ticket, either linked or carried inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageAttachment {
    Url {
        data: String,
    },
    Base64 {
        data: String,
        #[serde(default)]
        mime_type: Option<String>,
    },
}

/// The channel-agnostic work item every pipeline stage operates on.
///
/// Created by the normalizer, serialized through the queue, and dropped once
/// processed. Its durable trace is the ticket/classification/assignment rows
/// it produces in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedTicket {
    /// The complaint / request body. Always present, possibly empty.
    pub text: String,
    pub source: TicketSource,
    pub company_id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub house: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,

    /// Channel-specific extras (phone, call id, chat session id, ...) plus
    /// the pipeline-owned retry flag.
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl UnifiedTicket {
    pub fn was_retried(&self) -> bool {
        self.meta
            .get(RETRIED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn mark_retried(&mut self) {
        self.meta.insert(RETRIED_KEY.to_string(), Value::Bool(true));
    }

    /// Identifier used in log lines; tickets without a guid log as "unknown".
    pub fn guid_for_log(&self) -> &str {
        self.guid.as_deref().unwrap_or("unknown")
    }
}

// ── Durable rows, owned by the storage layer behind the Storage trait ──────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTicket {
    pub id: i64,
    pub company_id: i64,
    pub guid: String,
    pub description: String,
    pub source: TicketSource,
    pub status: String,
    pub segment: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
    pub contact: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub street: Option<String>,
    pub house: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTicket {
    pub company_id: i64,
    pub guid: String,
    pub description: String,
    pub source: TicketSource,
    pub status: String,
    pub segment: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
    pub contact: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub street: Option<String>,
    pub house: Option<String>,
}

/// AI-derived classification. Immutable once stored; its existence is the
/// idempotency marker for the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub id: i64,
    pub ticket_id: i64,
    pub category: String,
    pub sentiment: String,
    pub priority: i32,
    pub language: String,
    pub summary: String,
    pub recommendation: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewClassification {
    pub ticket_id: i64,
    pub category: String,
    pub sentiment: String,
    pub priority: i32,
    pub language: String,
    pub summary: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manager {
    pub id: i64,
    pub company_id: i64,
    pub name: String,
    pub office: String,
    pub skills: Vec<String>,
    pub current_load: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Office {
    pub id: i64,
    pub company_id: i64,
    pub office: String,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub ticket_id: i64,
    pub analysis_id: Option<i64>,
    pub manager_id: i64,
    pub office_id: Option<i64>,
    /// Serialized `AssignmentReason`, a reconstructable score breakdown.
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: i64,
    pub ticket_id: i64,
    pub analysis_id: Option<i64>,
    pub manager_id: i64,
    pub office_id: Option<i64>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

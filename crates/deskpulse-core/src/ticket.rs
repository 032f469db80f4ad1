//! Helpdesk ticket records written by import jobs and read by analysis jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Stored ticket. Unique per `(owner_id, provider, external_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub owner_id: String,
    pub provider: String,
    pub external_id: String,
    pub subject: String,
    pub body: String,
    pub raw: JsonValue,
    pub import_job_id: Option<Uuid>,
    pub analysis: Option<JsonValue>,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ticket fields extracted from one provider item.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketUpsert {
    pub external_id: String,
    pub subject: String,
    pub body: String,
    pub raw: JsonValue,
}

impl TicketUpsert {
    /// Extract from a provider item.
    ///
    /// The item must carry an `id` (string or number). Subject falls back
    /// from `subject` to `title`, body from `description` to `body`.
    pub fn from_item(item: &JsonValue) -> Result<Self> {
        let external_id = match item.get("id") {
            Some(JsonValue::String(s)) if !s.is_empty() => s.clone(),
            Some(JsonValue::Number(n)) => n.to_string(),
            _ => {
                return Err(Error::Provider(
                    "ticket item is missing an id".to_string(),
                ))
            }
        };
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| item.get(*k).and_then(JsonValue::as_str))
                .unwrap_or_default()
                .to_string()
        };
        Ok(Self {
            external_id,
            subject: text(&["subject", "title"]),
            body: text(&["description", "body"]),
            raw: item.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_item_numeric_id() {
        let t = TicketUpsert::from_item(&json!({"id": 42, "title": "Printer", "body": "jammed"}))
            .unwrap();
        assert_eq!(t.external_id, "42");
        assert_eq!(t.subject, "Printer");
        assert_eq!(t.body, "jammed");
    }

    #[test]
    fn test_from_item_prefers_subject_and_description() {
        let t = TicketUpsert::from_item(&json!({
            "id": "T-1",
            "subject": "Login",
            "title": "ignored",
            "description": "cannot log in"
        }))
        .unwrap();
        assert_eq!(t.subject, "Login");
        assert_eq!(t.body, "cannot log in");
    }

    #[test]
    fn test_from_item_requires_id() {
        assert!(matches!(
            TicketUpsert::from_item(&json!({"subject": "x"})),
            Err(Error::Provider(_))
        ));
        assert!(TicketUpsert::from_item(&json!({"id": ""})).is_err());
    }
}

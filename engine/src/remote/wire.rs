//! JSON bodies exchanged with the document service.

use crate::{Key, Snapshot, UserId};
use serde::{Deserialize, Serialize};

/// Body of `GET /users/{user_id}/document`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEnvelope {
    pub user_id: UserId,
    pub data: Snapshot,
    /// RFC 3339 timestamp of the last write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Body returned by `PATCH /users/{user_id}/document`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertResponse {
    pub user_id: UserId,
    /// Keys written by this request
    pub updated: Vec<Key>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_uses_camel_case() {
        let envelope: DocumentEnvelope = serde_json::from_value(json!({
            "userId": "u1",
            "data": {"english_listening_tasks": []},
            "updatedAt": "2025-01-01T00:00:00Z",
        }))
        .unwrap();

        assert_eq!(envelope.user_id, "u1");
        assert!(envelope.data.contains("english_listening_tasks"));
        assert_eq!(envelope.updated_at.as_deref(), Some("2025-01-01T00:00:00Z"));
    }

    #[test]
    fn envelope_tolerates_missing_timestamp() {
        let envelope: DocumentEnvelope =
            serde_json::from_value(json!({"userId": "u1", "data": {}})).unwrap();
        assert_eq!(envelope.updated_at, None);
        assert!(envelope.data.is_empty());
    }
}

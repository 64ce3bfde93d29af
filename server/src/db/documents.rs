//! Database operations for the user_documents table.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use studysync_engine::{DocumentEnvelope, Snapshot};

/// A stored document row.
#[derive(Debug)]
pub struct StoredDocument {
    pub user_id: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredDocument {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredDocument {
            user_id: row.try_get("user_id")?,
            data: row.try_get("data")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredDocument {
    /// Convert the row into the wire envelope served to clients.
    ///
    /// Collections the service no longer knows are still returned; clients
    /// drop fields they have not registered.
    pub fn into_envelope(self) -> Result<DocumentEnvelope, studysync_engine::Error> {
        Ok(DocumentEnvelope {
            user_id: self.user_id,
            data: Snapshot::from_value(self.data)?,
            updated_at: Some(self.updated_at.to_rfc3339()),
        })
    }
}

/// Fetch a user's document.
pub async fn get_document(
    pool: &PgPool,
    user_id: &str,
) -> Result<Option<StoredDocument>, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(
        r#"
        SELECT user_id, data, created_at, updated_at
        FROM user_documents
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

/// Merge `patch` into a user's document field by field, creating it on
/// first write.
pub async fn merge_document(
    pool: &PgPool,
    user_id: &str,
    patch: Value,
) -> Result<StoredDocument, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(
        r#"
        INSERT INTO user_documents (user_id, data)
        VALUES ($1, $2)
        ON CONFLICT (user_id) DO UPDATE SET
            data = user_documents.data || EXCLUDED.data,
            updated_at = NOW()
        RETURNING user_id, data, created_at, updated_at
        "#,
    )
    .bind(user_id)
    .bind(patch)
    .fetch_one(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(data: Value) -> StoredDocument {
        let at = DateTime::parse_from_rfc3339("2025-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        StoredDocument {
            user_id: "u1".into(),
            data,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn envelope_from_row() {
        let envelope = row(json!({"english_listening_tasks": []}))
            .into_envelope()
            .unwrap();
        assert_eq!(envelope.user_id, "u1");
        assert_eq!(envelope.data.len(), 1);
        assert_eq!(envelope.updated_at.as_deref(), Some("2025-01-02T03:04:05+00:00"));
    }

    #[test]
    fn envelope_rejects_non_object_data() {
        assert!(row(json!([1, 2])).into_envelope().is_err());
    }
}

//! Document handlers - serve and merge per-user documents.

use crate::db;
use crate::error::{AppError, Result};
use serde_json::Value;
use sqlx::PgPool;
use studysync_engine::{CollectionTable, DocumentEnvelope, Error, Snapshot, UpsertResponse};

/// Longest accepted user id.
const MAX_USER_ID_LEN: usize = 128;

/// Serve the stored document of `user_id`.
pub async fn handle_fetch(pool: &PgPool, user_id: &str) -> Result<DocumentEnvelope> {
    validate_user_id(user_id)?;

    let stored = db::get_document(pool, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no document for user '{user_id}'")))?;

    tracing::debug!(user_id, "document served");
    Ok(stored.into_envelope()?)
}

/// Merge a partial document into the stored document of `user_id`.
pub async fn handle_upsert(
    pool: &PgPool,
    table: &CollectionTable,
    user_id: &str,
    body: Value,
) -> Result<UpsertResponse> {
    validate_user_id(user_id)?;
    let patch = validate_patch(table, body)?;

    let updated: Vec<String> = patch.keys().map(str::to_string).collect();
    let stored = db::merge_document(pool, user_id, patch.into_value()).await?;

    if stored.created_at == stored.updated_at {
        tracing::info!(user_id, keys = ?updated, "document created");
    } else {
        tracing::info!(user_id, keys = ?updated, "document merged");
    }

    Ok(UpsertResponse {
        user_id: user_id.to_string(),
        updated,
    })
}

fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(AppError::BadRequest("user id must not be empty".into()));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(AppError::BadRequest(format!(
            "user id exceeds {MAX_USER_ID_LEN} bytes"
        )));
    }
    Ok(())
}

/// A patch must be a non-empty object whose fields are all registered
/// collections.
fn validate_patch(table: &CollectionTable, body: Value) -> Result<Snapshot> {
    let patch = Snapshot::from_value(body)?;
    if patch.is_empty() {
        return Err(AppError::BadRequest("patch must contain at least one field".into()));
    }
    if let Some(unknown) = patch.keys().find(|key| !table.contains(key)) {
        return Err(Error::UnknownKey(unknown.to_string()).into());
    }
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use studysync_engine::keys;

    #[test]
    fn accepts_registered_fields() {
        let mut body = serde_json::Map::new();
        body.insert(keys::TASKS.into(), json!([{"id": "t1"}]));
        body.insert(keys::AI_API_KEY.into(), json!("sk-1"));

        let patch = validate_patch(&CollectionTable::default(), Value::Object(body)).unwrap();
        assert_eq!(patch.len(), 2);
    }

    #[test]
    fn rejects_non_objects() {
        for body in [json!([1]), json!("text"), json!(null), json!(3)] {
            assert!(matches!(
                validate_patch(&CollectionTable::default(), body),
                Err(AppError::Engine(Error::InvalidSnapshot(_)))
            ));
        }
    }

    #[test]
    fn rejects_unknown_and_empty() {
        let err = validate_patch(&CollectionTable::default(), json!({"bogus": 1})).unwrap_err();
        assert!(matches!(err, AppError::Engine(Error::UnknownKey(ref k)) if k == "bogus"));

        let err = validate_patch(&CollectionTable::default(), json!({})).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn user_id_bounds() {
        assert!(validate_user_id("u1").is_ok());
        assert!(validate_user_id("  ").is_err());
        assert!(validate_user_id(&"u".repeat(MAX_USER_ID_LEN + 1)).is_err());
    }
}

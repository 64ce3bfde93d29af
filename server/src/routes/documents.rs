//! Document endpoint routes.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde_json::Value;
use studysync_engine::{DocumentEnvelope, UpsertResponse};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{handle_fetch, handle_upsert};
use crate::AppState;

/// Create document routes.
pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/users/{user_id}/document",
        get(fetch_handler).patch(upsert_handler),
    )
}

/// GET /users/{user_id}/document - Fetch the whole document.
async fn fetch_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<DocumentEnvelope>> {
    let envelope = handle_fetch(&state.pool, &user_id).await?;
    Ok(Json(envelope))
}

/// PATCH /users/{user_id}/document - Field-level upsert.
async fn upsert_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(user_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<UpsertResponse>> {
    let response = handle_upsert(&state.pool, &state.table, &user_id, body).await?;
    Ok(Json(response))
}

//! Read-only meeting inspection.

use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::ApiState;
use crate::db::{MeetingChangeRepository, MeetingRepository};
use crate::meeting::{Meeting, MeetingChange};

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/meetings/:id", get(get_meeting))
        .route("/meetings/:id/changes", get(list_changes))
}

/// GET /meetings/:id - Current meeting record.
async fn get_meeting(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Meeting>> {
    let meeting = state
        .db
        .call(move |conn| MeetingRepository::get(conn, id))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Meeting {} not found", id)))?;

    Ok(Json(meeting))
}

/// GET /meetings/:id/changes - Audit trail, oldest first.
async fn list_changes(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<MeetingChange>>> {
    let (exists, changes) = state
        .db
        .call(move |conn| {
            let exists = MeetingRepository::get(conn, id)?.is_some();
            let changes = MeetingChangeRepository::list_for_meeting(conn, id)?;
            Ok((exists, changes))
        })
        .await?;

    if !exists {
        return Err(ApiError::not_found(format!("Meeting {} not found", id)));
    }
    Ok(Json(changes))
}

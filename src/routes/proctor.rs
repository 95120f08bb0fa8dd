use axum::{
    extract::{Query, State},
    Json,
};
use validator::Validate;

use crate::dto::proctor_dto::{ListEventsQuery, ListEventsResponse};
use crate::error::Result;
use crate::AppState;

/// Proctoring events, newest first, filtered by attempt, type and time.
#[axum::debug_handler]
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<ListEventsQuery>,
) -> Result<Json<ListEventsResponse>> {
    query.validate()?;
    let events = state.events.list(query.into()).await?;
    Ok(Json(ListEventsResponse { events }))
}

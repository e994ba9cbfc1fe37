//! Calendar endpoints for the calling user.

use super::{AppError, AppState};
use crate::credentials::Integration;
use crate::google::{ApiOperation, CalendarEvent, EventDraft, EventPatch};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_MAX_RESULTS: u32 = 10;
const MAX_RESULTS_LIMIT: u32 = 250;

/// Query parameters for GET /api/calendar/events
#[derive(Deserialize, Default)]
pub struct ListEventsQuery {
    #[serde(default)]
    pub calendar_id: Option<String>,
    /// RFC 3339 lower bound; defaults to now
    #[serde(default)]
    pub time_min: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_results: Option<u32>,
}

/// Query parameters for single-event routes
#[derive(Deserialize, Default)]
pub struct CalendarQuery {
    #[serde(default)]
    pub calendar_id: Option<String>,
}

/// List events response
#[derive(Serialize)]
pub struct ListEventsResponse {
    pub events: Vec<CalendarEvent>,
}

/// Create calendar API router
pub fn create_calendar_router(state: AppState) -> Router {
    Router::new()
        .route("/api/calendar/events", get(list_events).post(create_event))
        .route(
            "/api/calendar/events/:id",
            get(get_event).patch(update_event).delete(delete_event),
        )
        .with_state(Arc::new(state))
}

fn calendar_id<'a>(state: &'a AppState, requested: &'a Option<String>) -> &'a str {
    requested
        .as_deref()
        .filter(|id| !id.is_empty())
        .unwrap_or(&state.default_calendar_id)
}

/// GET /api/calendar/events - Upcoming events
async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListEventsQuery>,
    headers: HeaderMap,
) -> Result<Json<ListEventsResponse>, AppError> {
    let user = state.caller(&headers)?;
    let (principal, token) = state.authorize(&user, ApiOperation::ListEvents).await?;

    let calendar_id = calendar_id(&state, &query.calendar_id);
    let max_results = query
        .max_results
        .unwrap_or(DEFAULT_MAX_RESULTS)
        .clamp(1, MAX_RESULTS_LIMIT);
    let time_min = query.time_min.unwrap_or_else(Utc::now);

    debug!(principal = %principal, calendar = %calendar_id, max_results, "Listing events");

    let events = state
        .google
        .calendar(&token)
        .list_upcoming(calendar_id, time_min, max_results)
        .await
        .map_err(|e| state.api_failure(&principal, Integration::Calendar, e))?;

    Ok(Json(ListEventsResponse { events }))
}

/// POST /api/calendar/events - Create an event
async fn create_event(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CalendarQuery>,
    headers: HeaderMap,
    Json(draft): Json<EventDraft>,
) -> Result<(StatusCode, Json<CalendarEvent>), AppError> {
    let user = state.caller(&headers)?;
    draft.validate().map_err(AppError::BadRequest)?;
    let (principal, token) = state.authorize(&user, ApiOperation::InsertEvent).await?;

    let event = state
        .google
        .calendar(&token)
        .insert_event(calendar_id(&state, &query.calendar_id), &draft)
        .await
        .map_err(|e| state.api_failure(&principal, Integration::Calendar, e))?;

    info!(principal = %principal, event = %event.id, "Calendar event created");
    Ok((StatusCode::CREATED, Json(event)))
}

/// GET /api/calendar/events/:id
async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
    Query(query): Query<CalendarQuery>,
    headers: HeaderMap,
) -> Result<Json<CalendarEvent>, AppError> {
    let user = state.caller(&headers)?;
    let (principal, token) = state.authorize(&user, ApiOperation::GetEvent).await?;

    let event = state
        .google
        .calendar(&token)
        .get_event(calendar_id(&state, &query.calendar_id), &event_id)
        .await
        .map_err(|e| state.api_failure(&principal, Integration::Calendar, e))?;

    Ok(Json(event))
}

/// PATCH /api/calendar/events/:id - Update the fields that are present
async fn update_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
    Query(query): Query<CalendarQuery>,
    headers: HeaderMap,
    Json(patch): Json<EventPatch>,
) -> Result<Json<CalendarEvent>, AppError> {
    let user = state.caller(&headers)?;
    if patch.is_empty() {
        return Err(AppError::BadRequest("Patch contains no fields".to_string()));
    }
    let (principal, token) = state.authorize(&user, ApiOperation::PatchEvent).await?;

    let event = state
        .google
        .calendar(&token)
        .patch_event(calendar_id(&state, &query.calendar_id), &event_id, &patch)
        .await
        .map_err(|e| state.api_failure(&principal, Integration::Calendar, e))?;

    info!(principal = %principal, event = %event.id, "Calendar event updated");
    Ok(Json(event))
}

/// DELETE /api/calendar/events/:id
async fn delete_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
    Query(query): Query<CalendarQuery>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let user = state.caller(&headers)?;
    let (principal, token) = state.authorize(&user, ApiOperation::DeleteEvent).await?;

    state
        .google
        .calendar(&token)
        .delete_event(calendar_id(&state, &query.calendar_id), &event_id)
        .await
        .map_err(|e| state.api_failure(&principal, Integration::Calendar, e))?;

    info!(principal = %principal, event = %event_id, "Calendar event deleted");
    Ok(StatusCode::NO_CONTENT)
}

use crate::error::{AppError, AppResult, LoggedJson};
use crate::server::AnalyticsServer;
use crate::storage::store::StoreResult;
use crate::storage::table::{TableHelper, TableSchema};
use crate::types::{format_timestamp, Event, EventRequest, EventResponse};
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use std::sync::Arc;

fn present(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.is_empty())
}

/// Both fields must be present, non-null and non-empty.
pub fn validate_event(req: EventRequest) -> AppResult<(String, String)> {
    match (present(req.userid), present(req.eventname)) {
        (Some(userid), Some(eventname)) => Ok((userid, eventname)),
        _ => Err(AppError::Validation(
            "Missing required fields: 'userid' or 'eventname'".to_string(),
        )),
    }
}

/// Stamp an event with the server's clock. Clients never supply the time.
pub fn build_event(userid: String, eventname: String, now: DateTime<Utc>) -> Event {
    Event {
        eventtimestamputc: format_timestamp(now),
        userid,
        eventname,
    }
}

pub fn store_event(
    table: &mut TableHelper<'_>,
    schema: &TableSchema,
    event: &Event,
) -> StoreResult<()> {
    table.insert_to_table(&schema.name, &event.to_values())
}

/// POST /process_event - Record one event and echo it back.
pub async fn process_event(
    State(server): State<Arc<AnalyticsServer>>,
    LoggedJson(req): LoggedJson<EventRequest>,
) -> AppResult<Json<EventResponse>> {
    let (userid, eventname) = validate_event(req)?;
    let event = build_event(userid, eventname, Utc::now());

    let record = event.clone();
    server
        .with_table("Failed to process event", move |table, schema| {
            store_event(table, schema, &record)
        })
        .await?;

    tracing::debug!(userid = %event.userid, eventname = %event.eventname, "event recorded");
    Ok(Json(EventResponse { data: event }))
}

use crate::error::{AppError, AppResult, LoggedJson};
use crate::server::AnalyticsServer;
use crate::storage::store::{StoreError, StoreResult};
use crate::storage::table::{Filter, TableHelper, TableSchema};
use crate::types::{
    format_timestamp, Event, HealthResponse, ReportRequest, ReportResponse, COL_TIMESTAMP,
    COL_USERID,
};
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Datelike, TimeDelta, Utc};
use std::sync::Arc;

pub fn validate_report(req: ReportRequest) -> AppResult<(String, i64)> {
    let userid = match req.userid {
        Some(u) if !u.is_empty() => u,
        _ => return Err(AppError::Validation("userid is required".to_string())),
    };
    if req.lastseconds <= 0 {
        return Err(AppError::Validation(
            "lastseconds must be greater than 0".to_string(),
        ));
    }
    Ok((userid, req.lastseconds))
}

/// Start of the lookback window, formatted like stored timestamps.
/// `None` when the window reaches past year 1, i.e. every stored event.
pub fn window_start(now: DateTime<Utc>, lookback_seconds: i64) -> Option<String> {
    TimeDelta::try_seconds(lookback_seconds)
        .and_then(|d| now.checked_sub_signed(d))
        .filter(|start| start.year() >= 1)
        .map(format_timestamp)
}

/// Every event for `userid` at or after `since`. Order is unspecified.
/// A stored row that is not three text cells is an error, not skipped.
pub fn fetch_events(
    table: &mut TableHelper<'_>,
    schema: &TableSchema,
    userid: &str,
    since: Option<&str>,
) -> StoreResult<Vec<Event>> {
    let mut filters = vec![Filter::eq(COL_USERID, userid)];
    if let Some(since) = since {
        filters.push(Filter::ge(COL_TIMESTAMP, since));
    }
    let rows = table.select_from_table(&schema.name, &Event::columns(), &filters)?;
    rows.iter()
        .map(|row| {
            Event::from_row(row).ok_or_else(|| {
                StoreError::Execute(format!("row in '{}' is not an event: {row:?}", schema.name))
            })
        })
        .collect()
}

/// POST /get_reports - Events for one user within the last N seconds.
pub async fn get_reports(
    State(server): State<Arc<AnalyticsServer>>,
    LoggedJson(req): LoggedJson<ReportRequest>,
) -> AppResult<Json<ReportResponse>> {
    let (userid, lastseconds) = validate_report(req)?;
    let since = window_start(Utc::now(), lastseconds);

    let events = server
        .with_table("Failed to retrieve reports", move |table, schema| {
            fetch_events(table, schema, &userid, since.as_deref())
        })
        .await?;

    tracing::debug!(count = events.len(), lastseconds, "report served");
    Ok(Json(ReportResponse { events }))
}

/// GET /health - Health check.
pub async fn health(State(server): State<Arc<AnalyticsServer>>) -> Json<HealthResponse> {
    let db_ok = server.ping().await;
    Json(HealthResponse {
        status: if db_ok {
            "ok".into()
        } else {
            "degraded".into()
        },
        db_ok,
    })
}

use crate::storage::table::TableSchema;
use crate::storage::value::{Row, SqlValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Fixed-width UTC timestamp; lexicographic order equals chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const COL_TIMESTAMP: &str = "eventtimestamputc";
pub const COL_USERID: &str = "userid";
pub const COL_EVENTNAME: &str = "eventname";

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Schema of the event table: three `TEXT NOT NULL` columns.
pub fn events_schema(table: &str) -> TableSchema {
    TableSchema::new(
        table,
        [
            (COL_TIMESTAMP, "TEXT NOT NULL"),
            (COL_USERID, "TEXT NOT NULL"),
            (COL_EVENTNAME, "TEXT NOT NULL"),
        ],
    )
}

/// The key must be present, but may be `null`. Plain `Option` fields would
/// also accept a missing key.
fn present<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)
}

/// POST /process_event body.
#[derive(Debug, Clone, Deserialize)]
pub struct EventRequest {
    #[serde(deserialize_with = "present")]
    pub userid: Option<String>,
    #[serde(deserialize_with = "present")]
    pub eventname: Option<String>,
}

/// POST /get_reports body.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportRequest {
    #[serde(deserialize_with = "present")]
    pub userid: Option<String>,
    pub lastseconds: i64,
}

/// A persisted event row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub eventtimestamputc: String,
    pub userid: String,
    pub eventname: String,
}

impl Event {
    pub fn columns() -> [&'static str; 3] {
        [COL_TIMESTAMP, COL_USERID, COL_EVENTNAME]
    }

    pub fn to_values(&self) -> [(&'static str, SqlValue); 3] {
        [
            (COL_TIMESTAMP, SqlValue::from(self.eventtimestamputc.as_str())),
            (COL_USERID, SqlValue::from(self.userid.as_str())),
            (COL_EVENTNAME, SqlValue::from(self.eventname.as_str())),
        ]
    }

    /// Build from a row selected with [`Event::columns`].
    pub fn from_row(row: &Row) -> Option<Self> {
        match row.as_slice() {
            [ts, user, name] => Some(Self {
                eventtimestamputc: ts.as_str()?.to_string(),
                userid: user.as_str()?.to_string(),
                eventname: name.as_str()?.to_string(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventResponse {
    pub data: Event,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportResponse {
    pub events: Vec<Event>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub db_ok: bool,
}

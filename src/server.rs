use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::ingest::handler as ingest_handler;
use crate::query::handler as query_handler;
use crate::storage::sqlite::SqliteConnector;
use crate::storage::store::{Connector, StoreResult};
use crate::storage::table::{TableHelper, TableSchema};
use crate::storage::with_table;
use crate::types::events_schema;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};

const DEFAULT_MAX_PAYLOAD_BYTES: usize = 65536;

/// The analytics service: a store connector and a table schema, injected at
/// construction. Holds no per-request state; every request opens and closes
/// its own connection.
pub struct AnalyticsServer {
    connector: Arc<dyn Connector>,
    schema: TableSchema,
    max_payload_bytes: usize,
}

impl AnalyticsServer {
    pub fn new(connector: Arc<dyn Connector>, schema: TableSchema) -> Self {
        Self {
            connector,
            schema,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let connector = Arc::new(SqliteConnector::new(config.database.path.clone()));
        Self::new(connector, events_schema(&config.table.name))
            .with_max_payload_bytes(config.server.max_payload_bytes)
    }

    pub fn with_max_payload_bytes(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    /// Create the event table if absent. Run once at startup.
    pub fn init(&self) -> StoreResult<()> {
        with_table(self.connector.as_ref(), &self.schema, |_| Ok(()))?;
        tracing::info!(
            table = %self.schema.name,
            db = %self.connector.location(),
            "table created successfully"
        );
        Ok(())
    }

    /// Run `op` against a fresh connection on the blocking pool. Store
    /// failures become `AppError::Persistence` tagged with `context`.
    pub async fn with_table<T, F>(&self, context: &'static str, op: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut TableHelper<'_>, &TableSchema) -> StoreResult<T> + Send + 'static,
    {
        let connector = self.connector.clone();
        let schema = self.schema.clone();
        tokio::task::spawn_blocking(move || {
            with_table(connector.as_ref(), &schema, |table| op(table, &schema))
        })
        .await
        .map_err(|e| AppError::Internal(format!("store task failed: {e}")))?
        .map_err(AppError::persistence(context))
    }

    /// Whether a connection can be opened and queried.
    pub async fn ping(&self) -> bool {
        let connector = self.connector.clone();
        tokio::task::spawn_blocking(move || -> StoreResult<()> {
            let mut store = connector.connect()?;
            let result = store.query("SELECT 1", &[]);
            store.close()?;
            result.map(|_| ())
        })
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
    }

    pub fn router(self: Arc<Self>) -> Router {
        // Events are posted from browsers on other origins.
        let ingest_cors = CorsLayer::new()
            .allow_origin(AllowOrigin::any())
            .allow_methods([axum::http::Method::POST, axum::http::Method::OPTIONS])
            .allow_headers([axum::http::header::CONTENT_TYPE]);

        let api_routes = Router::new()
            .route("/process_event", post(ingest_handler::process_event))
            .route("/get_reports", post(query_handler::get_reports))
            .layer(DefaultBodyLimit::max(self.max_payload_bytes))
            .layer(ingest_cors);

        let health_route = Router::new().route("/health", get(query_handler::health));

        api_routes.merge(health_route).with_state(self)
    }

    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::table::Filter;
    use crate::types::Event;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn server(path: &std::path::Path) -> Arc<AnalyticsServer> {
        let connector = Arc::new(SqliteConnector::new(path));
        Arc::new(AnalyticsServer::new(connector, events_schema("events")))
    }

    fn json_post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let server = server(tmp.path());
        server.init().unwrap();
        server.init().unwrap();
        assert!(server.ping().await);
    }

    #[tokio::test]
    async fn test_process_event_route() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let server = server(tmp.path());
        let app = server.clone().router();

        let resp = app
            .oneshot(json_post(
                "/process_event",
                r#"{"userid": "u1", "eventname": "click"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let count = server
            .with_table("count", |table, schema| {
                table.count_rows(&schema.name, &[Filter::eq("userid", "u1")])
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_missing_field_is_unprocessable() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let app = server(tmp.path()).router();

        let resp = app
            .oneshot(json_post("/process_event", r#"{"userid": "u1"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let app = server(&dir.path().join("missing").join("events.db")).router();

        let resp = app
            .oneshot(json_post(
                "/process_event",
                r#"{"userid": "u1", "eventname": "click"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Failed to process event: "));
    }

    #[tokio::test]
    async fn test_memory_database_keeps_events_between_requests() {
        let server = server(std::path::Path::new(":memory:"));
        server.init().unwrap();

        let resp = server
            .clone()
            .router()
            .oneshot(json_post(
                "/process_event",
                r#"{"userid": "u1", "eventname": "click"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = server
            .router()
            .oneshot(json_post(
                "/get_reports",
                r#"{"userid": "u1", "lastseconds": 60}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: crate::types::ReportResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.events.len(), 1);
        assert_eq!(body.events[0].eventname, "click");
    }

    #[tokio::test]
    async fn test_with_table_reads_back_rows() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let server = server(tmp.path());
        let event = Event {
            eventtimestamputc: "2025-01-01 00:00:00".into(),
            userid: "u9".into(),
            eventname: "view".into(),
        };
        let insert = event.clone();
        server
            .with_table("insert", move |table, schema| {
                table.insert_to_table(&schema.name, &insert.to_values())
            })
            .await
            .unwrap();

        let rows = server
            .with_table("select", |table, schema| {
                table.select_from_table(&schema.name, &Event::columns(), &[])
            })
            .await
            .unwrap();
        assert_eq!(Event::from_row(&rows[0]), Some(event));
    }
}

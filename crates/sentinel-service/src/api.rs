//! REST API of the ingestion service.
//!
//! # Endpoints
//!
//! - `GET /api/health`: liveness, also used by the edge connectivity probe
//! - `POST /api/readings`: ingest one JSON reading
//! - `GET /api/greenhouses`: every live state document
//! - `GET /api/greenhouses/{id}`: one live state document
//! - `GET /api/greenhouses/{id}/history`: history records, newest first
//!
//! ## Ingestion status codes
//!
//! `POST /api/readings` answers `202 Accepted` whenever the edge should
//! drop the record from its buffer: after a successful ingest
//! (`"accepted": true`) and for a payload that can never be ingested
//! (`"accepted": false`). Storage failures answer `503` so the edge keeps
//! the record and retries.
//!
//! All other errors are returned as `{"error": "..."}` via [`AppError`].

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, error};

use sentinel_core::IngestOutcome;
use sentinel_store::HistoryQuery;
use sentinel_types::{GreenhouseState, HistoryRecord, parse_timestamp};

use crate::state::AppState;
use crate::transport::TOPIC_HEADER;

/// Page size when a history request has no `limit`.
pub const DEFAULT_HISTORY_LIMIT: u32 = 100;
/// Largest accepted `limit`.
pub const MAX_HISTORY_LIMIT: u32 = 1000;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/readings", post(ingest_reading))
        .route("/api/greenhouses", get(list_greenhouses))
        .route("/api/greenhouses/{id}", get(get_greenhouse))
        .route("/api/greenhouses/{id}/history", get(get_history))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Response to `POST /api/readings`.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// False when the payload was dropped as malformed.
    pub accepted: bool,
    /// Operator-facing alert texts.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    #[serde(flatten)]
    pub outcome: Option<IngestOutcome>,
}

impl From<Option<IngestOutcome>> for IngestResponse {
    fn from(outcome: Option<IngestOutcome>) -> Self {
        Self {
            accepted: outcome.is_some(),
            messages: outcome
                .as_ref()
                .map(|o| o.alerts.iter().map(ToString::to_string).collect())
                .unwrap_or_default(),
            outcome,
        }
    }
}

async fn ingest_reading(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    let topic = headers
        .get(TOPIC_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    debug!("Received {} byte(s) on topic {}", body.len(), topic);

    match state.gateway.ingest_json(&body).await {
        Ok(outcome) => Ok((StatusCode::ACCEPTED, Json(IngestResponse::from(outcome)))),
        Err(e) => {
            error!("Ingestion failed: {}", e);
            Err(AppError::Unavailable(e.to_string()))
        }
    }
}

async fn list_greenhouses(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<GreenhouseState>>, AppError> {
    Ok(Json(state.store.list_states()?))
}

async fn get_greenhouse(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<GreenhouseState>, AppError> {
    state
        .store
        .get_state(&id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Greenhouse not found: {}", id)))
}

/// Query parameters for the history endpoint.
///
/// `since` and `until` take the same timestamp formats as readings.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl HistoryParams {
    /// Parse and check the parameters into a store query for one sensor.
    pub fn to_query(&self, sensor_id: &str) -> Result<HistoryQuery, AppError> {
        let since = self.since.as_deref().map(parse_bound).transpose()?;
        let until = self.until.as_deref().map(parse_bound).transpose()?;

        if let (Some(since), Some(until)) = (since, until)
            && since > until
        {
            return Err(AppError::BadRequest(format!(
                "Invalid time range: 'since' ({}) must be less than or equal to 'until' ({})",
                since, until
            )));
        }

        let limit = self.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if limit == 0 || limit > MAX_HISTORY_LIMIT {
            return Err(AppError::BadRequest(format!(
                "limit must be between 1 and {}",
                MAX_HISTORY_LIMIT
            )));
        }

        let mut query = HistoryQuery::new().sensor(sensor_id);
        if let Some(since) = since {
            query = query.since(since);
        }
        if let Some(until) = until {
            query = query.until(until);
        }
        // One extra row tells whether another page exists.
        query = query.limit(limit + 1);
        if let Some(offset) = self.offset {
            query = query.offset(offset);
        }
        Ok(query)
    }
}

fn parse_bound(value: &str) -> Result<OffsetDateTime, AppError> {
    parse_timestamp(value).map_err(|e| AppError::BadRequest(e.to_string()))
}

/// Paginated response wrapper with metadata.
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

/// Pagination metadata.
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    /// Number of items returned.
    pub count: usize,
    /// Offset from the beginning.
    pub offset: u32,
    /// Page size used.
    pub limit: u32,
    /// Whether there are more items available.
    pub has_more: bool,
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<PaginatedResponse<HistoryRecord>>, AppError> {
    let query = params.to_query(&id)?;
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);

    let mut records = state.store.query_history(&query)?;
    let has_more = records.len() > limit as usize;
    records.truncate(limit as usize);

    Ok(Json(PaginatedResponse {
        pagination: PaginationMeta {
            count: records.len(),
            offset: params.offset.unwrap_or(0),
            limit,
            has_more,
        },
        data: records,
    }))
}

/// API error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Store(sentinel_store::Error),
    /// Storage is failing; the caller should retry later.
    Unavailable(String),
}

impl From<sentinel_store::Error> for AppError {
    fn from(e: sentinel_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use sentinel_core::{
        GatewayOptions, IngestionGateway, MemoryHistoryStore, MemoryStateStore, ThresholdConfig,
        Thresholds,
    };
    use sentinel_store::Store;
    use tower::ServiceExt;

    fn create_test_state() -> Arc<AppState> {
        let store = Store::open_in_memory().unwrap();
        AppState::new(store, ThresholdConfig::default(), GatewayOptions::default())
    }

    async fn response_body(response: axum::response::Response) -> String {
        let body = response.into_body();
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn post_reading(state: &Arc<AppState>, body: &str) -> axum::response::Response {
        router()
            .with_state(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/readings")
                    .header("content-type", "application/json")
                    .header(TOPIC_HEADER, "sensor-readings")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn get(state: &Arc<AppState>, uri: &str) -> axum::response::Response {
        router()
            .with_state(state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    fn reading_json(sensor: &str, ts: &str, temp: f64, rh: f64) -> String {
        serde_json::json!({
            "sensor_id": sensor,
            "timestamp": ts,
            "temperature_c": temp,
            "humidity_rh": rh,
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = create_test_state();
        let response = get(&state, "/api/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_ingest_reading_updates_state() {
        let state = create_test_state();
        let response = post_reading(
            &state,
            &reading_json("GH-001", "2024-05-01T12:00:00Z", 20.0, 60.0),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let json: serde_json::Value =
            serde_json::from_str(&response_body(response).await).unwrap();
        assert_eq!(json["accepted"], true);
        assert_eq!(json["sensor_id"], "GH-001");
        assert_eq!(json["status"], "OK");
        assert_eq!(json["derived"]["vpd_kpa"], 0.935);
        assert!(json.get("messages").is_none());

        let stored = state.store.get_state("GH-001").unwrap().unwrap();
        assert_eq!(stored.current_temp, Some(20.0));
        assert_eq!(stored.current_vpd, Some(0.935));
        assert_eq!(state.store.count_history(Some("GH-001")).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ingest_reading_with_alerts() {
        let state = create_test_state();
        let response = post_reading(
            &state,
            &reading_json("GH-002", "2024-05-01T12:00:00Z", 35.0, 30.0),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let json: serde_json::Value =
            serde_json::from_str(&response_body(response).await).unwrap();
        assert_eq!(json["status"], "ALERT");
        let messages = json["messages"].as_array().unwrap();
        assert!(messages.iter().any(|m| m == "High Temp Alert: 35.0C"));
        assert!(messages.iter().any(|m| m == "Low Humidity Alert: 30.0%"));

        let stored = state.store.get_state("GH-002").unwrap().unwrap();
        assert_eq!(stored.active_alerts.len(), messages.len());
    }

    #[tokio::test]
    async fn test_malformed_reading_is_accepted_and_dropped() {
        let state = create_test_state();

        for body in [
            "not json",
            r#"{"timestamp":"2024-05-01T12:00:00Z","temperature_c":20,"humidity_rh":50}"#,
            r#"{"sensor_id":"GH-001","timestamp":"2024-05-01T12:00:00Z","temperature_c":"warm","humidity_rh":50}"#,
        ] {
            let response = post_reading(&state, body).await;
            assert_eq!(response.status(), StatusCode::ACCEPTED);
            let json: serde_json::Value =
                serde_json::from_str(&response_body(response).await).unwrap();
            assert_eq!(json, serde_json::json!({"accepted": false}));
        }

        assert!(state.store.list_states().unwrap().is_empty());
        assert_eq!(state.store.count_history(None).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unstorable_timestamp_is_accepted_and_dropped() {
        let state = create_test_state();

        let body = reading_json("GH-001", "2300-01-01T00:00:00Z", 20.0, 50.0);
        let response = post_reading(&state, &body).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json: serde_json::Value =
            serde_json::from_str(&response_body(response).await).unwrap();
        assert_eq!(json, serde_json::json!({"accepted": false}));
        assert!(state.store.list_states().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_returns_503() {
        let failing = Arc::new(MemoryStateStore::new());
        failing.set_should_fail(true);
        let state = Arc::new(AppState {
            store: Arc::new(Store::open_in_memory().unwrap()),
            gateway: IngestionGateway::new(
                Thresholds::default(),
                failing,
                Arc::new(MemoryHistoryStore::new()),
            ),
        });

        let response = post_reading(
            &state,
            &reading_json("GH-001", "2024-05-01T12:00:00Z", 20.0, 60.0),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json: serde_json::Value =
            serde_json::from_str(&response_body(response).await).unwrap();
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_duplicate_delivery_keeps_one_history_record() {
        let state = create_test_state();
        let body = reading_json("GH-001", "2024-05-01T12:00:00Z", 20.0, 60.0);

        post_reading(&state, &body).await;
        let response = post_reading(&state, &body).await;
        let json: serde_json::Value =
            serde_json::from_str(&response_body(response).await).unwrap();
        assert_eq!(json["accepted"], true);
        assert_eq!(json["history_appended"], false);
        assert_eq!(state.store.count_history(Some("GH-001")).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_greenhouses() {
        let state = create_test_state();
        let response = get(&state, "/api/greenhouses").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_body(response).await, "[]");

        post_reading(&state, &reading_json("GH-A", "2024-05-01T12:00:00Z", 20.0, 60.0)).await;
        post_reading(&state, &reading_json("GH-B", "2024-05-01T12:00:00Z", 22.0, 55.0)).await;

        let response = get(&state, "/api/greenhouses").await;
        let json: serde_json::Value =
            serde_json::from_str(&response_body(response).await).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_get_greenhouse_not_found() {
        let state = create_test_state();
        let response = get(&state, "/api/greenhouses/GH-404").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json: serde_json::Value =
            serde_json::from_str(&response_body(response).await).unwrap();
        assert!(json["error"].as_str().unwrap().contains("GH-404"));
    }

    #[tokio::test]
    async fn test_get_greenhouse() {
        let state = create_test_state();
        post_reading(&state, &reading_json("GH-001", "2024-05-01T12:00:00Z", 20.0, 60.0)).await;

        let response = get(&state, "/api/greenhouses/GH-001").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value =
            serde_json::from_str(&response_body(response).await).unwrap();
        assert_eq!(json["sensor_id"], "GH-001");
        assert_eq!(json["status"], "OK");
        assert_eq!(json["last_reading_at"], "2024-05-01T12:00:00Z");
    }

    #[tokio::test]
    async fn test_history_newest_first_with_pagination() {
        let state = create_test_state();
        for minute in 0..3 {
            let ts = format!("2024-05-01T12:0{}:00Z", minute);
            post_reading(&state, &reading_json("GH-001", &ts, 20.0 + minute as f64, 60.0)).await;
        }

        let response = get(&state, "/api/greenhouses/GH-001/history?limit=2").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value =
            serde_json::from_str(&response_body(response).await).unwrap();

        let data = json["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["timestamp"], "2024-05-01T12:02:00Z");
        assert_eq!(data[1]["timestamp"], "2024-05-01T12:01:00Z");
        assert_eq!(json["pagination"]["count"], 2);
        assert_eq!(json["pagination"]["limit"], 2);
        assert_eq!(json["pagination"]["has_more"], true);

        let response = get(&state, "/api/greenhouses/GH-001/history?limit=2&offset=2").await;
        let json: serde_json::Value =
            serde_json::from_str(&response_body(response).await).unwrap();
        assert_eq!(json["data"][0]["timestamp"], "2024-05-01T12:00:00Z");
        assert_eq!(json["pagination"]["has_more"], false);
    }

    #[tokio::test]
    async fn test_history_time_range() {
        let state = create_test_state();
        for minute in 0..4 {
            let ts = format!("2024-05-01T12:0{}:00Z", minute);
            post_reading(&state, &reading_json("GH-001", &ts, 20.0, 60.0)).await;
        }

        let response = get(
            &state,
            "/api/greenhouses/GH-001/history?since=2024-05-01T12:01:00Z&until=2024-05-01T12:02:00Z",
        )
        .await;
        let json: serde_json::Value =
            serde_json::from_str(&response_body(response).await).unwrap();
        assert_eq!(json["pagination"]["count"], 2);
    }

    #[tokio::test]
    async fn test_history_invalid_params() {
        let state = create_test_state();

        let response = get(
            &state,
            "/api/greenhouses/GH-001/history?since=2024-05-02T00:00:00Z&until=2024-05-01T00:00:00Z",
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = get(&state, "/api/greenhouses/GH-001/history?since=yesterday").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = get(&state, "/api/greenhouses/GH-001/history?limit=0").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_history_bounds_outside_storable_range() {
        let state = create_test_state();

        for uri in [
            "/api/greenhouses/GH-001/history?since=2300-01-01T00:00:00Z",
            "/api/greenhouses/GH-001/history?until=1600-01-01T00:00:00Z",
        ] {
            let response = get(&state, uri).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            let body = response_body(response).await;
            assert!(body.contains("out of range"), "{body}");
        }
    }

    #[tokio::test]
    async fn test_history_unknown_sensor_is_empty() {
        let state = create_test_state();
        let response = get(&state, "/api/greenhouses/GH-404/history").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value =
            serde_json::from_str(&response_body(response).await).unwrap();
        assert_eq!(json["data"], serde_json::json!([]));
        assert_eq!(json["pagination"]["limit"], DEFAULT_HISTORY_LIMIT);
    }

    #[test]
    fn test_history_params_build_query() {
        let params = HistoryParams {
            since: Some("2024-05-01T00:00:00".to_string()),
            limit: Some(10),
            ..HistoryParams::default()
        };
        let query = params.to_query("GH-001").unwrap();
        assert_eq!(query.sensor_id.as_deref(), Some("GH-001"));
        assert_eq!(query.limit, Some(11));
        assert!(query.since.is_some());
        assert!(query.newest_first);
    }
}

// Copyright 2021 Datafuse Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Instant;

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use serde::Deserialize;

use crate::{
    error::AppError,
    flux::{self, TimeWindow},
};

use super::{
    responses::{AggregateResponse, MetricRecord, records_from_rows},
    state::{AppState, QueryDefaults},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(list_metrics))
        .route("/metrics/aggregate", get(aggregate_metric))
        .with_state(state)
        .layer(middleware::from_fn(log_requests))
}

// Parameters arrive as raw strings so a malformed integer produces this
// API's own 400, not the extractor's.
#[derive(Debug, Deserialize)]
struct MetricsParams {
    measurement: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AggregateParams {
    measurement: Option<String>,
    metric: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

async fn list_metrics(
    State(state): State<AppState>,
    Query(params): Query<MetricsParams>,
) -> Result<Json<Vec<MetricRecord>>, AppError> {
    let window = resolve_window(
        state.defaults(),
        params.start.as_deref(),
        params.end.as_deref(),
    )?;
    let measurement = resolve_measurement(state.defaults(), params.measurement.as_deref());
    let query = flux::list_query(state.bucket(), &measurement, &window);
    log::debug!(
        "list query (measurement={}, start={}m, end={}m): {}",
        measurement,
        window.start_minutes(),
        window.end_minutes(),
        query
    );
    let rows = state.store().query_rows(&query).await?;
    Ok(Json(records_from_rows(rows)))
}

async fn aggregate_metric(
    State(state): State<AppState>,
    Query(params): Query<AggregateParams>,
) -> Result<Json<AggregateResponse>, AppError> {
    let metric = params
        .metric
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::MissingParameter("metric parameter is required".into()))?;
    if !state.metric_allowed(metric) {
        return Err(AppError::InvalidParameter(format!(
            "metric `{metric}` is not an allowed metric"
        )));
    }
    let window = resolve_window(
        state.defaults(),
        params.start.as_deref(),
        params.end.as_deref(),
    )?;
    let measurement = resolve_measurement(state.defaults(), params.measurement.as_deref());
    let query = flux::mean_query(state.bucket(), &measurement, metric, &window);
    log::debug!(
        "aggregate query (measurement={}, metric={}, start={}m, end={}m): {}",
        measurement,
        metric,
        window.start_minutes(),
        window.end_minutes(),
        query
    );
    let rows = state.store().query_rows(&query).await?;
    // mean() collapses the window to one row per series; no rows means no
    // data in the window, which is not the same as a mean of zero.
    let row = rows.into_iter().next().ok_or_else(|| {
        AppError::NotFound(format!(
            "no data found for metric `{metric}` in the requested window"
        ))
    })?;
    Ok(Json(AggregateResponse { value: row.value }))
}

fn resolve_measurement(defaults: &QueryDefaults, raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| defaults.measurement.clone())
}

fn resolve_window(
    defaults: &QueryDefaults,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<TimeWindow, AppError> {
    let start = parse_minutes(start, defaults.start_minutes, "start")?;
    let end = parse_minutes(end, defaults.end_minutes, "end")?;
    TimeWindow::new(start, end)
}

fn parse_minutes(raw: Option<&str>, default: i64, field: &str) -> Result<i64, AppError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(default),
        Some(text) => text.parse::<i64>().map_err(|err| {
            AppError::InvalidParameter(format!("invalid {field} value `{text}`: {err}"))
        }),
    }
}

async fn log_requests(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();
    let response = next.run(req).await;
    let status = response.status();
    let elapsed = start.elapsed();
    log::info!(
        "method={} path={} status={} duration_ms={:.3}",
        method,
        uri.path(),
        status.as_u16(),
        elapsed.as_secs_f64() * 1000.0
    );
    response
}

#[cfg(test)]
mod tests {
    use super::{parse_minutes, resolve_measurement, resolve_window, router};
    use crate::{
        app::state::{AppState, QueryDefaults},
        error::AppError,
        influx::{MetricRow, MetricsStore, ScalarValue},
    };
    use async_trait::async_trait;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::DateTime;
    use http_body_util::BodyExt;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    struct StubStore {
        rows: Vec<MetricRow>,
        failure: Option<String>,
        queries: Arc<Mutex<Vec<String>>>,
    }

    impl StubStore {
        fn with_rows(rows: Vec<MetricRow>) -> Self {
            Self {
                rows,
                failure: None,
                queries: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn empty() -> Self {
            Self::with_rows(Vec::new())
        }

        fn failing(message: &str) -> Self {
            Self {
                rows: Vec::new(),
                failure: Some(message.to_string()),
                queries: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn queries(&self) -> Arc<Mutex<Vec<String>>> {
            self.queries.clone()
        }
    }

    #[async_trait]
    impl MetricsStore for StubStore {
        async fn query_rows(&self, flux: &str) -> Result<Vec<MetricRow>, AppError> {
            self.queries.lock().unwrap().push(flux.to_string());
            match &self.failure {
                Some(message) => Err(AppError::Internal(message.clone())),
                None => Ok(self.rows.clone()),
            }
        }
    }

    fn sample_row() -> MetricRow {
        MetricRow {
            time: DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap(),
            measurement: "system_metrics".to_string(),
            field: "cpu_usage_overall".to_string(),
            value: ScalarValue::Int(42),
        }
    }

    fn app(store: StubStore) -> Router {
        app_with_allowed(store, Vec::new())
    }

    fn app_with_allowed(store: StubStore, allowed_metrics: Vec<String>) -> Router {
        router(AppState::with_store(
            Arc::new(store),
            "rhtest",
            allowed_metrics,
        ))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap();
        (status, body)
    }

    #[test]
    fn window_defaults_apply() {
        let defaults = QueryDefaults::default();
        let window = resolve_window(&defaults, None, None).unwrap();
        assert_eq!(window.start_minutes(), 1);
        assert_eq!(window.end_minutes(), 0);
    }

    #[test]
    fn window_treats_empty_parameters_as_absent() {
        let defaults = QueryDefaults::default();
        let window = resolve_window(&defaults, Some(""), Some("  ")).unwrap();
        assert_eq!(window.start_minutes(), 1);
        assert_eq!(window.end_minutes(), 0);
    }

    #[test]
    fn window_accepts_zero_width() {
        let defaults = QueryDefaults::default();
        assert!(resolve_window(&defaults, Some("5"), Some("5")).is_ok());
    }

    #[test]
    fn window_rejects_inverted_bounds() {
        let defaults = QueryDefaults::default();
        assert!(matches!(
            resolve_window(&defaults, Some("1"), Some("5")),
            Err(AppError::InvalidWindow(_))
        ));
    }

    #[test]
    fn window_rejects_non_integer_bounds() {
        let defaults = QueryDefaults::default();
        assert!(matches!(
            resolve_window(&defaults, Some("abc"), None),
            Err(AppError::InvalidParameter(_))
        ));
        assert!(matches!(
            resolve_window(&defaults, None, Some("2.5")),
            Err(AppError::InvalidParameter(_))
        ));
    }

    #[test]
    fn parse_minutes_keeps_explicit_values() {
        assert_eq!(parse_minutes(Some("10"), 1, "start").unwrap(), 10);
        assert_eq!(parse_minutes(None, 1, "start").unwrap(), 1);
    }

    #[test]
    fn measurement_falls_back_to_default() {
        let defaults = QueryDefaults::default();
        assert_eq!(
            resolve_measurement(&defaults, None),
            "system_metrics"
        );
        assert_eq!(resolve_measurement(&defaults, Some("")), "system_metrics");
        assert_eq!(resolve_measurement(&defaults, Some("custom")), "custom");
    }

    #[tokio::test]
    async fn metrics_returns_rows_as_json() {
        let (status, body) = get(app(StubStore::with_rows(vec![sample_row()])), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([{
                "time": "2024-05-01T12:00:00Z",
                "measurement": "system_metrics",
                "field": "cpu_usage_overall",
                "value": 42,
            }])
        );
    }

    #[tokio::test]
    async fn metrics_returns_empty_array_when_store_has_no_rows() {
        let (status, body) = get(app(StubStore::empty()), "/metrics?start=10&end=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn metrics_rejects_non_integer_start() {
        let (status, body) = get(app(StubStore::empty()), "/metrics?start=abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid start value"));
    }

    #[tokio::test]
    async fn metrics_rejects_inverted_window() {
        let (status, body) = get(app(StubStore::empty()), "/metrics?start=1&end=5").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("start value"));
    }

    #[tokio::test]
    async fn metrics_accepts_zero_width_window() {
        let (status, _) = get(app(StubStore::empty()), "/metrics?start=5&end=5").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_queries_the_default_window() {
        let store = StubStore::empty();
        let queries = store.queries();
        let (status, _) = get(app(store), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        let queries = queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].contains("range(start: -1m, stop: -0m)"));
        assert!(queries[0].contains(r#"r["_measurement"] == "system_metrics""#));
    }

    #[tokio::test]
    async fn metrics_queries_the_requested_measurement() {
        let store = StubStore::empty();
        let queries = store.queries();
        get(app(store), "/metrics?measurement=docker_metrics&start=10&end=2").await;
        let queries = queries.lock().unwrap();
        assert!(queries[0].contains("range(start: -10m, stop: -2m)"));
        assert!(queries[0].contains(r#"r["_measurement"] == "docker_metrics""#));
    }

    #[tokio::test]
    async fn metrics_surfaces_store_failures_as_500() {
        let (status, body) = get(app(StubStore::failing("store unreachable")), "/metrics").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "store unreachable"}));
    }

    #[tokio::test]
    async fn aggregate_requires_metric() {
        let (status, body) = get(
            app(StubStore::empty()),
            "/metrics/aggregate?start=10&end=2",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "metric parameter is required"}));
    }

    #[tokio::test]
    async fn aggregate_rejects_empty_metric() {
        let (status, _) = get(app(StubStore::empty()), "/metrics/aggregate?metric=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn aggregate_rejects_bad_window_even_with_metric() {
        let (status, _) = get(
            app(StubStore::empty()),
            "/metrics/aggregate?metric=memory_usage&start=abc",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn aggregate_returns_404_when_store_has_no_rows() {
        let (status, body) = get(
            app(StubStore::empty()),
            "/metrics/aggregate?metric=memory_usage",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("no data found"));
    }

    #[tokio::test]
    async fn aggregate_returns_the_mean_scalar() {
        let mut row = sample_row();
        row.field = "memory_usage".to_string();
        row.value = ScalarValue::Float(42.0);
        let (status, body) = get(
            app(StubStore::with_rows(vec![row])),
            "/metrics/aggregate?metric=memory_usage&start=10&end=2",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"value": 42.0}));
    }

    #[tokio::test]
    async fn aggregate_queries_field_filter_and_mean() {
        let store = StubStore::empty();
        let queries = store.queries();
        get(
            app(store),
            "/metrics/aggregate?metric=memory_usage&start=10&end=2",
        )
        .await;
        let queries = queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].contains("range(start: -10m, stop: -2m)"));
        assert!(queries[0].contains(r#"r["_field"] == "memory_usage""#));
        assert!(queries[0].ends_with("|> mean()"));
    }

    #[tokio::test]
    async fn aggregate_surfaces_store_failures_as_500() {
        let (status, body) = get(
            app(StubStore::failing("store unreachable")),
            "/metrics/aggregate?metric=memory_usage",
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "store unreachable"}));
    }

    #[tokio::test]
    async fn aggregate_honors_the_allow_list() {
        let allowed = vec!["memory_usage".to_string(), "disk_read".to_string()];
        let (status, body) = get(
            app_with_allowed(StubStore::empty(), allowed.clone()),
            "/metrics/aggregate?metric=cpu_usage_overall",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("not an allowed metric"));

        let mut row = sample_row();
        row.field = "memory_usage".to_string();
        let (status, _) = get(
            app_with_allowed(StubStore::with_rows(vec![row]), allowed),
            "/metrics/aggregate?metric=memory_usage",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}

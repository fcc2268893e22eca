//! Request routing for plain HTTP requests.

use super::http::{content_type_for, HttpRequest, HttpResponse};
use crate::metrics::{MetricsAggregator, MetricsSummary, Timeseries};
use crate::status::StatusSnapshot;
use crate::types::WindowKey;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Shared state handed to every connection.
pub struct ApiState {
    pub metrics: Arc<MetricsAggregator>,
    /// Live status, present when the process runs a status monitor
    pub status: Option<watch::Receiver<StatusSnapshot>>,
    pub static_dir: Option<PathBuf>,
    pub push_interval: Duration,
    pub default_window: WindowKey,
}

impl ApiState {
    pub fn new(metrics: Arc<MetricsAggregator>, push_interval: Duration) -> Self {
        let default_window = metrics.config().default_window;
        Self {
            metrics,
            status: None,
            static_dir: None,
            push_interval,
            default_window,
        }
    }

    pub fn with_status(mut self, status: watch::Receiver<StatusSnapshot>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub time: DateTime<Utc>,
}

/// Server-to-client push on `/api/live`.
#[derive(Debug, Serialize)]
pub struct LiveSnapshot<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub summary: &'a MetricsSummary,
    pub timeseries: &'a Timeseries,
}

/// Compute the summary and a timeseries off the async runtime.
pub async fn compute_metrics(
    metrics: &Arc<MetricsAggregator>,
    window: WindowKey,
    step: Option<u64>,
) -> io::Result<(Arc<MetricsSummary>, Timeseries)> {
    let metrics = Arc::clone(metrics);
    tokio::task::spawn_blocking(move || {
        let summary = metrics.summary();
        let timeseries = metrics.timeseries(window, step);
        (summary, timeseries)
    })
    .await
    .map_err(io::Error::other)
}

/// The JSON text of a `{type:"snapshot"}` push for `window`.
pub async fn snapshot_message(
    metrics: &Arc<MetricsAggregator>,
    window: WindowKey,
) -> io::Result<String> {
    let (summary, timeseries) = compute_metrics(metrics, window, None).await?;
    let message = LiveSnapshot {
        kind: "snapshot",
        summary: &summary,
        timeseries: &timeseries,
    };
    serde_json::to_string(&message).map_err(io::Error::other)
}

/// Produce the response for a non-upgrade request.
pub async fn route(state: &ApiState, request: &HttpRequest) -> HttpResponse {
    if request.method != "GET" {
        return HttpResponse::method_not_allowed();
    }

    match request.path.as_str() {
        "/api/health" => HttpResponse::json(&HealthResponse {
            ok: true,
            time: Utc::now(),
        }),
        "/api/summary" => {
            let metrics = Arc::clone(&state.metrics);
            match tokio::task::spawn_blocking(move || metrics.summary()).await {
                Ok(summary) => HttpResponse::json(&*summary),
                Err(e) => {
                    tracing::error!(error = %e, "Summary computation failed");
                    HttpResponse::text(500, "internal server error")
                }
            }
        }
        "/api/timeseries" => timeseries(state, request).await,
        "/api/status" => match &state.status {
            Some(rx) => {
                let snapshot = rx.borrow().clone();
                HttpResponse::json(&snapshot)
            }
            None => HttpResponse::not_found(),
        },
        "/api/live" => HttpResponse::bad_request("expected a websocket upgrade"),
        path if path.starts_with("/api/") => HttpResponse::not_found(),
        path => match &state.static_dir {
            Some(dir) => serve_static(dir, path).await,
            None => HttpResponse::not_found(),
        },
    }
}

async fn timeseries(state: &ApiState, request: &HttpRequest) -> HttpResponse {
    let window = match request.query_param("window") {
        None | Some("") => state.default_window,
        Some(raw) => match raw.parse::<WindowKey>() {
            Ok(window) => window,
            Err(message) => return HttpResponse::bad_request(&message),
        },
    };
    let step = match request.query_param("step") {
        None | Some("") => None,
        Some(raw) => match raw.parse::<u64>() {
            Ok(step) => Some(step),
            Err(_) => return HttpResponse::bad_request("step must be a positive integer"),
        },
    };

    match compute_metrics(&state.metrics, window, step).await {
        Ok((_, series)) => HttpResponse::json(&series),
        Err(e) => {
            tracing::error!(error = %e, "Timeseries computation failed");
            HttpResponse::text(500, "internal server error")
        }
    }
}

/// Resolve a request path under `root`, refusing any `..` segment.
pub fn static_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = request_path.trim_start_matches('/');
    let relative = if relative.is_empty() {
        "index.html"
    } else {
        relative
    };

    let mut resolved = root.to_path_buf();
    for segment in relative.split('/') {
        match segment {
            ".." => return None,
            "" | "." => continue,
            s if s.contains('\\') || s.contains('\0') => return None,
            s => resolved.push(s),
        }
    }
    Some(resolved)
}

async fn serve_static(root: &Path, request_path: &str) -> HttpResponse {
    let Some(path) = static_path(root, request_path) else {
        return HttpResponse::not_found();
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => HttpResponse::new(200, content_type_for(&path), bytes),
        Err(_) => HttpResponse::not_found(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MetricsConfig, ProvidersConfig};
    use crate::server::http::parse_request;

    fn state() -> ApiState {
        let formats = crate::provider::formats_from_config(&ProvidersConfig {
            claude_code_path: Some(PathBuf::from("/nonexistent/claude")),
            codex_path: Some(PathBuf::from("/nonexistent/codex")),
            path_refresh_secs: 10,
        });
        let metrics = Arc::new(MetricsAggregator::new(formats, MetricsConfig::default()));
        ApiState::new(metrics, Duration::from_secs(5))
    }

    fn get(raw: &str) -> HttpRequest {
        let text = format!("{raw}\r\n\r\n");
        parse_request(text.as_bytes()).unwrap().unwrap().0
    }

    #[test]
    fn test_health_response_serialization() {
        let json = serde_json::to_value(HealthResponse {
            ok: true,
            time: Utc::now(),
        })
        .unwrap();
        assert_eq!(json["ok"], true);
        assert!(json["time"].is_string());
    }

    #[test]
    fn test_static_path_rejects_parent_segments() {
        let root = Path::new("/srv/dash");
        assert_eq!(static_path(root, "/"), Some(root.join("index.html")));
        assert_eq!(
            static_path(root, "/assets/app.js"),
            Some(root.join("assets").join("app.js"))
        );
        assert_eq!(static_path(root, "/../etc/passwd"), None);
        assert_eq!(static_path(root, "/assets/../../x"), None);
    }

    #[tokio::test]
    async fn test_method_and_unknown_routes() {
        let state = state();
        let post = parse_request(b"POST /api/summary HTTP/1.1\r\n\r\n")
            .unwrap()
            .unwrap()
            .0;
        assert_eq!(route(&state, &post).await.status, 405);
        assert_eq!(route(&state, &get("GET /api/nope HTTP/1.1")).await.status, 404);
        assert_eq!(route(&state, &get("GET /index.html HTTP/1.1")).await.status, 404);
        assert_eq!(route(&state, &get("GET /api/status HTTP/1.1")).await.status, 404);
    }

    #[tokio::test]
    async fn test_timeseries_query_validation() {
        let state = state();
        let bad = route(&state, &get("GET /api/timeseries?window=2h HTTP/1.1")).await;
        assert_eq!(bad.status, 400);
        let bad = route(&state, &get("GET /api/timeseries?step=abc HTTP/1.1")).await;
        assert_eq!(bad.status, 400);

        let ok = route(&state, &get("GET /api/timeseries?window=1h&step=600 HTTP/1.1")).await;
        assert_eq!(ok.status, 200);
        let json: serde_json::Value = serde_json::from_slice(&ok.body).unwrap();
        assert_eq!(json["window"], "1h");
        assert_eq!(json["stepSeconds"], 600);
        assert_eq!(json["points"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_status_route_serves_latest_snapshot() {
        let (tx, rx) = watch::channel(StatusSnapshot::default());
        let state = state().with_status(rx);
        tx.send_modify(|s| s.running_count = 2);

        let response = route(&state, &get("GET /api/status HTTP/1.1")).await;
        assert_eq!(response.status, 200);
        let json: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(json["runningCount"], 2);
    }

    #[tokio::test]
    async fn test_static_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>pulse</h1>").unwrap();
        let state = state().with_static_dir(Some(dir.path().to_path_buf()));

        let index = route(&state, &get("GET / HTTP/1.1")).await;
        assert_eq!(index.status, 200);
        assert_eq!(index.content_type, "text/html; charset=utf-8");
        assert_eq!(index.body, b"<h1>pulse</h1>");

        let missing = route(&state, &get("GET /app.js HTTP/1.1")).await;
        assert_eq!(missing.status, 404);
        let escape = route(&state, &get("GET /../secret HTTP/1.1")).await;
        assert_eq!(escape.status, 404);
    }
}

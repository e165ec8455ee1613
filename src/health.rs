//! Operational HTTP surface: liveness check and manual trigger.
//!
//! - `GET /health`: scheduler status snapshot plus a bounded store check;
//!   never waits on an in-progress run
//! - `POST /run`: run one check now; `409` if a run is already executing

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde::Serialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::TriggerError;
use crate::scheduler::{RunGate, SchedulerStatus};

const STORE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    store: StoreHealth,
    #[serde(flatten)]
    scheduler: SchedulerStatus,
}

#[derive(Serialize)]
pub struct StoreHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    items: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn router(gate: Arc<RunGate>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/run", post(trigger_handler))
        .with_state(gate)
}

/// Bind the endpoint's listener. Done before anything else starts so that an
/// address in use fails startup instead of a background task.
pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Health endpoint listening");
    Ok(listener)
}

/// Serve on `listener` until `shutdown` turns true.
pub async fn serve(
    listener: TcpListener,
    gate: Arc<RunGate>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, router(gate))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}

async fn health_handler(State(gate): State<Arc<RunGate>>) -> (StatusCode, Json<HealthResponse>) {
    let store = match tokio::time::timeout(STORE_CHECK_TIMEOUT, gate.detector().store().count()).await {
        Ok(Ok(items)) => StoreHealth {
            status: "ok".to_string(),
            items: Some(items),
            error: None,
        },
        Ok(Err(e)) => StoreHealth {
            status: "error".to_string(),
            items: None,
            error: Some(e.to_string()),
        },
        Err(_) => StoreHealth {
            status: "error".to_string(),
            items: None,
            error: Some(format!("store check timed out (>{}s)", STORE_CHECK_TIMEOUT.as_secs())),
        },
    };

    let healthy = store.status == "ok";
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            store,
            scheduler: gate.status(),
        }),
    )
}

async fn trigger_handler(State(gate): State<Arc<RunGate>>) -> (StatusCode, Json<Value>) {
    info!("Manual run requested");
    match gate.try_run().await {
        Ok(report) => (StatusCode::OK, Json(json!(report))),
        Err(TriggerError::Busy) => {
            warn!("Manual run rejected; a run is in progress");
            (
                StatusCode::CONFLICT,
                Json(json!({ "error": TriggerError::Busy.to_string() })),
            )
        }
        Err(e @ TriggerError::Run(_)) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": e.to_string() })),
        ),
        Err(e @ TriggerError::Aborted(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eligibility::EligibilityFilter;
    use crate::engine::ChangeDetector;
    use crate::engine::testing::{FakeSource, RecordingNotifier};
    use crate::extract::RegexExtractor;
    use crate::store::{RecordStore, SqliteRecordStore};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn gate(source: Arc<FakeSource>) -> Arc<RunGate> {
        let store = SqliteRecordStore::in_memory().await.unwrap();
        store.initialize().await.unwrap();
        let detector = ChangeDetector::new(
            source,
            Arc::new(store),
            Arc::new(RegexExtractor::default()),
            EligibilityFilter::new(4, None),
            Arc::new(RecordingNotifier::default()),
        );
        RunGate::new(Arc::new(detector))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_status() {
        let app = router(gate(Arc::new(FakeSource::default())).await);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["store"]["items"], 0);
        assert_eq!(json["running"], false);
        assert_eq!(json["runs_started"], 0);
    }

    #[tokio::test]
    async fn test_manual_run_returns_report() {
        let source = Arc::new(FakeSource::default());
        source.add("A", "https://x/a", "Age: 1 month\nGender: Female");
        let gate = gate(source).await;

        let response = router(gate.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/run")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["new_items"][0]["name"], "A");
        assert_eq!(gate.status().runs_completed, 1);
    }

    #[tokio::test]
    async fn test_bind_fails_when_address_is_taken() {
        let taken = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = taken.local_addr().unwrap();
        assert!(bind(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_serve_answers_until_shutdown() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let server = tokio::spawn(serve(
            listener,
            gate(Arc::new(FakeSource::default())).await,
            rx,
        ));

        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_manual_run_failure_is_bad_gateway() {
        let source = Arc::new(FakeSource::default());
        *source.listing_down.lock().unwrap() = true;
        let response = router(gate(source).await)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/run")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}

//! Web server implementation

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uiproof_common::Error;
use uiproof_engine::{Orchestrator, RunEvent};

/// Web server state
#[derive(Clone)]
pub struct WebServer {
    state: Arc<AppState>,
}

struct AppState {
    orchestrator: Orchestrator,
}

impl WebServer {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            state: Arc::new(AppState { orchestrator }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/health", get(health_handler))
            .route("/api/runs", post(start_run_handler).get(list_runs_handler))
            .route("/api/runs/:run_id", get(get_run_handler))
            .route("/api/runs/:run_id/status", get(run_status_handler))
            .route("/api/artifacts", get(list_artifacts_handler))
            .route("/api/artifacts/:id", get(download_artifact_handler))
            .route(
                "/api/artifacts/by-name/:filename",
                get(download_by_name_handler),
            )
            .route("/api/sweep", post(sweep_handler))
            .route("/api/events", get(events_handler))
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the web server
    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        info!("API listening on http://{}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

/// Engine errors mapped onto HTTP statuses
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            e if e.is_admission_rejection() => StatusCode::CONFLICT,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::InvalidRunId(_) | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": uiproof_common::VERSION,
        "busy": state.orchestrator.is_busy(),
    }))
}

/// Body of a start request: either a pre-built run id or the
/// module/scenario pair.
#[derive(Debug, Deserialize)]
struct StartRequest {
    run_id: Option<String>,
    module: Option<String>,
    scenario: Option<String>,
}

async fn start_run_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let receipt = match (&req.run_id, &req.module, &req.scenario) {
        (Some(run_id), _, _) => state.orchestrator.start_run_with_id(run_id)?,
        (None, Some(module), Some(scenario)) => state.orchestrator.start_run(module, scenario)?,
        _ => {
            return Err(Error::InvalidConfig(
                "either run_id or module and scenario are required".to_string(),
            )
            .into())
        }
    };
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

async fn list_runs_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.orchestrator.list_runs()?))
}

async fn get_run_handler(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.orchestrator.get_run(&run_id)?))
}

async fn run_status_handler(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.orchestrator.get_status(&run_id)?))
}

async fn list_artifacts_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.orchestrator.artifacts().list()?))
}

async fn download_artifact_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let (meta, payload) = state
        .orchestrator
        .artifacts()
        .get(&id)?
        .ok_or_else(|| Error::not_found("artifact", &id))?;
    Ok(artifact_response(meta.content_type, meta.filename, payload))
}

async fn download_by_name_handler(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let (meta, payload) = state
        .orchestrator
        .artifacts()
        .get_by_name(&filename)?
        .ok_or_else(|| Error::not_found("artifact", &filename))?;
    Ok(artifact_response(meta.content_type, meta.filename, payload))
}

fn artifact_response(content_type: String, filename: String, payload: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        payload,
    )
        .into_response()
}

#[derive(Debug, Serialize)]
struct SweepResponse {
    orphans_removed: usize,
    duplicates_removed: usize,
}

async fn sweep_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.orchestrator.sweep();
    Json(SweepResponse {
        orphans_removed: report.orphans_removed,
        duplicates_removed: report.duplicates_removed,
    })
}

async fn events_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let rx = state.orchestrator.events().subscribe();
    ws.on_upgrade(move |socket| stream_events(socket, rx))
}

/// Forward run events to one WebSocket client until either side drops.
async fn stream_events(mut socket: WebSocket, mut rx: broadcast::Receiver<RunEvent>) {
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else { continue };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Event subscriber lagged, {} events dropped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;
    use uiproof_common::{Database, Result};
    use uiproof_engine::{Actuator, ActuatorFactory, EngineConfig, PdfRenderer};

    /// No run is ever started in these tests
    struct NoBrowser;

    #[async_trait]
    impl ActuatorFactory for NoBrowser {
        async fn create(&self) -> Result<Box<dyn Actuator>> {
            Err(Error::Actuator("no browser in unit tests".to_string()))
        }
    }

    fn router() -> (Router, Orchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            store_path: dir.path().to_path_buf(),
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(
            config,
            Database::open_memory().unwrap(),
            Arc::new(NoBrowser),
            Arc::new(PdfRenderer),
        );
        let server = WebServer::new(orchestrator.clone());
        (server.router(), orchestrator)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_version_and_idle() {
        let (router, _) = router();
        let response = router
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["busy"], false);
    }

    #[tokio::test]
    async fn start_without_target_is_a_bad_request() {
        let (router, _) = router();
        let response = router
            .oneshot(
                Request::post("/api/runs")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_run_id_is_a_bad_request() {
        let (router, _) = router();
        let response = router
            .oneshot(
                Request::post("/api/runs")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"run_id":"notokens"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let (router, _) = router();
        let response = router
            .oneshot(
                Request::get("/api/runs/CTC110M_demo_1714000000/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn artifacts_download_with_headers() {
        let (router, orchestrator) = router();
        let id = orchestrator
            .artifacts()
            .put("report.pdf", "application/pdf", b"%PDF-1.4 data")
            .unwrap();

        let response = router
            .clone()
            .oneshot(
                Request::get(format!("/api/artifacts/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/pdf"
        );
        assert!(response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("report.pdf"));

        let by_name = router
            .oneshot(
                Request::get("/api/artifacts/by-name/report.pdf")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(by_name.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn sweep_on_a_clean_store_removes_nothing() {
        let (router, _) = router();
        let response = router
            .oneshot(Request::post("/api/sweep").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["orphans_removed"], 0);
        assert_eq!(json["duplicates_removed"], 0);
    }
}

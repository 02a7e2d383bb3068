//! REST API server for the bill splitter
//!
//! Each session is an independent in-memory `BillSession`. Its mutex is
//! released while the AI service works, so a second receipt or voice request
//! meets the session's busy flag instead of queueing on the lock. The AI call
//! and its completion run on their own task, so a dropped client connection
//! never leaves a session busy.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::SplitError;
use crate::ingestion::ReceiptExtractor;
use crate::media::{MediaPayload, DEFAULT_AUDIO_MIME, DEFAULT_IMAGE_MIME};
use crate::state::{BillSession, Completion, ToggleOutcome};
use crate::summary::{render_share_message, Summary};
use crate::voice::VoiceInterpreter;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ReceiptRequest {
    /// Data URI or bare base64
    pub image: String,
}

#[derive(Debug, Deserialize)]
pub struct VoiceRequest {
    /// Data URI or bare base64
    pub audio: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleRequest {
    pub item_id: String,
    pub person_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPersonRequest {
    pub name: String,
    pub mobile_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRequest {
    pub person_id: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn ok<T: Serialize>(data: T) -> ApiResult {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn failure(err: SplitError) -> ApiResult {
    let status = match &err {
        SplitError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        SplitError::InvalidTransition { .. } | SplitError::RequestInFlight => StatusCode::CONFLICT,
        SplitError::IngestionFailed(_) | SplitError::VoiceProcessingFailed(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        SplitError::InvalidInput(_) | SplitError::InvalidReceiptState(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        warn!(error = %err, "Request failed");
    }

    let message = err
        .retry_prompt()
        .map(|prompt| prompt.to_string())
        .unwrap_or_else(|| err.to_string());
    (status, Json(ApiResponse::error(message)))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    sessions: Arc<RwLock<HashMap<Uuid, Arc<Mutex<BillSession>>>>>,
    extractor: Arc<dyn ReceiptExtractor>,
    interpreter: Arc<dyn VoiceInterpreter>,
}

impl ApiState {
    pub fn new(extractor: Arc<dyn ReceiptExtractor>, interpreter: Arc<dyn VoiceInterpreter>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            extractor,
            interpreter,
        }
    }

    async fn session(&self, id: Uuid) -> crate::Result<Arc<Mutex<BillSession>>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&id)
            .cloned()
            .ok_or(SplitError::SessionNotFound(id))
    }
}

/// What clients see of a session
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionView<'a> {
    session_id: Uuid,
    busy: bool,
    unassigned_count: usize,
    #[serde(flatten)]
    state: &'a crate::models::BillState,
}

fn view(session: &BillSession) -> serde_json::Value {
    let view = SessionView {
        session_id: session.id(),
        busy: session.is_busy(),
        unassigned_count: session.unassigned_items().len(),
        state: session.state(),
    };
    serde_json::to_value(view).unwrap_or_default()
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Session Endpoints
/// =============================

async fn create_session(State(state): State<ApiState>) -> ApiResult {
    let session = BillSession::new();
    let id = session.id();
    let body = view(&session);

    state
        .sessions
        .write()
        .await
        .insert(id, Arc::new(Mutex::new(session)));

    info!(session_id = %id, "Session created");
    (StatusCode::CREATED, Json(ApiResponse::success(body)))
}

async fn get_session(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult {
    match state.session(id).await {
        Ok(session) => {
            let session = session.lock().await;
            ok(view(&session))
        }
        Err(e) => failure(e),
    }
}

async fn submit_receipt(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReceiptRequest>,
) -> ApiResult {
    let session = match state.session(id).await {
        Ok(session) => session,
        Err(e) => return failure(e),
    };

    let image = match MediaPayload::from_data_uri(&req.image, DEFAULT_IMAGE_MIME) {
        Ok(image) => image,
        Err(e) => return failure(e),
    };

    let ticket = match session.lock().await.begin_ingestion(image) {
        Ok(ticket) => ticket,
        Err(e) => return failure(e),
    };

    // Detached so the busy flag is cleared even if the client goes away
    let extractor = state.extractor.clone();
    let request = tokio::spawn(async move {
        let result = extractor.extract(&ticket.image).await;

        let mut session = session.lock().await;
        match session.complete_ingestion(ticket, result) {
            Ok(Completion::Applied(())) => ok(view(&session)),
            Ok(Completion::Discarded) => failure(SplitError::InvalidTransition {
                operation: "submit_image",
                step: session.step(),
            }),
            Err(e) => failure(e),
        }
    });

    join_request(id, request).await
}

/// Wait for a detached receipt or voice request
async fn join_request(id: Uuid, request: JoinHandle<ApiResult>) -> ApiResult {
    match request.await {
        Ok(response) => response,
        Err(e) => {
            error!(session_id = %id, error = %e, "Request task failed");
            failure(SplitError::LlmError(format!("request task failed: {}", e)))
        }
    }
}

async fn toggle_assignment(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ToggleRequest>,
) -> ApiResult {
    let session = match state.session(id).await {
        Ok(session) => session,
        Err(e) => return failure(e),
    };
    let mut session = session.lock().await;

    match session.toggle_assignment(&req.item_id, &req.person_id) {
        Ok(ToggleOutcome::UnknownItem) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Unknown item '{}'", req.item_id))),
        ),
        Ok(_) => ok(view(&session)),
        Err(e) => failure(e),
    }
}

async fn add_person(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AddPersonRequest>,
) -> ApiResult {
    let session = match state.session(id).await {
        Ok(session) => session,
        Err(e) => return failure(e),
    };
    let mut session = session.lock().await;

    let person_id = match session.add_person(&req.name) {
        Ok(person) => person.id.clone(),
        Err(e) => return failure(e),
    };
    if let Some(number) = req.mobile_number.as_deref() {
        if let Err(e) = session.set_mobile_number(&person_id, number) {
            return failure(e);
        }
    }

    (StatusCode::CREATED, Json(ApiResponse::success(view(&session))))
}

async fn set_host(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<HostRequest>,
) -> ApiResult {
    let session = match state.session(id).await {
        Ok(session) => session,
        Err(e) => return failure(e),
    };
    let mut session = session.lock().await;

    match session.set_host(&req.person_id) {
        Ok(()) => ok(view(&session)),
        Err(e) => failure(e),
    }
}

async fn voice_command(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<VoiceRequest>,
) -> ApiResult {
    let session = match state.session(id).await {
        Ok(session) => session,
        Err(e) => return failure(e),
    };

    let audio = match MediaPayload::from_data_uri(&req.audio, DEFAULT_AUDIO_MIME) {
        Ok(audio) => audio,
        Err(e) => return failure(e),
    };

    let ticket = match session.lock().await.begin_voice(audio) {
        Ok(ticket) => ticket,
        Err(e) => return failure(e),
    };

    let interpreter = state.interpreter.clone();
    let request = tokio::spawn(async move {
        let result = interpreter.interpret(&ticket.context, &ticket.audio).await;

        let mut session = session.lock().await;
        match session.complete_voice(ticket, result) {
            Ok(Completion::Applied(applied)) => {
                let mut body = view(&session);
                body["appliedUpdates"] = serde_json::json!(applied);
                ok(body)
            }
            Ok(Completion::Discarded) => failure(SplitError::InvalidTransition {
                operation: "voice_command",
                step: session.step(),
            }),
            Err(e) => failure(e),
        }
    });

    join_request(id, request).await
}

async fn finalize(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult {
    let session = match state.session(id).await {
        Ok(session) => session,
        Err(e) => return failure(e),
    };
    let mut session = session.lock().await;

    if let Err(e) = session.finalize() {
        return failure(e);
    }
    summary_response(&session)
}

async fn get_summary(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult {
    match state.session(id).await {
        Ok(session) => {
            let session = session.lock().await;
            summary_response(&session)
        }
        Err(e) => failure(e),
    }
}

fn summary_response(session: &BillSession) -> ApiResult {
    match Summary::from_session(session) {
        Ok(summary) => {
            let message = render_share_message(&summary, session);
            ok(serde_json::json!({
                "summary": summary,
                "shareMessage": message,
            }))
        }
        Err(e) => failure(e),
    }
}

async fn reset(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult {
    match state.session(id).await {
        Ok(session) => {
            let mut session = session.lock().await;
            session.reset();
            ok(view(&session))
        }
        Err(e) => failure(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/receipt", post(submit_receipt))
        .route("/api/sessions/:id/assignments/toggle", post(toggle_assignment))
        .route("/api/sessions/:id/people", post(add_person))
        .route("/api/sessions/:id/host", put(set_host))
        .route("/api/sessions/:id/voice", post(voice_command))
        .route("/api/sessions/:id/finalize", post(finalize))
        .route("/api/sessions/:id/summary", get(get_summary))
        .route("/api/sessions/:id/reset", post(reset))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(state: ApiState, port: u16) -> crate::Result<()> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::FixtureExtractor;
    use crate::models::ReceiptData;
    use crate::voice::FixtureInterpreter;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    const RECEIPT: &str = r#"{
        "merchantName": "Tiong Bahru Bakery",
        "date": "2024-05-01",
        "items": [
            { "name": "Coffee", "price": 10.0 },
            { "name": "Cake", "price": 6.0 }
        ],
        "subtotal": 16.0,
        "serviceCharge": 1.6,
        "gst": 1.44,
        "total": 19.04
    }"#;

    const IMAGE: &str = "data:image/jpeg;base64,aGVsbG8=";

    fn router(receipt: &str, voice: &str) -> Router {
        create_router(ApiState::new(
            Arc::new(FixtureExtractor::new(receipt)),
            Arc::new(FixtureInterpreter::new(voice)),
        ))
    }

    async fn call(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(json) => Body::from(json.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    async fn new_session(router: &Router) -> String {
        let (status, body) = call(router, "POST", "/api/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"]["sessionId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&router(RECEIPT, "{}"), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_full_flow_over_http() {
        let router = router(
            RECEIPT,
            r#"{"updates":[{"itemId":"item-0","assignedTo":["p2"]}]}"#,
        );
        let id = new_session(&router).await;

        let (status, body) = call(
            &router,
            "POST",
            &format!("/api/sessions/{}/receipt", id),
            Some(serde_json::json!({ "image": IMAGE })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["step"], "assign");
        assert_eq!(body["data"]["unassignedCount"], 2);

        for (item, person) in [("item-0", "p2"), ("item-0", "p3"), ("item-1", "p2")] {
            let (status, _) = call(
                &router,
                "POST",
                &format!("/api/sessions/{}/assignments/toggle", id),
                Some(serde_json::json!({ "itemId": item, "personId": person })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = call(
            &router,
            "POST",
            &format!("/api/sessions/{}/voice", id),
            Some(serde_json::json!({ "audio": "UklGRg==" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["appliedUpdates"], 1);

        let (status, body) = call(
            &router,
            "POST",
            &format!("/api/sessions/{}/finalize", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let message = body["data"]["shareMessage"].as_str().unwrap();
        assert!(message.contains("Alice owes $19.04"));
    }

    #[tokio::test]
    async fn test_bad_receipt_returns_retry_prompt() {
        let router = router("{\"nope\": true}", "{}");
        let id = new_session(&router).await;

        let (status, body) = call(
            &router,
            "POST",
            &format!("/api/sessions/{}/receipt", id),
            Some(serde_json::json!({ "image": IMAGE })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body["error"],
            "Failed to analyze receipt. Please try a clearer photo."
        );

        let (_, body) = call(&router, "GET", &format!("/api/sessions/{}", id), None).await;
        assert_eq!(body["data"]["step"], "upload");
        assert!(body["data"]["rawReceiptData"].is_null());
    }

    #[tokio::test]
    async fn test_unknown_session_and_wrong_step() {
        let router = router(RECEIPT, "{}");

        let (status, _) = call(
            &router,
            "GET",
            &format!("/api/sessions/{}", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let id = new_session(&router).await;
        let (status, _) = call(
            &router,
            "POST",
            &format!("/api/sessions/{}/finalize", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_add_person_and_host() {
        let router = router(RECEIPT, "{}");
        let id = new_session(&router).await;

        let (status, body) = call(
            &router,
            "POST",
            &format!("/api/sessions/{}/people", id),
            Some(serde_json::json!({ "name": "Dave", "mobileNumber": "98765432" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["people"][4]["id"], "p5");
        assert_eq!(body["data"]["people"][4]["mobileNumber"], "98765432");

        let (status, body) = call(
            &router,
            "PUT",
            &format!("/api/sessions/{}/host", id),
            Some(serde_json::json!({ "personId": "p5" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["hostPersonId"], "p5");
    }

    /// Extractor that takes a while before answering
    struct SlowExtractor {
        delay: Duration,
        inner: FixtureExtractor,
    }

    #[async_trait]
    impl ReceiptExtractor for SlowExtractor {
        async fn extract(&self, image: &MediaPayload) -> crate::Result<ReceiptData> {
            tokio::time::sleep(self.delay).await;
            self.inner.extract(image).await
        }
    }

    fn slow_router(delay_ms: u64) -> Router {
        create_router(ApiState::new(
            Arc::new(SlowExtractor {
                delay: Duration::from_millis(delay_ms),
                inner: FixtureExtractor::new(RECEIPT),
            }),
            Arc::new(FixtureInterpreter::new("{}")),
        ))
    }

    #[tokio::test]
    async fn test_abandoned_receipt_request_still_completes() {
        let router = slow_router(200);
        let id = new_session(&router).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            call(
                &router,
                "POST",
                &format!("/api/sessions/{}/receipt", id),
                Some(serde_json::json!({ "image": IMAGE })),
            ),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(500)).await;

        let (status, body) = call(&router, "GET", &format!("/api/sessions/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["step"], "assign");
        assert_eq!(body["data"]["busy"], false);

        // Session is usable again
        let (status, _) = call(
            &router,
            "POST",
            &format!("/api/sessions/{}/assignments/toggle", id),
            Some(serde_json::json!({ "itemId": "item-0", "personId": "p2" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_second_receipt_while_in_flight_conflicts() {
        let router = slow_router(200);
        let id = new_session(&router).await;
        let uri = format!("/api/sessions/{}/receipt", id);

        let first = tokio::spawn({
            let router = router.clone();
            let uri = uri.clone();
            async move {
                call(&router, "POST", &uri, Some(serde_json::json!({ "image": IMAGE }))).await
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (status, body) =
            call(&router, "POST", &uri, Some(serde_json::json!({ "image": IMAGE }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(
            body["error"],
            "Another receipt or voice request is already in flight"
        );

        let (_, body) = call(&router, "GET", &format!("/api/sessions/{}", id), None).await;
        assert_eq!(body["data"]["step"], "analyzing");
        assert_eq!(body["data"]["busy"], true);

        let (status, body) = first.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["step"], "assign");
        assert_eq!(body["data"]["busy"], false);
    }

    #[tokio::test]
    async fn test_failed_voice_keeps_assignments() {
        let router = router(RECEIPT, "not json");
        let id = new_session(&router).await;

        call(
            &router,
            "POST",
            &format!("/api/sessions/{}/receipt", id),
            Some(serde_json::json!({ "image": IMAGE })),
        )
        .await;
        call(
            &router,
            "POST",
            &format!("/api/sessions/{}/assignments/toggle", id),
            Some(serde_json::json!({ "itemId": "item-0", "personId": "p2" })),
        )
        .await;

        let (status, body) = call(
            &router,
            "POST",
            &format!("/api/sessions/{}/voice", id),
            Some(serde_json::json!({ "audio": "UklGRg==" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body["error"],
            "Failed to process voice command. Please try again."
        );

        let (_, body) = call(&router, "GET", &format!("/api/sessions/{}", id), None).await;
        assert_eq!(body["data"]["step"], "assign");
        assert_eq!(body["data"]["busy"], false);
        assert_eq!(
            body["data"]["rawReceiptData"]["items"][0]["assignedTo"],
            serde_json::json!(["p2"])
        );
        assert_eq!(
            body["data"]["rawReceiptData"]["items"][1]["assignedTo"],
            serde_json::json!([])
        );
    }

    #[tokio::test]
    async fn test_start_server_reports_port_in_use() {
        let held = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = held.local_addr().unwrap().port();

        let state = ApiState::new(
            Arc::new(FixtureExtractor::new(RECEIPT)),
            Arc::new(FixtureInterpreter::new("{}")),
        );
        let result = start_server(state, port).await;
        assert!(matches!(result, Err(SplitError::IoError(_))));
    }
}

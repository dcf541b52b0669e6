use anyhow::{Result, anyhow};
use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, get, post};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::advisor::Advisor;
use crate::advisor::banking::{NessieClient, NewBill, NewDeposit, NewPurchase, account_path};
use crate::advisor::chat::ChatRequest;
use crate::error::{AdvisorError, ProxyError};
use crate::payload::{self, Validate};
use crate::search::CarSearch;
use crate::types::{AgentEvent, CarSearchResult};

fn to_sse_event(event: &AgentEvent) -> Event {
    match event {
        AgentEvent::Thinking { turn } => Event::default()
            .event("thinking")
            .data(json!({ "turn": turn }).to_string()),
        AgentEvent::Step {
            number,
            description,
        } => Event::default()
            .event("step")
            .data(json!({ "number": number, "description": description }).to_string()),
        AgentEvent::StepError { message } => Event::default()
            .event("step_error")
            .data(json!({ "message": message }).to_string()),
        AgentEvent::TaskComplete { summary } => Event::default()
            .event("task_complete")
            .data(json!({ "summary": summary }).to_string()),
        AgentEvent::TaskError { message } => Event::default()
            .event("task_error")
            .data(json!({ "message": message }).to_string()),
    }
}

/// Which upstream services have credentials.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConfiguredKeys {
    pub gemini: bool,
    pub elevenlabs: bool,
    pub nessie: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub advisor: Arc<Advisor>,
    pub nessie: NessieClient,
    pub search: Arc<CarSearch>,
    pub event_tx: broadcast::Sender<AgentEvent>,
    pub keys: ConfiguredKeys,
}

impl IntoResponse for AdvisorError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdvisorError::InvalidSession | AdvisorError::NoMessage | AdvisorError::NoText => {
                StatusCode::BAD_REQUEST
            }
            AdvisorError::SessionNotFound => StatusCode::NOT_FOUND,
            AdvisorError::Speech(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ProxyError::InvalidPayload { kind, details } => (
                StatusCode::BAD_REQUEST,
                json!({ "error": format!("Invalid {kind} payload"), "details": details }),
            ),
            ProxyError::InvalidAccountId(_) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": self.to_string() }),
            ),
            ProxyError::NotConfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": self.to_string() }),
            ),
            ProxyError::Upstream { status, details } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                json!({ "error": "Upstream request failed", "status": status, "details": details }),
            ),
            ProxyError::Transport(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Upstream request failed", "details": format!("{e:#}") }),
            ),
            ProxyError::Chat(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Gemini request failed", "details": format!("{e:#}") }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Deserialize, Default)]
struct StartSessionPayload {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Deserialize)]
struct ChatPayload {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct SpeechPayload {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    voice_id: Option<String>,
}

#[derive(Deserialize)]
struct SessionPayload {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Deserialize)]
struct SearchPayload {
    budget: f64,
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/api/advisor/start-session", post(start_session_handler))
        .route("/api/advisor/chat", post(chat_handler))
        .route("/api/advisor/synthesize-speech", post(speech_handler))
        .route("/api/advisor/analyze-spending", post(analyze_handler))
        .route("/api/advisor/generate-goals", post(goals_handler))
        .route("/api/advisor/end-session", post(end_session_handler))
        .route("/api/advisor/car-recommendations", post(car_search_handler))
        .route("/api/advisor/events", get(sse_handler))
        .route("/api/health", get(|| async { Json(json!({ "ok": true })) }))
        .route("/api/customers", relay_get("/customers"))
        .route("/api/accounts", relay_get("/accounts"))
        .route("/api/accounts/{account_id}", get(account_handler))
        .route(
            "/api/accounts/{account_id}/purchases",
            get(list_purchases_handler).post(create_purchase_handler),
        )
        .route(
            "/api/accounts/{account_id}/deposits",
            get(list_deposits_handler).post(create_deposit_handler),
        )
        .route(
            "/api/accounts/{account_id}/bills",
            get(list_bills_handler).post(create_bill_handler),
        )
        .route("/api/merchants", relay_get("/merchants"))
        .route("/api/branches", relay_get("/branches"))
        .route("/api/atms", relay_get("/atms"))
        .route("/api/chat/completions", post(chat_completions_handler))
        .route(
            "/favicon.ico",
            get(|| async { StatusCode::NO_CONTENT }),
        ) // Silence 404
        .layer(cors_layer())
        .with_state(Arc::new(state))
}

/// Bind `port`, falling back to the next nine ports if it is taken, and
/// serve until the process stops.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = router(state);

    let mut listener = None;
    for p in port..port.saturating_add(10) {
        match tokio::net::TcpListener::bind(format!("0.0.0.0:{}", p)).await {
            Ok(l) => {
                listener = Some((l, p));
                break;
            }
            Err(_) => continue,
        }
    }
    let (listener, bound) = listener.ok_or_else(|| {
        anyhow!(
            "Could not bind to any port {}-{}. Stop the old server first.",
            port,
            port.saturating_add(9)
        )
    })?;

    info!("MoneyTalks Advisor API running at http://localhost:{}", bound);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_handler() -> Json<Value> {
    Json(json!({
        "message": "MoneyTalks Advisor API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "health": "/health",
            "start_session": "POST /api/advisor/start-session",
            "chat": "POST /api/advisor/chat",
            "synthesize_speech": "POST /api/advisor/synthesize-speech",
            "analyze_spending": "POST /api/advisor/analyze-spending",
            "generate_goals": "POST /api/advisor/generate-goals",
            "end_session": "POST /api/advisor/end-session",
            "car_recommendations": "POST /api/advisor/car-recommendations",
            "events": "GET /api/advisor/events",
            "banking": "GET /api/{customers,accounts,merchants,branches,atms}",
            "chat_completions": "POST /api/chat/completions",
        }
    }))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "gemini_configured": state.keys.gemini,
        "elevenlabs_configured": state.keys.elevenlabs,
        "nessie_configured": state.keys.nessie,
    }))
}

async fn start_session_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> impl IntoResponse {
    // The body is optional; anything unparseable means "default user".
    let payload: StartSessionPayload = serde_json::from_slice(&body).unwrap_or_default();
    info!("[web] POST /api/advisor/start-session");
    Json(state.advisor.start_session(payload.user_id).await)
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatPayload>,
) -> Result<impl IntoResponse, AdvisorError> {
    let session_id = payload.session_id.ok_or(AdvisorError::InvalidSession)?;
    let message = payload.message.unwrap_or_default();
    info!("[web] POST /api/advisor/chat ({})", session_id);
    Ok(Json(state.advisor.chat(&session_id, &message).await?))
}

async fn speech_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SpeechPayload>,
) -> Result<impl IntoResponse, AdvisorError> {
    let text = payload.text.unwrap_or_default();
    let audio = state
        .advisor
        .synthesize_speech(&text, payload.voice_id.as_deref())
        .await?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg")),
            (
                header::CONTENT_DISPOSITION,
                HeaderValue::from_static("inline; filename=\"speech.mp3\""),
            ),
        ],
        audio,
    ))
}

async fn analyze_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.advisor.analyze_spending().await)
}

async fn goals_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.advisor.generate_goals().await)
}

async fn end_session_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SessionPayload>,
) -> Result<impl IntoResponse, AdvisorError> {
    let session_id = payload.session_id.ok_or(AdvisorError::SessionNotFound)?;
    Ok(Json(state.advisor.end_session(&session_id).await?))
}

/// Pass a Nessie GET through unchanged.
fn relay_get(path: &'static str) -> MethodRouter<Arc<AppState>> {
    get(move |State(state): State<Arc<AppState>>| async move {
        relay(&state.nessie, path).await
    })
}

async fn relay(nessie: &NessieClient, path: &str) -> Result<Json<Value>, ProxyError> {
    Ok(Json(nessie.get_json(path).await?))
}

/// Validate a write, forward it, and answer 201 with Nessie's reply.
async fn create<T>(nessie: &NessieClient, path: &str, body: &[u8]) -> Result<Response, ProxyError>
where
    T: DeserializeOwned + Serialize + Validate,
{
    let payload: T = payload::parse(body)?;
    let data = nessie.post_json(path, &payload).await?;
    Ok((StatusCode::CREATED, Json(data)).into_response())
}

async fn account_handler(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Result<Json<Value>, ProxyError> {
    relay(&state.nessie, &account_path(&account_id, "")?).await
}

async fn list_purchases_handler(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Result<Json<Value>, ProxyError> {
    relay(&state.nessie, &account_path(&account_id, "/purchases")?).await
}

async fn create_purchase_handler(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let path = account_path(&account_id, "/purchases")?;
    create::<NewPurchase>(&state.nessie, &path, &body).await
}

async fn list_deposits_handler(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Result<Json<Value>, ProxyError> {
    relay(&state.nessie, &account_path(&account_id, "/deposits")?).await
}

async fn create_deposit_handler(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let path = account_path(&account_id, "/deposits")?;
    create::<NewDeposit>(&state.nessie, &path, &body).await
}

async fn list_bills_handler(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Result<Json<Value>, ProxyError> {
    relay(&state.nessie, &account_path(&account_id, "/bills")?).await
}

async fn create_bill_handler(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let path = account_path(&account_id, "/bills")?;
    create::<NewBill>(&state.nessie, &path, &body).await
}

async fn chat_completions_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ProxyError> {
    let request: ChatRequest = payload::parse(&body)?;
    info!("[web] POST /api/chat/completions ({} messages)", request.messages.len());
    let message = state.advisor.chat_completion(&request).await?;
    Ok(Json(json!({ "message": message })))
}

/// Response body the frontend expects for a car search.
pub fn car_search_body(budget: f64, result: &CarSearchResult) -> Value {
    let mut body = json!({
        "success": result.success,
        "budget": budget,
        "results": {
            "raw_text": result.raw_text,
            "recommendations": result.recommendations,
            "success": result.success,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });
    if let Some(error) = &result.error {
        body["error"] = json!(error);
    }
    body
}

async fn car_search_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SearchPayload>,
) -> Response {
    let budget = payload.budget;
    info!("[web] POST /api/advisor/car-recommendations (budget {})", budget);
    if !budget.is_finite() || budget <= 0.0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "budget must be a positive number" })),
        )
            .into_response();
    }

    // Own task so a stuck browser never holds up the connection handler.
    let search = Arc::clone(&state.search);
    let result = match tokio::spawn(async move { search.run(budget).await }).await {
        Ok(result) => result,
        Err(e) => {
            error!("[web] Car search task failed: {}", e);
            CarSearchResult::failed(format!("search task failed: {}", e))
        }
    };

    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(car_search_body(budget, &result))).into_response()
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<AgentEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(to_sse_event(&event))),
            Err(_) => None,
        });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

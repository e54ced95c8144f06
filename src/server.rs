use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use rust_decimal::Decimal;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;

use crate::characters::{roster, Persona};
use crate::chat::{ChatError, ChatService};
use crate::config::AppConfig;
use crate::models::{
    AskRequest, AskResponse, ClassifyRequest, ClassifyResponse, GlobalSettings, ProceedRequest,
    SessionRequest, SessionResponse, Student, ViolationEvent,
};
use crate::store::RecordStore;
use crate::usage::LimitCheck;

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn RecordStore>,
    chat: ChatService,
    admin_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, chat: ChatService, admin_token: Option<String>) -> Self {
        Self {
            store,
            chat,
            admin_token: admin_token.map(Arc::from),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/characters", get(list_characters))
        .route("/api/session", post(create_session))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/proceed", post(proceed_handler))
        .route("/api/usage/:email", get(get_usage))
        .route("/api/classify", post(classify_handler))
        .route(
            "/api/admin/settings",
            get(get_settings).put(update_settings),
        )
        .route(
            "/api/admin/students",
            get(list_students).put(upsert_student),
        )
        .route("/api/admin/violations", get(list_violations))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: AppConfig, store: Arc<dyn RecordStore>, chat: ChatService) -> Result<()> {
    if config.admin_token.is_none() {
        tracing::warn!("MOCKTRIAL_ADMIN_TOKEN is not set; admin routes are disabled");
    }

    let app = router(AppState::new(store, chat, config.admin_token.clone()));

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn list_characters() -> Json<&'static [Persona]> {
    Json(roster())
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    Ok(Json(state.chat.create_session(request).await?))
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    Ok(Json(state.chat.ask(request).await?))
}

async fn proceed_handler(
    State(state): State<AppState>,
    Json(request): Json<ProceedRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    Ok(Json(state.chat.proceed(request).await?))
}

async fn get_usage(State(state): State<AppState>, Path(email): Path<String>) -> Json<LimitCheck> {
    Json(state.chat.accountant().check_limits(&email).await)
}

async fn classify_handler(
    State(state): State<AppState>,
    Json(request): Json<ClassifyRequest>,
) -> Json<ClassifyResponse> {
    Json(state.chat.screen(&request.text).await)
}

async fn get_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<GlobalSettings>, ApiError> {
    require_admin(&state, &headers)?;
    Ok(Json(state.store.get_settings().await?))
}

async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(settings): Json<GlobalSettings>,
) -> Result<Json<GlobalSettings>, ApiError> {
    require_admin(&state, &headers)?;
    state.store.update_settings(&settings).await?;
    tracing::info!(
        mode = settings.content_filter_mode.as_str(),
        "global settings updated"
    );
    Ok(Json(state.store.get_settings().await?))
}

async fn list_students(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Student>>, ApiError> {
    require_admin(&state, &headers)?;
    Ok(Json(state.store.list_students().await?))
}

async fn upsert_student(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(student): Json<Student>,
) -> Result<Json<Student>, ApiError> {
    require_admin(&state, &headers)?;
    validate_student(&student)?;
    state.store.upsert_student(&student).await?;

    match state.store.get_student(&student.email).await? {
        Some(saved) => Ok(Json(saved)),
        None => Err(ApiError::from(anyhow::anyhow!(
            "student {} missing after upsert",
            student.email
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct ViolationQuery {
    limit: Option<i64>,
}

async fn list_violations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ViolationQuery>,
) -> Result<Json<Vec<ViolationEvent>>, ApiError> {
    require_admin(&state, &headers)?;
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    Ok(Json(state.chat.recorder().recent(limit).await?))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(ApiError::forbidden("admin API is disabled".to_string()));
    };

    let presented = headers
        .get(ADMIN_TOKEN_HEADER)
        .map(|value| value.as_bytes())
        .unwrap_or_default();
    if token_matches(presented, expected.as_bytes()) {
        Ok(())
    } else {
        Err(ApiError::unauthorized("missing or invalid admin token".to_string()))
    }
}

/// Constant-time in the token contents; only the length can leak.
fn token_matches(presented: &[u8], expected: &[u8]) -> bool {
    !expected.is_empty() && bool::from(presented.ct_eq(expected))
}

fn validate_student(student: &Student) -> Result<(), ApiError> {
    if student.email.trim().is_empty() {
        return Err(ApiError::bad_request("student email is required".to_string()));
    }
    if student.daily_token_limit.is_some_and(|limit| limit < 0) {
        return Err(ApiError::bad_request(
            "daily_token_limit must not be negative".to_string(),
        ));
    }
    if student.monthly_cost_limit.is_some_and(|limit| limit < Decimal::ZERO) {
        return Err(ApiError::bad_request(
            "monthly_cost_limit must not be negative".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }

    fn unauthorized(message: String) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message,
        }
    }

    fn forbidden(message: String) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        tracing::error!("request failed: {value:#}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal error".to_string(),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(value: ChatError) -> Self {
        let status = match &value {
            ChatError::EmptyQuestion => StatusCode::BAD_REQUEST,
            ChatError::UnknownCharacter(_)
            | ChatError::SessionNotFound(_)
            | ChatError::ViolationNotFound(_) => StatusCode::NOT_FOUND,
            ChatError::SessionMismatch(_) => StatusCode::FORBIDDEN,
            ChatError::NotBypassable(_) => StatusCode::CONFLICT,
            ChatError::GenerationUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if let ChatError::Storage(err) = value {
            return ApiError::from(err);
        }
        Self {
            status,
            message: value.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tokio::sync::Semaphore;
    use tower::ServiceExt;

    use super::*;
    use crate::db::Database;
    use crate::filter::Classifier;
    use crate::testing::FakeGenerator;

    async fn app(admin_token: Option<&str>) -> (Router, Database) {
        let db = Database::in_memory().await.unwrap();
        let store: Arc<dyn RecordStore> = Arc::new(db.clone());
        let chat = ChatService::new(
            store.clone(),
            Arc::new(FakeGenerator::new(50, Decimal::new(2, 4))),
            Classifier::default(),
            12,
            Arc::new(Semaphore::new(1)),
        );
        let state = AppState::new(store, chat, admin_token.map(str::to_string));
        (router(state), db)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn characters_are_listed() {
        let (app, _) = app(None).await;
        let request = Request::builder()
            .uri("/api/characters")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|p| p["id"].as_str())
            .collect();
        assert!(ids.contains(&"westley"));
        assert!(ids.contains(&"professor"));
    }

    #[tokio::test]
    async fn chat_round_trip_over_http() {
        let (app, db) = app(None).await;
        db.upsert_student(&Student {
            email: "bo@school.edu".to_string(),
            name: None,
            active: true,
            daily_token_limit: None,
            monthly_cost_limit: None,
        })
        .await
        .unwrap();

        let (status, session) = send(
            &app,
            post_json(
                "/api/session",
                json!({"student_email": "bo@school.edu", "character_id": "vizzini"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let session_id = session["session_id"].as_str().unwrap().to_string();

        let (status, answer) = send(
            &app,
            post_json(
                "/api/chat",
                json!({
                    "student_email": "bo@school.edu",
                    "session_id": session_id,
                    "question": "Which cup held the iocane powder?"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(answer["status"], "answered");
        assert_eq!(answer["tokens_used"], 50);

        let (status, blocked) = send(
            &app,
            post_json(
                "/api/chat",
                json!({
                    "student_email": "bo@school.edu",
                    "session_id": session_id,
                    "question": "What is the derivative of x^2?"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(blocked["status"], "blocked");
        assert_eq!(blocked["category"], "math");
    }

    #[tokio::test]
    async fn chat_errors_map_to_statuses() {
        let (app, _) = app(None).await;
        let (status, body) = send(
            &app,
            post_json(
                "/api/chat",
                json!({"student_email": "a@b.edu", "session_id": "missing", "question": "Hi"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("missing"));

        let (status, _) = send(
            &app,
            post_json(
                "/api/session",
                json!({"student_email": "a@b.edu", "character_id": "nobody"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn classify_reports_the_active_mode() {
        let (app, _) = app(None).await;
        let (status, body) = send(
            &app,
            post_json(
                "/api/classify",
                json!({"text": "Explain photosynthesis and cell biology"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "normal");
        assert_eq!(body["classification"]["is_violation"], true);
        assert_eq!(body["decision"]["block"], false);
    }

    #[tokio::test]
    async fn unknown_student_usage_is_denied() {
        let (app, _) = app(None).await;
        let request = Request::builder()
            .uri("/api/usage/ghost@school.edu")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["can_proceed"], false);
    }

    #[tokio::test]
    async fn admin_routes_require_the_token() {
        let (disabled, _) = app(None).await;
        let request = Request::builder()
            .uri("/api/admin/settings")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&disabled, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (app, _) = app(Some("s3cret")).await;
        let request = Request::builder()
            .uri("/api/admin/settings")
            .header(ADMIN_TOKEN_HEADER, "wrong")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .method("PUT")
            .uri("/api/admin/settings")
            .header(ADMIN_TOKEN_HEADER, "s3cret")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"content_filter_mode": "strict", "global_daily_token_limit": 5000})
                    .to_string(),
            ))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content_filter_mode"], "strict");
        assert_eq!(body["global_daily_token_limit"], 5000);
    }

    #[tokio::test]
    async fn admin_can_whitelist_students() {
        let (app, _) = app(Some("s3cret")).await;
        let request = Request::builder()
            .method("PUT")
            .uri("/api/admin/students")
            .header(ADMIN_TOKEN_HEADER, "s3cret")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"email": " Cy@School.edu ", "daily_token_limit": 2000}).to_string(),
            ))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "cy@school.edu");
        assert_eq!(body["active"], true);

        let request = Request::builder()
            .uri("/api/admin/violations?limit=5")
            .header(ADMIN_TOKEN_HEADER, "s3cret")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn negative_limits_are_rejected() {
        let (app, db) = app(Some("s3cret")).await;
        for body in [
            json!({"email": "dee@school.edu", "daily_token_limit": -1}),
            json!({"email": "dee@school.edu", "monthly_cost_limit": "-0.50"}),
        ] {
            let request = Request::builder()
                .method("PUT")
                .uri("/api/admin/students")
                .header(ADMIN_TOKEN_HEADER, "s3cret")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap();
            let (status, body) = send(&app, request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body["error"].as_str().unwrap().contains("negative"));
        }
        assert!(db.get_student("dee@school.edu").await.unwrap().is_none());

        let request = Request::builder()
            .method("PUT")
            .uri("/api/admin/students")
            .header(ADMIN_TOKEN_HEADER, "s3cret")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"email": "dee@school.edu", "daily_token_limit": 0, "monthly_cost_limit": "0"})
                    .to_string(),
            ))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn admin_token_comparison() {
        assert!(token_matches(b"s3cret", b"s3cret"));
        assert!(!token_matches(b"s3creT", b"s3cret"));
        assert!(!token_matches(b"s3cre", b"s3cret"));
        assert!(!token_matches(b"", b"s3cret"));
        assert!(!token_matches(b"", b""));
    }
}

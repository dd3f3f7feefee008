//! Axum HTTP boundary.
//!
//! Handlers are thin: parse the body, resolve the acting identity from the
//! bearer token, call into a store, and let `ApiError`'s `IntoResponse`
//! shape the wire response. All cross-request state lives in the database;
//! the shared `AppState` holds only immutable handles.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::auth::{NewUser, TokenKeys, User, UserStore};
use crate::config::Config;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::identify::{Classifier, Identification};
use crate::sightings::{NewSighting, Sighting, SightingStore};

/// Maximum JSON request body size (64KB).
pub const MAX_BODY_SIZE: usize = 65_536;
/// Maximum photo upload size for /identify (10MB).
pub const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;
/// Request timeout — also bounds the outbound classifier call.
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Shared state for all axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserStore>,
    pub sightings: Arc<SightingStore>,
    pub tokens: Arc<TokenKeys>,
    pub classifier: Arc<Classifier>,
}

/// Run the HTTP server until the listener fails or the process is killed.
pub async fn run(config: Config) -> Result<()> {
    let pool = db::open_pool(&config.database.path)?;
    let state = AppState {
        users: Arc::new(UserStore::new(pool.clone(), config.auth.password.clone())),
        sightings: Arc::new(SightingStore::new(pool)),
        tokens: Arc::new(TokenKeys::new(
            &config.auth.token_secret,
            config.auth.token_ttl_minutes * 60,
        )),
        classifier: Arc::new(Classifier::new(&config.classifier)?),
    };
    if config.classifier.api_key.is_empty() {
        tracing::warn!("classifier API key is not set — /identify will fail upstream");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "lifelist listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Resolves on Ctrl-C, letting in-flight requests drain before exit.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "failed to listen for shutdown signal"),
    }
}

/// Build the router. Split out from `run` so tests can drive it directly.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(handle_health))
        .route("/auth/register", post(handle_register))
        .route("/auth/login", post(handle_login))
        .route("/users/me", get(handle_me).put(handle_update_me))
        .route(
            "/identify",
            post(handle_identify).layer(DefaultBodyLimit::max(MAX_IMAGE_SIZE)),
        )
        .route(
            "/sightings",
            post(handle_sighting_create).get(handle_sighting_list),
        )
        .route(
            "/sightings/{id}",
            get(handle_sighting_get).delete(handle_sighting_delete),
        )
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Extract the bearer token from the Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Resolve the acting user id from the bearer token. Every token failure
/// collapses into the same unauthenticated outcome; re-evaluated on every
/// request, never cached.
fn require_identity(state: &AppState, headers: &HeaderMap) -> ApiResult<String> {
    let token = extract_bearer_token(headers)
        .ok_or_else(|| ApiError::Auth("missing bearer token".into()))?;
    state
        .tokens
        .verify(token)
        .map_err(|e| ApiError::Auth(e.to_string()))
}

fn reject_body(rejection: JsonRejection) -> ApiError {
    ApiError::invalid("body", rejection.body_text())
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /health — liveness probe, public.
async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /auth/register
async fn handle_register(
    State(state): State<AppState>,
    body: Result<Json<NewUser>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let Json(new_user) = body.map_err(reject_body)?;
    let user = state.users.register(&new_user)?;
    tracing::info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Deserialize)]
struct LoginBody {
    username_or_email: String,
    password: String,
}

#[derive(Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
}

/// POST /auth/login
async fn handle_login(
    State(state): State<AppState>,
    body: Result<Json<LoginBody>, JsonRejection>,
) -> ApiResult<Json<TokenResponse>> {
    let Json(login) = body.map_err(reject_body)?;
    let user = state
        .users
        .authenticate(&login.username_or_email, &login.password)?;
    let access_token = state.tokens.issue(&user.id)?;
    tracing::info!(user_id = %user.id, "login succeeded");
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
    }))
}

/// GET /users/me
async fn handle_me(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<User>> {
    let user_id = require_identity(&state, &headers)?;
    let user = state
        .users
        .get(&user_id)?
        .ok_or_else(|| ApiError::Auth("token subject no longer exists".into()))?;
    Ok(Json(user))
}

#[derive(Deserialize)]
struct ProfileUpdate {
    #[serde(default)]
    orcid_id: Option<String>,
}

/// PUT /users/me — profile update, external identifier only.
async fn handle_update_me(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ProfileUpdate>, JsonRejection>,
) -> ApiResult<Json<User>> {
    let user_id = require_identity(&state, &headers)?;
    let Json(update) = body.map_err(reject_body)?;
    let user = state
        .users
        .update_profile(&user_id, update.orcid_id.as_deref())?;
    Ok(Json(user))
}

/// POST /identify — multipart photo in, species suggestion out.
/// Delegates entirely to the external classifier; no persistence.
async fn handle_identify(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<Identification>> {
    require_identity(&state, &headers)?;

    let mut image: Option<(Vec<u8>, String)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::invalid("file", e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let mime_type = field.content_type().unwrap_or("").to_owned();
        if !mime_type.starts_with("image/") {
            return Err(ApiError::invalid("file", "upload must be an image"));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::invalid("file", e.to_string()))?;
        image = Some((bytes.to_vec(), mime_type));
        break;
    }

    let (bytes, mime_type) =
        image.ok_or_else(|| ApiError::invalid("file", "missing image part named 'file'"))?;
    let identification = state.classifier.identify(&bytes, &mime_type).await?;
    Ok(Json(identification))
}

/// POST /sightings
async fn handle_sighting_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<NewSighting>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Sighting>)> {
    let owner = require_identity(&state, &headers)?;
    let Json(new_sighting) = body.map_err(reject_body)?;
    let sighting = state.sightings.create(&owner, &new_sighting)?;
    Ok((StatusCode::CREATED, Json(sighting)))
}

/// GET /sightings — owner-scoped, newest observation first.
async fn handle_sighting_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Sighting>>> {
    let owner = require_identity(&state, &headers)?;
    Ok(Json(state.sightings.list(&owner)?))
}

/// GET /sightings/{id}
async fn handle_sighting_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Sighting>> {
    let owner = require_identity(&state, &headers)?;
    Ok(Json(state.sightings.get(&owner, &id)?))
}

/// DELETE /sightings/{id}
async fn handle_sighting_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let owner = require_identity(&state, &headers)?;
    state.sightings.delete(&owner, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(extract_bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn json_body_limit_fits_a_sighting_but_not_a_photo() {
        assert!(MAX_BODY_SIZE >= 4096);
        assert!(MAX_IMAGE_SIZE > MAX_BODY_SIZE);
    }
}

use axum::extract::{DefaultBodyLimit, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::warn;
use time::OffsetDateTime;
use tower_http::cors::{Any, CorsLayer};

use crate::api_types::{HealthResponse, ModelsResponse, StoreStatus};
use crate::errors::{AuthError, StoreError};
use crate::keystore::{check_expiry, CredentialRecord};
use crate::state::AppState;

pub mod process;
pub mod record;

/// Header carrying the caller's credential ID.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Uploads can exceed axum's 2 MiB default body cap.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

async fn health(State(app_state): State<AppState>) -> Json<HealthResponse> {
    let status = if app_state.store.test_connection().await {
        StoreStatus::Connected
    } else {
        StoreStatus::Disconnected
    };

    Json(HealthResponse { status })
}

async fn models(State(app_state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        supported_models: vec![app_state.model.clone()],
        current_model: app_state.model.clone(),
    })
}

/// Resolve the caller's key header to a valid credential record, or the
/// reason it is not one. Every authenticated route funnels through here.
pub(crate) async fn authenticate(
    app_state: &AppState,
    headers: &HeaderMap,
) -> Result<CredentialRecord, AuthError> {
    let key = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or(AuthError::MissingKey)?;

    let record = app_state
        .store
        .fetch_record(key)
        .await
        .map_err(|err| match err {
            StoreError::NotFound => AuthError::InvalidKey,
            StoreError::Unreachable(detail) => {
                warn!("record store unreachable: {detail}");
                AuthError::StoreUnreachable
            }
            StoreError::Store { status, detail } => {
                warn!("record store error {status}: {detail}");
                AuthError::StoreUnreachable
            }
        })?;

    check_expiry(&record, OffsetDateTime::now_utc())?;

    Ok(record)
}

/// Main router for the application, with all API and health endpoints attached
pub fn app_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/models", get(models))
        .route("/process-image", post(process::process_image))
        .route("/record-info", get(record::record_info))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        //
        // Enable all of the CORS flags
        //
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
}

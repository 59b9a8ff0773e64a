use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use crate::errors::ApiError;
use crate::keystore::CredentialRecord;
use crate::state::AppState;

use super::authenticate;

/// Full credential record for the caller's own key, unknown store fields
/// included.
#[axum::debug_handler]
pub async fn record_info(
    State(app_state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CredentialRecord>, ApiError> {
    let record = authenticate(&app_state, &headers).await?;

    Ok(Json(record))
}

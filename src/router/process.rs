use axum::extract::{Multipart, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use log::info;

use crate::errors::{ApiError, UploadError};
use crate::state::AppState;

use super::authenticate;

/// Informational passthrough of the record's stored usage count. This service
/// never increments it; that stays with the store's own callers.
pub const USAGE_COUNT_HEADER: &str = "x-usage-count";

#[axum::debug_handler]
pub async fn process_image(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let record = authenticate(&app_state, &headers).await?;

    let mut file: Option<(Vec<u8>, Option<String>)> = None;
    let mut prompt: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| UploadError::Malformed(err.to_string()))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let content_type = field.content_type().map(str::to_owned);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| UploadError::Malformed(err.to_string()))?;
                file = Some((bytes.to_vec(), content_type));
            }
            Some("prompt") => {
                prompt = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| UploadError::Malformed(err.to_string()))?,
                );
            }
            _ => {}
        }
    }

    let (image, content_type) = file.ok_or(UploadError::MissingField("file"))?;
    let prompt = prompt.ok_or(UploadError::MissingField("prompt"))?;

    // Reject before spending an upstream call on a payload the model can't use.
    let declared_image = content_type
        .as_deref()
        .map(|ct| ct.starts_with("image/"))
        .unwrap_or(false);
    if !declared_image {
        return Err(UploadError::NotAnImage.into());
    }

    info!(
        "processing upload: {} bytes, prompt {} chars, key {}",
        image.len(),
        prompt.len(),
        record.id
    );

    let generated = app_state.generator.process_image(&image, &prompt).await?;

    info!(
        "returning generated {} image, {} bytes",
        generated.format,
        generated.bytes.len()
    );

    let headers = [
        (CONTENT_TYPE, format!("image/{}", generated.format)),
        (
            CONTENT_DISPOSITION,
            format!("inline; filename=generated_image.{}", generated.format),
        ),
        (CACHE_CONTROL, "no-cache".to_owned()),
        (
            HeaderName::from_static(USAGE_COUNT_HEADER),
            record.count.to_string(),
        ),
    ];

    Ok((StatusCode::OK, headers, generated.bytes).into_response())
}

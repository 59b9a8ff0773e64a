//! Outbound call to the image-generating chat-completions endpoint, and the
//! extraction of the generated image from its response.
//!
//! The upstream response shape is not a stable, versioned schema: models that
//! emit images nest them in whichever sibling field of the message happens to
//! carry them. Extraction therefore probes a [serde_json::Value] tree instead
//! of deserializing into fixed structs. See [find_data_uri] for the probe
//! order.

use std::time::Duration;

use axum::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::errors::InferenceError;

/// Bound on the single upstream attempt. There is no retry.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Attribution headers the upstream uses for app rankings.
const REFERER: &str = "https://localhost:8000";
const TITLE: &str = "Image Processing API";

/// An image recovered from the upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    /// MIME subtype from the data-URI, e.g. "png".
    pub format: String,
    pub bytes: Vec<u8>,
}

/// ImageGenerator is the trait for types that can turn an uploaded image plus
/// a prompt into a newly generated image.
#[async_trait]
pub trait ImageGenerator {
    async fn process_image(
        &self,
        image: &[u8],
        prompt: &str,
    ) -> Result<GeneratedImage, InferenceError>;
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

/// Client for an OpenRouter-style chat-completions endpoint.
pub struct OpenRouteClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenRouteClient {
    pub fn new(base_url: String, api_key: String, model: String) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(OpenRouteClient {
            http,
            base_url,
            api_key,
            model,
        })
    }

    fn build_request(&self, image: &[u8], prompt: &str) -> ChatRequest {
        // The wording matters: without the explicit instruction the model
        // tends to answer with a textual description instead of an image.
        let text = format!(
            "GENERATE IMAGE: {prompt}. Please create and return the actual \
             image data/file, not just a description."
        );
        let data_uri = format!("data:image/png;base64,{}", BASE64.encode(image));

        ChatRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user",
                content: vec![
                    ContentPart::Text { text },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_uri },
                    },
                ],
            }],
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

#[async_trait]
impl ImageGenerator for OpenRouteClient {
    async fn process_image(
        &self,
        image: &[u8],
        prompt: &str,
    ) -> Result<GeneratedImage, InferenceError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = self.build_request(image, prompt);

        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE)
            .json(&body)
            .send()
            .await
            .map_err(|err| InferenceError::Unavailable(err.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            // The body may carry upstream internals; log it, never forward it.
            let detail = resp.text().await.unwrap_or_default();
            warn!("inference endpoint returned {status}: {detail}");
            return Err(InferenceError::NonSuccess {
                status: status.as_u16(),
            });
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|err| InferenceError::Unavailable(err.to_string()))?;

        log_token_usage(&payload);
        extract_image(&payload)
    }
}

/// Token figures are informational only; they never affect control flow.
fn log_token_usage(payload: &Value) {
    if let Some(usage) = payload.get("usage") {
        let tokens = |key: &str| usage.get(key).and_then(Value::as_i64).unwrap_or(0);
        info!(
            "token usage: prompt={} completion={} total={}",
            tokens("prompt_tokens"),
            tokens("completion_tokens"),
            tokens("total_tokens")
        );
    }
}

/// Pull the first embedded image out of a chat-completion payload.
pub(crate) fn extract_image(payload: &Value) -> Result<GeneratedImage, InferenceError> {
    let message = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"));

    let uri = message
        .and_then(find_data_uri)
        .ok_or(InferenceError::NoImageProduced)?;

    decode_data_uri(uri)
}

/// Locate a `data:image/...` URI inside the message. Probe order:
///
/// 1. the `images` field, when it is a list;
/// 2. every other list-valued field except `content` and `role`.
///
/// Within each list entry: `image_url.url`, then `url`, then the entry itself
/// as a bare string. The first hit wins; any further images in the response
/// are dropped.
fn find_data_uri(message: &Value) -> Option<&str> {
    let message = message.as_object()?;

    if let Some(found) = message
        .get("images")
        .and_then(Value::as_array)
        .and_then(|entries| scan_entries(entries))
    {
        return Some(found);
    }

    for (key, value) in message {
        if key == "content" || key == "role" || key == "images" {
            continue;
        }
        if let Some(found) = value.as_array().and_then(|entries| scan_entries(entries)) {
            return Some(found);
        }
    }

    None
}

fn scan_entries(entries: &[Value]) -> Option<&str> {
    entries.iter().find_map(entry_data_uri)
}

fn entry_data_uri(entry: &Value) -> Option<&str> {
    let candidate = match entry {
        Value::Object(obj) => obj
            .get("image_url")
            .and_then(|nested| match nested {
                Value::Object(inner) => inner.get("url").and_then(Value::as_str),
                Value::String(url) => Some(url.as_str()),
                _ => None,
            })
            .or_else(|| obj.get("url").and_then(Value::as_str)),
        Value::String(raw) => Some(raw.as_str()),
        _ => None,
    };

    candidate
        .map(str::trim)
        .filter(|uri| uri.starts_with("data:image/"))
}

/// Split a data-URI on its first comma and decode the base64 payload. The
/// MIME subtype becomes the image format, defaulting to "png" when absent.
pub(crate) fn decode_data_uri(uri: &str) -> Result<GeneratedImage, InferenceError> {
    let (meta, data) = uri
        .split_once(',')
        .ok_or_else(|| InferenceError::MalformedImageData("missing data separator".to_owned()))?;

    let format = meta
        .strip_prefix("data:image/")
        .and_then(|rest| rest.split(';').next())
        .filter(|subtype| !subtype.is_empty())
        .unwrap_or("png")
        .to_owned();

    let bytes = BASE64
        .decode(data.trim().as_bytes())
        .map_err(|err| InferenceError::MalformedImageData(err.to_string()))?;

    Ok(GeneratedImage { format, bytes })
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    fn completion_with_message(message: Value) -> Value {
        json!({
            "id": "gen-123",
            "choices": [{ "finish_reason": "stop", "message": message }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        })
    }

    #[test]
    pub fn extracts_from_images_field() {
        let payload = completion_with_message(json!({
            "role": "assistant",
            "content": "Here you go",
            "images": [
                { "image_url": { "url": format!("data:image/png;base64,{}", BASE64.encode(b"pixels")) } }
            ]
        }));

        let image = extract_image(&payload).unwrap();
        assert_eq!(image.format, "png");
        assert_eq!(image.bytes, b"pixels");
    }

    #[test]
    pub fn probes_sibling_fields_when_images_is_absent() {
        let payload = completion_with_message(json!({
            "role": "assistant",
            "content": "done",
            "attachments": [
                { "url": format!("data:image/webp;base64,{}", BASE64.encode(b"webp-bytes")) }
            ]
        }));

        let image = extract_image(&payload).unwrap();
        assert_eq!(image.format, "webp");
        assert_eq!(image.bytes, b"webp-bytes");
    }

    #[test]
    pub fn accepts_bare_string_entries() {
        let payload = completion_with_message(json!({
            "role": "assistant",
            "content": "",
            "images": [format!("data:image/jpeg;base64,{}", BASE64.encode(b"jpeg!"))]
        }));

        let image = extract_image(&payload).unwrap();
        assert_eq!(image.format, "jpeg");
        assert_eq!(image.bytes, b"jpeg!");
    }

    #[test]
    pub fn first_image_wins() {
        let payload = completion_with_message(json!({
            "role": "assistant",
            "content": "",
            "images": [
                { "image_url": { "url": format!("data:image/png;base64,{}", BASE64.encode(b"first")) } },
                { "image_url": { "url": format!("data:image/png;base64,{}", BASE64.encode(b"second")) } }
            ]
        }));

        assert_eq!(extract_image(&payload).unwrap().bytes, b"first");
    }

    #[test]
    pub fn text_only_response_is_no_image_produced() {
        let payload = completion_with_message(json!({
            "role": "assistant",
            "content": "I can only describe the image, sorry."
        }));

        assert_eq!(
            extract_image(&payload),
            Err(InferenceError::NoImageProduced)
        );
    }

    #[test]
    pub fn content_field_is_never_probed() {
        // A data-URI quoted inside the text content must not be mistaken for
        // an image payload.
        let payload = completion_with_message(json!({
            "role": "assistant",
            "content": ["data:image/png;base64,AAAA"]
        }));

        assert_eq!(
            extract_image(&payload),
            Err(InferenceError::NoImageProduced)
        );
    }

    #[test]
    pub fn invalid_base64_is_malformed_image_data() {
        let payload = completion_with_message(json!({
            "role": "assistant",
            "content": "",
            "images": [{ "image_url": { "url": "data:image/png;base64,not-base64!!" } }]
        }));

        assert!(matches!(
            extract_image(&payload),
            Err(InferenceError::MalformedImageData(_))
        ));
    }

    #[test]
    pub fn arbitrary_bytes_round_trip() {
        let original: Vec<u8> = (0u16..=255).map(|b| b as u8).cycle().take(1024).collect();
        let uri = format!("data:image/png;base64,{}", BASE64.encode(&original));

        assert_eq!(decode_data_uri(&uri).unwrap().bytes, original);
    }

    #[test]
    pub fn missing_subtype_defaults_to_png() {
        let image = decode_data_uri(&format!("data:image/;base64,{}", BASE64.encode(b"x"))).unwrap();
        assert_eq!(image.format, "png");
    }

    #[test]
    pub fn request_body_wire_shape() {
        let client = OpenRouteClient::new(
            "https://openrouter.ai/api/v1".to_owned(),
            "secret".to_owned(),
            "test/model".to_owned(),
        )
        .unwrap();

        let body = serde_json::to_value(client.build_request(b"raw-image", "make it blue")).unwrap();

        assert_eq!(body["model"], "test/model");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["messages"][0]["role"], "user");

        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["type"], "text");
        let text = content[0]["text"].as_str().unwrap();
        assert!(text.starts_with("GENERATE IMAGE: make it blue."));
        assert!(text.contains("not just a description"));

        assert_eq!(content[1]["type"], "image_url");
        let url = content[1]["image_url"]["url"].as_str().unwrap();
        assert_eq!(
            url,
            format!("data:image/png;base64,{}", BASE64.encode(b"raw-image"))
        );
    }
}

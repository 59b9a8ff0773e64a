//! Types exposed on the gateway's own API surface.

use serde::{Deserialize, Serialize};

/// Body of every error response. `category` is machine-stable; `detail` is
/// human-readable and may change between releases.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub category: String,
    pub detail: String,
}

/// Reachability of the key-record store, as reported by `GET /health`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    #[serde(rename = "connected")]
    Connected,

    #[serde(rename = "disconnected")]
    Disconnected,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: StoreStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ModelsResponse {
    pub supported_models: Vec<String>,
    pub current_model: String,
}

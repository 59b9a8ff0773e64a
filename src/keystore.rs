//! Client for the external key-record store.
//!
//! The store owns credential records; we only ever read them. A record's
//! validity is a policy decision layered on the raw data, so [RecordStore]
//! implementations return records as stored and the expiry check lives in
//! [check_expiry], invoked by the handlers.

use std::collections::HashMap;
use std::time::Duration;

use axum::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::errors::{AuthError, StoreError};

/// Bound on any single store round-trip.
const STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// A single credential record as the store returns it. Fields we interpret
/// are named; everything else is preserved in `extra` so schema additions in
/// the store pass through untouched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CredentialRecord {
    pub id: String,

    /// Raw expiry timestamp. Parsed lazily by [check_expiry]; the store emits
    /// an empty string for records with no expiry set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp_time: Option<String>,

    #[serde(default)]
    pub count: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// RecordStore is the trait for types that can look up credential records by
/// their opaque ID and report their own reachability.
#[async_trait]
pub trait RecordStore {
    async fn fetch_record(&self, id: &str) -> Result<CredentialRecord, StoreError>;

    /// Lightweight reachability probe, independent of any specific record.
    async fn test_connection(&self) -> bool;
}

/// Record store client speaking the PocketBase collection API.
pub struct PocketBaseClient {
    http: reqwest::Client,
    base_url: String,
    collection: String,
}

impl PocketBaseClient {
    pub fn new(base_url: String, collection: String) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(STORE_TIMEOUT).build()?;

        Ok(PocketBaseClient {
            http,
            base_url,
            collection,
        })
    }

    fn record_url(&self, id: &str) -> String {
        format!(
            "{}/api/collections/{}/records/{}",
            self.base_url.trim_end_matches('/'),
            self.collection,
            id
        )
    }
}

#[async_trait]
impl RecordStore for PocketBaseClient {
    async fn fetch_record(&self, id: &str) -> Result<CredentialRecord, StoreError> {
        let resp = self
            .http
            .get(self.record_url(id))
            .send()
            .await
            .map_err(|err| StoreError::Unreachable(err.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound);
        }
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(StoreError::Store {
                status: status.as_u16(),
                detail,
            });
        }

        let record: CredentialRecord = resp
            .json()
            .await
            .map_err(|err| StoreError::Unreachable(err.to_string()))?;
        debug!("fetched record {} (count={})", record.id, record.count);

        Ok(record)
    }

    async fn test_connection(&self) -> bool {
        let url = format!("{}/api/health", self.base_url.trim_end_matches('/'));
        match self.http.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(err) => {
                warn!("record store health probe failed: {err}");
                false
            }
        }
    }
}

/// Parse a stored expiry timestamp leniently. The store writes RFC 3339 with
/// a space separator (`2024-01-02 03:04:05.000Z`); callers have also been
/// seen storing explicit offsets or no offset at all, in which case UTC is
/// assumed.
pub fn parse_expiry(raw: &str) -> Option<OffsetDateTime> {
    let normalized = raw.trim().replacen(' ', "T", 1);

    if let Ok(parsed) = OffsetDateTime::parse(&normalized, &Rfc3339) {
        return Some(parsed);
    }

    let bare = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    PrimitiveDateTime::parse(&normalized, &bare)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// Expiry policy: a record with no expiry is always valid; one with an expiry
/// is valid iff `now <= expiry`. An expiry we cannot parse is its own error,
/// distinct from an unknown key.
pub fn check_expiry(record: &CredentialRecord, now: OffsetDateTime) -> Result<(), AuthError> {
    let raw = match record.exp_time.as_deref().map(str::trim) {
        None | Some("") => return Ok(()),
        Some(raw) => raw,
    };

    let expiry = parse_expiry(raw).ok_or(AuthError::MalformedExpiry)?;
    if now > expiry {
        return Err(AuthError::Expired);
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use time::macros::datetime;

    use super::*;

    fn record(exp_time: Option<&str>) -> CredentialRecord {
        CredentialRecord {
            id: "abc123".to_owned(),
            exp_time: exp_time.map(str::to_owned),
            count: 4,
            created: None,
            updated: None,
            extra: HashMap::new(),
        }
    }

    #[test]
    pub fn no_expiry_is_always_valid() {
        let now = datetime!(2030-06-01 00:00 UTC);
        assert_eq!(check_expiry(&record(None), now), Ok(()));
        // the store writes an empty string for unset date fields
        assert_eq!(check_expiry(&record(Some("")), now), Ok(()));
    }

    #[test]
    pub fn past_expiry_rejected_for_every_suffix_style() {
        let now = datetime!(2026-01-01 00:00 UTC);

        for raw in [
            "2024-01-02 03:04:05.000Z",
            "2024-01-02T03:04:05Z",
            "2024-01-02T03:04:05+00:00",
            "2024-01-02T11:04:05+08:00",
            "2024-01-02 03:04:05",
            "2024-01-02T03:04:05.123",
        ] {
            assert_eq!(
                check_expiry(&record(Some(raw)), now),
                Err(AuthError::Expired),
                "expected {raw} to be expired"
            );
        }
    }

    #[test]
    pub fn future_expiry_is_valid() {
        let now = datetime!(2026-01-01 00:00 UTC);
        assert_eq!(
            check_expiry(&record(Some("2030-01-02 03:04:05.000Z")), now),
            Ok(())
        );
        assert_eq!(
            check_expiry(&record(Some("2030-01-02T03:04:05")), now),
            Ok(())
        );
    }

    #[test]
    pub fn offsetless_expiry_treated_as_utc() {
        // 03:04:05 with no offset means 03:04:05 UTC, so one second before
        // that instant the record is still valid.
        let expiry = record(Some("2026-01-02 03:04:05"));
        assert_eq!(
            check_expiry(&expiry, datetime!(2026-01-02 03:04:04 UTC)),
            Ok(())
        );
        assert_eq!(
            check_expiry(&expiry, datetime!(2026-01-02 03:04:06 UTC)),
            Err(AuthError::Expired)
        );
    }

    #[test]
    pub fn garbage_expiry_is_malformed_not_invalid() {
        let now = datetime!(2026-01-01 00:00 UTC);
        assert_eq!(
            check_expiry(&record(Some("next tuesday")), now),
            Err(AuthError::MalformedExpiry)
        );
    }

    #[test]
    pub fn record_round_trips_unknown_fields() {
        let raw = r#"{
            "id": "abc123",
            "collectionName": "shouban",
            "exp_time": "2024-01-02 03:04:05.000Z",
            "count": 17,
            "owner": "aya"
        }"#;

        let record: CredentialRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.count, 17);
        assert_eq!(record.extra["owner"], "aya");
        assert_eq!(record.extra["collectionName"], "shouban");

        let out = serde_json::to_value(&record).unwrap();
        assert_eq!(out["owner"], "aya");
        assert_eq!(out["exp_time"], "2024-01-02 03:04:05.000Z");
    }
}

//! Authorization engine
//!
//! Token validation order: local authorization list, then authorization
//! cache, then the CSMS (when online). Cache entries respect
//! `cacheExpiryDateTime` and are evicted least-recently-used. Central
//! tokens are never cached.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_ocpp::v2_0_1::datatypes::id_token_type::IdTokenType;
use rust_ocpp::v2_0_1::enumerations::clear_cache_status_enum_type::ClearCacheStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::send_local_list_status_enum_type::SendLocalListStatusEnumType;
use rust_ocpp::v2_0_1::messages::authorize::AuthorizeRequest;
use rust_ocpp::v2_0_1::messages::clear_cache::ClearCacheResponse;
use rust_ocpp::v2_0_1::messages::get_local_list_version::GetLocalListVersionResponse;
use rust_ocpp::v2_0_1::messages::send_local_list::SendLocalListResponse;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::device_model::{vars, DeviceModel};
use super::queue::{CallOutcome, MessageDispatcher};
use crate::domain::MessageAction;
use crate::infrastructure::{AuthCacheEntry, StationStorage};

/// Cache rows kept before LRU eviction kicks in.
const AUTH_CACHE_MAX_ENTRIES: usize = 1000;

/// Hash an idToken for storage: tokens never land in the clear.
pub fn token_hash(id_token: &Value) -> String {
    let token = id_token["idToken"].as_str().unwrap_or_default();
    let kind = id_token["type"].as_str().unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update(b":");
    hasher.update(kind.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct AuthorizationEngine {
    device_model: Arc<DeviceModel>,
    storage: Arc<dyn StationStorage>,
    dispatcher: Arc<MessageDispatcher>,
}

impl AuthorizationEngine {
    pub fn new(
        device_model: Arc<DeviceModel>,
        storage: Arc<dyn StationStorage>,
        dispatcher: Arc<MessageDispatcher>,
    ) -> Self {
        Self {
            device_model,
            storage,
            dispatcher,
        }
    }

    fn cache_enabled(&self) -> bool {
        self.device_model.get_bool(vars::AUTH_CACHE_ENABLED)
    }

    fn local_list_enabled(&self) -> bool {
        self.device_model.get_bool(vars::LOCAL_AUTH_LIST_ENABLED)
    }

    /// Validate a token (`idToken` JSON object). Returns an
    /// `idTokenInfo` JSON object; status `Unknown` when nothing answers.
    pub async fn validate_token(&self, id_token: &Value, online: bool) -> Value {
        let hashed = token_hash(id_token);

        if self.local_list_enabled() {
            match self.storage.local_list_get(&hashed).await {
                Ok(Some(info)) => {
                    debug!("Token found in local authorization list");
                    return info;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Local auth list lookup failed"),
            }
        }

        if self.cache_enabled() {
            match self.storage.auth_cache_get(&hashed).await {
                Ok(Some(entry)) => {
                    let expired = entry.id_token_info["cacheExpiryDateTime"]
                        .as_str()
                        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
                        .map(|expiry| expiry < Utc::now())
                        .unwrap_or(false);
                    if expired {
                        debug!("Cached token entry expired");
                        let _ = self.storage.auth_cache_delete(&hashed).await;
                    } else {
                        let _ = self
                            .storage
                            .auth_cache_insert(
                                &hashed,
                                AuthCacheEntry {
                                    id_token_info: entry.id_token_info.clone(),
                                    last_used_at: Utc::now(),
                                },
                            )
                            .await;
                        debug!("Token served from authorization cache");
                        return entry.id_token_info;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Auth cache lookup failed"),
            }
        }

        if online {
            let Ok(token) = serde_json::from_value::<IdTokenType>(id_token.clone()) else {
                warn!("Token does not parse as an OCPP idToken, not asking the CSMS");
                return json!({ "status": "Invalid" });
            };
            let request = AuthorizeRequest {
                id_token: token,
                certificate: None,
                iso_15118_certificate_hash_data: None,
            };
            let payload = match serde_json::to_value(&request) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "Could not serialize Authorize");
                    return json!({ "status": "Unknown" });
                }
            };
            let outcome = self
                .dispatcher
                .dispatch_call_and_wait(MessageAction::Authorize, payload)
                .await;
            match outcome {
                Ok(CallOutcome::Result(payload)) => {
                    let info = payload["idTokenInfo"].clone();
                    if !info.is_null() {
                        self.cache_token_info(id_token, &info).await;
                        return info;
                    }
                }
                Ok(CallOutcome::Error { code, description, .. }) => {
                    warn!(code = code.as_str(), description = description.as_str(), "Authorize failed");
                }
                Err(e) => warn!(error = %e, "Could not dispatch Authorize"),
            }
        }

        json!({ "status": "Unknown" })
    }

    /// Cache an `idTokenInfo` from an Authorize or TransactionEvent
    /// response. Central tokens are never cached (C03/C05).
    pub async fn cache_token_info(&self, id_token: &Value, id_token_info: &Value) {
        if !self.cache_enabled() {
            return;
        }
        if id_token["type"].as_str() == Some("Central") {
            return;
        }
        let hashed = token_hash(id_token);
        if let Err(e) = self
            .storage
            .auth_cache_insert(
                &hashed,
                AuthCacheEntry {
                    id_token_info: id_token_info.clone(),
                    last_used_at: Utc::now(),
                },
            )
            .await
        {
            warn!(error = %e, "Could not insert authorization cache entry");
            return;
        }
        match self.storage.auth_cache_evict_lru(AUTH_CACHE_MAX_ENTRIES).await {
            Ok(0) => {}
            Ok(evicted) => debug!(evicted, "Evicted LRU authorization cache entries"),
            Err(e) => warn!(error = %e, "Auth cache eviction failed"),
        }
    }

    // ── Inbound handlers ───────────────────────────────────

    /// `ClearCache`: wipe the authorization cache.
    pub async fn handle_clear_cache(&self) -> Value {
        let status = match self.storage.auth_cache_clear().await {
            Ok(()) => ClearCacheStatusEnumType::Accepted,
            Err(e) => {
                warn!(error = %e, "Could not clear authorization cache");
                ClearCacheStatusEnumType::Rejected
            }
        };
        serde_json::to_value(&ClearCacheResponse {
            status,
            status_info: None,
        })
        .unwrap_or_default()
    }

    /// `GetLocalListVersion`.
    pub async fn handle_get_local_list_version(&self) -> Value {
        let version_number = self.storage.local_list_version().await.unwrap_or(0);
        serde_json::to_value(&GetLocalListVersionResponse { version_number }).unwrap_or_default()
    }

    /// `SendLocalList`: Full replaces the list, Differential upserts.
    pub async fn handle_send_local_list(&self, payload: &Value) -> Value {
        let respond = |status: SendLocalListStatusEnumType| {
            serde_json::to_value(&SendLocalListResponse {
                status,
                status_info: None,
            })
            .unwrap_or_default()
        };

        if !self.local_list_enabled() {
            return respond(SendLocalListStatusEnumType::Failed);
        }

        let version = payload["versionNumber"].as_i64().unwrap_or(0) as i32;
        let update_type = payload["updateType"].as_str().unwrap_or("");
        let entries = payload["localAuthorizationList"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let current = self.storage.local_list_version().await.unwrap_or(0);
        if version <= current && update_type == "Differential" {
            return respond(SendLocalListStatusEnumType::VersionMismatch);
        }

        let result = match update_type {
            "Full" => {
                let rows = entries
                    .iter()
                    .filter_map(|entry| {
                        let info = entry.get("idTokenInfo")?.clone();
                        Some((token_hash(&entry["idToken"]), info))
                    })
                    .collect();
                self.storage.local_list_replace(version, rows).await
            }
            "Differential" => {
                let rows = entries
                    .iter()
                    .map(|entry| {
                        (
                            token_hash(&entry["idToken"]),
                            entry.get("idTokenInfo").cloned(),
                        )
                    })
                    .collect();
                self.storage.local_list_upsert(version, rows).await
            }
            other => {
                warn!(update_type = other, "Unknown SendLocalList updateType");
                return respond(SendLocalListStatusEnumType::Failed);
            }
        };

        match result {
            Ok(()) => respond(SendLocalListStatusEnumType::Accepted),
            Err(e) => {
                warn!(error = %e, "Could not apply local authorization list");
                respond(SendLocalListStatusEnumType::Failed)
            }
        }
    }
}

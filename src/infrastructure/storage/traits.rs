//! Storage trait definitions
//!
//! The relational store is an external capability; the runtime only
//! depends on this interface. Tables follow the persisted-state layout:
//! queued messages, per-transaction meter values, charging profiles,
//! the authorization cache, device-model variables, and monitors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    InfraResult, InstalledProfile, Monitor, QueuedMessage, StoredVariable,
};

/// One auth-cache row, keyed by the hashed id token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCacheEntry {
    /// `IdTokenInfo` as received from the CSMS.
    pub id_token_info: Value,
    pub last_used_at: DateTime<Utc>,
}

/// One sampled meter value of an open transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMeterValue {
    pub transaction_id: String,
    pub seq_no: i32,
    pub meter_value: Value,
    pub timestamp: DateTime<Utc>,
}

/// Persistence operations required by the runtime.
#[async_trait]
pub trait StationStorage: Send + Sync {
    // Message queue (transactional lane survives restarts)
    async fn queue_insert(&self, message: &QueuedMessage) -> InfraResult<()>;
    async fn queue_delete(&self, unique_id: &str) -> InfraResult<()>;
    async fn queue_update_attempts(&self, unique_id: &str, attempts: u32) -> InfraResult<()>;
    /// All persisted messages, in original insertion order.
    async fn queue_load_all(&self) -> InfraResult<Vec<QueuedMessage>>;

    // Transaction meter values
    async fn meter_value_insert(&self, value: &StoredMeterValue) -> InfraResult<()>;
    /// Sorted by `seq_no`.
    async fn meter_values_for_transaction(
        &self,
        transaction_id: &str,
    ) -> InfraResult<Vec<StoredMeterValue>>;
    async fn meter_values_delete(&self, transaction_id: &str) -> InfraResult<()>;

    // Charging profiles
    async fn profile_upsert(&self, installed: &InstalledProfile) -> InfraResult<()>;
    /// Returns `true` when a profile with that id existed.
    async fn profile_delete(&self, profile_id: i32) -> InfraResult<bool>;
    async fn profiles_all(&self) -> InfraResult<Vec<InstalledProfile>>;
    async fn profiles_for_transaction(
        &self,
        transaction_id: &str,
    ) -> InfraResult<Vec<InstalledProfile>>;

    // Authorization cache
    async fn auth_cache_get(&self, hashed_token: &str) -> InfraResult<Option<AuthCacheEntry>>;
    async fn auth_cache_insert(
        &self,
        hashed_token: &str,
        entry: AuthCacheEntry,
    ) -> InfraResult<()>;
    async fn auth_cache_delete(&self, hashed_token: &str) -> InfraResult<()>;
    async fn auth_cache_clear(&self) -> InfraResult<()>;
    async fn auth_cache_len(&self) -> InfraResult<usize>;
    /// Evict least-recently-used entries until at most `max_entries` remain.
    async fn auth_cache_evict_lru(&self, max_entries: usize) -> InfraResult<usize>;

    // Local authorization list
    async fn local_list_version(&self) -> InfraResult<i32>;
    async fn local_list_replace(
        &self,
        version: i32,
        entries: Vec<(String, Value)>,
    ) -> InfraResult<()>;
    async fn local_list_upsert(
        &self,
        version: i32,
        entries: Vec<(String, Option<Value>)>,
    ) -> InfraResult<()>;
    async fn local_list_get(&self, hashed_token: &str) -> InfraResult<Option<Value>>;

    // Device model
    async fn variable_store(&self, variable: &StoredVariable) -> InfraResult<()>;
    async fn variables_load_all(&self) -> InfraResult<Vec<StoredVariable>>;

    // Monitors
    async fn monitor_store(&self, monitor: &Monitor) -> InfraResult<()>;
    /// Returns `true` when a monitor with that id existed.
    async fn monitor_delete(&self, monitor_id: i32) -> InfraResult<bool>;
    async fn monitors_load_all(&self) -> InfraResult<Vec<Monitor>>;
    async fn monitors_clear_custom(&self) -> InfraResult<()>;
}

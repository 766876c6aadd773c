//! In-memory storage implementation
//!
//! Reference implementation of [`StationStorage`] used in development and
//! tests. Insertion order of the message queue is preserved with a row
//! counter, matching the replay-order guarantee of a relational backend.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::{AuthCacheEntry, StationStorage, StoredMeterValue};
use crate::domain::{
    InfraResult, InstalledProfile, Monitor, QueuedMessage, StoredVariable,
};
use crate::domain::device_model::{AttributeKind, Component, Variable};

/// In-memory storage for development and testing
#[derive(Default)]
pub struct InMemoryStorage {
    queue: DashMap<String, (i64, QueuedMessage)>,
    queue_row_counter: AtomicI64,
    meter_values: DashMap<(String, i32), StoredMeterValue>,
    profiles: DashMap<i32, InstalledProfile>,
    auth_cache: DashMap<String, AuthCacheEntry>,
    local_list: DashMap<String, Value>,
    local_list_version: AtomicI64,
    variables: DashMap<(Component, Variable, AttributeKind), StoredVariable>,
    monitors: DashMap<i32, Monitor>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StationStorage for InMemoryStorage {
    async fn queue_insert(&self, message: &QueuedMessage) -> InfraResult<()> {
        let row = self.queue_row_counter.fetch_add(1, Ordering::SeqCst);
        self.queue
            .insert(message.unique_id.clone(), (row, message.clone()));
        Ok(())
    }

    async fn queue_delete(&self, unique_id: &str) -> InfraResult<()> {
        self.queue.remove(unique_id);
        Ok(())
    }

    async fn queue_update_attempts(&self, unique_id: &str, attempts: u32) -> InfraResult<()> {
        if let Some(mut entry) = self.queue.get_mut(unique_id) {
            entry.1.attempts = attempts;
        }
        Ok(())
    }

    async fn queue_load_all(&self) -> InfraResult<Vec<QueuedMessage>> {
        let mut rows: Vec<(i64, QueuedMessage)> =
            self.queue.iter().map(|e| e.value().clone()).collect();
        rows.sort_by_key(|(row, _)| *row);
        Ok(rows.into_iter().map(|(_, m)| m).collect())
    }

    async fn meter_value_insert(&self, value: &StoredMeterValue) -> InfraResult<()> {
        self.meter_values.insert(
            (value.transaction_id.clone(), value.seq_no),
            value.clone(),
        );
        Ok(())
    }

    async fn meter_values_for_transaction(
        &self,
        transaction_id: &str,
    ) -> InfraResult<Vec<StoredMeterValue>> {
        let mut values: Vec<StoredMeterValue> = self
            .meter_values
            .iter()
            .filter(|e| e.key().0 == transaction_id)
            .map(|e| e.value().clone())
            .collect();
        values.sort_by_key(|v| v.seq_no);
        Ok(values)
    }

    async fn meter_values_delete(&self, transaction_id: &str) -> InfraResult<()> {
        self.meter_values.retain(|k, _| k.0 != transaction_id);
        Ok(())
    }

    async fn profile_upsert(&self, installed: &InstalledProfile) -> InfraResult<()> {
        self.profiles
            .insert(installed.profile.id, installed.clone());
        Ok(())
    }

    async fn profile_delete(&self, profile_id: i32) -> InfraResult<bool> {
        Ok(self.profiles.remove(&profile_id).is_some())
    }

    async fn profiles_all(&self) -> InfraResult<Vec<InstalledProfile>> {
        let mut all: Vec<InstalledProfile> =
            self.profiles.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|p| p.profile.id);
        Ok(all)
    }

    async fn profiles_for_transaction(
        &self,
        transaction_id: &str,
    ) -> InfraResult<Vec<InstalledProfile>> {
        Ok(self
            .profiles
            .iter()
            .filter(|e| {
                e.value().profile.transaction_id.as_deref() == Some(transaction_id)
            })
            .map(|e| e.value().clone())
            .collect())
    }

    async fn auth_cache_get(&self, hashed_token: &str) -> InfraResult<Option<AuthCacheEntry>> {
        Ok(self.auth_cache.get(hashed_token).map(|e| e.clone()))
    }

    async fn auth_cache_insert(
        &self,
        hashed_token: &str,
        entry: AuthCacheEntry,
    ) -> InfraResult<()> {
        self.auth_cache.insert(hashed_token.to_string(), entry);
        Ok(())
    }

    async fn auth_cache_delete(&self, hashed_token: &str) -> InfraResult<()> {
        self.auth_cache.remove(hashed_token);
        Ok(())
    }

    async fn auth_cache_clear(&self) -> InfraResult<()> {
        self.auth_cache.clear();
        Ok(())
    }

    async fn auth_cache_len(&self) -> InfraResult<usize> {
        Ok(self.auth_cache.len())
    }

    async fn auth_cache_evict_lru(&self, max_entries: usize) -> InfraResult<usize> {
        let len = self.auth_cache.len();
        if len <= max_entries {
            return Ok(0);
        }
        let mut entries: Vec<(String, chrono::DateTime<chrono::Utc>)> = self
            .auth_cache
            .iter()
            .map(|e| (e.key().clone(), e.value().last_used_at))
            .collect();
        entries.sort_by_key(|(_, used)| *used);
        let evict = len - max_entries;
        for (token, _) in entries.into_iter().take(evict) {
            self.auth_cache.remove(&token);
        }
        Ok(evict)
    }

    async fn local_list_version(&self) -> InfraResult<i32> {
        Ok(self.local_list_version.load(Ordering::SeqCst) as i32)
    }

    async fn local_list_replace(
        &self,
        version: i32,
        entries: Vec<(String, Value)>,
    ) -> InfraResult<()> {
        self.local_list.clear();
        for (token, info) in entries {
            self.local_list.insert(token, info);
        }
        self.local_list_version.store(version as i64, Ordering::SeqCst);
        Ok(())
    }

    async fn local_list_upsert(
        &self,
        version: i32,
        entries: Vec<(String, Option<Value>)>,
    ) -> InfraResult<()> {
        for (token, info) in entries {
            match info {
                Some(info) => {
                    self.local_list.insert(token, info);
                }
                None => {
                    self.local_list.remove(&token);
                }
            }
        }
        self.local_list_version.store(version as i64, Ordering::SeqCst);
        Ok(())
    }

    async fn local_list_get(&self, hashed_token: &str) -> InfraResult<Option<Value>> {
        Ok(self.local_list.get(hashed_token).map(|e| e.clone()))
    }

    async fn variable_store(&self, variable: &StoredVariable) -> InfraResult<()> {
        self.variables.insert(
            (
                variable.component.clone(),
                variable.variable.clone(),
                variable.attribute,
            ),
            variable.clone(),
        );
        Ok(())
    }

    async fn variables_load_all(&self) -> InfraResult<Vec<StoredVariable>> {
        Ok(self.variables.iter().map(|e| e.value().clone()).collect())
    }

    async fn monitor_store(&self, monitor: &Monitor) -> InfraResult<()> {
        self.monitors.insert(monitor.id, monitor.clone());
        Ok(())
    }

    async fn monitor_delete(&self, monitor_id: i32) -> InfraResult<bool> {
        Ok(self.monitors.remove(&monitor_id).is_some())
    }

    async fn monitors_load_all(&self) -> InfraResult<Vec<Monitor>> {
        Ok(self.monitors.iter().map(|e| e.value().clone()).collect())
    }

    async fn monitors_clear_custom(&self) -> InfraResult<()> {
        self.monitors.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageAction;
    use chrono::Utc;

    fn message(action: MessageAction) -> QueuedMessage {
        QueuedMessage::new(action, serde_json::json!({}), false)
    }

    #[tokio::test]
    async fn queue_replays_in_insertion_order() {
        let storage = InMemoryStorage::new();
        let m1 = message(MessageAction::TransactionEvent);
        let m2 = message(MessageAction::MeterValues);
        let m3 = message(MessageAction::TransactionEvent);
        storage.queue_insert(&m1).await.unwrap();
        storage.queue_insert(&m2).await.unwrap();
        storage.queue_insert(&m3).await.unwrap();

        storage.queue_delete(&m2.unique_id).await.unwrap();
        let loaded = storage.queue_load_all().await.unwrap();
        let ids: Vec<_> = loaded.iter().map(|m| m.unique_id.as_str()).collect();
        assert_eq!(ids, vec![m1.unique_id.as_str(), m3.unique_id.as_str()]);
    }

    #[tokio::test]
    async fn meter_values_sort_by_seq_no() {
        let storage = InMemoryStorage::new();
        for seq in [2, 0, 1] {
            storage
                .meter_value_insert(&StoredMeterValue {
                    transaction_id: "T1".into(),
                    seq_no: seq,
                    meter_value: serde_json::json!({"seq": seq}),
                    timestamp: Utc::now(),
                })
                .await
                .unwrap();
        }
        let values = storage.meter_values_for_transaction("T1").await.unwrap();
        let seqs: Vec<_> = values.iter().map(|v| v.seq_no).collect();
        assert_eq!(seqs, vec![0, 1, 2]);

        storage.meter_values_delete("T1").await.unwrap();
        assert!(storage
            .meter_values_for_transaction("T1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn auth_cache_evicts_least_recently_used() {
        let storage = InMemoryStorage::new();
        for (token, minutes_ago) in [("a", 30), ("b", 10), ("c", 20)] {
            storage
                .auth_cache_insert(
                    token,
                    AuthCacheEntry {
                        id_token_info: serde_json::json!({"status": "Accepted"}),
                        last_used_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
                    },
                )
                .await
                .unwrap();
        }
        let evicted = storage.auth_cache_evict_lru(1).await.unwrap();
        assert_eq!(evicted, 2);
        assert!(storage.auth_cache_get("b").await.unwrap().is_some());
        assert!(storage.auth_cache_get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn local_list_replace_and_upsert() {
        let storage = InMemoryStorage::new();
        storage
            .local_list_replace(
                3,
                vec![("t1".into(), serde_json::json!({"status": "Accepted"}))],
            )
            .await
            .unwrap();
        assert_eq!(storage.local_list_version().await.unwrap(), 3);

        storage
            .local_list_upsert(
                4,
                vec![
                    ("t1".into(), None),
                    ("t2".into(), Some(serde_json::json!({"status": "Blocked"}))),
                ],
            )
            .await
            .unwrap();
        assert_eq!(storage.local_list_version().await.unwrap(), 4);
        assert!(storage.local_list_get("t1").await.unwrap().is_none());
        assert_eq!(
            storage.local_list_get("t2").await.unwrap().unwrap()["status"],
            "Blocked"
        );
    }

    #[tokio::test]
    async fn profile_secondary_index_by_transaction() {
        use crate::domain::charging_profile::*;
        use rust_ocpp::v2_0_1::enumerations::charging_profile_kind_enum_type::ChargingProfileKindEnumType;
        use rust_ocpp::v2_0_1::enumerations::charging_profile_purpose_enum_type::ChargingProfilePurposeEnumType;
        use rust_ocpp::v2_0_1::enumerations::charging_rate_unit_enum_type::ChargingRateUnitEnumType;

        let storage = InMemoryStorage::new();
        let profile = ChargingProfile {
            id: 11,
            stack_level: 0,
            charging_profile_purpose: ChargingProfilePurposeEnumType::TxProfile,
            charging_profile_kind: ChargingProfileKindEnumType::Relative,
            recurrency_kind: None,
            valid_from: None,
            valid_to: None,
            transaction_id: Some("T9".into()),
            charging_schedule: vec![ChargingSchedule {
                id: 1,
                start_schedule: None,
                duration: None,
                charging_rate_unit: ChargingRateUnitEnumType::A,
                charging_schedule_period: vec![ChargingSchedulePeriod {
                    start_period: 0,
                    limit: 16.0,
                    number_phases: None,
                    phase_to_use: None,
                }],
                min_charging_rate: None,
            }],
        };
        storage
            .profile_upsert(&InstalledProfile { evse_id: 1, profile })
            .await
            .unwrap();

        let found = storage.profiles_for_transaction("T9").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].profile.id, 11);
        assert!(storage.profile_delete(11).await.unwrap());
        assert!(!storage.profile_delete(11).await.unwrap());
    }
}

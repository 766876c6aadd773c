//! EVSE manager
//!
//! One [`Evse`] per physical socket group. Each EVSE owns its connectors
//! (availability substates), its idle meter values, and at most one open
//! [`Transaction`]. Connector status follows the OCPP state graph with
//! `Faulted` and `Unavailable` latching over plug events.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_ocpp::v2_0_1::enumerations::charging_state_enum_type::ChargingStateEnumType;
use rust_ocpp::v2_0_1::enumerations::connector_status_enum_type::ConnectorStatusEnumType;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::domain::{DomainError, DomainResult, Transaction};
use crate::infrastructure::{StationStorage, StoredMeterValue};

/// Idle meter values kept per EVSE for aligned-data reporting.
const IDLE_METER_VALUE_WINDOW: usize = 10;

/// Connector-level availability events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorEvent {
    PlugIn,
    PlugOut,
    Reserve,
    ReservationCleared,
    Faulted,
    FaultCleared,
    Unavailable,
    UnavailableCleared,
}

/// Whether an EVSE supplies AC or DC; drives the phase rules of
/// charging-profile validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentPhaseType {
    Ac,
    Dc,
}

// ── Connector ──────────────────────────────────────────────────

#[derive(Debug)]
struct Connector {
    plugged_in: bool,
    reserved: bool,
    faulted: bool,
    unavailable: bool,
}

impl Connector {
    fn new() -> Self {
        Self {
            plugged_in: false,
            reserved: false,
            faulted: false,
            unavailable: false,
        }
    }

    /// Effective status per the OCPP state graph: faults and operator
    /// unavailability shadow the plug state.
    fn effective_status(&self) -> ConnectorStatusEnumType {
        if self.faulted {
            ConnectorStatusEnumType::Faulted
        } else if self.unavailable {
            ConnectorStatusEnumType::Unavailable
        } else if self.plugged_in {
            ConnectorStatusEnumType::Occupied
        } else if self.reserved {
            ConnectorStatusEnumType::Reserved
        } else {
            ConnectorStatusEnumType::Available
        }
    }

    fn apply(&mut self, event: ConnectorEvent) {
        match event {
            ConnectorEvent::PlugIn => self.plugged_in = true,
            ConnectorEvent::PlugOut => self.plugged_in = false,
            ConnectorEvent::Reserve => self.reserved = true,
            ConnectorEvent::ReservationCleared => self.reserved = false,
            ConnectorEvent::Faulted => self.faulted = true,
            ConnectorEvent::FaultCleared => self.faulted = false,
            ConnectorEvent::Unavailable => self.unavailable = true,
            ConnectorEvent::UnavailableCleared => self.unavailable = false,
        }
    }
}

// ── Evse ───────────────────────────────────────────────────────

pub struct Evse {
    id: i32,
    connectors: Vec<Connector>,
    phase_type: CurrentPhaseType,
    transaction: Option<Transaction>,
    idle_meter_values: VecDeque<Value>,
    meter_sample_seq: i32,
    storage: Arc<dyn StationStorage>,
}

impl Evse {
    fn new(
        id: i32,
        connector_count: u32,
        phase_type: CurrentPhaseType,
        storage: Arc<dyn StationStorage>,
    ) -> Self {
        Self {
            id,
            connectors: (0..connector_count).map(|_| Connector::new()).collect(),
            phase_type,
            transaction: None,
            idle_meter_values: VecDeque::new(),
            meter_sample_seq: 0,
            storage,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn connector_count(&self) -> u32 {
        self.connectors.len() as u32
    }

    pub fn phase_type(&self) -> CurrentPhaseType {
        self.phase_type
    }

    /// Apply a connector event; returns the new effective status when it
    /// changed. Connector ids are 1-based.
    pub fn submit_event(
        &mut self,
        connector_id: i32,
        event: ConnectorEvent,
    ) -> DomainResult<Option<ConnectorStatusEnumType>> {
        let connector = self
            .connectors
            .get_mut((connector_id - 1).max(0) as usize)
            .ok_or(DomainError::ConnectorOutOfRange {
                evse_id: self.id,
                connector_id,
            })?;
        let before = connector.effective_status();
        connector.apply(event);
        let after = connector.effective_status();
        Ok((before != after).then_some(after))
    }

    pub fn connector_status(&self, connector_id: i32) -> DomainResult<ConnectorStatusEnumType> {
        self.connectors
            .get((connector_id - 1).max(0) as usize)
            .map(|c| c.effective_status())
            .ok_or(DomainError::ConnectorOutOfRange {
                evse_id: self.id,
                connector_id,
            })
    }

    /// Whether the EVSE can begin a new transaction: some connector is
    /// neither faulted, unavailable, nor already occupied by a session.
    pub fn is_available_for_transaction(&self) -> bool {
        self.transaction.is_none()
            && self.connectors.iter().any(|c| {
                !c.faulted
                    && !c.unavailable
                    && !matches!(c.effective_status(), ConnectorStatusEnumType::Reserved)
            })
    }

    // ── Transaction ownership ──────────────────────────────

    pub fn has_active_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    pub fn transaction_mut(&mut self) -> Option<&mut Transaction> {
        self.transaction.as_mut()
    }

    /// Open a transaction on this EVSE. Only one may be open at a time.
    #[allow(clippy::too_many_arguments)]
    pub fn open_transaction(
        &mut self,
        transaction_id: &str,
        connector_id: i32,
        timestamp: DateTime<Utc>,
        charging_state: ChargingStateEnumType,
        id_token: Option<Value>,
        group_id_token: Option<Value>,
        reservation_id: Option<i32>,
        remote_start_id: Option<i32>,
    ) -> DomainResult<&mut Transaction> {
        if self.transaction.is_some() {
            return Err(DomainError::Validation(format!(
                "Evse {} already has an active transaction",
                self.id
            )));
        }
        let mut transaction =
            Transaction::new(transaction_id, self.id, connector_id, timestamp, charging_state);
        transaction.id_token = id_token;
        transaction.group_id_token = group_id_token;
        transaction.reservation_id = reservation_id;
        transaction.remote_start_id = remote_start_id;
        self.meter_sample_seq = 0;
        Ok(self.transaction.insert(transaction))
    }

    /// Release the transaction after `TransactionEvent(Ended)` was built.
    pub fn release_transaction(&mut self) -> Option<Transaction> {
        self.transaction.take()
    }

    // ── Meter values ───────────────────────────────────────

    /// Record a sampled meter value. With an open transaction the sample
    /// is persisted under the transaction; otherwise it joins the idle
    /// window used for aligned data.
    pub async fn on_meter_value(&mut self, meter_value: Value, timestamp: DateTime<Utc>) {
        match &self.transaction {
            Some(transaction) => {
                let row = StoredMeterValue {
                    transaction_id: transaction.transaction_id.clone(),
                    seq_no: self.meter_sample_seq,
                    meter_value,
                    timestamp,
                };
                self.meter_sample_seq += 1;
                if let Err(e) = self.storage.meter_value_insert(&row).await {
                    error!(evse_id = self.id, error = %e, "Could not persist transaction meter value");
                }
            }
            None => {
                self.idle_meter_values.push_back(meter_value);
                while self.idle_meter_values.len() > IDLE_METER_VALUE_WINDOW {
                    self.idle_meter_values.pop_front();
                }
            }
        }
    }

    /// Latest idle sample, for aligned data and triggered MeterValues.
    pub fn latest_idle_meter_value(&self) -> Option<Value> {
        self.idle_meter_values.back().cloned()
    }

    pub fn clear_idle_meter_values(&mut self) {
        self.idle_meter_values.clear();
    }
}

// ── EvseManager ────────────────────────────────────────────────

pub struct EvseManager {
    evses: Vec<Arc<Mutex<Evse>>>,
}

impl EvseManager {
    /// `connector_structure[i]` is the connector count of EVSE `i + 1`.
    pub fn new(
        connector_structure: &[(u32, CurrentPhaseType)],
        storage: Arc<dyn StationStorage>,
    ) -> Self {
        let evses = connector_structure
            .iter()
            .enumerate()
            .map(|(index, (connectors, phase_type))| {
                Arc::new(Mutex::new(Evse::new(
                    index as i32 + 1,
                    *connectors,
                    *phase_type,
                    storage.clone(),
                )))
            })
            .collect();
        Self { evses }
    }

    pub fn count(&self) -> usize {
        self.evses.len()
    }

    pub fn exists(&self, evse_id: i32) -> bool {
        evse_id >= 1 && (evse_id as usize) <= self.evses.len()
    }

    pub fn evse(&self, evse_id: i32) -> DomainResult<Arc<Mutex<Evse>>> {
        if !self.exists(evse_id) {
            return Err(DomainError::EvseOutOfRange(evse_id));
        }
        Ok(self.evses[(evse_id - 1) as usize].clone())
    }

    pub fn evses(&self) -> &[Arc<Mutex<Evse>>] {
        &self.evses
    }

    pub async fn any_transaction_active(&self) -> bool {
        for evse in &self.evses {
            if evse.lock().await.has_active_transaction() {
                return true;
            }
        }
        false
    }

    /// EVSE currently running the given transaction, if any.
    pub async fn transaction_evse_id(&self, transaction_id: &str) -> Option<i32> {
        for evse in &self.evses {
            let evse = evse.lock().await;
            if evse
                .transaction()
                .map(|t| t.transaction_id == transaction_id)
                .unwrap_or(false)
            {
                return Some(evse.id());
            }
        }
        None
    }

    /// Transaction id active on the given EVSE, if any.
    pub async fn active_transaction_id(&self, evse_id: i32) -> Option<String> {
        let evse = self.evse(evse_id).ok()?;
        let evse = evse.lock().await;
        evse.transaction().map(|t| t.transaction_id.clone())
    }
}

// ── Measurand filtering ────────────────────────────────────────

/// Default measurand when a sampled value does not name one.
const DEFAULT_MEASURAND: &str = "Energy.Active.Import.Register";

/// Keep only the sampled values whose measurand is in the configured
/// set. Returns `None` when nothing survives the filter.
pub fn filter_meter_value(meter_value: &Value, measurands: &[String]) -> Option<Value> {
    if measurands.is_empty() {
        return Some(meter_value.clone());
    }
    let sampled = meter_value.get("sampledValue")?.as_array()?;
    let kept: Vec<Value> = sampled
        .iter()
        .filter(|sample| {
            let measurand = sample
                .get("measurand")
                .and_then(|m| m.as_str())
                .unwrap_or(DEFAULT_MEASURAND);
            measurands.iter().any(|allowed| allowed == measurand)
        })
        .cloned()
        .collect();
    if kept.is_empty() {
        warn!("Meter value dropped: no sampled value matches the configured measurands");
        return None;
    }
    let mut filtered = meter_value.clone();
    filtered["sampledValue"] = Value::Array(kept);
    Some(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::InMemoryStorage;
    use serde_json::json;

    fn manager(layout: &[(u32, CurrentPhaseType)]) -> (EvseManager, Arc<InMemoryStorage>) {
        let storage = Arc::new(InMemoryStorage::new());
        (EvseManager::new(layout, storage.clone()), storage)
    }

    #[tokio::test]
    async fn connector_state_graph() {
        let (manager, _) = manager(&[(1, CurrentPhaseType::Ac)]);
        let evse = manager.evse(1).unwrap();
        let mut evse = evse.lock().await;

        assert_eq!(
            evse.connector_status(1).unwrap(),
            ConnectorStatusEnumType::Available
        );
        assert_eq!(
            evse.submit_event(1, ConnectorEvent::PlugIn).unwrap(),
            Some(ConnectorStatusEnumType::Occupied)
        );
        // fault latches over the plug state
        assert_eq!(
            evse.submit_event(1, ConnectorEvent::Faulted).unwrap(),
            Some(ConnectorStatusEnumType::Faulted)
        );
        // unplugging while faulted changes nothing observable
        assert_eq!(evse.submit_event(1, ConnectorEvent::PlugOut).unwrap(), None);
        assert_eq!(
            evse.submit_event(1, ConnectorEvent::FaultCleared).unwrap(),
            Some(ConnectorStatusEnumType::Available)
        );
    }

    #[tokio::test]
    async fn unavailable_shadows_reservation() {
        let (manager, _) = manager(&[(1, CurrentPhaseType::Ac)]);
        let evse = manager.evse(1).unwrap();
        let mut evse = evse.lock().await;

        evse.submit_event(1, ConnectorEvent::Reserve).unwrap();
        assert_eq!(
            evse.connector_status(1).unwrap(),
            ConnectorStatusEnumType::Reserved
        );
        assert_eq!(
            evse.submit_event(1, ConnectorEvent::Unavailable).unwrap(),
            Some(ConnectorStatusEnumType::Unavailable)
        );
        assert_eq!(
            evse.submit_event(1, ConnectorEvent::UnavailableCleared).unwrap(),
            Some(ConnectorStatusEnumType::Reserved)
        );
    }

    #[tokio::test]
    async fn unknown_connector_is_an_error() {
        let (manager, _) = manager(&[(1, CurrentPhaseType::Ac)]);
        let evse = manager.evse(1).unwrap();
        let mut evse = evse.lock().await;
        assert!(matches!(
            evse.submit_event(2, ConnectorEvent::PlugIn),
            Err(DomainError::ConnectorOutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn one_transaction_per_evse() {
        let (manager, _) = manager(&[(1, CurrentPhaseType::Ac)]);
        let evse = manager.evse(1).unwrap();
        let mut evse = evse.lock().await;

        evse.open_transaction(
            "T1",
            1,
            Utc::now(),
            ChargingStateEnumType::EVConnected,
            None,
            None,
            None,
            None,
        )
        .unwrap();
        assert!(evse.has_active_transaction());
        assert!(evse
            .open_transaction(
                "T2",
                1,
                Utc::now(),
                ChargingStateEnumType::EVConnected,
                None,
                None,
                None,
                None,
            )
            .is_err());

        let released = evse.release_transaction().unwrap();
        assert_eq!(released.transaction_id, "T1");
        assert!(!evse.has_active_transaction());
    }

    #[tokio::test]
    async fn transaction_lookup_by_id() {
        let (manager, _) = manager(&[(1, CurrentPhaseType::Ac), (1, CurrentPhaseType::Dc)]);
        {
            let evse = manager.evse(2).unwrap();
            let mut evse = evse.lock().await;
            evse.open_transaction(
                "T77",
                1,
                Utc::now(),
                ChargingStateEnumType::Charging,
                None,
                None,
                None,
                None,
            )
            .unwrap();
        }
        assert_eq!(manager.transaction_evse_id("T77").await, Some(2));
        assert_eq!(manager.transaction_evse_id("T78").await, None);
        assert_eq!(manager.active_transaction_id(2).await.unwrap(), "T77");
        assert!(manager.any_transaction_active().await);
    }

    #[tokio::test]
    async fn meter_values_persist_under_open_transaction() {
        let (manager, storage) = manager(&[(1, CurrentPhaseType::Ac)]);
        let evse = manager.evse(1).unwrap();
        let mut evse = evse.lock().await;

        // idle: joins the rolling window
        evse.on_meter_value(json!({"sampledValue": [{"value": 1.0}]}), Utc::now())
            .await;
        assert!(evse.latest_idle_meter_value().is_some());

        evse.open_transaction(
            "T1",
            1,
            Utc::now(),
            ChargingStateEnumType::Charging,
            None,
            None,
            None,
            None,
        )
        .unwrap();
        for watts in [100.0, 200.0] {
            evse.on_meter_value(
                json!({"sampledValue": [{"value": watts, "measurand": "Power.Active.Import"}]}),
                Utc::now(),
            )
            .await;
        }

        let stored = storage.meter_values_for_transaction("T1").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].seq_no, 0);
        assert_eq!(stored[1].seq_no, 1);
    }

    #[test]
    fn measurand_filter_keeps_matching_samples() {
        let meter_value = json!({
            "timestamp": "2024-05-01T00:00:00Z",
            "sampledValue": [
                {"value": 12.0, "measurand": "Power.Active.Import"},
                {"value": 1500.0},
            ]
        });
        let filtered = filter_meter_value(
            &meter_value,
            &["Energy.Active.Import.Register".to_string()],
        )
        .unwrap();
        let sampled = filtered["sampledValue"].as_array().unwrap();
        assert_eq!(sampled.len(), 1);
        assert_eq!(sampled[0]["value"], 1500.0);

        assert!(filter_meter_value(&meter_value, &["SoC".to_string()]).is_none());
    }
}

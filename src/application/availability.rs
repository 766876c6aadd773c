//! Availability block
//!
//! Heartbeat timer, connector status notifications, and
//! `ChangeAvailability` handling. Availability changes that collide with
//! an active transaction are answered `Scheduled` and applied once the
//! transaction ends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_ocpp::v2_0_1::enumerations::change_availability_status_enum_type::ChangeAvailabilityStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::connector_status_enum_type::ConnectorStatusEnumType;
use rust_ocpp::v2_0_1::messages::change_availability::ChangeAvailabilityResponse;
use rust_ocpp::v2_0_1::messages::heartbeat::HeartbeatRequest;
use rust_ocpp::v2_0_1::messages::status_notification::StatusNotificationRequest;
use serde_json::Value;
use tracing::{info, warn};

use super::evse::{ConnectorEvent, EvseManager};
use super::queue::MessageDispatcher;
use crate::domain::MessageAction;
use crate::support::timer::TimerSlot;

/// A ChangeAvailability that waits for the target's transaction to end.
/// Key 0 schedules a station-wide change.
#[derive(Debug, Clone)]
struct ScheduledChange {
    operative: bool,
    connector_id: Option<i32>,
}

pub struct Availability {
    dispatcher: Arc<MessageDispatcher>,
    evse_manager: Arc<EvseManager>,
    heartbeat_timer: TimerSlot,
    last_reported: std::sync::Mutex<HashMap<(i32, i32), ConnectorStatusEnumType>>,
    scheduled_changes: std::sync::Mutex<HashMap<i32, ScheduledChange>>,
}

impl Availability {
    pub fn new(dispatcher: Arc<MessageDispatcher>, evse_manager: Arc<EvseManager>) -> Self {
        Self {
            dispatcher,
            evse_manager,
            heartbeat_timer: TimerSlot::new(),
            last_reported: std::sync::Mutex::new(HashMap::new()),
            scheduled_changes: std::sync::Mutex::new(HashMap::new()),
        }
    }

    // ── Heartbeat ──────────────────────────────────────────

    pub async fn heartbeat_req(&self, initiated_by_trigger: bool) {
        let payload = serde_json::to_value(&HeartbeatRequest {}).unwrap_or_default();
        let _ = self
            .dispatcher
            .dispatch_call(MessageAction::Heartbeat, payload, initiated_by_trigger)
            .await;
    }

    /// (Re)start the heartbeat timer with the interval from the
    /// BootNotificationResponse or a `HeartbeatInterval` write.
    pub fn set_heartbeat_timer_interval(&self, interval: Duration) {
        if interval.is_zero() {
            self.heartbeat_timer.stop();
            return;
        }
        info!(interval_s = interval.as_secs(), "Heartbeat timer started");
        let dispatcher = self.dispatcher.clone();
        self.heartbeat_timer.interval(interval, move || {
            let dispatcher = dispatcher.clone();
            async move {
                let payload = serde_json::to_value(&HeartbeatRequest {}).unwrap_or_default();
                let _ = dispatcher
                    .dispatch_call(MessageAction::Heartbeat, payload, false)
                    .await;
            }
        });
    }

    pub fn stop_heartbeat_timer(&self) {
        self.heartbeat_timer.stop();
    }

    // ── Status notifications ───────────────────────────────

    pub async fn status_notification_req(
        &self,
        evse_id: i32,
        connector_id: i32,
        status: &ConnectorStatusEnumType,
        initiated_by_trigger: bool,
    ) {
        self.last_reported
            .lock()
            .unwrap()
            .insert((evse_id, connector_id), status.clone());
        let request = StatusNotificationRequest {
            timestamp: Utc::now(),
            connector_status: status.clone(),
            evse_id,
            connector_id,
        };
        let payload = match serde_json::to_value(&request) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Could not serialize StatusNotification");
                return;
            }
        };
        let _ = self
            .dispatcher
            .dispatch_call(MessageAction::StatusNotification, payload, initiated_by_trigger)
            .await;
    }

    /// Send the current status of every connector (boot accept, or
    /// offline longer than `OfflineThreshold`).
    pub async fn send_all_status_notifications(&self) {
        for evse in self.evse_manager.evses() {
            let (evse_id, statuses) = {
                let evse = evse.lock().await;
                let statuses: Vec<_> = (1..=evse.connector_count() as i32)
                    .filter_map(|connector_id| {
                        evse.connector_status(connector_id)
                            .ok()
                            .map(|s| (connector_id, s))
                    })
                    .collect();
                (evse.id(), statuses)
            };
            for (connector_id, status) in statuses {
                self.status_notification_req(evse_id, connector_id, &status, false)
                    .await;
            }
        }
    }

    /// Send only connectors whose status differs from the last report
    /// (short offline periods, B04.FR.02).
    pub async fn send_changed_status_notifications(&self) {
        for evse in self.evse_manager.evses() {
            let (evse_id, statuses) = {
                let evse = evse.lock().await;
                let statuses: Vec<_> = (1..=evse.connector_count() as i32)
                    .filter_map(|connector_id| {
                        evse.connector_status(connector_id)
                            .ok()
                            .map(|s| (connector_id, s))
                    })
                    .collect();
                (evse.id(), statuses)
            };
            for (connector_id, status) in statuses {
                let changed = {
                    let reported = self.last_reported.lock().unwrap();
                    reported.get(&(evse_id, connector_id)) != Some(&status)
                };
                if changed {
                    self.status_notification_req(evse_id, connector_id, &status, false)
                        .await;
                }
            }
        }
    }

    // ── ChangeAvailability ─────────────────────────────────

    /// Handle a `ChangeAvailability` request. Returns the response
    /// payload; the change is applied immediately or scheduled behind
    /// the running transaction.
    pub async fn handle_change_availability(&self, payload: &Value) -> Value {
        let respond = |status: ChangeAvailabilityStatusEnumType| {
            serde_json::to_value(&ChangeAvailabilityResponse {
                status,
                status_info: None,
            })
            .unwrap_or_default()
        };

        let operative = match payload["operationalStatus"].as_str() {
            Some("Operative") => true,
            Some("Inoperative") => false,
            other => {
                warn!(?other, "ChangeAvailability without a valid operationalStatus");
                return respond(ChangeAvailabilityStatusEnumType::Rejected);
            }
        };
        let evse_id = payload["evse"]["id"].as_i64().map(|id| id as i32);
        let connector_id = payload["evse"]["connectorId"].as_i64().map(|id| id as i32);

        if let Some(evse_id) = evse_id {
            if !self.evse_manager.exists(evse_id) {
                return respond(ChangeAvailabilityStatusEnumType::Rejected);
            }
        }

        let blocking_transaction = match evse_id {
            Some(evse_id) => self
                .evse_manager
                .active_transaction_id(evse_id)
                .await
                .is_some(),
            None => self.evse_manager.any_transaction_active().await,
        };

        if blocking_transaction && !operative {
            self.scheduled_changes.lock().unwrap().insert(
                evse_id.unwrap_or(0),
                ScheduledChange {
                    operative,
                    connector_id,
                },
            );
            info!(?evse_id, "ChangeAvailability scheduled behind active transaction");
            return respond(ChangeAvailabilityStatusEnumType::Scheduled);
        }

        self.apply_operational_status(evse_id, connector_id, operative)
            .await;
        respond(ChangeAvailabilityStatusEnumType::Accepted)
    }

    /// Apply the scheduled change for `evse_id` (0 = station-wide), if
    /// one is waiting and no transaction blocks it any longer.
    pub async fn handle_scheduled_change_availability_requests(&self, evse_id: i32) {
        let change = self.scheduled_changes.lock().unwrap().get(&evse_id).cloned();
        let Some(change) = change else {
            return;
        };
        let still_blocked = if evse_id == 0 {
            self.evse_manager.any_transaction_active().await
        } else {
            self.evse_manager
                .active_transaction_id(evse_id)
                .await
                .is_some()
        };
        if still_blocked {
            return;
        }
        self.scheduled_changes.lock().unwrap().remove(&evse_id);
        let target = (evse_id != 0).then_some(evse_id);
        self.apply_operational_status(target, change.connector_id, change.operative)
            .await;
    }

    async fn apply_operational_status(
        &self,
        evse_id: Option<i32>,
        connector_id: Option<i32>,
        operative: bool,
    ) {
        let event = if operative {
            ConnectorEvent::UnavailableCleared
        } else {
            ConnectorEvent::Unavailable
        };

        for evse in self.evse_manager.evses() {
            let (id, changes) = {
                let mut evse = evse.lock().await;
                let id = evse.id();
                if evse_id.map(|target| target != id).unwrap_or(false) {
                    continue;
                }
                let connectors: Vec<i32> = match connector_id {
                    Some(connector) => vec![connector],
                    None => (1..=evse.connector_count() as i32).collect(),
                };
                let mut changes = Vec::new();
                for connector in connectors {
                    match evse.submit_event(connector, event) {
                        Ok(Some(status)) => changes.push((connector, status)),
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "ChangeAvailability on unknown connector"),
                    }
                }
                (id, changes)
            };
            for (connector, status) in changes {
                self.status_notification_req(id, connector, &status, false)
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::evse::CurrentPhaseType;
    use crate::application::queue::{
        MessageQueue, MessageQueueConfig, RegistrationState, SendFn,
    };
    use crate::infrastructure::InMemoryStorage;
    use rust_ocpp::v2_0_1::enumerations::charging_state_enum_type::ChargingStateEnumType;
    use serde_json::json;
    use tokio::sync::mpsc;

    async fn availability() -> (Availability, Arc<EvseManager>, Arc<MessageQueue>) {
        let storage = Arc::new(InMemoryStorage::new());
        let evse_manager = Arc::new(EvseManager::new(
            &[(1, CurrentPhaseType::Ac), (2, CurrentPhaseType::Ac)],
            storage.clone(),
        ));
        let send_fn: SendFn = Arc::new(|_| true);
        let (tx, _rx) = mpsc::unbounded_channel();
        let queue = MessageQueue::new(MessageQueueConfig::default(), storage, send_fn, tx);
        let dispatcher = Arc::new(MessageDispatcher::new(queue.clone(), RegistrationState::new()));
        (
            Availability::new(dispatcher, evse_manager.clone()),
            evse_manager,
            queue,
        )
    }

    #[tokio::test]
    async fn all_status_notifications_cover_every_connector() {
        let (availability, _, queue) = availability().await;
        availability.send_all_status_notifications().await;
        // 1 + 2 connectors
        assert_eq!(queue.queued_call_count().await, 3);
    }

    #[tokio::test]
    async fn changed_notifications_skip_unchanged_connectors() {
        let (availability, evse_manager, queue) = availability().await;
        availability.send_all_status_notifications().await;
        let baseline = queue.queued_call_count().await;

        // nothing changed: nothing new
        availability.send_changed_status_notifications().await;
        assert_eq!(queue.queued_call_count().await, baseline);

        // one connector changes
        {
            let evse = evse_manager.evse(1).unwrap();
            evse.lock()
                .await
                .submit_event(1, ConnectorEvent::PlugIn)
                .unwrap();
        }
        availability.send_changed_status_notifications().await;
        assert_eq!(queue.queued_call_count().await, baseline + 1);
    }

    #[tokio::test]
    async fn change_availability_applies_immediately_when_idle() {
        let (availability, evse_manager, _) = availability().await;
        let response = availability
            .handle_change_availability(&json!({
                "operationalStatus": "Inoperative",
                "evse": { "id": 1 },
            }))
            .await;
        assert_eq!(response["status"], "Accepted");

        let evse = evse_manager.evse(1).unwrap();
        assert_eq!(
            evse.lock().await.connector_status(1).unwrap(),
            ConnectorStatusEnumType::Unavailable
        );
    }

    #[tokio::test]
    async fn change_availability_schedules_behind_transaction() {
        let (availability, evse_manager, _) = availability().await;
        {
            let evse = evse_manager.evse(1).unwrap();
            evse.lock()
                .await
                .open_transaction(
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
        }

        let response = availability
            .handle_change_availability(&json!({
                "operationalStatus": "Inoperative",
                "evse": { "id": 1 },
            }))
            .await;
        assert_eq!(response["status"], "Scheduled");

        // still operative while the transaction runs
        {
            let evse = evse_manager.evse(1).unwrap();
            assert_ne!(
                evse.lock().await.connector_status(1).unwrap(),
                ConnectorStatusEnumType::Unavailable
            );
        }

        // transaction ends: the scheduled change lands
        {
            let evse = evse_manager.evse(1).unwrap();
            evse.lock().await.release_transaction();
        }
        availability
            .handle_scheduled_change_availability_requests(1)
            .await;
        let evse = evse_manager.evse(1).unwrap();
        assert_eq!(
            evse.lock().await.connector_status(1).unwrap(),
            ConnectorStatusEnumType::Unavailable
        );
    }

    #[tokio::test]
    async fn change_availability_unknown_evse_rejected() {
        let (availability, _, _) = availability().await;
        let response = availability
            .handle_change_availability(&json!({
                "operationalStatus": "Inoperative",
                "evse": { "id": 9 },
            }))
            .await;
        assert_eq!(response["status"], "Rejected");
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_timer_dispatches() {
        let (availability, _, queue) = availability().await;
        availability.set_heartbeat_timer_interval(Duration::from_secs(300));
        tokio::time::sleep(Duration::from_secs(650)).await;
        // two intervals elapsed; heartbeats discarded pre-acceptance is a
        // dispatcher concern, here the registration gate is still closed
        assert_eq!(queue.queued_call_count().await, 0);

        availability
            .dispatcher
            .registration()
            .set(rust_ocpp::v2_0_1::enumerations::registration_status_enum_type::RegistrationStatusEnumType::Accepted);
        tokio::time::sleep(Duration::from_secs(601)).await;
        assert_eq!(queue.queued_call_count().await, 2);
    }
}

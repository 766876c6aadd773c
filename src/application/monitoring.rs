//! Monitoring engine
//!
//! Installs variable monitors, watches device-model writes for
//! threshold and delta crossings, samples periodic monitors on a timer,
//! and batches the resulting events into `NotifyEvent` requests. While
//! offline past `OfflineThreshold`, queued events coalesce per monitor;
//! on reconnect they flush in generation order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rust_ocpp::v2_0_1::datatypes::clear_monitoring_result_type::ClearMonitoringResultType;
use rust_ocpp::v2_0_1::datatypes::event_data_type::EventDataType;
use rust_ocpp::v2_0_1::datatypes::set_monitoring_result_type::SetMonitoringResultType;
use rust_ocpp::v2_0_1::enumerations::clear_monitoring_status_enum_type::ClearMonitoringStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::event_notification_enum_type::EventNotificationEnumType;
use rust_ocpp::v2_0_1::enumerations::event_trigger_enum_type::EventTriggerEnumType;
use rust_ocpp::v2_0_1::enumerations::monitor_enum_type::MonitorEnumType;
use rust_ocpp::v2_0_1::enumerations::set_monitoring_status_enum_type::SetMonitoringStatusEnumType;
use rust_ocpp::v2_0_1::messages::notify_event::NotifyEventRequest;
use serde_json::Value;
use tracing::{debug, warn};

use super::device_model::DeviceModel;
use super::queue::MessageDispatcher;
use crate::domain::device_model::{Component, Monitor, MonitorKind, Variable};
use crate::domain::MessageAction;
use crate::infrastructure::StationStorage;

pub struct MonitoringEngine {
    device_model: Arc<DeviceModel>,
    storage: Arc<dyn StationStorage>,
    dispatcher: Arc<MessageDispatcher>,
    next_monitor_id: AtomicI32,
    next_event_id: AtomicI32,
    /// Last numeric value seen per monitor, the reference for Delta.
    reference_values: std::sync::Mutex<HashMap<i32, f64>>,
    /// Events generated while offline, flushed on reconnect.
    pending: std::sync::Mutex<Vec<EventDataType>>,
}

impl MonitoringEngine {
    pub async fn new(
        device_model: Arc<DeviceModel>,
        storage: Arc<dyn StationStorage>,
        dispatcher: Arc<MessageDispatcher>,
    ) -> Self {
        let persisted = storage.monitors_load_all().await.unwrap_or_default();
        let max_id = persisted.iter().map(|m| m.id).max().unwrap_or(0);
        Self {
            device_model,
            storage,
            dispatcher,
            next_monitor_id: AtomicI32::new(max_id + 1),
            next_event_id: AtomicI32::new(1),
            reference_values: std::sync::Mutex::new(HashMap::new()),
            pending: std::sync::Mutex::new(Vec::new()),
        }
    }

    // ── Monitor management ─────────────────────────────────

    /// Apply one `setMonitoringData` entry; returns the per-entry result
    /// for the `SetVariableMonitoring` response.
    pub async fn set_monitor(&self, data: &Value) -> SetMonitoringResultType {
        let component = Component {
            name: data["component"]["name"].as_str().unwrap_or_default().to_string(),
            instance: None,
            evse_id: data["component"]["evse"]["id"].as_i64().map(|v| v as i32),
        };
        let variable = Variable::named(data["variable"]["name"].as_str().unwrap_or_default());
        let severity = data["severity"].as_i64().unwrap_or(9) as i32;

        let kind = match data["type"].as_str() {
            Some("UpperThreshold") => Some(MonitorKind::UpperThreshold),
            Some("LowerThreshold") => Some(MonitorKind::LowerThreshold),
            Some("Delta") => Some(MonitorKind::Delta),
            Some("Periodic") => Some(MonitorKind::Periodic),
            Some("PeriodicClockAligned") => Some(MonitorKind::PeriodicClockAligned),
            other => {
                warn!(?other, "Unknown monitor type");
                None
            }
        };
        let value = data["value"].as_f64();

        let monitor = kind.zip(value).map(|(kind, value)| Monitor {
            id: match data["id"].as_i64() {
                Some(id) => id as i32,
                None => self.next_monitor_id.fetch_add(1, Ordering::SeqCst),
            },
            component: component.clone(),
            variable: variable.clone(),
            kind,
            value,
            severity,
            transaction_scope: data["transaction"].as_bool().unwrap_or(false),
        });

        let (status, id, wire_kind) = match monitor {
            Some(monitor) => match self.storage.monitor_store(&monitor).await {
                Ok(()) => (
                    SetMonitoringStatusEnumType::Accepted,
                    Some(monitor.id),
                    monitor.kind.into(),
                ),
                Err(e) => {
                    warn!(error = %e, "Could not store monitor");
                    (SetMonitoringStatusEnumType::Rejected, None, monitor.kind.into())
                }
            },
            None => (
                SetMonitoringStatusEnumType::Rejected,
                None,
                MonitorEnumType::UpperThreshold,
            ),
        };

        SetMonitoringResultType {
            id,
            status_info: None,
            status,
            kind: wire_kind,
            severity: severity as u8,
            component: (&component).into(),
            variable: (&variable).into(),
        }
    }

    /// Clear monitors by id; one result per requested id.
    pub async fn clear_monitors(&self, ids: &[i32]) -> Vec<ClearMonitoringResultType> {
        let mut results = Vec::new();
        for id in ids {
            let status = match self.storage.monitor_delete(*id).await {
                Ok(true) => ClearMonitoringStatusEnumType::Accepted,
                Ok(false) => ClearMonitoringStatusEnumType::NotFound,
                Err(e) => {
                    warn!(error = %e, monitor_id = id, "Could not clear monitor");
                    ClearMonitoringStatusEnumType::Rejected
                }
            };
            results.push(ClearMonitoringResultType {
                status,
                id: *id,
                status_info: None,
            });
        }
        results
    }

    pub async fn monitors(&self) -> Vec<Monitor> {
        self.storage.monitors_load_all().await.unwrap_or_default()
    }

    /// Drop every installed monitor (SetMonitoringBase HardWiredOnly /
    /// FactoryDefault).
    pub async fn clear_custom_monitors(&self) {
        if let Err(e) = self.storage.monitors_clear_custom().await {
            warn!(error = %e, "Could not clear custom monitors");
        }
    }

    // ── Evaluation ─────────────────────────────────────────

    /// Evaluate threshold and delta monitors against a fresh write.
    /// Called from the device-model observer, after commit.
    pub async fn on_variable_written(
        &self,
        component: &Component,
        variable: &Variable,
        value: &str,
    ) -> Vec<EventDataType> {
        let Ok(numeric) = value.parse::<f64>() else {
            return Vec::new();
        };
        let monitors = self.monitors().await;
        let mut events = Vec::new();

        for monitor in monitors {
            if monitor.component != *component || monitor.variable != *variable {
                continue;
            }
            let crossed = {
                let mut references = self.reference_values.lock().unwrap();
                let previous = references.insert(monitor.id, numeric);
                match monitor.kind {
                    MonitorKind::UpperThreshold => {
                        numeric > monitor.value
                            && previous.map(|p| p <= monitor.value).unwrap_or(true)
                    }
                    MonitorKind::LowerThreshold => {
                        numeric < monitor.value
                            && previous.map(|p| p >= monitor.value).unwrap_or(true)
                    }
                    MonitorKind::Delta => {
                        let reference = previous.unwrap_or(numeric);
                        if (numeric - reference).abs() >= monitor.value {
                            true
                        } else {
                            // keep the old reference until the delta fires
                            references.insert(monitor.id, reference);
                            false
                        }
                    }
                    MonitorKind::Periodic | MonitorKind::PeriodicClockAligned => false,
                }
            };

            if crossed {
                debug!(monitor_id = monitor.id, value, "Monitor crossed");
                events.push(self.event_for(&monitor, value, EventTriggerEnumType::Alerting));
            }
        }
        events
    }

    /// Sample all periodic monitors; driven by the monitoring timer.
    pub async fn sample_periodic_monitors(&self, clock_aligned: bool) -> Vec<EventDataType> {
        let kind = if clock_aligned {
            MonitorKind::PeriodicClockAligned
        } else {
            MonitorKind::Periodic
        };
        let mut events = Vec::new();
        for monitor in self.monitors().await {
            if monitor.kind != kind {
                continue;
            }
            let value = self
                .device_model
                .get((monitor.component.name.as_str(), monitor.variable.name.as_str()));
            if let Some(value) = value {
                events.push(self.event_for(&monitor, &value, EventTriggerEnumType::Periodic));
            }
        }
        events
    }

    fn event_for(
        &self,
        monitor: &Monitor,
        value: &str,
        trigger: EventTriggerEnumType,
    ) -> EventDataType {
        EventDataType {
            event_id: self.next_event_id.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            trigger,
            cause: None,
            actual_value: value.to_string(),
            tech_code: None,
            tech_info: None,
            cleared: None,
            transaction_id: None,
            variable_monitoring_id: Some(monitor.id),
            event_notification_type: EventNotificationEnumType::CustomMonitor,
            component: (&monitor.component).into(),
            variable: (&monitor.variable).into(),
        }
    }

    // ── Reporting ──────────────────────────────────────────

    /// Send (or, offline, queue) a batch of events.
    pub async fn report_events(&self, events: Vec<EventDataType>, online: bool) {
        if events.is_empty() {
            return;
        }
        if online {
            self.notify_event_req(events).await;
        } else {
            let mut pending = self.pending.lock().unwrap();
            // coalesce: one pending event per monitor, latest wins
            for event in events {
                if let Some(id) = event.variable_monitoring_id {
                    pending.retain(|p| p.variable_monitoring_id != Some(id));
                }
                pending.push(event);
            }
        }
    }

    /// Flush events coalesced while offline, in generation order.
    pub async fn flush_pending(&self) {
        let mut events: Vec<EventDataType> = {
            let mut pending = self.pending.lock().unwrap();
            std::mem::take(&mut *pending)
        };
        if events.is_empty() {
            return;
        }
        events.sort_by_key(|e| e.event_id);
        self.notify_event_req(events).await;
    }

    async fn notify_event_req(&self, events: Vec<EventDataType>) {
        let request = NotifyEventRequest {
            generated_at: Utc::now(),
            seq_no: 0,
            tbc: None,
            event_data: events,
        };
        let payload = match serde_json::to_value(&request) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Could not serialize NotifyEvent");
                return;
            }
        };
        let _ = self
            .dispatcher
            .dispatch_call(MessageAction::NotifyEvent, payload, false)
            .await;
    }
}

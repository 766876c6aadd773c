//! Charge point orchestrator
//!
//! The registration state machine and the catalog of handlers for every
//! inbound request. Owns the cross-component fan-out: boot acceptance
//! starts the heartbeat / aligned-data timers and the full round of
//! status notifications; transport edges pause and resume the queue;
//! local events (plug-in, authorize, meter ticks, faults) become
//! TransactionEvent and StatusNotification traffic.
//!
//! All observable work happens on one event task, so user callbacks see
//! a single-threaded, totally ordered stream.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_ocpp::v2_0_1::datatypes::charging_profile_type::ChargingProfileType;
use rust_ocpp::v2_0_1::datatypes::charging_station_type::ChargingStationType;
use rust_ocpp::v2_0_1::datatypes::composite_schedule_type::CompositeScheduleType;
use rust_ocpp::v2_0_1::datatypes::evse_type::EVSEType;
use rust_ocpp::v2_0_1::datatypes::get_variable_result_type::GetVariableResultType;
use rust_ocpp::v2_0_1::datatypes::id_token_type::IdTokenType;
use rust_ocpp::v2_0_1::datatypes::meter_value_type::MeterValueType;
use rust_ocpp::v2_0_1::datatypes::monitoring_data_type::MonitoringDataType;
use rust_ocpp::v2_0_1::datatypes::report_data_type::ReportDataType;
use rust_ocpp::v2_0_1::datatypes::set_variable_result_type::SetVariableResultType;
use rust_ocpp::v2_0_1::datatypes::status_info_type::StatusInfoType;
use rust_ocpp::v2_0_1::datatypes::transaction_type::TransactionType;
use rust_ocpp::v2_0_1::datatypes::variable_monitoring_type::VariableMonitoringType;
use rust_ocpp::v2_0_1::enumerations::boot_reason_enum_type::BootReasonEnumType;
use rust_ocpp::v2_0_1::enumerations::charging_limit_source_enum_type::ChargingLimitSourceEnumType;
use rust_ocpp::v2_0_1::enumerations::charging_profile_purpose_enum_type::ChargingProfilePurposeEnumType;
use rust_ocpp::v2_0_1::enumerations::charging_profile_status_enum_type::ChargingProfileStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::charging_rate_unit_enum_type::ChargingRateUnitEnumType;
use rust_ocpp::v2_0_1::enumerations::charging_state_enum_type::ChargingStateEnumType;
use rust_ocpp::v2_0_1::enumerations::clear_charging_profile_status_enum_type::ClearChargingProfileStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::customer_information_status_enum_type::CustomerInformationStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::data_transfer_status_enum_type::DataTransferStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::firmware_status_enum_type::FirmwareStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::generic_device_model_status_enum_type::GenericDeviceModelStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::generic_status_enum_type::GenericStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::get_charging_profile_status_enum_type::GetChargingProfileStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::log_status_enum_type::LogStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::reason_enum_type::ReasonEnumType;
use rust_ocpp::v2_0_1::enumerations::registration_status_enum_type::RegistrationStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::request_start_stop_status_enum_type::RequestStartStopStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::reset_status_enum_type::ResetStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::set_network_profile_status_enum_type::SetNetworkProfileStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::set_variable_status_enum_type::SetVariableStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::transaction_event_enum_type::TransactionEventEnumType;
use rust_ocpp::v2_0_1::enumerations::trigger_message_status_enum_type::TriggerMessageStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::trigger_reason_enum_type::TriggerReasonEnumType;
use rust_ocpp::v2_0_1::enumerations::unlock_status_enum_type::UnlockStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::update_firmware_status_enum_type::UpdateFirmwareStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::upload_log_status_enum_type::UploadLogStatusEnumType;
use rust_ocpp::v2_0_1::messages::boot_notification::BootNotificationRequest;
use rust_ocpp::v2_0_1::messages::clear_charging_profile::ClearChargingProfileResponse;
use rust_ocpp::v2_0_1::messages::clear_variable_monitoring::ClearVariableMonitoringResponse;
use rust_ocpp::v2_0_1::messages::customer_information::CustomerInformationResponse;
use rust_ocpp::v2_0_1::messages::datatransfer::DataTransferResponse;
use rust_ocpp::v2_0_1::messages::firmware_status_notification::FirmwareStatusNotificationRequest;
use rust_ocpp::v2_0_1::messages::get_base_report::GetBaseReportResponse;
use rust_ocpp::v2_0_1::messages::get_charging_profiles::GetChargingProfilesResponse;
use rust_ocpp::v2_0_1::messages::get_composite_schedule::GetCompositeScheduleResponse;
use rust_ocpp::v2_0_1::messages::get_log::GetLogResponse;
use rust_ocpp::v2_0_1::messages::get_monitoring_report::GetMonitoringReportResponse;
use rust_ocpp::v2_0_1::messages::get_report::GetReportResponse;
use rust_ocpp::v2_0_1::messages::get_transaction_status::GetTransactionStatusResponse;
use rust_ocpp::v2_0_1::messages::get_variables::GetVariablesResponse;
use rust_ocpp::v2_0_1::messages::log_status_notification::LogStatusNotificationRequest;
use rust_ocpp::v2_0_1::messages::meter_values::MeterValuesRequest;
use rust_ocpp::v2_0_1::messages::notify_customer_information::NotifyCustomerInformationRequest;
use rust_ocpp::v2_0_1::messages::notify_monitoring_report::NotifyMonitoringReportRequest;
use rust_ocpp::v2_0_1::messages::notify_report::NotifyReportRequest;
use rust_ocpp::v2_0_1::messages::report_charging_profiles::ReportChargingProfilesRequest;
use rust_ocpp::v2_0_1::messages::request_start_transaction::RequestStartTransactionResponse;
use rust_ocpp::v2_0_1::messages::request_stop_transaction::RequestStopTransactionResponse;
use rust_ocpp::v2_0_1::messages::reset::ResetResponse;
use rust_ocpp::v2_0_1::messages::set_charging_profile::SetChargingProfileResponse;
use rust_ocpp::v2_0_1::messages::set_monitoring_base::SetMonitoringBaseResponse;
use rust_ocpp::v2_0_1::messages::set_monitoring_level::SetMonitoringLevelResponse;
use rust_ocpp::v2_0_1::messages::set_network_profile::SetNetworkProfileResponse;
use rust_ocpp::v2_0_1::messages::set_variable_monitoring::SetVariableMonitoringResponse;
use rust_ocpp::v2_0_1::messages::set_variables::SetVariablesResponse;
use rust_ocpp::v2_0_1::messages::transaction_event::TransactionEventRequest;
use rust_ocpp::v2_0_1::messages::trigger_message::TriggerMessageResponse;
use rust_ocpp::v2_0_1::messages::unlock_connector::UnlockConnectorResponse;
use rust_ocpp::v2_0_1::messages::update_firmware::UpdateFirmwareResponse;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use super::authorization::{token_hash, AuthorizationEngine};
use super::availability::Availability;
use super::callbacks::Callbacks;
use super::device_model::{vars, DeviceModel};
use super::evse::{filter_meter_value, ConnectorEvent, EvseManager};
use super::monitoring::MonitoringEngine;
use super::queue::{
    CallOutcome, MessageDispatcher, MessageQueue, MessageQueueConfig, QueueNotification,
    ReceivedMessage, RegistrationState, SendFn,
};
use super::security::{security_events, SecurityBlock, SecurityProvider};
use super::smart_charging::{ClearProfileCriteria, ReportProfileCriteria, SmartChargingHandler};
use super::transport::{
    ConnectionFailedReason, ConnectivityManager, ConnectivityOptions, TransportEvent,
};
use crate::config::StationConfig;
use crate::domain::charging_profile::ChargingProfile;
use crate::domain::device_model::{AttributeKind, Component, ValueSource, Variable};
use crate::domain::{MessageAction, QueuedMessage, StationResult};
use crate::infrastructure::StationStorage;
use crate::support::ocpp_frame::{error_code, OcppFrame};
use crate::support::shutdown::ShutdownSignal;
use crate::support::timer::TimerSlot;

const DEFAULT_BOOT_NOTIFICATION_RETRY_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_MAX_CUSTOMER_INFORMATION_DATA_LENGTH: usize = 51200;
const CUSTOMER_INFORMATION_CHUNK: usize = 512;
const MONITORING_DRIVER_TICK: Duration = Duration::from_secs(60);
/// Recently seen inbound Call ids, for duplicate detection.
const RECENT_CALL_IDS: usize = 16;

/// Outcome of an inbound-call handler.
enum InboundOutcome {
    Result(Value),
    Error { code: &'static str, description: String },
}

/// Registration gate decision for an inbound Call.
#[derive(Debug, PartialEq, Eq)]
enum GateDecision {
    Handle,
    /// B02.FR.05: answer `status: Rejected` without touching the handler.
    RejectRequestStartStop,
    /// B02.FR.09: answer CallError `SecurityError`.
    SecurityError,
}

/// A pending plug/authorize pair per EVSE; a transaction opens when the
/// pair completes (order is site policy).
#[derive(Default, Clone)]
struct PendingSession {
    plugged_in_connector: Option<i32>,
    id_token: Option<Value>,
}

struct ScheduledReset {
    /// Empty set = the whole station resets when the last session ends.
    evse_ids: HashSet<i32>,
}

pub struct ChargePoint {
    config: StationConfig,
    storage: Arc<dyn StationStorage>,
    device_model: Arc<DeviceModel>,
    evse_manager: Arc<EvseManager>,
    connectivity: Arc<ConnectivityManager>,
    queue: Arc<MessageQueue>,
    dispatcher: Arc<MessageDispatcher>,
    registration: RegistrationState,
    availability: Arc<Availability>,
    authorization: Arc<AuthorizationEngine>,
    smart_charging: Arc<SmartChargingHandler>,
    monitoring: Arc<MonitoringEngine>,
    security: Arc<SecurityBlock>,
    security_provider: Arc<dyn SecurityProvider>,
    callbacks: Callbacks,

    boot_reason: Mutex<BootReasonEnumType>,
    boot_notification_timer: TimerSlot,
    aligned_data_timer: TimerSlot,
    monitoring_timer: TimerSlot,

    pending_sessions: DashMap<i32, PendingSession>,
    remote_start_per_evse: DashMap<i32, (Value, i32)>,
    reset_scheduled: std::sync::Mutex<Option<ScheduledReset>>,
    firmware_status: std::sync::Mutex<(String, Option<i32>)>,
    upload_log_status: std::sync::Mutex<(String, Option<i32>)>,
    recent_call_ids: std::sync::Mutex<VecDeque<String>>,
    time_disconnected: std::sync::Mutex<Option<tokio::time::Instant>>,
    skip_invalid_csms_certificate_notifications: AtomicBool,

    receivers: std::sync::Mutex<Option<EventReceivers>>,
    self_ref: std::sync::Weak<ChargePoint>,
    shutdown: ShutdownSignal,
}

struct EventReceivers {
    transport: mpsc::UnboundedReceiver<TransportEvent>,
    queue: mpsc::UnboundedReceiver<QueueNotification>,
    variables: mpsc::UnboundedReceiver<(Component, Variable, String)>,
}

impl ChargePoint {
    pub async fn new(
        config: StationConfig,
        storage: Arc<dyn StationStorage>,
        security_provider: Arc<dyn SecurityProvider>,
        callbacks: Callbacks,
    ) -> Arc<Self> {
        let device_model =
            DeviceModel::new(storage.clone(), config.default_variable_declarations()).await;
        let evse_manager = Arc::new(EvseManager::new(&config.evse_layout(), storage.clone()));

        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (variable_tx, variable_rx) = mpsc::unbounded_channel();

        let connectivity = Arc::new(ConnectivityManager::new(
            config.network_profiles(),
            &device_model
                .get(vars::NETWORK_CONFIGURATION_PRIORITY)
                .unwrap_or_else(|| "1".into()),
            connectivity_options(&config, &device_model),
            transport_tx,
        ));

        let send_connectivity = connectivity.clone();
        let send_fn: SendFn = Arc::new(move |text| send_connectivity.send_to_websocket(text));
        let queue = MessageQueue::new(
            queue_config(&device_model),
            storage.clone(),
            send_fn,
            queue_tx,
        );

        let registration = RegistrationState::new();
        let dispatcher = Arc::new(MessageDispatcher::new(queue.clone(), registration.clone()));

        let availability = Arc::new(Availability::new(dispatcher.clone(), evse_manager.clone()));
        let authorization = Arc::new(AuthorizationEngine::new(
            device_model.clone(),
            storage.clone(),
            dispatcher.clone(),
        ));
        let smart_charging = Arc::new(SmartChargingHandler::new(
            evse_manager.clone(),
            device_model.clone(),
            storage.clone(),
        ));
        let monitoring = Arc::new(
            MonitoringEngine::new(device_model.clone(), storage.clone(), dispatcher.clone()).await,
        );
        let security = Arc::new(SecurityBlock::new(dispatcher.clone()));

        // monitor evaluation and reconfiguration happen on the event task
        let observer_tx = variable_tx;
        device_model.subscribe(Box::new(move |component, variable, attribute, value| {
            if attribute == AttributeKind::Actual {
                let _ = observer_tx.send((component.clone(), variable.clone(), value.to_string()));
            }
        }));

        Arc::new_cyclic(|weak| Self {
            config,
            storage,
            device_model,
            evse_manager,
            connectivity,
            queue,
            dispatcher,
            registration,
            availability,
            authorization,
            smart_charging,
            monitoring,
            security,
            security_provider,
            callbacks,
            boot_reason: Mutex::new(BootReasonEnumType::PowerUp),
            boot_notification_timer: TimerSlot::new(),
            aligned_data_timer: TimerSlot::new(),
            monitoring_timer: TimerSlot::new(),
            pending_sessions: DashMap::new(),
            remote_start_per_evse: DashMap::new(),
            reset_scheduled: std::sync::Mutex::new(None),
            firmware_status: std::sync::Mutex::new(("Idle".into(), None)),
            upload_log_status: std::sync::Mutex::new(("Idle".into(), None)),
            recent_call_ids: std::sync::Mutex::new(VecDeque::new()),
            time_disconnected: std::sync::Mutex::new(None),
            skip_invalid_csms_certificate_notifications: AtomicBool::new(false),
            receivers: std::sync::Mutex::new(Some(EventReceivers {
                transport: transport_rx,
                queue: queue_rx,
                variables: variable_rx,
            })),
            self_ref: weak.clone(),
            shutdown: ShutdownSignal::new(),
        })
    }

    pub fn device_model(&self) -> &Arc<DeviceModel> {
        &self.device_model
    }

    pub fn evse_manager(&self) -> &Arc<EvseManager> {
        &self.evse_manager
    }

    pub fn registration_status(&self) -> RegistrationStatusEnumType {
        self.registration.get()
    }

    fn is_offline(&self) -> bool {
        !self.connectivity.is_websocket_connected()
    }

    // ── Lifecycle ──────────────────────────────────────────

    pub async fn start(self: &Arc<Self>, boot_reason: BootReasonEnumType) -> StationResult<()> {
        *self.boot_reason.lock().await = boot_reason.clone();

        let receivers = self
            .receivers
            .lock()
            .unwrap()
            .take()
            .expect("start() called twice");
        let charge_point = self.clone();
        tokio::spawn(async move {
            charge_point.run_event_loop(receivers).await;
        });

        self.queue.start().await?;

        let startup_event = match boot_reason {
            BootReasonEnumType::PowerUp => (
                security_events::STARTUP_OF_THE_DEVICE,
                format!(
                    "Charging station powered up, firmware {}",
                    self.config.station.firmware_version
                ),
            ),
            BootReasonEnumType::FirmwareUpdate => (
                security_events::FIRMWARE_UPDATED,
                format!(
                    "Reboot after firmware update, firmware {}",
                    self.config.station.firmware_version
                ),
            ),
            _ => (
                security_events::RESET_OR_REBOOT,
                "Charging station reset or reboot".to_string(),
            ),
        };
        self.security
            .security_event_notification_req(startup_event.0, Some(&startup_event.1), None)
            .await;

        self.smart_charging.clear_invalid_profiles().await;
        self.boot_notification_req(false).await;
        self.connectivity.connect(None);

        let weak = self.weak_self();
        self.monitoring_timer.interval(MONITORING_DRIVER_TICK, move || {
            let weak = weak.clone();
            async move {
                let Some(charge_point) = weak.upgrade() else {
                    return;
                };
                let online = !charge_point.is_offline();
                let mut events = charge_point.monitoring.sample_periodic_monitors(false).await;
                events.extend(charge_point.monitoring.sample_periodic_monitors(true).await);
                charge_point.monitoring.report_events(events, online).await;
            }
        });

        info!(station_id = self.config.station.id.as_str(), "Charge point started");
        Ok(())
    }

    /// Cancel all timers, close the transport with `GoingAway`, stop the
    /// queue. Persisted transactional messages stay on disk for replay.
    pub async fn stop(&self) {
        self.boot_notification_timer.stop();
        self.aligned_data_timer.stop();
        self.monitoring_timer.stop();
        self.availability.stop_heartbeat_timer();
        self.connectivity.disconnect();
        self.queue.stop().await;
        self.shutdown.trigger();
        info!("Charge point stopped");
    }

    // ── Event loop ─────────────────────────────────────────

    async fn run_event_loop(self: Arc<Self>, mut receivers: EventReceivers) {
        loop {
            tokio::select! {
                event = receivers.transport.recv() => match event {
                    Some(event) => self.handle_transport_event(event).await,
                    None => break,
                },
                notification = receivers.queue.recv() => match notification {
                    Some(QueueNotification::MessageDropped(message)) => {
                        self.handle_dropped_message(message).await;
                    }
                    None => break,
                },
                written = receivers.variables.recv() => match written {
                    Some((component, variable, value)) => {
                        self.handle_variable_written(component, variable, value).await;
                    }
                    None => break,
                },
                _ = self.shutdown.notified().wait() => break,
            }
        }
        debug!("Charge point event loop stopped");
    }

    async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { configuration_slot } => {
                info!(configuration_slot, "Websocket connected");
                self.queue.resume(Duration::ZERO).await;
                self.skip_invalid_csms_certificate_notifications
                    .store(false, Ordering::SeqCst);

                if self.registration.is_accepted() {
                    let offline_for = self.time_disconnected.lock().unwrap().take();
                    if let Some(since) = offline_for {
                        let threshold: u64 = self.device_model.get_or(vars::OFFLINE_THRESHOLD, 0);
                        let offline = since.elapsed();
                        if threshold > 0 && offline > Duration::from_secs(threshold) {
                            // B04.FR.01
                            self.availability.send_all_status_notifications().await;
                        } else {
                            // B04.FR.02
                            self.availability.send_changed_status_notifications().await;
                        }
                    }
                    self.monitoring.flush_pending().await;
                }

                // a registration still in progress needs a fresh
                // BootNotification unless one is already on its way
                if !self.registration.is_accepted()
                    && !self.queue.contains_action(MessageAction::BootNotification).await
                    && !self.boot_notification_timer.is_running()
                {
                    self.boot_notification_req(false).await;
                }

                if let Some(callback) = &self.callbacks.connection_state_changed {
                    callback(true, configuration_slot);
                }
            }
            TransportEvent::Disconnected {
                configuration_slot,
                reason,
            } => {
                warn!(configuration_slot, reason = reason.as_str(), "Websocket disconnected");
                self.queue.pause().await;
                *self.time_disconnected.lock().unwrap() = Some(tokio::time::Instant::now());
                if let Some(callback) = &self.callbacks.connection_state_changed {
                    callback(false, configuration_slot);
                }
            }
            TransportEvent::ConnectionFailed { reason, .. } => {
                self.queue.pause().await;
                match reason {
                    ConnectionFailedReason::InvalidCsmsCertificate => {
                        // dedup: one security event per disconnected episode
                        if !self
                            .skip_invalid_csms_certificate_notifications
                            .swap(true, Ordering::SeqCst)
                        {
                            self.security
                                .security_event_notification_req(
                                    security_events::INVALID_CSMS_CERTIFICATE,
                                    None,
                                    None,
                                )
                                .await;
                        }
                    }
                    ConnectionFailedReason::FailedToAuthenticate => {
                        self.security
                            .security_event_notification_req(
                                security_events::FAILED_TO_AUTHENTICATE_AT_CSMS,
                                None,
                                None,
                            )
                            .await;
                    }
                    ConnectionFailedReason::PongTimeout
                    | ConnectionFailedReason::Network
                    | ConnectionFailedReason::Other => {}
                }
            }
            TransportEvent::ProfileExhausted { configuration_slot } => {
                warn!(configuration_slot, "Network profile exhausted its attempts");
                self.connectivity.advance_network_profile();
            }
            TransportEvent::Frame(text) => {
                self.handle_frame(&text).await;
            }
        }
    }

    async fn handle_dropped_message(&self, message: QueuedMessage) {
        error!(
            action = %message.action,
            unique_id = message.unique_id.as_str(),
            "Message dropped after exhausting attempts"
        );
        // an unanswered BootNotification must not strand the station
        if message.action == MessageAction::BootNotification {
            let charge_point = self.weak_self();
            self.boot_notification_timer
                .timeout(DEFAULT_BOOT_NOTIFICATION_RETRY_INTERVAL, move || async move {
                    if let Some(charge_point) = charge_point.upgrade() {
                        charge_point.boot_notification_req(false).await;
                    }
                });
            return;
        }
        // persistent failures never halt the engine; the observer hears of it
        if let Some(callback) = &self.callbacks.transaction_event {
            if message.action == MessageAction::TransactionEvent {
                callback(&message.payload);
            }
        }
    }

    async fn handle_variable_written(&self, component: Component, variable: Variable, value: String) {
        let events = self
            .monitoring
            .on_variable_written(&component, &variable, &value)
            .await;
        let online = !self.is_offline();
        self.monitoring.report_events(events, online).await;

        self.apply_variable_side_effects(&component, &variable, &value)
            .await;

        if let Some(callback) = &self.callbacks.variable_changed {
            callback(&component.name, &variable.name, &value);
        }
    }

    /// Required behavior on specific variable writes (B05, J01, ...).
    async fn apply_variable_side_effects(&self, component: &Component, variable: &Variable, value: &str) {
        let address = (component.name.as_str(), variable.name.as_str());
        match address {
            ("OCPPCommCtrlr", "HeartbeatInterval") => {
                if self.registration.is_accepted() {
                    if let Ok(seconds) = value.parse::<u64>() {
                        self.availability
                            .set_heartbeat_timer_interval(Duration::from_secs(seconds));
                    }
                }
            }
            ("AlignedDataCtrlr", "Interval") => {
                self.update_aligned_data_interval();
            }
            ("OCPPCommCtrlr", "MessageAttempts") => {
                if let Ok(attempts) = value.parse() {
                    self.queue.update_transaction_message_attempts(attempts);
                }
            }
            ("OCPPCommCtrlr", "MessageAttemptInterval") => {
                if let Ok(seconds) = value.parse::<u64>() {
                    self.queue
                        .update_transaction_message_retry_interval(Duration::from_secs(seconds));
                }
            }
            ("OCPPCommCtrlr", "MessageTimeout") => {
                if let Ok(seconds) = value.parse::<u64>() {
                    self.queue.update_message_timeout(Duration::from_secs(seconds));
                }
            }
            ("SecurityCtrlr", "BasicAuthPassword") => {
                let profile: i32 = self.device_model.get_or(vars::SECURITY_PROFILE, 1);
                if profile < 3 {
                    self.connectivity.set_basic_auth_password(value.to_string());
                }
            }
            ("OCPPCommCtrlr", "NetworkConfigurationPriority") => {
                self.connectivity.set_network_configuration_priority(value);
            }
            ("OCPPCommCtrlr", "WebSocketPingInterval")
            | ("OCPPCommCtrlr", "RetryBackOffRandomRange")
            | ("OCPPCommCtrlr", "RetryBackOffRepeatTimes")
            | ("OCPPCommCtrlr", "RetryBackOffWaitMinimum")
            | ("OCPPCommCtrlr", "NetworkProfileConnectionAttempts") => {
                self.connectivity
                    .set_connection_options(connectivity_options(&self.config, &self.device_model));
            }
            _ => {}
        }
    }

    // ── Inbound frames ─────────────────────────────────────

    async fn handle_frame(&self, text: &str) {
        let frame = match OcppFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Could not parse inbound frame");
                self.dispatcher
                    .dispatch_call_error("-1", error_code::RPC_FRAMEWORK_ERROR, &e.to_string())
                    .await;
                self.security
                    .security_event_notification_req(
                        security_events::INVALID_MESSAGES,
                        Some(text),
                        None,
                    )
                    .await;
                return;
            }
        };

        match self.queue.receive(frame).await {
            ReceivedMessage::Call {
                unique_id,
                action,
                payload,
            } => {
                let duplicate = {
                    let mut recent = self.recent_call_ids.lock().unwrap();
                    if recent.contains(&unique_id) {
                        true
                    } else {
                        recent.push_back(unique_id.clone());
                        while recent.len() > RECENT_CALL_IDS {
                            recent.pop_front();
                        }
                        false
                    }
                };
                if duplicate {
                    warn!(unique_id = unique_id.as_str(), "Duplicate unique id on inbound Call");
                    self.dispatcher
                        .dispatch_call_error(
                            &unique_id,
                            error_code::FORMATION_VIOLATION,
                            "Duplicate unique id",
                        )
                        .await;
                    self.security
                        .security_event_notification_req(
                            security_events::INVALID_MESSAGES,
                            Some(&unique_id),
                            None,
                        )
                        .await;
                    return;
                }

                match action {
                    Ok(action) => self.handle_call(action, &unique_id, payload).await,
                    Err(unknown) => {
                        warn!(action = unknown.0.as_str(), "Unknown inbound action");
                        self.dispatcher
                            .dispatch_call_error(&unique_id, error_code::NOT_IMPLEMENTED, "")
                            .await;
                    }
                }
            }
            ReceivedMessage::Response { request, outcome } => {
                self.handle_response(request, outcome).await;
            }
            ReceivedMessage::Unmatched { frame } => {
                warn!(unique_id = frame.unique_id(), "Response matches no in-flight call");
            }
        }
    }

    fn gate_inbound(&self, action: MessageAction, payload: &Value) -> GateDecision {
        match self.registration.get() {
            RegistrationStatusEnumType::Accepted => GateDecision::Handle,
            RegistrationStatusEnumType::Pending => match action {
                MessageAction::GetVariables
                | MessageAction::SetVariables
                | MessageAction::GetBaseReport
                | MessageAction::GetReport
                | MessageAction::TriggerMessage => GateDecision::Handle,
                MessageAction::RequestStartTransaction | MessageAction::RequestStopTransaction => {
                    GateDecision::RejectRequestStartStop
                }
                _ => GateDecision::SecurityError,
            },
            RegistrationStatusEnumType::Rejected => match action {
                // F06.FR.17 exception: a BootNotification may be triggered
                MessageAction::TriggerMessage
                    if payload["requestedMessage"].as_str() == Some("BootNotification") =>
                {
                    GateDecision::Handle
                }
                _ => GateDecision::SecurityError,
            },
        }
    }

    async fn handle_call(&self, action: MessageAction, unique_id: &str, payload: Value) {
        debug!(action = %action, unique_id, "Inbound call");

        match self.gate_inbound(action, &payload) {
            GateDecision::Handle => {}
            GateDecision::RejectRequestStartStop => {
                // B02.FR.05
                let response = if action == MessageAction::RequestStartTransaction {
                    serde_json::to_value(&RequestStartTransactionResponse {
                        status: RequestStartStopStatusEnumType::Rejected,
                        status_info: None,
                        transaction_id: None,
                    })
                } else {
                    serde_json::to_value(&RequestStopTransactionResponse {
                        status: RequestStartStopStatusEnumType::Rejected,
                        status_info: None,
                    })
                };
                self.dispatcher
                    .dispatch_call_result(unique_id, response.unwrap_or_default())
                    .await;
                return;
            }
            GateDecision::SecurityError => {
                // B02.FR.09
                warn!(action = %action, "Rejecting call while not registered");
                self.dispatcher
                    .dispatch_call_error(
                        unique_id,
                        error_code::SECURITY_ERROR,
                        &format!("{} not serviced in state {:?}", action, self.registration.get()),
                    )
                    .await;
                return;
            }
        }

        let outcome = self.dispatch_inbound(action, unique_id, &payload).await;
        match outcome {
            InboundOutcome::Result(response) => {
                self.dispatcher.dispatch_call_result(unique_id, response).await;
            }
            InboundOutcome::Error { code, description } => {
                self.dispatcher
                    .dispatch_call_error(unique_id, code, &description)
                    .await;
                if code == error_code::FORMATION_VIOLATION || code == error_code::FORMAT_VIOLATION {
                    self.security
                        .security_event_notification_req(
                            security_events::INVALID_MESSAGES,
                            Some(unique_id),
                            None,
                        )
                        .await;
                }
            }
        }
    }

    async fn dispatch_inbound(
        &self,
        action: MessageAction,
        _unique_id: &str,
        payload: &Value,
    ) -> InboundOutcome {
        match action {
            MessageAction::GetVariables => self.handle_get_variables(payload),
            MessageAction::SetVariables => self.handle_set_variables(payload).await,
            MessageAction::GetBaseReport => self.handle_get_base_report(payload).await,
            MessageAction::GetReport => self.handle_get_report(payload).await,
            MessageAction::Reset => self.handle_reset(payload).await,
            MessageAction::ChangeAvailability => {
                InboundOutcome::Result(self.availability.handle_change_availability(payload).await)
            }
            MessageAction::SetNetworkProfile => self.handle_set_network_profile(payload),
            MessageAction::RequestStartTransaction => {
                self.handle_request_start_transaction(payload).await
            }
            MessageAction::RequestStopTransaction => {
                self.handle_request_stop_transaction(payload).await
            }
            MessageAction::TriggerMessage => self.handle_trigger_message(payload).await,
            MessageAction::UnlockConnector => self.handle_unlock_connector(payload).await,
            MessageAction::GetTransactionStatus => self.handle_get_transaction_status(payload).await,
            MessageAction::SetChargingProfile => self.handle_set_charging_profile(payload).await,
            MessageAction::ClearChargingProfile => self.handle_clear_charging_profile(payload).await,
            MessageAction::GetChargingProfiles => self.handle_get_charging_profiles(payload).await,
            MessageAction::GetCompositeSchedule => self.handle_get_composite_schedule(payload).await,
            MessageAction::SetVariableMonitoring => {
                self.handle_set_variable_monitoring(payload).await
            }
            MessageAction::GetMonitoringReport => self.handle_get_monitoring_report(payload).await,
            MessageAction::ClearVariableMonitoring => {
                self.handle_clear_variable_monitoring(payload).await
            }
            MessageAction::SetMonitoringBase => self.handle_set_monitoring_base(payload).await,
            MessageAction::SetMonitoringLevel => self.handle_set_monitoring_level(payload).await,
            MessageAction::ClearCache => {
                InboundOutcome::Result(self.authorization.handle_clear_cache().await)
            }
            MessageAction::SendLocalList => {
                InboundOutcome::Result(self.authorization.handle_send_local_list(payload).await)
            }
            MessageAction::GetLocalListVersion => {
                InboundOutcome::Result(self.authorization.handle_get_local_list_version().await)
            }
            MessageAction::CustomerInformation => self.handle_customer_information(payload).await,
            MessageAction::UpdateFirmware => self.handle_update_firmware(payload).await,
            MessageAction::GetLog => self.handle_get_log(payload),
            MessageAction::DataTransfer => self.handle_data_transfer(payload),
            _ => InboundOutcome::Error {
                code: error_code::NOT_IMPLEMENTED,
                description: String::new(),
            },
        }
    }

    // ── Device model handlers ──────────────────────────────

    fn component_from(&self, value: &Value) -> Component {
        Component {
            name: value["name"].as_str().unwrap_or_default().to_string(),
            instance: value["instance"].as_str().map(String::from),
            evse_id: value["evse"]["id"].as_i64().map(|id| id as i32),
        }
    }

    fn variable_from(&self, value: &Value) -> Variable {
        Variable {
            name: value["name"].as_str().unwrap_or_default().to_string(),
            instance: value["instance"].as_str().map(String::from),
        }
    }

    fn handle_get_variables(&self, payload: &Value) -> InboundOutcome {
        let Some(entries) = payload["getVariableData"].as_array() else {
            return InboundOutcome::Error {
                code: error_code::FORMATION_VIOLATION,
                description: "getVariableData missing".into(),
            };
        };
        let max_items: usize = self
            .device_model
            .get_or(vars::ITEMS_PER_MESSAGE_GET_VARIABLES, 50);
        if entries.len() > max_items {
            // B06.FR.16
            return InboundOutcome::Error {
                code: error_code::OCCURRENCE_CONSTRAINT_VIOLATION,
                description: String::new(),
            };
        }

        let get_variable_result: Vec<GetVariableResultType> = entries
            .iter()
            .map(|entry| {
                let component = self.component_from(&entry["component"]);
                let variable = self.variable_from(&entry["variable"]);
                let attribute = entry["attributeType"]
                    .as_str()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(AttributeKind::Actual);
                let (attribute_status, attribute_value) =
                    self.device_model.request_value(&component, &variable, attribute);
                GetVariableResultType {
                    attribute_status,
                    attribute_status_info: None,
                    attribute_type: Some(attribute.into()),
                    attribute_value,
                    component: (&component).into(),
                    variable: (&variable).into(),
                }
            })
            .collect();

        match serde_json::to_value(&GetVariablesResponse { get_variable_result }) {
            Ok(response) => InboundOutcome::Result(response),
            Err(e) => InboundOutcome::Error {
                code: error_code::GENERIC_ERROR,
                description: e.to_string(),
            },
        }
    }

    async fn handle_set_variables(&self, payload: &Value) -> InboundOutcome {
        let Some(entries) = payload["setVariableData"].as_array() else {
            return InboundOutcome::Error {
                code: error_code::FORMATION_VIOLATION,
                description: "setVariableData missing".into(),
            };
        };

        let mut set_variable_result = Vec::new();
        for entry in entries {
            let component = self.component_from(&entry["component"]);
            let variable = self.variable_from(&entry["variable"]);
            let attribute = entry["attributeType"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or(AttributeKind::Actual);
            let value = entry["attributeValue"].as_str().unwrap_or_default();

            let attribute_status = if self.validate_set_variable(&component, &variable, value) {
                self.device_model
                    .set_value(&component, &variable, attribute, value, ValueSource::Csms)
                    .await
            } else {
                SetVariableStatusEnumType::Rejected
            };

            set_variable_result.push(SetVariableResultType {
                attribute_type: Some(attribute.into()),
                attribute_status,
                attribute_status_info: None,
                component: (&component).into(),
                variable: (&variable).into(),
            });
        }

        match serde_json::to_value(&SetVariablesResponse { set_variable_result }) {
            Ok(response) => InboundOutcome::Result(response),
            Err(e) => InboundOutcome::Error {
                code: error_code::GENERIC_ERROR,
                description: e.to_string(),
            },
        }
    }

    /// Special validation of writes with cross-component consequences.
    fn validate_set_variable(&self, component: &Component, variable: &Variable, value: &str) -> bool {
        if component.name == "OCPPCommCtrlr" && variable.name == "NetworkConfigurationPriority" {
            for slot in value.split(',') {
                let Ok(slot) = slot.trim().parse::<i32>() else {
                    return false;
                };
                let Some(profile) = self.connectivity.network_connection_profile(slot) else {
                    warn!(slot, "NetworkConfigurationPriority names an unknown slot");
                    return false;
                };
                if profile.security_profile == 3 && !self.security_provider.leaf_certificate_installed()
                {
                    return false;
                }
                if profile.security_profile >= 2
                    && !self.security_provider.csms_root_certificate_installed()
                {
                    return false;
                }
            }
        }
        true
    }

    async fn handle_get_base_report(&self, payload: &Value) -> InboundOutcome {
        let request_id = payload["requestId"].as_i64().unwrap_or(0) as i32;
        let report_data = self.device_model.report_data(None);
        self.notify_report_req(request_id, report_data).await;
        let response = GetBaseReportResponse {
            status: GenericDeviceModelStatusEnumType::Accepted,
            status_info: None,
        };
        InboundOutcome::Result(serde_json::to_value(&response).unwrap_or_default())
    }

    async fn handle_get_report(&self, payload: &Value) -> InboundOutcome {
        let request_id = payload["requestId"].as_i64().unwrap_or(0) as i32;
        let filter: Option<Vec<(String, String)>> =
            payload["componentVariable"].as_array().map(|entries| {
                entries
                    .iter()
                    .map(|entry| {
                        (
                            entry["component"]["name"].as_str().unwrap_or_default().to_string(),
                            entry["variable"]["name"].as_str().unwrap_or_default().to_string(),
                        )
                    })
                    .collect()
            });

        let max_items: usize = self.device_model.get_or(vars::ITEMS_PER_MESSAGE_GET_REPORT, 50);
        if filter.as_ref().map(|f| f.len() > max_items).unwrap_or(false) {
            // B08.FR.17
            return InboundOutcome::Error {
                code: error_code::OCCURRENCE_CONSTRAINT_VIOLATION,
                description: String::new(),
            };
        }

        let report_data = self.device_model.report_data(filter.as_deref());
        let status = if report_data.is_empty() {
            GenericDeviceModelStatusEnumType::EmptyResultSet
        } else {
            GenericDeviceModelStatusEnumType::Accepted
        };
        if !report_data.is_empty() {
            self.notify_report_req(request_id, report_data).await;
        }
        let response = GetReportResponse {
            status,
            status_info: None,
        };
        InboundOutcome::Result(serde_json::to_value(&response).unwrap_or_default())
    }

    // ── Reset ──────────────────────────────────────────────

    async fn handle_reset(&self, payload: &Value) -> InboundOutcome {
        let respond = |status: ResetStatusEnumType| {
            InboundOutcome::Result(
                serde_json::to_value(&ResetResponse {
                    status,
                    status_info: None,
                })
                .unwrap_or_default(),
            )
        };

        let kind = payload["type"].as_str().unwrap_or("Immediate");
        let evse_id = payload["evseId"].as_i64().map(|id| id as i32);

        let Some(reset_callback) = &self.callbacks.reset else {
            return respond(ResetStatusEnumType::Rejected);
        };

        let blocking = match evse_id {
            Some(evse_id) => self.evse_manager.active_transaction_id(evse_id).await.is_some(),
            None => self.evse_manager.any_transaction_active().await,
        };

        if blocking && kind == "OnIdle" {
            let mut scheduled = self.reset_scheduled.lock().unwrap();
            let entry = scheduled.get_or_insert_with(|| ScheduledReset {
                evse_ids: HashSet::new(),
            });
            if let Some(evse_id) = evse_id {
                entry.evse_ids.insert(evse_id);
            }
            return respond(ResetStatusEnumType::Scheduled);
        }

        let accepted = reset_callback(evse_id, kind);
        respond(if accepted {
            ResetStatusEnumType::Accepted
        } else {
            ResetStatusEnumType::Rejected
        })
    }

    // ── Network profiles ───────────────────────────────────

    fn handle_set_network_profile(&self, payload: &Value) -> InboundOutcome {
        let respond = |status: SetNetworkProfileStatusEnumType| {
            InboundOutcome::Result(
                serde_json::to_value(&SetNetworkProfileResponse {
                    status,
                    status_info: None,
                })
                .unwrap_or_default(),
            )
        };

        let slot = payload["configurationSlot"].as_i64().map(|s| s as i32);
        let connection = &payload["connectionData"];
        let (Some(slot), Some(url)) = (slot, connection["ocppCsmsUrl"].as_str()) else {
            return InboundOutcome::Error {
                code: error_code::FORMATION_VIOLATION,
                description: "configurationSlot or connectionData missing".into(),
            };
        };
        let security_profile = connection["securityProfile"].as_i64().unwrap_or(1) as i32;

        match url::Url::parse(url) {
            Ok(parsed) if parsed.scheme() == "ws" || parsed.scheme() == "wss" => {}
            _ => {
                warn!(url, "SetNetworkProfile with a non-websocket CSMS url");
                return respond(SetNetworkProfileStatusEnumType::Rejected);
            }
        }

        // downgrading an active profile is forbidden
        let active: i32 = self.device_model.get_or(vars::SECURITY_PROFILE, 1);
        if security_profile < active {
            warn!(slot, security_profile, active, "Rejecting security profile downgrade");
            return respond(SetNetworkProfileStatusEnumType::Rejected);
        }
        if security_profile == 3 && !self.security_provider.leaf_certificate_installed() {
            warn!(slot, "Security profile 3 without a station leaf certificate");
            return respond(SetNetworkProfileStatusEnumType::Rejected);
        }
        if security_profile >= 2 && !self.security_provider.csms_root_certificate_installed() {
            warn!(slot, "Security profile >= 2 without a CSMS root certificate");
            return respond(SetNetworkProfileStatusEnumType::Rejected);
        }

        self.connectivity
            .set_network_profile(crate::domain::NetworkConnectionProfile {
                configuration_slot: slot,
                security_profile,
                ocpp_csms_url: url.to_string(),
                basic_auth_identity: Some(self.config.station.id.clone()),
            });
        respond(SetNetworkProfileStatusEnumType::Accepted)
    }

    // ── Remote start / stop ────────────────────────────────

    async fn handle_request_start_transaction(&self, payload: &Value) -> InboundOutcome {
        let respond = |status: RequestStartStopStatusEnumType, status_info: Option<StatusInfoType>| {
            InboundOutcome::Result(
                serde_json::to_value(&RequestStartTransactionResponse {
                    status,
                    status_info,
                    transaction_id: None,
                })
                .unwrap_or_default(),
            )
        };

        let Some(evse_id) = payload["evseId"].as_i64().map(|id| id as i32) else {
            // F01.FR.07: no evse id, reject
            warn!("RequestStartTransaction without evseId");
            return respond(RequestStartStopStatusEnumType::Rejected, None);
        };
        if !self.evse_manager.exists(evse_id) {
            return InboundOutcome::Error {
                code: error_code::OCCURRENCE_CONSTRAINT_VIOLATION,
                description: format!("Evse {} does not exist", evse_id),
            };
        }
        let remote_start_id = payload["remoteStartId"].as_i64().unwrap_or(0) as i32;
        let id_token = payload["idToken"].clone();

        let available = {
            let evse = self.evse_manager.evse(evse_id).expect("checked above");
            let evse = evse.lock().await;
            evse.is_available_for_transaction()
        };
        if !available {
            // F01.FR.23..25
            info!(evse_id, "Remote start rejected, connector unavailable or occupied");
            return respond(RequestStartStopStatusEnumType::Rejected, None);
        }

        // F01.FR.26: an attached TxProfile must be valid
        let mut status_info = None;
        if self.device_model.get_bool(vars::SMART_CHARGING_ENABLED) {
            if let Ok(mut profile) =
                serde_json::from_value::<ChargingProfile>(payload["chargingProfile"].clone())
            {
                if profile.charging_profile_purpose == ChargingProfilePurposeEnumType::TxProfile {
                    // the transaction does not exist yet, so only the
                    // schedule rules apply here
                    let result = self
                        .smart_charging
                        .validate_profile_schedules(&mut profile, evse_id)
                        .await;
                    if result.is_valid() {
                        let _ = self
                            .storage
                            .profile_upsert(&crate::domain::InstalledProfile { evse_id, profile })
                            .await;
                    } else {
                        status_info = Some(StatusInfoType {
                            reason_code: result.reason_code().to_string(),
                            additional_info: Some(result.to_string()),
                        });
                    }
                }
            }
        }
        if status_info.is_some() {
            return respond(RequestStartStopStatusEnumType::Rejected, status_info);
        }

        let accepted = match &self.callbacks.remote_start_transaction {
            Some(callback) => callback(evse_id, &id_token, remote_start_id),
            None => false,
        };
        if accepted {
            // the first TransactionEvent for this token carries RemoteStart
            self.remote_start_per_evse
                .insert(evse_id, (id_token, remote_start_id));
        }
        respond(
            if accepted {
                RequestStartStopStatusEnumType::Accepted
            } else {
                RequestStartStopStatusEnumType::Rejected
            },
            None,
        )
    }

    async fn handle_request_stop_transaction(&self, payload: &Value) -> InboundOutcome {
        let respond = |status: RequestStartStopStatusEnumType| {
            InboundOutcome::Result(
                serde_json::to_value(&RequestStopTransactionResponse {
                    status,
                    status_info: None,
                })
                .unwrap_or_default(),
            )
        };

        let transaction_id = payload["transactionId"].as_str().unwrap_or_default();
        let Some(evse_id) = self.evse_manager.transaction_evse_id(transaction_id).await else {
            // F03.FR.08
            return respond(RequestStartStopStatusEnumType::Rejected);
        };
        // F03.FR.07
        let accepted = match &self.callbacks.stop_transaction {
            Some(callback) => callback(evse_id, "Remote"),
            None => false,
        };
        respond(if accepted {
            RequestStartStopStatusEnumType::Accepted
        } else {
            RequestStartStopStatusEnumType::Rejected
        })
    }

    // ── Trigger messages ───────────────────────────────────

    async fn handle_trigger_message(&self, payload: &Value) -> InboundOutcome {
        let requested = payload["requestedMessage"].as_str().unwrap_or_default();
        let evse_id = payload["evse"]["id"].as_i64().map(|id| id as i32);
        let connector_id = payload["evse"]["connectorId"].as_i64().map(|id| id as i32);

        if let Some(evse_id) = evse_id {
            if !self.evse_manager.exists(evse_id) {
                return InboundOutcome::Error {
                    code: error_code::OCCURRENCE_CONSTRAINT_VIOLATION,
                    description: format!("Evse {} does not exist", evse_id),
                };
            }
        }

        let target_evses: Vec<i32> = match evse_id {
            Some(evse_id) => vec![evse_id],
            None => (1..=self.evse_manager.count() as i32).collect(),
        };

        let status = match requested {
            "BootNotification" => {
                // F06.FR.17: rejected once already accepted
                if self.registration.is_accepted() {
                    TriggerMessageStatusEnumType::Rejected
                } else {
                    TriggerMessageStatusEnumType::Accepted
                }
            }
            "Heartbeat" | "LogStatusNotification" | "FirmwareStatusNotification" => {
                TriggerMessageStatusEnumType::Accepted
            }
            "MeterValues" => {
                let mut any = false;
                for id in &target_evses {
                    let evse = self.evse_manager.evse(*id).expect("validated above");
                    if evse.lock().await.latest_idle_meter_value().is_some() {
                        any = true;
                        break;
                    }
                }
                if any {
                    TriggerMessageStatusEnumType::Accepted
                } else {
                    TriggerMessageStatusEnumType::Rejected
                }
            }
            "TransactionEvent" => {
                let mut any = false;
                for id in &target_evses {
                    if self.evse_manager.active_transaction_id(*id).await.is_some() {
                        any = true;
                        break;
                    }
                }
                if any {
                    TriggerMessageStatusEnumType::Accepted
                } else {
                    TriggerMessageStatusEnumType::Rejected
                }
            }
            "StatusNotification" => {
                // F06.FR.12: evse and connector are both required
                match (evse_id, connector_id) {
                    (Some(evse_id), Some(connector_id)) => {
                        let evse = self.evse_manager.evse(evse_id).expect("validated above");
                        let valid = evse.lock().await.connector_status(connector_id).is_ok();
                        if valid {
                            TriggerMessageStatusEnumType::Accepted
                        } else {
                            TriggerMessageStatusEnumType::Rejected
                        }
                    }
                    _ => TriggerMessageStatusEnumType::Rejected,
                }
            }
            _ => TriggerMessageStatusEnumType::NotImplemented,
        };

        let respond = |status: TriggerMessageStatusEnumType| {
            InboundOutcome::Result(
                serde_json::to_value(&TriggerMessageResponse {
                    status,
                    status_info: None,
                })
                .unwrap_or_default(),
            )
        };
        if status != TriggerMessageStatusEnumType::Accepted {
            return respond(status);
        }

        // F06.FR.04: the response goes out ahead of the triggered message
        // (guaranteed by the call-result lane), then the message itself.
        match requested {
            "BootNotification" => {
                *self.boot_reason.lock().await = BootReasonEnumType::Triggered;
                self.boot_notification_req(true).await;
            }
            "Heartbeat" => {
                self.availability.heartbeat_req(true).await;
            }
            "MeterValues" => {
                let measurands = self.device_model.get_csl(vars::ALIGNED_DATA_MEASURANDS);
                for id in target_evses {
                    let evse = self.evse_manager.evse(id).expect("validated above");
                    let latest = evse.lock().await.latest_idle_meter_value();
                    if let Some(meter_value) = latest {
                        if let Some(filtered) = filter_meter_value(&meter_value, &measurands) {
                            self.meter_values_req(id, vec![filtered], true).await;
                        }
                    }
                }
            }
            "TransactionEvent" => {
                for id in target_evses {
                    self.trigger_transaction_event(id).await;
                }
            }
            "StatusNotification" => {
                if let (Some(evse_id), Some(connector_id)) = (evse_id, connector_id) {
                    let evse = self.evse_manager.evse(evse_id).expect("validated above");
                    let status = evse.lock().await.connector_status(connector_id);
                    if let Ok(status) = status {
                        self.availability
                            .status_notification_req(evse_id, connector_id, &status, true)
                            .await;
                    }
                }
            }
            "LogStatusNotification" => {
                let (status, request_id) = self.upload_log_status.lock().unwrap().clone();
                let request_id = if status == "Idle" { None } else { request_id };
                let request = LogStatusNotificationRequest {
                    status: enum_from_str(&status).unwrap_or(UploadLogStatusEnumType::Idle),
                    request_id,
                };
                let _ = self
                    .dispatcher
                    .dispatch_call(
                        MessageAction::LogStatusNotification,
                        serde_json::to_value(&request).unwrap_or_default(),
                        true,
                    )
                    .await;
            }
            "FirmwareStatusNotification" => {
                let (status, request_id) = self.firmware_status.lock().unwrap().clone();
                // L01.FR.20/25/26: Installed replays as Idle, requestId
                // omitted while idle
                let (status, request_id) = if status == "Idle" || status == "Installed" {
                    ("Idle".to_string(), None)
                } else {
                    (status, request_id)
                };
                let request = FirmwareStatusNotificationRequest {
                    status: enum_from_str(&status).unwrap_or(FirmwareStatusEnumType::Idle),
                    request_id,
                };
                let _ = self
                    .dispatcher
                    .dispatch_call(
                        MessageAction::FirmwareStatusNotification,
                        serde_json::to_value(&request).unwrap_or_default(),
                        true,
                    )
                    .await;
            }
            _ => {}
        }

        respond(TriggerMessageStatusEnumType::Accepted)
    }

    async fn trigger_transaction_event(&self, evse_id: i32) {
        let snapshot = {
            let Ok(evse) = self.evse_manager.evse(evse_id) else {
                return;
            };
            let mut evse = evse.lock().await;
            let latest = evse.latest_idle_meter_value();
            evse.transaction_mut().map(|transaction| {
                (
                    transaction.transaction_id.clone(),
                    transaction.charging_state.clone(),
                    transaction.next_seq_no(),
                    latest,
                )
            })
        };
        let Some((transaction_id, charging_state, seq_no, meter_value)) = snapshot else {
            return;
        };

        let measurands = self.device_model.get_csl(vars::SAMPLED_DATA_TX_UPDATED_MEASURANDS);
        let meter_value = meter_value.and_then(|mv| filter_meter_value(&mv, &measurands));

        self.transaction_event_req(
            evse_id,
            TransactionEventEnumType::Updated,
            TriggerReasonEnumType::Trigger,
            &transaction_id,
            Some(charging_state),
            seq_no,
            None,
            meter_value.map(|mv| vec![mv]),
            None,
            true,
        )
        .await;
    }

    // ── Connector / transaction handlers ───────────────────

    async fn handle_unlock_connector(&self, payload: &Value) -> InboundOutcome {
        let evse_id = payload["evseId"].as_i64().unwrap_or(0) as i32;
        let connector_id = payload["connectorId"].as_i64().unwrap_or(0) as i32;

        let respond = |status: UnlockStatusEnumType| {
            InboundOutcome::Result(
                serde_json::to_value(&UnlockConnectorResponse {
                    status,
                    status_info: None,
                })
                .unwrap_or_default(),
            )
        };

        let known = self.evse_manager.exists(evse_id) && {
            let evse = self.evse_manager.evse(evse_id).expect("checked above");
            let evse = evse.lock().await;
            evse.connector_status(connector_id).is_ok()
        };
        if !known {
            return respond(UnlockStatusEnumType::UnknownConnector);
        }

        if self.evse_manager.active_transaction_id(evse_id).await.is_some() {
            return respond(UnlockStatusEnumType::OngoingAuthorizedTransaction);
        }

        let status = match &self.callbacks.unlock_connector {
            Some(callback) => enum_from_str(&callback(evse_id, connector_id))
                .unwrap_or(UnlockStatusEnumType::UnlockFailed),
            None => UnlockStatusEnumType::UnlockFailed,
        };
        respond(status)
    }

    async fn handle_get_transaction_status(&self, payload: &Value) -> InboundOutcome {
        let response = match payload["transactionId"].as_str() {
            Some(transaction_id) => {
                let ongoing = self
                    .evse_manager
                    .transaction_evse_id(transaction_id)
                    .await
                    .is_some();
                GetTransactionStatusResponse {
                    ongoing_indicator: Some(ongoing),
                    messages_in_queue: self
                        .queue
                        .contains_transaction_messages(transaction_id)
                        .await,
                }
            }
            None => GetTransactionStatusResponse {
                ongoing_indicator: None,
                messages_in_queue: !self.queue.is_transaction_message_queue_empty().await,
            },
        };
        InboundOutcome::Result(serde_json::to_value(&response).unwrap_or_default())
    }

    // ── Smart charging handlers ────────────────────────────

    async fn handle_set_charging_profile(&self, payload: &Value) -> InboundOutcome {
        // K01.FR.29
        if !self.device_model.get_bool(vars::SMART_CHARGING_AVAILABLE) {
            return InboundOutcome::Error {
                code: error_code::NOT_SUPPORTED,
                description: "Charging station does not support smart charging".into(),
            };
        }

        let evse_id = payload["evseId"].as_i64().unwrap_or(0) as i32;
        let profile: ChargingProfile =
            match serde_json::from_value(payload["chargingProfile"].clone()) {
                Ok(profile) => profile,
                Err(e) => {
                    return InboundOutcome::Error {
                        code: error_code::FORMATION_VIOLATION,
                        description: e.to_string(),
                    };
                }
            };

        let respond = |status: ChargingProfileStatusEnumType, status_info: Option<StatusInfoType>| {
            InboundOutcome::Result(
                serde_json::to_value(&SetChargingProfileResponse { status, status_info })
                    .unwrap_or_default(),
            )
        };

        // K01.FR.22
        if payload["chargingProfile"]["chargingProfilePurpose"].as_str()
            == Some("ChargingStationExternalConstraints")
        {
            return respond(
                ChargingProfileStatusEnumType::Rejected,
                Some(StatusInfoType {
                    reason_code: "InvalidValue".to_string(),
                    additional_info: Some(
                        "ChargingStationExternalConstraintsInSetChargingProfileRequest".to_string(),
                    ),
                }),
            );
        }

        match self
            .smart_charging
            .conform_validate_and_add_profile(profile, evse_id)
            .await
        {
            Ok(result) if result.is_valid() => {
                debug!("Accepting SetChargingProfileRequest");
                respond(ChargingProfileStatusEnumType::Accepted, None)
            }
            Ok(result) => {
                debug!(%result, "Rejecting SetChargingProfileRequest");
                respond(
                    ChargingProfileStatusEnumType::Rejected,
                    Some(StatusInfoType {
                        reason_code: result.reason_code().to_string(),
                        additional_info: Some(result.to_string()),
                    }),
                )
            }
            Err(e) => InboundOutcome::Error {
                code: error_code::GENERIC_ERROR,
                description: e.to_string(),
            },
        }
    }

    async fn handle_clear_charging_profile(&self, payload: &Value) -> InboundOutcome {
        let respond = |status: ClearChargingProfileStatusEnumType,
                       status_info: Option<StatusInfoType>| {
            InboundOutcome::Result(
                serde_json::to_value(&ClearChargingProfileResponse { status, status_info })
                    .unwrap_or_default(),
            )
        };

        let criteria_json = &payload["chargingProfileCriteria"];
        // K10.FR.06
        if criteria_json["chargingProfilePurpose"].as_str()
            == Some("ChargingStationExternalConstraints")
        {
            return respond(
                ClearChargingProfileStatusEnumType::Unknown,
                Some(StatusInfoType {
                    reason_code: "InvalidValue".to_string(),
                    additional_info: Some(
                        "ChargingStationExternalConstraintsInClearChargingProfileRequest"
                            .to_string(),
                    ),
                }),
            );
        }

        let criteria = ClearProfileCriteria {
            profile_id: payload["chargingProfileId"].as_i64().map(|id| id as i32),
            evse_id: criteria_json["evseId"].as_i64().map(|id| id as i32),
            purpose: criteria_json["chargingProfilePurpose"]
                .as_str()
                .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok()),
            stack_level: criteria_json["stackLevel"].as_i64().map(|s| s as i32),
        };

        match self.smart_charging.clear_profiles(&criteria).await {
            Ok(true) => respond(ClearChargingProfileStatusEnumType::Accepted, None),
            Ok(false) => respond(ClearChargingProfileStatusEnumType::Unknown, None),
            Err(e) => InboundOutcome::Error {
                code: error_code::GENERIC_ERROR,
                description: e.to_string(),
            },
        }
    }

    async fn handle_get_charging_profiles(&self, payload: &Value) -> InboundOutcome {
        let request_id = payload["requestId"].as_i64().unwrap_or(0) as i32;
        let criteria_json = &payload["chargingProfile"];
        let criteria = ReportProfileCriteria {
            evse_id: payload["evseId"].as_i64().map(|id| id as i32),
            profile_ids: criteria_json["chargingProfileId"].as_array().map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_i64())
                    .map(|id| id as i32)
                    .collect()
            }),
            purpose: criteria_json["chargingProfilePurpose"]
                .as_str()
                .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok()),
            stack_level: criteria_json["stackLevel"].as_i64().map(|s| s as i32),
        };

        let profiles = match self.smart_charging.reported_profiles(&criteria).await {
            Ok(profiles) => profiles,
            Err(e) => {
                return InboundOutcome::Error {
                    code: error_code::GENERIC_ERROR,
                    description: e.to_string(),
                };
            }
        };
        let respond = |status: GetChargingProfileStatusEnumType| {
            InboundOutcome::Result(
                serde_json::to_value(&GetChargingProfilesResponse {
                    status,
                    status_info: None,
                })
                .unwrap_or_default(),
            )
        };
        if profiles.is_empty() {
            return respond(GetChargingProfileStatusEnumType::NoProfiles);
        }

        // one ReportChargingProfilesRequest per evse id (K09.FR.01)
        let mut evse_ids: Vec<i32> = profiles.iter().map(|p| p.evse_id).collect();
        evse_ids.sort();
        evse_ids.dedup();
        for (index, evse_id) in evse_ids.iter().enumerate() {
            let charging_profile: Vec<ChargingProfileType> = profiles
                .iter()
                .filter(|p| p.evse_id == *evse_id)
                .filter_map(|p| {
                    // the stored profile is wire-shaped; re-type it for the report
                    serde_json::to_value(&p.profile)
                        .ok()
                        .and_then(|v| serde_json::from_value(v).ok())
                })
                .collect();
            let request = ReportChargingProfilesRequest {
                request_id,
                charging_limit_source: ChargingLimitSourceEnumType::CSO,
                tbc: Some(index + 1 < evse_ids.len()),
                evse_id: *evse_id,
                charging_profile,
            };
            let _ = self
                .dispatcher
                .dispatch_call(
                    MessageAction::ReportChargingProfiles,
                    serde_json::to_value(&request).unwrap_or_default(),
                    false,
                )
                .await;
        }

        respond(GetChargingProfileStatusEnumType::Accepted)
    }

    async fn handle_get_composite_schedule(&self, payload: &Value) -> InboundOutcome {
        let evse_id = payload["evseId"].as_i64().unwrap_or(0) as i32;
        let duration = payload["duration"].as_i64().unwrap_or(0) as i32;
        let requested_unit = payload["chargingRateUnit"].as_str().and_then(|s| match s {
            "A" => Some(ChargingRateUnitEnumType::A),
            "W" => Some(ChargingRateUnitEnumType::W),
            _ => None,
        });

        // K01.FR.05 / K01.FR.07
        let evse_known = evse_id == 0 || self.evse_manager.exists(evse_id);
        let unit = self.smart_charging.resolve_rate_unit(requested_unit);
        let reject = |reason: crate::domain::ProfileValidationResult| {
            InboundOutcome::Result(
                serde_json::to_value(&GetCompositeScheduleResponse {
                    status: GenericStatusEnumType::Rejected,
                    status_info: Some(StatusInfoType {
                        reason_code: reason.reason_code().to_string(),
                        additional_info: Some(reason.to_string()),
                    }),
                    schedule: None,
                })
                .unwrap_or_default(),
            )
        };
        if !evse_known {
            return reject(crate::domain::ProfileValidationResult::EvseDoesNotExist);
        }
        let Some(unit) = unit else {
            return reject(
                crate::domain::ProfileValidationResult::ChargingScheduleChargingRateUnitUnsupported,
            );
        };

        match self
            .smart_charging
            .composite_schedule(evse_id, Utc::now(), duration, unit)
            .await
        {
            Ok(schedule) => {
                // the resolved schedule is wire-shaped; re-type it
                let schedule: Option<CompositeScheduleType> = serde_json::to_value(&schedule)
                    .ok()
                    .and_then(|v| serde_json::from_value(v).ok());
                let response = GetCompositeScheduleResponse {
                    status: GenericStatusEnumType::Accepted,
                    status_info: None,
                    schedule,
                };
                InboundOutcome::Result(serde_json::to_value(&response).unwrap_or_default())
            }
            Err(e) => InboundOutcome::Error {
                code: error_code::GENERIC_ERROR,
                description: e.to_string(),
            },
        }
    }

    // ── Monitoring handlers ────────────────────────────────

    async fn handle_set_variable_monitoring(&self, payload: &Value) -> InboundOutcome {
        let Some(entries) = payload["setMonitoringData"].as_array() else {
            return InboundOutcome::Error {
                code: error_code::FORMATION_VIOLATION,
                description: "setMonitoringData missing".into(),
            };
        };
        let max_items: usize = self
            .device_model
            .get_or(vars::ITEMS_PER_MESSAGE_SET_VARIABLE_MONITORING, 20);
        if entries.len() > max_items {
            // N04.FR.09
            return InboundOutcome::Error {
                code: error_code::OCCURRENCE_CONSTRAINT_VIOLATION,
                description: String::new(),
            };
        }

        let mut set_monitoring_result = Vec::new();
        for entry in entries {
            set_monitoring_result.push(self.monitoring.set_monitor(entry).await);
        }
        let response = SetVariableMonitoringResponse {
            set_monitoring_result,
        };
        InboundOutcome::Result(serde_json::to_value(&response).unwrap_or_default())
    }

    async fn handle_get_monitoring_report(&self, payload: &Value) -> InboundOutcome {
        let respond = |status: GenericDeviceModelStatusEnumType| {
            InboundOutcome::Result(
                serde_json::to_value(&GetMonitoringReportResponse {
                    status,
                    status_info: None,
                })
                .unwrap_or_default(),
            )
        };

        let request_id = payload["requestId"].as_i64().unwrap_or(0) as i32;
        let monitors = self.monitoring.monitors().await;
        if monitors.is_empty() {
            return respond(GenericDeviceModelStatusEnumType::EmptyResultSet);
        }

        // 10 entries per NotifyMonitoringReport part
        const MAX_MONITORS_PER_MESSAGE: usize = 10;
        let generated_at = Utc::now();
        let chunks: Vec<_> = monitors.chunks(MAX_MONITORS_PER_MESSAGE).collect();
        let total = chunks.len();
        for (seq_no, chunk) in chunks.into_iter().enumerate() {
            let monitor: Vec<MonitoringDataType> = chunk
                .iter()
                .map(|monitor| MonitoringDataType {
                    component: (&monitor.component).into(),
                    variable: (&monitor.variable).into(),
                    variable_monitoring: vec![VariableMonitoringType {
                        id: monitor.id,
                        transaction: monitor.transaction_scope,
                        value: Decimal::from_f64_retain(monitor.value).unwrap_or_default(),
                        kind: monitor.kind.into(),
                        severity: monitor.severity as u8,
                    }],
                })
                .collect();
            let request = NotifyMonitoringReportRequest {
                request_id,
                seq_no: seq_no as i32,
                generated_at,
                tbc: Some(seq_no + 1 < total),
                monitor: Some(monitor),
            };
            let _ = self
                .dispatcher
                .dispatch_call(
                    MessageAction::NotifyMonitoringReport,
                    serde_json::to_value(&request).unwrap_or_default(),
                    false,
                )
                .await;
        }

        respond(GenericDeviceModelStatusEnumType::Accepted)
    }

    async fn handle_clear_variable_monitoring(&self, payload: &Value) -> InboundOutcome {
        let ids: Vec<i32> = payload["id"]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_i64())
                    .map(|id| id as i32)
                    .collect()
            })
            .unwrap_or_default();
        let clear_monitoring_result = self.monitoring.clear_monitors(&ids).await;
        let response = ClearVariableMonitoringResponse {
            clear_monitoring_result,
        };
        InboundOutcome::Result(serde_json::to_value(&response).unwrap_or_default())
    }

    async fn handle_set_monitoring_base(&self, payload: &Value) -> InboundOutcome {
        let Some(base) = payload["monitoringBase"].as_str() else {
            return InboundOutcome::Error {
                code: error_code::FORMATION_VIOLATION,
                description: "monitoringBase missing".into(),
            };
        };
        let status = self
            .device_model
            .set_value(
                &Component::named(vars::ACTIVE_MONITORING_BASE.0),
                &Variable::named(vars::ACTIVE_MONITORING_BASE.1),
                AttributeKind::Actual,
                base,
                ValueSource::Csms,
            )
            .await;
        let respond = |status: GenericDeviceModelStatusEnumType| {
            InboundOutcome::Result(
                serde_json::to_value(&SetMonitoringBaseResponse {
                    status,
                    status_info: None,
                })
                .unwrap_or_default(),
            )
        };
        if !matches!(status, SetVariableStatusEnumType::Accepted) {
            return respond(GenericDeviceModelStatusEnumType::Rejected);
        }
        if base == "HardWiredOnly" || base == "FactoryDefault" {
            self.monitoring.clear_custom_monitors().await;
        }
        respond(GenericDeviceModelStatusEnumType::Accepted)
    }

    async fn handle_set_monitoring_level(&self, payload: &Value) -> InboundOutcome {
        let respond = |status: GenericStatusEnumType| {
            InboundOutcome::Result(
                serde_json::to_value(&SetMonitoringLevelResponse {
                    status,
                    status_info: None,
                })
                .unwrap_or_default(),
            )
        };

        let severity = payload["severity"].as_i64().unwrap_or(-1);
        if !(0..=9).contains(&severity) {
            return respond(GenericStatusEnumType::Rejected);
        }
        self.device_model
            .set_value(
                &Component::named(vars::ACTIVE_MONITORING_LEVEL.0),
                &Variable::named(vars::ACTIVE_MONITORING_LEVEL.1),
                AttributeKind::Actual,
                &severity.to_string(),
                ValueSource::Csms,
            )
            .await;
        respond(GenericStatusEnumType::Accepted)
    }

    // ── Customer information / firmware / misc ─────────────

    async fn handle_customer_information(&self, payload: &Value) -> InboundOutcome {
        let report = payload["report"].as_bool().unwrap_or(false);
        let clear = payload["clear"].as_bool().unwrap_or(false);
        let request_id = payload["requestId"].as_i64().unwrap_or(0) as i32;
        let id_token = payload["idToken"].as_object().map(|_| &payload["idToken"]);
        let customer_identifier = payload["customerIdentifier"].as_str();

        let respond = |status: CustomerInformationStatusEnumType| {
            InboundOutcome::Result(
                serde_json::to_value(&CustomerInformationResponse {
                    status,
                    status_info: None,
                })
                .unwrap_or_default(),
            )
        };

        if !report && !clear {
            warn!("CustomerInformation with neither report nor clear");
            return respond(CustomerInformationStatusEnumType::Rejected);
        }
        if id_token.is_none() && customer_identifier.is_none() && payload["customerCertificate"].is_null()
        {
            return respond(CustomerInformationStatusEnumType::Invalid);
        }

        let mut data = String::new();
        if report {
            if let Some(callback) = &self.callbacks.get_customer_information {
                data.push_str(&callback(id_token, customer_identifier));
            }
            if let Some(id_token) = id_token {
                let hashed = token_hash(id_token);
                if let Ok(Some(entry)) = self.storage.auth_cache_get(&hashed).await {
                    data.push_str(&format!(
                        "Hashed idToken in cache: {}\nIdTokenInfo: {}\n",
                        hashed, entry.id_token_info
                    ));
                }
            }
        }
        if clear {
            if let Some(callback) = &self.callbacks.clear_customer_information {
                callback(id_token, customer_identifier);
            }
            if let Some(id_token) = id_token {
                let _ = self.storage.auth_cache_delete(&token_hash(id_token)).await;
            }
        }

        let max_length: usize = self.device_model.get_or(
            vars::MAX_CUSTOMER_INFORMATION_DATA_LENGTH,
            DEFAULT_MAX_CUSTOMER_INFORMATION_DATA_LENGTH,
        );
        if data.chars().count() > max_length {
            warn!(max_length, "Cropping NotifyCustomerInformation data");
            data = data.chars().take(max_length).collect();
        }

        self.notify_customer_information_req(&data, request_id).await;
        respond(CustomerInformationStatusEnumType::Accepted)
    }

    async fn handle_update_firmware(&self, payload: &Value) -> InboundOutcome {
        // L01.FR.22
        if let Some(certificate) = payload["firmware"]["signingCertificate"].as_str() {
            if !self.security_provider.verify_firmware_signing_certificate(certificate) {
                self.security
                    .security_event_notification_req(
                        security_events::INVALID_FIRMWARE_SIGNING_CERTIFICATE,
                        Some("Provided signing certificate is not valid"),
                        Some(true),
                    )
                    .await;
                let response = UpdateFirmwareResponse {
                    status: UpdateFirmwareStatusEnumType::InvalidCertificate,
                    status_info: None,
                };
                return InboundOutcome::Result(
                    serde_json::to_value(&response).unwrap_or_default(),
                );
            }
        }

        let status = match &self.callbacks.update_firmware {
            Some(callback) => enum_from_str(&callback(payload))
                .unwrap_or(UpdateFirmwareStatusEnumType::Rejected),
            None => UpdateFirmwareStatusEnumType::Rejected,
        };
        let response = UpdateFirmwareResponse {
            status,
            status_info: None,
        };
        InboundOutcome::Result(serde_json::to_value(&response).unwrap_or_default())
    }

    fn handle_get_log(&self, payload: &Value) -> InboundOutcome {
        match &self.callbacks.get_log {
            Some(callback) => InboundOutcome::Result(callback(payload)),
            None => InboundOutcome::Result(
                serde_json::to_value(&GetLogResponse {
                    status: LogStatusEnumType::Rejected,
                    status_info: None,
                    filename: None,
                })
                .unwrap_or_default(),
            ),
        }
    }

    fn handle_data_transfer(&self, payload: &Value) -> InboundOutcome {
        let unknown_vendor = || {
            InboundOutcome::Result(
                serde_json::to_value(&DataTransferResponse {
                    status: DataTransferStatusEnumType::UnknownVendorId,
                    status_info: None,
                    data: String::new(),
                })
                .unwrap_or_default(),
            )
        };
        match &self.callbacks.data_transfer {
            Some(callback) => match callback(payload) {
                Some(response) => InboundOutcome::Result(response),
                None => unknown_vendor(),
            },
            None => unknown_vendor(),
        }
    }

    // ── Responses ──────────────────────────────────────────

    async fn handle_response(&self, request: QueuedMessage, outcome: CallOutcome) {
        match request.action {
            MessageAction::BootNotification => {
                self.handle_boot_notification_response(outcome).await;
            }
            MessageAction::TransactionEvent => {
                self.handle_transaction_event_response(&request.payload, outcome)
                    .await;
            }
            MessageAction::Heartbeat => {
                if let CallOutcome::Result(payload) = outcome {
                    if let Some(callback) = &self.callbacks.time_sync {
                        if let Some(current_time) = payload["currentTime"]
                            .as_str()
                            .and_then(|s| s.parse().ok())
                        {
                            callback(current_time);
                        }
                    }
                }
            }
            _ => {
                debug!(action = %request.action, "Response handled by correlation only");
            }
        }
    }

    async fn handle_boot_notification_response(&self, outcome: CallOutcome) {
        let payload = match outcome {
            CallOutcome::Result(payload) => payload,
            CallOutcome::Error { code, description, .. } => {
                warn!(code = code.as_str(), description = description.as_str(), "BootNotification failed");
                let charge_point = self.weak_self();
                self.boot_notification_timer
                    .timeout(DEFAULT_BOOT_NOTIFICATION_RETRY_INTERVAL, move || async move {
                        if let Some(charge_point) = charge_point.upgrade() {
                            charge_point.boot_notification_req(false).await;
                        }
                    });
                return;
            }
        };

        let status = payload["status"].as_str().unwrap_or("Rejected");
        let interval = payload["interval"].as_i64().unwrap_or(0);
        info!(status, interval, "Received BootNotificationResponse");

        let status = match status {
            "Accepted" => RegistrationStatusEnumType::Accepted,
            "Pending" => RegistrationStatusEnumType::Pending,
            _ => RegistrationStatusEnumType::Rejected,
        };
        self.registration.set(status.clone());

        if status == RegistrationStatusEnumType::Accepted {
            self.queue.set_registration_status_accepted().await;

            if let Some(callback) = &self.callbacks.time_sync {
                if let Some(current_time) =
                    payload["currentTime"].as_str().and_then(|s| s.parse().ok())
                {
                    callback(current_time);
                }
            }

            if interval > 0 {
                self.availability
                    .set_heartbeat_timer_interval(Duration::from_secs(interval as u64));
            }

            // a trigger-initiated boot may still have the retry timer armed
            self.boot_notification_timer.stop();
            self.update_aligned_data_interval();
            self.availability.send_all_status_notifications().await;
            self.start_certificate_expiration_check();
        } else {
            let retry = if interval > 0 {
                Duration::from_secs(interval as u64)
            } else {
                DEFAULT_BOOT_NOTIFICATION_RETRY_INTERVAL
            };
            let charge_point = self.weak_self();
            self.boot_notification_timer.timeout(retry, move || async move {
                if let Some(charge_point) = charge_point.upgrade() {
                    charge_point.boot_notification_req(false).await;
                }
            });
        }
    }

    async fn handle_transaction_event_response(&self, request: &Value, outcome: CallOutcome) {
        let CallOutcome::Result(response) = outcome else {
            return;
        };

        if let Some(callback) = &self.callbacks.transaction_event_response {
            callback(request, &response);
        }

        if request["eventType"].as_str() == Some("Ended") {
            return;
        }
        let id_token_info = &response["idTokenInfo"];
        if id_token_info.is_null() {
            return;
        }
        let id_token = &request["idToken"];
        if id_token.is_null() {
            error!("TransactionEventResponse carries idTokenInfo without a request idToken");
            return;
        }

        // C10.FR.05
        self.authorization.cache_token_info(id_token, id_token_info).await;

        if id_token_info["status"].as_str() == Some("Accepted") {
            return;
        }

        // invalid token mid-transaction: stop or pause (C15)
        let transaction_id = request["transactionInfo"]["transactionId"]
            .as_str()
            .unwrap_or_default();
        let Some(evse_id) = self.evse_manager.transaction_evse_id(transaction_id).await else {
            return;
        };
        if self.device_model.get_bool(vars::STOP_TX_ON_INVALID_ID) {
            if let Some(callback) = &self.callbacks.stop_transaction {
                callback(evse_id, "DeAuthorized");
            }
        } else if let Some(callback) = &self.callbacks.pause_charging {
            callback(evse_id);
        }
    }

    // ── Outbound requests ──────────────────────────────────

    async fn boot_notification_req(&self, initiated_by_trigger: bool) {
        let station = &self.config.station;
        let request = BootNotificationRequest {
            charging_station: ChargingStationType {
                firmware_version: Some(station.firmware_version.clone()),
                model: station.model.clone(),
                modem: None,
                serial_number: station.serial_number.clone(),
                vendor_name: station.vendor_name.clone(),
            },
            reason: self.boot_reason.lock().await.clone(),
        };
        let payload = match serde_json::to_value(&request) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Could not serialize BootNotification");
                return;
            }
        };
        let _ = self
            .dispatcher
            .dispatch_call(MessageAction::BootNotification, payload, initiated_by_trigger)
            .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn transaction_event_req(
        &self,
        evse_id: i32,
        event_type: TransactionEventEnumType,
        trigger_reason: TriggerReasonEnumType,
        transaction_id: &str,
        charging_state: Option<ChargingStateEnumType>,
        seq_no: i32,
        id_token: Option<Value>,
        meter_value: Option<Vec<Value>>,
        reservation_id: Option<i32>,
        initiated_by_trigger: bool,
    ) {
        let mut trigger_reason = trigger_reason;
        let mut remote_start_id = None;

        // a remote start pairs its token with trigger reason RemoteStart
        if let Some(token) = &id_token {
            let matched = self
                .remote_start_per_evse
                .get(&evse_id)
                .map(|entry| entry.0["idToken"] == token["idToken"])
                .unwrap_or(false);
            if matched {
                if let Some((_, (_, id))) = self.remote_start_per_evse.remove(&evse_id) {
                    trigger_reason = TriggerReasonEnumType::RemoteStart;
                    remote_start_id = Some(id);
                }
            }
        }

        let connector_id = {
            let evse = self.evse_manager.evse(evse_id).ok();
            match evse {
                Some(evse) => evse.lock().await.transaction().map(|t| t.connector_id),
                None => None,
            }
        };

        let id_token = id_token.and_then(|token| {
            match serde_json::from_value::<IdTokenType>(token) {
                Ok(token) => Some(token),
                Err(e) => {
                    warn!(error = %e, "idToken does not parse, omitting it from the event");
                    None
                }
            }
        });

        let request = TransactionEventRequest {
            event_type,
            timestamp: Utc::now(),
            trigger_reason,
            seq_no,
            offline: Some(self.is_offline()),
            number_of_phases_used: None,
            cable_max_current: None,
            reservation_id,
            transaction_info: TransactionType {
                transaction_id: transaction_id.to_string(),
                charging_state,
                time_spent_charging: None,
                stopped_reason: None,
                remote_start_id,
            },
            id_token,
            evse: Some(EVSEType {
                id: evse_id,
                connector_id,
            }),
            meter_value: meter_value.map(parse_meter_values).filter(|v| !v.is_empty()),
        };
        let payload = match serde_json::to_value(&request) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Could not serialize TransactionEvent");
                return;
            }
        };

        if let Some(callback) = &self.callbacks.transaction_event {
            callback(&payload);
        }
        let _ = self
            .dispatcher
            .dispatch_call(MessageAction::TransactionEvent, payload, initiated_by_trigger)
            .await;
    }

    async fn meter_values_req(&self, evse_id: i32, meter_values: Vec<Value>, initiated_by_trigger: bool) {
        let meter_value = parse_meter_values(meter_values);
        if meter_value.is_empty() {
            return;
        }
        let request = MeterValuesRequest {
            evse_id,
            meter_value,
        };
        let _ = self
            .dispatcher
            .dispatch_call(
                MessageAction::MeterValues,
                serde_json::to_value(&request).unwrap_or_default(),
                initiated_by_trigger,
            )
            .await;
    }

    async fn notify_report_req(&self, request_id: i32, report_data: Vec<ReportDataType>) {
        let request = NotifyReportRequest {
            request_id,
            generated_at: Utc::now(),
            seq_no: 0,
            tbc: Some(false),
            report_data: Some(report_data),
        };
        let _ = self
            .dispatcher
            .dispatch_call(
                MessageAction::NotifyReport,
                serde_json::to_value(&request).unwrap_or_default(),
                false,
            )
            .await;
    }

    async fn notify_customer_information_req(&self, data: &str, request_id: i32) {
        let generated_at = Utc::now();
        // chunk on character boundaries, never mid-codepoint
        let chars: Vec<char> = data.chars().collect();
        let chunks: Vec<String> = if chars.is_empty() {
            vec![String::new()]
        } else {
            chars
                .chunks(CUSTOMER_INFORMATION_CHUNK)
                .map(|chunk| chunk.iter().collect())
                .collect()
        };
        let total = chunks.len();
        for (seq_no, chunk) in chunks.into_iter().enumerate() {
            let request = NotifyCustomerInformationRequest {
                data: chunk,
                tbc: Some(seq_no + 1 < total),
                seq_no: seq_no as i32,
                generated_at,
                request_id,
            };
            let _ = self
                .dispatcher
                .dispatch_call(
                    MessageAction::NotifyCustomerInformation,
                    serde_json::to_value(&request).unwrap_or_default(),
                    false,
                )
                .await;
        }
    }

    // ── Timers ─────────────────────────────────────────────

    fn update_aligned_data_interval(&self) {
        let interval_s: u64 = self.device_model.get_or(vars::ALIGNED_DATA_INTERVAL, 0);
        if interval_s == 0 {
            self.aligned_data_timer.stop();
            return;
        }
        let interval = Duration::from_secs(interval_s);
        // align the first tick to the next wall-clock multiple
        let now = Utc::now().timestamp() as u64;
        let first_delay = Duration::from_secs(interval_s - (now % interval_s));

        let charge_point = self.weak_self();
        self.aligned_data_timer
            .interval_aligned(interval, first_delay, move || {
                let charge_point = charge_point.clone();
                async move {
                    if let Some(charge_point) = charge_point.upgrade() {
                        charge_point.aligned_data_tick().await;
                    }
                }
            });
    }

    async fn aligned_data_tick(&self) {
        // J01.FR.20: global check first
        if self.device_model.get_bool(vars::ALIGNED_DATA_SEND_DURING_IDLE)
            && self.evse_manager.any_transaction_active().await
        {
            return;
        }
        let measurands = self.device_model.get_csl(vars::ALIGNED_DATA_MEASURANDS);

        for evse in self.evse_manager.evses() {
            // then the per-evse filter
            let (evse_id, meter_value) = {
                let mut evse = evse.lock().await;
                if evse.has_active_transaction() {
                    continue;
                }
                let latest = evse.latest_idle_meter_value();
                evse.clear_idle_meter_values();
                (evse.id(), latest)
            };
            if let Some(meter_value) = meter_value {
                if let Some(filtered) = filter_meter_value(&meter_value, &measurands) {
                    // J01.FR.14
                    self.meter_values_req(evse_id, vec![filtered], false).await;
                }
            }
        }
    }

    fn start_certificate_expiration_check(&self) {
        if let Some(days) = self.security_provider.days_until_leaf_certificate_expires() {
            if days <= 30 {
                warn!(days, "Charging station certificate expires soon");
            }
        }
    }

    fn weak_self(&self) -> std::sync::Weak<Self> {
        self.self_ref.clone()
    }

    // ── Local events (user-facing API) ─────────────────────

    /// A cable was plugged in.
    pub async fn on_session_started(&self, evse_id: i32, connector_id: i32) -> StationResult<()> {
        let status = {
            let evse = self.evse_manager.evse(evse_id)?;
            let mut evse = evse.lock().await;
            evse.submit_event(connector_id, ConnectorEvent::PlugIn)?
        };
        if let Some(status) = status {
            self.availability
                .status_notification_req(evse_id, connector_id, &status, false)
                .await;
        }
        self.pending_sessions
            .entry(evse_id)
            .or_default()
            .plugged_in_connector = Some(connector_id);
        self.maybe_start_transaction(evse_id, TriggerReasonEnumType::CablePluggedIn)
            .await;
        Ok(())
    }

    /// A token was authorized for this EVSE.
    pub async fn on_authorized(&self, evse_id: i32, id_token: Value) -> StationResult<()> {
        let already_open = {
            let evse = self.evse_manager.evse(evse_id)?;
            let mut evse = evse.lock().await;
            match evse.transaction_mut() {
                Some(transaction) if !transaction.id_token_sent => {
                    transaction.set_id_token_sent();
                    Some((
                        transaction.transaction_id.clone(),
                        transaction.charging_state.clone(),
                        transaction.next_seq_no(),
                    ))
                }
                Some(_) => return Ok(()), // token already reported
                None => None,
            }
        };

        match already_open {
            Some((transaction_id, charging_state, seq_no)) => {
                // E05: authorization completed an already-running session
                self.transaction_event_req(
                    evse_id,
                    TransactionEventEnumType::Updated,
                    TriggerReasonEnumType::Authorized,
                    &transaction_id,
                    Some(charging_state),
                    seq_no,
                    Some(id_token),
                    None,
                    None,
                    false,
                )
                .await;
            }
            None => {
                self.pending_sessions.entry(evse_id).or_default().id_token = Some(id_token);
                self.maybe_start_transaction(evse_id, TriggerReasonEnumType::Authorized)
                    .await;
            }
        }
        Ok(())
    }

    /// Open the transaction once the plug/authorize pair is complete.
    /// `completing_reason` names the event that completed the pair.
    async fn maybe_start_transaction(
        &self,
        evse_id: i32,
        completing_reason: TriggerReasonEnumType,
    ) {
        let session = match self.pending_sessions.get(&evse_id) {
            Some(session) => session.clone(),
            None => return,
        };
        let Some(connector_id) = session.plugged_in_connector else {
            return;
        };
        // a remote-start request counts as the authorization half
        let id_token = session.id_token.clone().or_else(|| {
            self.remote_start_per_evse
                .get(&evse_id)
                .map(|entry| entry.0.clone())
        });
        if id_token.is_none() {
            return;
        }
        self.pending_sessions.remove(&evse_id);

        let transaction_id = uuid::Uuid::new_v4().to_string();
        let timestamp = Utc::now();
        let (seq_no, meter_value) = {
            let Ok(evse) = self.evse_manager.evse(evse_id) else {
                return;
            };
            let mut evse = evse.lock().await;
            let latest = evse.latest_idle_meter_value();
            let transaction = match evse.open_transaction(
                &transaction_id,
                connector_id,
                timestamp,
                ChargingStateEnumType::EVConnected,
                id_token.clone(),
                None,
                None,
                None,
            ) {
                Ok(transaction) => transaction,
                Err(e) => {
                    warn!(error = %e, "Could not open transaction");
                    return;
                }
            };
            if id_token.is_some() {
                transaction.set_id_token_sent();
            }
            (transaction.next_seq_no(), latest)
        };

        let measurands = self.device_model.get_csl(vars::SAMPLED_DATA_TX_STARTED_MEASURANDS);
        let meter_value = meter_value.and_then(|mv| filter_meter_value(&mv, &measurands));

        info!(evse_id, transaction_id = transaction_id.as_str(), "Transaction started");
        self.transaction_event_req(
            evse_id,
            TransactionEventEnumType::Started,
            completing_reason,
            &transaction_id,
            Some(ChargingStateEnumType::EVConnected),
            seq_no,
            id_token,
            meter_value.map(|mv| vec![mv]),
            None,
            false,
        )
        .await;
    }

    /// The EV or EVSE changed charging state mid-transaction.
    pub async fn on_charging_state_changed(
        &self,
        evse_id: i32,
        charging_state: ChargingStateEnumType,
    ) -> StationResult<()> {
        let snapshot = {
            let evse = self.evse_manager.evse(evse_id)?;
            let mut evse = evse.lock().await;
            let Some(transaction) = evse.transaction_mut() else {
                warn!(evse_id, "Charging state change without a transaction");
                return Ok(());
            };
            if transaction.charging_state == charging_state {
                debug!(evse_id, "Charging state unchanged, dropping event");
                return Ok(());
            }
            transaction.charging_state = charging_state.clone();
            (
                transaction.transaction_id.clone(),
                charging_state,
                transaction.next_seq_no(),
            )
        };

        self.transaction_event_req(
            evse_id,
            TransactionEventEnumType::Updated,
            TriggerReasonEnumType::ChargingStateChanged,
            &snapshot.0,
            Some(snapshot.1),
            snapshot.2,
            None,
            None,
            None,
            false,
        )
        .await;
        Ok(())
    }

    /// A sampled meter value arrived from the meter.
    pub async fn on_meter_value(&self, evse_id: i32, meter_value: Value) -> StationResult<()> {
        let snapshot = {
            let evse = self.evse_manager.evse(evse_id)?;
            let mut evse = evse.lock().await;
            evse.on_meter_value(meter_value.clone(), Utc::now()).await;
            evse.transaction_mut().map(|transaction| {
                (
                    transaction.transaction_id.clone(),
                    transaction.charging_state.clone(),
                    transaction.next_seq_no(),
                )
            })
        };

        if let Some((transaction_id, charging_state, seq_no)) = snapshot {
            let measurands = self.device_model.get_csl(vars::SAMPLED_DATA_TX_UPDATED_MEASURANDS);
            if let Some(filtered) = filter_meter_value(&meter_value, &measurands) {
                self.transaction_event_req(
                    evse_id,
                    TransactionEventEnumType::Updated,
                    TriggerReasonEnumType::MeterValuePeriodic,
                    &transaction_id,
                    Some(charging_state),
                    seq_no,
                    None,
                    Some(vec![filtered]),
                    None,
                    false,
                )
                .await;
            }
        }
        Ok(())
    }

    /// The transaction on this EVSE ended (`reason` per OCPP, e.g.
    /// `EVDisconnected`, `Local`, `Remote`, `DeAuthorized`).
    pub async fn on_transaction_finished(&self, evse_id: i32, reason: &str) -> StationResult<()> {
        let released = {
            let evse = self.evse_manager.evse(evse_id)?;
            let mut evse = evse.lock().await;
            let Some(transaction) = evse.transaction_mut() else {
                warn!(evse_id, "Transaction finished while none was active");
                return Ok(());
            };
            let seq_no = transaction.next_seq_no();
            let snapshot = (transaction.transaction_id.clone(), seq_no);
            evse.release_transaction();
            snapshot
        };
        let (transaction_id, seq_no) = released;

        // meter values of the session, filtered by the Ended sets
        let mut measurands = self.device_model.get_csl(vars::SAMPLED_DATA_TX_ENDED_MEASURANDS);
        for extra in self.device_model.get_csl(vars::ALIGNED_DATA_TX_ENDED_MEASURANDS) {
            if !measurands.contains(&extra) {
                measurands.push(extra);
            }
        }
        let meter_values: Vec<Value> = match self
            .storage
            .meter_values_for_transaction(&transaction_id)
            .await
        {
            Ok(stored) => stored
                .into_iter()
                .filter_map(|row| filter_meter_value(&row.meter_value, &measurands))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Could not load transaction meter values");
                Vec::new()
            }
        };
        let _ = self.storage.meter_values_delete(&transaction_id).await;

        info!(evse_id, transaction_id = transaction_id.as_str(), reason, "Transaction ended");
        // the stop reason decides the trigger reason spelled to the CSMS
        let trigger = match reason {
            "Remote" => TriggerReasonEnumType::RemoteStop,
            "DeAuthorized" => TriggerReasonEnumType::Deauthorized,
            "EVDisconnected" => TriggerReasonEnumType::EVCommunicationLost,
            _ => TriggerReasonEnumType::StopAuthorized,
        };
        let stopped_reason = enum_from_str(reason).unwrap_or(ReasonEnumType::Other);

        self.transaction_event_req_ended(
            evse_id,
            trigger,
            &transaction_id,
            stopped_reason,
            seq_no,
            (!meter_values.is_empty()).then_some(meter_values),
        )
        .await;

        // K02.FR.05
        self.smart_charging.delete_transaction_tx_profiles(&transaction_id).await;

        // scheduled work waiting for this session to end
        self.availability
            .handle_scheduled_change_availability_requests(evse_id)
            .await;
        self.availability
            .handle_scheduled_change_availability_requests(0)
            .await;
        self.apply_scheduled_reset(evse_id).await;
        Ok(())
    }

    async fn transaction_event_req_ended(
        &self,
        evse_id: i32,
        trigger_reason: TriggerReasonEnumType,
        transaction_id: &str,
        stopped_reason: ReasonEnumType,
        seq_no: i32,
        meter_value: Option<Vec<Value>>,
    ) {
        let request = TransactionEventRequest {
            event_type: TransactionEventEnumType::Ended,
            timestamp: Utc::now(),
            trigger_reason,
            seq_no,
            offline: Some(self.is_offline()),
            number_of_phases_used: None,
            cable_max_current: None,
            reservation_id: None,
            transaction_info: TransactionType {
                transaction_id: transaction_id.to_string(),
                charging_state: None,
                time_spent_charging: None,
                stopped_reason: Some(stopped_reason),
                remote_start_id: None,
            },
            id_token: None,
            evse: Some(EVSEType {
                id: evse_id,
                connector_id: None,
            }),
            meter_value: meter_value.map(parse_meter_values).filter(|v| !v.is_empty()),
        };
        let payload = match serde_json::to_value(&request) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Could not serialize TransactionEvent");
                return;
            }
        };
        if let Some(callback) = &self.callbacks.transaction_event {
            callback(&payload);
        }
        let _ = self
            .dispatcher
            .dispatch_call(MessageAction::TransactionEvent, payload, false)
            .await;
    }

    async fn apply_scheduled_reset(&self, evse_id: i32) {
        let action = {
            let mut scheduled = self.reset_scheduled.lock().unwrap();
            match scheduled.as_mut() {
                None => None,
                Some(reset) if reset.evse_ids.is_empty() => Some(None), // whole station
                Some(reset) => {
                    if reset.evse_ids.remove(&evse_id) {
                        if reset.evse_ids.is_empty() {
                            *scheduled = None;
                        }
                        Some(Some(evse_id))
                    } else {
                        None
                    }
                }
            }
        };

        match action {
            Some(None) => {
                if !self.evse_manager.any_transaction_active().await {
                    *self.reset_scheduled.lock().unwrap() = None;
                    if let Some(callback) = &self.callbacks.reset {
                        callback(None, "OnIdle");
                    }
                }
            }
            Some(Some(evse_id)) => {
                if let Some(callback) = &self.callbacks.reset {
                    callback(Some(evse_id), "OnIdle");
                }
            }
            None => {}
        }
    }

    /// The cable was unplugged.
    pub async fn on_session_finished(&self, evse_id: i32, connector_id: i32) -> StationResult<()> {
        if self.evse_manager.active_transaction_id(evse_id).await.is_some() {
            self.on_transaction_finished(evse_id, "EVDisconnected").await?;
        }
        self.pending_sessions.remove(&evse_id);

        let status = {
            let evse = self.evse_manager.evse(evse_id)?;
            let mut evse = evse.lock().await;
            evse.submit_event(connector_id, ConnectorEvent::PlugOut)?
        };
        if let Some(status) = status {
            self.availability
                .status_notification_req(evse_id, connector_id, &status, false)
                .await;
        }
        Ok(())
    }

    pub async fn on_faulted(&self, evse_id: i32, connector_id: i32) -> StationResult<()> {
        self.submit_connector_event(evse_id, connector_id, ConnectorEvent::Faulted)
            .await
    }

    pub async fn on_fault_cleared(&self, evse_id: i32, connector_id: i32) -> StationResult<()> {
        self.submit_connector_event(evse_id, connector_id, ConnectorEvent::FaultCleared)
            .await
    }

    pub async fn on_unavailable(&self, evse_id: i32, connector_id: i32) -> StationResult<()> {
        self.submit_connector_event(evse_id, connector_id, ConnectorEvent::Unavailable)
            .await
    }

    pub async fn on_operative(&self, evse_id: i32, connector_id: i32) -> StationResult<()> {
        self.submit_connector_event(evse_id, connector_id, ConnectorEvent::UnavailableCleared)
            .await
    }

    async fn submit_connector_event(
        &self,
        evse_id: i32,
        connector_id: i32,
        event: ConnectorEvent,
    ) -> StationResult<()> {
        let status = {
            let evse = self.evse_manager.evse(evse_id)?;
            let mut evse = evse.lock().await;
            evse.submit_event(connector_id, event)?
        };
        if let Some(status) = status {
            // mirror into the device model with the wire spelling, then notify
            let spelled = serde_json::to_value(&status)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default();
            self.device_model
                .set_read_only_value(
                    &Component::evse("Connector", evse_id),
                    &Variable::named("AvailabilityState"),
                    &spelled,
                )
                .await;
            self.availability
                .status_notification_req(evse_id, connector_id, &status, false)
                .await;
        }
        Ok(())
    }

    /// Report firmware installation progress; replayed on trigger.
    pub async fn on_firmware_update_status_notification(
        &self,
        request_id: Option<i32>,
        status: &str,
    ) {
        {
            let mut current = self.firmware_status.lock().unwrap();
            if current.0 == status && (request_id.is_none() || current.1 == request_id) {
                // already sent, do not send again
                return;
            }
            *current = (status.to_string(), request_id);
        }

        let Some(wire_status) = enum_from_str::<FirmwareStatusEnumType>(status) else {
            warn!(status, "Unknown firmware status, not reporting it");
            return;
        };
        let request = FirmwareStatusNotificationRequest {
            status: wire_status,
            request_id,
        };
        let _ = self
            .dispatcher
            .dispatch_call(
                MessageAction::FirmwareStatusNotification,
                serde_json::to_value(&request).unwrap_or_default(),
                false,
            )
            .await;

        if status == "Installed" {
            self.security
                .security_event_notification_req(
                    security_events::FIRMWARE_UPDATED,
                    Some(&format!(
                        "New firmware installed, version {}",
                        self.config.station.firmware_version
                    )),
                    Some(true),
                )
                .await;
        } else if status == "InvalidSignature" {
            self.security
                .security_event_notification_req(
                    security_events::INVALID_FIRMWARE_SIGNATURE,
                    Some("Signature of the provided firmware is not valid"),
                    Some(true),
                )
                .await;
        } else if status == "Installing" {
            // L01: idle connectors go unavailable for the install window
            for evse in self.evse_manager.evses() {
                let (evse_id, changes) = {
                    let mut evse = evse.lock().await;
                    if evse.has_active_transaction() {
                        continue;
                    }
                    let id = evse.id();
                    let mut changes = Vec::new();
                    for connector in 1..=evse.connector_count() as i32 {
                        if let Ok(Some(status)) =
                            evse.submit_event(connector, ConnectorEvent::Unavailable)
                        {
                            changes.push((connector, status));
                        }
                    }
                    (id, changes)
                };
                for (connector, status) in changes {
                    self.availability
                        .status_notification_req(evse_id, connector, &status, false)
                        .await;
                }
            }
        } else if status == "InstallationFailed" || status == "InstallVerificationFailed" {
            // restore the connectors parked for the update
            for evse in self.evse_manager.evses() {
                let (evse_id, changes) = {
                    let mut evse = evse.lock().await;
                    let id = evse.id();
                    let mut changes = Vec::new();
                    for connector in 1..=evse.connector_count() as i32 {
                        if let Ok(Some(status)) =
                            evse.submit_event(connector, ConnectorEvent::UnavailableCleared)
                        {
                            changes.push((connector, status));
                        }
                    }
                    (id, changes)
                };
                for (connector, status) in changes {
                    self.availability
                        .status_notification_req(evse_id, connector, &status, false)
                        .await;
                }
            }
        }
    }

    /// Report a log-upload status; replayed on trigger.
    pub async fn on_log_status_notification(&self, request_id: Option<i32>, status: &str) {
        let Some(wire_status) = enum_from_str::<UploadLogStatusEnumType>(status) else {
            warn!(status, "Unknown log upload status, not reporting it");
            return;
        };
        *self.upload_log_status.lock().unwrap() = (status.to_string(), request_id);
        let request = LogStatusNotificationRequest {
            status: wire_status,
            request_id,
        };
        let _ = self
            .dispatcher
            .dispatch_call(
                MessageAction::LogStatusNotification,
                serde_json::to_value(&request).unwrap_or_default(),
                false,
            )
            .await;
    }

    /// Report an application-detected security event.
    pub async fn on_security_event(&self, event_type: &str, tech_info: Option<&str>) {
        self.security
            .security_event_notification_req(event_type, tech_info, None)
            .await;
    }

    /// Validate a token against local list, cache, and CSMS.
    pub async fn validate_token(&self, id_token: &Value) -> Value {
        self.authorization
            .validate_token(id_token, !self.is_offline())
            .await
    }

    /// Resolved composite schedule for an EVSE over the next `duration_s`.
    pub async fn get_composite_schedule(
        &self,
        evse_id: i32,
        duration_s: i32,
        unit: rust_ocpp::v2_0_1::enumerations::charging_rate_unit_enum_type::ChargingRateUnitEnumType,
    ) -> StationResult<super::smart_charging::CompositeSchedule> {
        Ok(self
            .smart_charging
            .composite_schedule(evse_id, Utc::now(), duration_s, unit)
            .await?)
    }
}

/// Parse an OCPP enum from its wire spelling.
fn enum_from_str<T: serde::de::DeserializeOwned>(value: &str) -> Option<T> {
    serde_json::from_value(Value::String(value.to_string())).ok()
}

/// Deserialize app-supplied meter-value JSON into the wire type,
/// stamping a timestamp when the sampler omitted one.
fn parse_meter_values(values: Vec<Value>) -> Vec<MeterValueType> {
    values
        .into_iter()
        .filter_map(|mut value| {
            if let Some(object) = value.as_object_mut() {
                object
                    .entry("timestamp")
                    .or_insert_with(|| json!(Utc::now()));
            }
            match serde_json::from_value::<MeterValueType>(value) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!(error = %e, "Dropping meter value that does not parse");
                    None
                }
            }
        })
        .collect()
}

fn queue_config(device_model: &DeviceModel) -> MessageQueueConfig {
    let discard: HashSet<MessageAction> = device_model
        .get_csl(vars::MESSAGE_TYPES_DISCARD_FOR_QUEUEING)
        .iter()
        .filter_map(|name| name.parse().ok())
        .collect();
    MessageQueueConfig {
        message_attempts: device_model.get_or(vars::MESSAGE_ATTEMPTS, 5),
        message_attempt_interval: Duration::from_secs(
            device_model.get_or(vars::MESSAGE_ATTEMPT_INTERVAL, 10),
        ),
        message_timeout: Duration::from_secs(device_model.get_or(vars::MESSAGE_TIMEOUT, 30)),
        queue_size_threshold: device_model.get_or(vars::MESSAGE_QUEUE_SIZE_THRESHOLD, 200_000),
        queue_all_messages: device_model.get_bool(vars::QUEUE_ALL_MESSAGES),
        message_types_discard_for_queueing: discard,
    }
}

fn connectivity_options(config: &StationConfig, device_model: &DeviceModel) -> ConnectivityOptions {
    ConnectivityOptions {
        basic_auth_identity: config.station.id.clone(),
        basic_auth_password: device_model
            .get(vars::BASIC_AUTH_PASSWORD)
            .unwrap_or_default(),
        ping_interval: Duration::from_secs(device_model.get_or(vars::WEBSOCKET_PING_INTERVAL, 30)),
        pong_timeout: Duration::from_secs(15),
        retry_backoff_wait_minimum: Duration::from_secs(
            device_model.get_or(vars::RETRY_BACK_OFF_WAIT_MINIMUM, 3),
        ),
        retry_backoff_repeat_times: device_model.get_or(vars::RETRY_BACK_OFF_REPEAT_TIMES, 5),
        retry_backoff_random_range: device_model.get_or(vars::RETRY_BACK_OFF_RANDOM_RANGE, 10),
        connection_attempts: device_model.get_or(vars::NETWORK_PROFILE_CONNECTION_ATTEMPTS, 5),
    }
}

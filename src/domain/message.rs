//! Outbound/inbound OCPP action catalog and queued-message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Every OCPP 2.0.1 action this runtime sends or services.
///
/// Action names follow the OCPP 2.0.1 spelling exactly (the `Display`
/// impl is what goes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageAction {
    // station → CSMS
    Authorize,
    BootNotification,
    DataTransfer,
    FirmwareStatusNotification,
    Heartbeat,
    LogStatusNotification,
    MeterValues,
    NotifyCustomerInformation,
    NotifyEvent,
    NotifyMonitoringReport,
    NotifyReport,
    ReportChargingProfiles,
    SecurityEventNotification,
    StatusNotification,
    TransactionEvent,
    // CSMS → station
    ChangeAvailability,
    ClearCache,
    ClearChargingProfile,
    ClearVariableMonitoring,
    CustomerInformation,
    GetBaseReport,
    GetChargingProfiles,
    GetCompositeSchedule,
    GetLocalListVersion,
    GetLog,
    GetMonitoringReport,
    GetReport,
    GetTransactionStatus,
    GetVariables,
    RequestStartTransaction,
    RequestStopTransaction,
    Reset,
    SendLocalList,
    SetChargingProfile,
    SetMonitoringBase,
    SetMonitoringLevel,
    SetNetworkProfile,
    SetVariableMonitoring,
    SetVariables,
    TriggerMessage,
    UnlockConnector,
    UpdateFirmware,
}

impl MessageAction {
    /// Messages that must survive a restart and replay in order.
    pub fn is_transaction_message(&self) -> bool {
        matches!(
            self,
            Self::TransactionEvent
                | Self::MeterValues
                | Self::SecurityEventNotification
                | Self::StatusNotification
                | Self::FirmwareStatusNotification
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorize => "Authorize",
            Self::BootNotification => "BootNotification",
            Self::DataTransfer => "DataTransfer",
            Self::FirmwareStatusNotification => "FirmwareStatusNotification",
            Self::Heartbeat => "Heartbeat",
            Self::LogStatusNotification => "LogStatusNotification",
            Self::MeterValues => "MeterValues",
            Self::NotifyCustomerInformation => "NotifyCustomerInformation",
            Self::NotifyEvent => "NotifyEvent",
            Self::NotifyMonitoringReport => "NotifyMonitoringReport",
            Self::NotifyReport => "NotifyReport",
            Self::ReportChargingProfiles => "ReportChargingProfiles",
            Self::SecurityEventNotification => "SecurityEventNotification",
            Self::StatusNotification => "StatusNotification",
            Self::TransactionEvent => "TransactionEvent",
            Self::ChangeAvailability => "ChangeAvailability",
            Self::ClearCache => "ClearCache",
            Self::ClearChargingProfile => "ClearChargingProfile",
            Self::ClearVariableMonitoring => "ClearVariableMonitoring",
            Self::CustomerInformation => "CustomerInformation",
            Self::GetBaseReport => "GetBaseReport",
            Self::GetChargingProfiles => "GetChargingProfiles",
            Self::GetCompositeSchedule => "GetCompositeSchedule",
            Self::GetLocalListVersion => "GetLocalListVersion",
            Self::GetLog => "GetLog",
            Self::GetMonitoringReport => "GetMonitoringReport",
            Self::GetReport => "GetReport",
            Self::GetTransactionStatus => "GetTransactionStatus",
            Self::GetVariables => "GetVariables",
            Self::RequestStartTransaction => "RequestStartTransaction",
            Self::RequestStopTransaction => "RequestStopTransaction",
            Self::Reset => "Reset",
            Self::SendLocalList => "SendLocalList",
            Self::SetChargingProfile => "SetChargingProfile",
            Self::SetMonitoringBase => "SetMonitoringBase",
            Self::SetMonitoringLevel => "SetMonitoringLevel",
            Self::SetNetworkProfile => "SetNetworkProfile",
            Self::SetVariableMonitoring => "SetVariableMonitoring",
            Self::SetVariables => "SetVariables",
            Self::TriggerMessage => "TriggerMessage",
            Self::UnlockConnector => "UnlockConnector",
            Self::UpdateFirmware => "UpdateFirmware",
        }
    }
}

impl fmt::Display for MessageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s {
            "Authorize" => Self::Authorize,
            "BootNotification" => Self::BootNotification,
            "DataTransfer" => Self::DataTransfer,
            "FirmwareStatusNotification" => Self::FirmwareStatusNotification,
            "Heartbeat" => Self::Heartbeat,
            "LogStatusNotification" => Self::LogStatusNotification,
            "MeterValues" => Self::MeterValues,
            "NotifyCustomerInformation" => Self::NotifyCustomerInformation,
            "NotifyEvent" => Self::NotifyEvent,
            "NotifyMonitoringReport" => Self::NotifyMonitoringReport,
            "NotifyReport" => Self::NotifyReport,
            "ReportChargingProfiles" => Self::ReportChargingProfiles,
            "SecurityEventNotification" => Self::SecurityEventNotification,
            "StatusNotification" => Self::StatusNotification,
            "TransactionEvent" => Self::TransactionEvent,
            "ChangeAvailability" => Self::ChangeAvailability,
            "ClearCache" => Self::ClearCache,
            "ClearChargingProfile" => Self::ClearChargingProfile,
            "ClearVariableMonitoring" => Self::ClearVariableMonitoring,
            "CustomerInformation" => Self::CustomerInformation,
            "GetBaseReport" => Self::GetBaseReport,
            "GetChargingProfiles" => Self::GetChargingProfiles,
            "GetCompositeSchedule" => Self::GetCompositeSchedule,
            "GetLocalListVersion" => Self::GetLocalListVersion,
            "GetLog" => Self::GetLog,
            "GetMonitoringReport" => Self::GetMonitoringReport,
            "GetReport" => Self::GetReport,
            "GetTransactionStatus" => Self::GetTransactionStatus,
            "GetVariables" => Self::GetVariables,
            "RequestStartTransaction" => Self::RequestStartTransaction,
            "RequestStopTransaction" => Self::RequestStopTransaction,
            "Reset" => Self::Reset,
            "SendLocalList" => Self::SendLocalList,
            "SetChargingProfile" => Self::SetChargingProfile,
            "SetMonitoringBase" => Self::SetMonitoringBase,
            "SetMonitoringLevel" => Self::SetMonitoringLevel,
            "SetNetworkProfile" => Self::SetNetworkProfile,
            "SetVariableMonitoring" => Self::SetVariableMonitoring,
            "SetVariables" => Self::SetVariables,
            "TriggerMessage" => Self::TriggerMessage,
            "UnlockConnector" => Self::UnlockConnector,
            "UpdateFirmware" => Self::UpdateFirmware,
            other => return Err(UnknownAction(other.to_string())),
        };
        Ok(action)
    }
}

/// Action name not in the catalog, answered with CallError `NotImplemented`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAction(pub String);

impl fmt::Display for UnknownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown OCPP action: {}", self.0)
    }
}

impl std::error::Error for UnknownAction {}

// ── Queue lanes ────────────────────────────────────────────────

/// Which lane a queued Call travels in. Lanes are merged at dispatch
/// time: CallResults first, then Transactional (strict FIFO), then
/// Trigger, then Normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueLane {
    Transactional,
    Normal,
    Trigger,
}

impl QueueLane {
    pub fn for_call(action: MessageAction, initiated_by_trigger: bool) -> Self {
        if action.is_transaction_message() {
            QueueLane::Transactional
        } else if initiated_by_trigger {
            QueueLane::Trigger
        } else {
            QueueLane::Normal
        }
    }
}

impl fmt::Display for QueueLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transactional => f.write_str("Transactional"),
            Self::Normal => f.write_str("Normal"),
            Self::Trigger => f.write_str("Trigger"),
        }
    }
}

// ── QueuedMessage ──────────────────────────────────────────────

/// A Call waiting in (or replayed into) the message queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub unique_id: String,
    pub action: MessageAction,
    pub payload: Value,
    pub enqueue_time: DateTime<Utc>,
    pub attempts: u32,
    pub lane: QueueLane,
    /// True for messages written to durable storage before dispatch.
    pub persisted: bool,
    /// Trigger-initiated messages drain ahead of the Normal lane.
    pub initiated_by_trigger: bool,
}

impl QueuedMessage {
    pub fn new(action: MessageAction, payload: Value, initiated_by_trigger: bool) -> Self {
        let lane = QueueLane::for_call(action, initiated_by_trigger);
        Self {
            unique_id: uuid::Uuid::new_v4().to_string(),
            action,
            payload,
            enqueue_time: Utc::now(),
            attempts: 0,
            lane,
            persisted: lane == QueueLane::Transactional,
            initiated_by_trigger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_roundtrips_through_str() {
        for action in [
            MessageAction::BootNotification,
            MessageAction::TransactionEvent,
            MessageAction::SetChargingProfile,
            MessageAction::NotifyCustomerInformation,
        ] {
            assert_eq!(action.as_str().parse::<MessageAction>().unwrap(), action);
        }
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!("CancelReservation2".parse::<MessageAction>().is_err());
    }

    #[test]
    fn transactional_actions_get_transactional_lane() {
        let m = QueuedMessage::new(
            MessageAction::TransactionEvent,
            serde_json::json!({}),
            false,
        );
        assert_eq!(m.lane, QueueLane::Transactional);
        assert!(m.persisted);
    }

    #[test]
    fn trigger_initiated_normal_message_gets_trigger_lane() {
        let m = QueuedMessage::new(MessageAction::Heartbeat, serde_json::json!({}), true);
        assert_eq!(m.lane, QueueLane::Trigger);
        assert!(!m.persisted);
    }

    #[test]
    fn unique_ids_fit_the_ocpp_cap() {
        let m = QueuedMessage::new(MessageAction::Heartbeat, serde_json::json!({}), false);
        assert!(m.unique_id.len() <= crate::support::ocpp_frame::MAX_UNIQUE_ID_LEN);
    }
}

//! User-application callbacks
//!
//! The runtime drives the protocol; the embedding application executes
//! the physical effects (energize, reset, unlock, firmware install).
//! Every callback runs on the orchestrator's event task, so handlers
//! observe a total order and must not block.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// `RequestStartTransaction`: authorize-and-energize decision of the
/// application. Arguments: evse id, idToken JSON, remote start id.
pub type RemoteStartCallback = Box<dyn Fn(i32, &Value, i32) -> bool + Send + Sync>;

/// Stop a running transaction. Arguments: evse id, OCPP stop reason
/// (`Remote`, `DeAuthorized`, ...). Returns whether the stop was taken.
pub type StopTransactionCallback = Box<dyn Fn(i32, &str) -> bool + Send + Sync>;

/// `Reset`: argument is the optional target evse and the reset kind
/// (`Immediate` / `OnIdle`). Returns whether the reset is accepted.
pub type ResetCallback = Box<dyn Fn(Option<i32>, &str) -> bool + Send + Sync>;

/// `UnlockConnector`: returns the OCPP unlock status string.
pub type UnlockConnectorCallback = Box<dyn Fn(i32, i32) -> String + Send + Sync>;

/// `UpdateFirmware`: receives the full request payload, returns the
/// OCPP `UpdateFirmwareStatus` string.
pub type UpdateFirmwareCallback = Box<dyn Fn(&Value) -> String + Send + Sync>;

/// `GetLog`: receives the request payload, returns the response payload.
pub type GetLogCallback = Box<dyn Fn(&Value) -> Value + Send + Sync>;

/// CSMS-provided wall-clock sync (BootNotification / Heartbeat).
pub type TimeSyncCallback = Box<dyn Fn(DateTime<Utc>) + Send + Sync>;

/// Observer of outgoing TransactionEvent requests.
pub type TransactionEventCallback = Box<dyn Fn(&Value) + Send + Sync>;

/// Observer of (request, response) pairs of TransactionEvents.
pub type TransactionEventResponseCallback = Box<dyn Fn(&Value, &Value) + Send + Sync>;

/// Connected/disconnected edge, with the configuration slot.
pub type ConnectionStateCallback = Box<dyn Fn(bool, i32) + Send + Sync>;

/// A device-model variable changed (component, variable, new value).
pub type VariableChangedCallback = Box<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Pause energy delivery on an EVSE (invalid token, cost limit).
pub type PauseChargingCallback = Box<dyn Fn(i32) + Send + Sync>;

/// `CustomerInformation` report: returns the application's share of the
/// customer data for the given idToken / customer identifier.
pub type CustomerInformationCallback =
    Box<dyn Fn(Option<&Value>, Option<&str>) -> String + Send + Sync>;

/// `DataTransfer`: returns the response payload, or `None` for
/// `UnknownVendorId`.
pub type DataTransferCallback = Box<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// The callback bag handed to the charge point at construction.
/// Missing entries degrade to OCPP rejections (`Rejected`,
/// `NotImplemented`, `UnknownVendorId`), never to panics.
#[derive(Default)]
pub struct Callbacks {
    pub remote_start_transaction: Option<RemoteStartCallback>,
    pub stop_transaction: Option<StopTransactionCallback>,
    pub reset: Option<ResetCallback>,
    pub unlock_connector: Option<UnlockConnectorCallback>,
    pub update_firmware: Option<UpdateFirmwareCallback>,
    pub get_log: Option<GetLogCallback>,
    pub time_sync: Option<TimeSyncCallback>,
    pub transaction_event: Option<TransactionEventCallback>,
    pub transaction_event_response: Option<TransactionEventResponseCallback>,
    pub connection_state_changed: Option<ConnectionStateCallback>,
    pub variable_changed: Option<VariableChangedCallback>,
    pub pause_charging: Option<PauseChargingCallback>,
    pub get_customer_information: Option<CustomerInformationCallback>,
    pub clear_customer_information: Option<CustomerInformationCallback>,
    pub data_transfer: Option<DataTransferCallback>,
    pub security_event: Option<Box<dyn Fn(&str, Option<&str>) + Send + Sync>>,
}

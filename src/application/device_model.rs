//! Device model
//!
//! Typed, component/variable addressed configuration store. Values are
//! cached in memory and written through to storage; observers fire
//! after commit and only when the value actually changed. Writes from
//! the CSMS are mediated by mutability and by validators derived from
//! the variable characteristics; `Internal` writes bypass mutability.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use rust_ocpp::v2_0_1::datatypes::report_data_type::ReportDataType;
use rust_ocpp::v2_0_1::datatypes::variable_attribute_type::VariableAttributeType;
use rust_ocpp::v2_0_1::enumerations::get_variable_status_enum_type::GetVariableStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::set_variable_status_enum_type::SetVariableStatusEnumType;
use tracing::{debug, error, info};

use crate::domain::device_model::{
    AttributeKind, Component, Mutability, StoredVariable, ValueSource, Variable,
    VariableCharacteristics, VariableDataType,
};
use crate::infrastructure::StationStorage;

// ── Well-known component/variable addresses ────────────────────

/// `(component, variable)` name pairs for the standardized controller
/// variables this runtime reads.
pub mod vars {
    pub const MESSAGE_ATTEMPTS: (&str, &str) = ("OCPPCommCtrlr", "MessageAttempts");
    pub const MESSAGE_ATTEMPT_INTERVAL: (&str, &str) = ("OCPPCommCtrlr", "MessageAttemptInterval");
    pub const MESSAGE_TIMEOUT: (&str, &str) = ("OCPPCommCtrlr", "MessageTimeout");
    pub const MESSAGE_QUEUE_SIZE_THRESHOLD: (&str, &str) =
        ("OCPPCommCtrlr", "MessageQueueSizeThreshold");
    pub const MESSAGE_TYPES_DISCARD_FOR_QUEUEING: (&str, &str) =
        ("OCPPCommCtrlr", "MessageTypesDiscardForQueueing");
    pub const QUEUE_ALL_MESSAGES: (&str, &str) = ("OCPPCommCtrlr", "QueueAllMessages");
    pub const HEARTBEAT_INTERVAL: (&str, &str) = ("OCPPCommCtrlr", "HeartbeatInterval");
    pub const OFFLINE_THRESHOLD: (&str, &str) = ("OCPPCommCtrlr", "OfflineThreshold");
    pub const WEBSOCKET_PING_INTERVAL: (&str, &str) = ("OCPPCommCtrlr", "WebSocketPingInterval");
    pub const RETRY_BACK_OFF_RANDOM_RANGE: (&str, &str) =
        ("OCPPCommCtrlr", "RetryBackOffRandomRange");
    pub const RETRY_BACK_OFF_REPEAT_TIMES: (&str, &str) =
        ("OCPPCommCtrlr", "RetryBackOffRepeatTimes");
    pub const RETRY_BACK_OFF_WAIT_MINIMUM: (&str, &str) =
        ("OCPPCommCtrlr", "RetryBackOffWaitMinimum");
    pub const NETWORK_PROFILE_CONNECTION_ATTEMPTS: (&str, &str) =
        ("OCPPCommCtrlr", "NetworkProfileConnectionAttempts");
    pub const NETWORK_CONFIGURATION_PRIORITY: (&str, &str) =
        ("OCPPCommCtrlr", "NetworkConfigurationPriority");

    pub const SECURITY_PROFILE: (&str, &str) = ("SecurityCtrlr", "SecurityProfile");
    pub const BASIC_AUTH_PASSWORD: (&str, &str) = ("SecurityCtrlr", "BasicAuthPassword");

    pub const ALIGNED_DATA_INTERVAL: (&str, &str) = ("AlignedDataCtrlr", "Interval");
    pub const ALIGNED_DATA_SEND_DURING_IDLE: (&str, &str) = ("AlignedDataCtrlr", "SendDuringIdle");
    pub const ALIGNED_DATA_MEASURANDS: (&str, &str) = ("AlignedDataCtrlr", "Measurands");
    pub const ALIGNED_DATA_TX_ENDED_MEASURANDS: (&str, &str) =
        ("AlignedDataCtrlr", "TxEndedMeasurands");

    pub const SAMPLED_DATA_TX_STARTED_MEASURANDS: (&str, &str) =
        ("SampledDataCtrlr", "TxStartedMeasurands");
    pub const SAMPLED_DATA_TX_UPDATED_MEASURANDS: (&str, &str) =
        ("SampledDataCtrlr", "TxUpdatedMeasurands");
    pub const SAMPLED_DATA_TX_ENDED_MEASURANDS: (&str, &str) =
        ("SampledDataCtrlr", "TxEndedMeasurands");

    pub const SMART_CHARGING_ENABLED: (&str, &str) = ("SmartChargingCtrlr", "Enabled");
    pub const SMART_CHARGING_AVAILABLE: (&str, &str) = ("SmartChargingCtrlr", "Available");
    pub const AC_PHASE_SWITCHING_SUPPORTED: (&str, &str) =
        ("SmartChargingCtrlr", "ACPhaseSwitchingSupported");
    pub const CHARGING_SCHEDULE_CHARGING_RATE_UNIT: (&str, &str) =
        ("SmartChargingCtrlr", "ChargingScheduleChargingRateUnit");

    pub const CHARGING_STATION_SUPPLY_PHASES: (&str, &str) = ("ChargingStation", "SupplyPhases");
    pub const CHARGING_STATION_AVAILABILITY_STATE: (&str, &str) =
        ("ChargingStation", "AvailabilityState");

    pub const STOP_TX_ON_INVALID_ID: (&str, &str) = ("TxCtrlr", "StopTxOnInvalidId");
    pub const MAX_ENERGY_ON_INVALID_ID: (&str, &str) = ("TxCtrlr", "MaxEnergyOnInvalidId");

    pub const AUTH_CACHE_ENABLED: (&str, &str) = ("AuthCacheCtrlr", "Enabled");
    pub const LOCAL_AUTH_LIST_ENABLED: (&str, &str) = ("LocalAuthListCtrlr", "Enabled");

    pub const ITEMS_PER_MESSAGE_GET_VARIABLES: (&str, &str) =
        ("DeviceDataCtrlr", "ItemsPerMessageGetVariables");
    pub const BYTES_PER_MESSAGE_GET_VARIABLES: (&str, &str) =
        ("DeviceDataCtrlr", "BytesPerMessageGetVariables");
    pub const ITEMS_PER_MESSAGE_GET_REPORT: (&str, &str) =
        ("DeviceDataCtrlr", "ItemsPerMessageGetReport");
    pub const BYTES_PER_MESSAGE_GET_REPORT: (&str, &str) =
        ("DeviceDataCtrlr", "BytesPerMessageGetReport");
    pub const ITEMS_PER_MESSAGE_SET_VARIABLE_MONITORING: (&str, &str) =
        ("DeviceDataCtrlr", "ItemsPerMessageSetVariableMonitoring");
    pub const BYTES_PER_MESSAGE_SET_VARIABLE_MONITORING: (&str, &str) =
        ("DeviceDataCtrlr", "BytesPerMessageSetVariableMonitoring");

    pub const ACTIVE_MONITORING_BASE: (&str, &str) = ("MonitoringCtrlr", "ActiveMonitoringBase");
    pub const ACTIVE_MONITORING_LEVEL: (&str, &str) = ("MonitoringCtrlr", "ActiveMonitoringLevel");
    pub const OFFLINE_QUEUING_SEVERITY: (&str, &str) =
        ("MonitoringCtrlr", "OfflineQueuingSeverity");

    pub const MAX_CUSTOMER_INFORMATION_DATA_LENGTH: (&str, &str) =
        ("CustomerInformationCtrlr", "MaxCustomerInformationDataLength");

    pub const NUMBER_OF_DECIMALS_FOR_COST_VALUES: (&str, &str) =
        ("TariffCostCtrlr", "NumberOfDecimalsForCostValues");
}

// ── Entry & declaration ────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct VariableEntry {
    attributes: HashMap<AttributeKind, String>,
    mutability: Mutability,
    characteristics: VariableCharacteristics,
}

/// Declaration used to seed the model at construction.
#[derive(Debug, Clone)]
pub struct VariableDeclaration {
    pub component: Component,
    pub variable: Variable,
    pub value: String,
    pub mutability: Mutability,
    pub characteristics: VariableCharacteristics,
}

impl VariableDeclaration {
    pub fn read_write(component: &str, variable: &str, value: impl Into<String>) -> Self {
        Self {
            component: Component::named(component),
            variable: Variable::named(variable),
            value: value.into(),
            mutability: Mutability::ReadWrite,
            characteristics: VariableCharacteristics::default(),
        }
    }

    pub fn read_only(component: &str, variable: &str, value: impl Into<String>) -> Self {
        Self {
            mutability: Mutability::ReadOnly,
            ..Self::read_write(component, variable, value)
        }
    }

    pub fn with_characteristics(mut self, characteristics: VariableCharacteristics) -> Self {
        self.characteristics = characteristics;
        self
    }
}

type Observer = Box<dyn Fn(&Component, &Variable, AttributeKind, &str) + Send + Sync>;

// ── DeviceModel ────────────────────────────────────────────────

pub struct DeviceModel {
    variables: DashMap<(Component, Variable), VariableEntry>,
    storage: Arc<dyn StationStorage>,
    observers: std::sync::Mutex<Vec<Observer>>,
}

impl DeviceModel {
    /// Build the model from declarations, then overlay any values found
    /// in storage (persisted CSMS writes survive restarts).
    pub async fn new(
        storage: Arc<dyn StationStorage>,
        declarations: Vec<VariableDeclaration>,
    ) -> Arc<Self> {
        let model = Arc::new(Self {
            variables: DashMap::new(),
            storage,
            observers: std::sync::Mutex::new(Vec::new()),
        });

        for declaration in declarations {
            let mut attributes = HashMap::new();
            attributes.insert(AttributeKind::Actual, declaration.value);
            model.variables.insert(
                (declaration.component, declaration.variable),
                VariableEntry {
                    attributes,
                    mutability: declaration.mutability,
                    characteristics: declaration.characteristics,
                },
            );
        }

        match model.storage.variables_load_all().await {
            Ok(stored) => {
                for row in stored {
                    if let Some(mut entry) = model
                        .variables
                        .get_mut(&(row.component.clone(), row.variable.clone()))
                    {
                        entry.attributes.insert(row.attribute, row.value);
                    }
                }
            }
            Err(e) => error!(error = %e, "Could not load device model variables from storage"),
        }

        model
    }

    /// Register a variable at runtime (per-EVSE availability mirrors etc.).
    pub fn register_variable(
        &self,
        component: Component,
        variable: Variable,
        mutability: Mutability,
        initial_value: impl Into<String>,
    ) {
        let mut attributes = HashMap::new();
        attributes.insert(AttributeKind::Actual, initial_value.into());
        self.variables.insert(
            (component, variable),
            VariableEntry {
                attributes,
                mutability,
                characteristics: VariableCharacteristics::default(),
            },
        );
    }

    pub fn subscribe(&self, observer: Observer) {
        self.observers.lock().unwrap().push(observer);
    }

    // ── Reads ──────────────────────────────────────────────

    pub fn request_value(
        &self,
        component: &Component,
        variable: &Variable,
        attribute: AttributeKind,
    ) -> (GetVariableStatusEnumType, Option<String>) {
        let Some(entry) = self
            .variables
            .get(&(component.clone(), variable.clone()))
        else {
            let known_component = self.variables.iter().any(|e| e.key().0 == *component);
            let status = if known_component {
                GetVariableStatusEnumType::UnknownVariable
            } else {
                GetVariableStatusEnumType::UnknownComponent
            };
            return (status, None);
        };

        if entry.mutability == Mutability::WriteOnly {
            return (GetVariableStatusEnumType::Rejected, None);
        }

        match entry.attributes.get(&attribute) {
            Some(value) => (GetVariableStatusEnumType::Accepted, Some(value.clone())),
            None => (GetVariableStatusEnumType::NotSupportedAttributeType, None),
        }
    }

    /// Actual-attribute read by well-known name pair.
    pub fn get(&self, address: (&str, &str)) -> Option<String> {
        let key = (Component::named(address.0), Variable::named(address.1));
        self.variables
            .get(&key)
            .and_then(|e| e.attributes.get(&AttributeKind::Actual).cloned())
    }

    /// Typed Actual-attribute read; `None` when absent or unparsable.
    pub fn get_optional<T: FromStr>(&self, address: (&str, &str)) -> Option<T> {
        self.get(address).and_then(|v| v.parse().ok())
    }

    /// Typed Actual-attribute read with fallback.
    pub fn get_or<T: FromStr>(&self, address: (&str, &str), fallback: T) -> T {
        self.get_optional(address).unwrap_or(fallback)
    }

    pub fn get_bool(&self, address: (&str, &str)) -> bool {
        self.get(address)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Comma-separated-list read, trimmed, empty entries dropped.
    pub fn get_csl(&self, address: (&str, &str)) -> Vec<String> {
        self.get(address)
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    // ── Writes ─────────────────────────────────────────────

    pub async fn set_value(
        &self,
        component: &Component,
        variable: &Variable,
        attribute: AttributeKind,
        value: &str,
        source: ValueSource,
    ) -> SetVariableStatusEnumType {
        let key = (component.clone(), variable.clone());
        let changed = {
            let Some(mut entry) = self.variables.get_mut(&key) else {
                let known_component = self.variables.iter().any(|e| e.key().0 == *component);
                return if known_component {
                    SetVariableStatusEnumType::UnknownVariable
                } else {
                    SetVariableStatusEnumType::UnknownComponent
                };
            };

            if source != ValueSource::Internal && entry.mutability == Mutability::ReadOnly {
                debug!(%component, %variable, "Rejecting write to ReadOnly variable");
                return SetVariableStatusEnumType::Rejected;
            }

            if !validate_against_characteristics(&entry.characteristics, value) {
                debug!(%component, %variable, value, "Value fails characteristics validation");
                return SetVariableStatusEnumType::Rejected;
            }

            let previous = entry.attributes.insert(attribute, value.to_string());
            previous.as_deref() != Some(value)
        };

        let row = StoredVariable {
            component: component.clone(),
            variable: variable.clone(),
            attribute,
            value: value.to_string(),
            source,
        };
        if let Err(e) = self.storage.variable_store(&row).await {
            error!(error = %e, "Could not persist device model write");
        }

        if changed {
            info!(%component, %variable, %attribute, value, "Variable changed");
            let observers = self.observers.lock().unwrap();
            for observer in observers.iter() {
                observer(component, variable, attribute, value);
            }
        }

        SetVariableStatusEnumType::Accepted
    }

    /// Internal mirror write (availability state, measured power, ...).
    pub async fn set_read_only_value(
        &self,
        component: &Component,
        variable: &Variable,
        value: &str,
    ) -> SetVariableStatusEnumType {
        self.set_value(
            component,
            variable,
            AttributeKind::Actual,
            value,
            ValueSource::Internal,
        )
        .await
    }

    pub fn mutability(&self, component: &Component, variable: &Variable) -> Option<Mutability> {
        self.variables
            .get(&(component.clone(), variable.clone()))
            .map(|e| e.mutability)
    }

    pub fn characteristics(
        &self,
        component: &Component,
        variable: &Variable,
    ) -> Option<VariableCharacteristics> {
        self.variables
            .get(&(component.clone(), variable.clone()))
            .map(|e| e.characteristics.clone())
    }

    // ── Reporting ──────────────────────────────────────────

    /// Report rows for GetBaseReport / GetReport, optionally filtered by
    /// component/variable name.
    pub fn report_data(&self, filter: Option<&[(String, String)]>) -> Vec<ReportDataType> {
        let mut rows: Vec<ReportDataType> = Vec::new();
        for entry in self.variables.iter() {
            let (component, variable) = entry.key();
            if let Some(filter) = filter {
                let matches = filter.iter().any(|(c, v)| {
                    *c == component.name && (v.is_empty() || *v == variable.name)
                });
                if !matches {
                    continue;
                }
            }

            let variable_attribute: Vec<VariableAttributeType> = entry
                .value()
                .attributes
                .iter()
                .map(|(kind, value)| {
                    let value = if entry.value().mutability == Mutability::WriteOnly {
                        // write-only values never leave the station
                        None
                    } else {
                        Some(value.clone())
                    };
                    VariableAttributeType {
                        kind: Some((*kind).into()),
                        value,
                        mutability: Some(entry.value().mutability.into()),
                        persistent: None,
                        constant: None,
                    }
                })
                .collect();

            rows.push(ReportDataType {
                component: component.into(),
                variable: variable.into(),
                variable_attribute,
                variable_characteristics: None,
            });
        }
        rows.sort_by(|a, b| {
            (a.component.name.as_str(), a.variable.name.as_str())
                .cmp(&(b.component.name.as_str(), b.variable.name.as_str()))
        });
        rows
    }
}

/// Value-list and numeric-range validation from variable characteristics.
fn validate_against_characteristics(
    characteristics: &VariableCharacteristics,
    value: &str,
) -> bool {
    match characteristics.data_type {
        VariableDataType::Integer => {
            let Ok(parsed) = value.parse::<i64>() else {
                return false;
            };
            within_limits(parsed as f64, characteristics)
        }
        VariableDataType::Decimal => {
            let Ok(parsed) = value.parse::<f64>() else {
                return false;
            };
            within_limits(parsed, characteristics)
        }
        VariableDataType::Boolean => value == "true" || value == "false",
        VariableDataType::DateTime => value.parse::<chrono::DateTime<chrono::Utc>>().is_ok(),
        VariableDataType::OptionList => characteristics
            .values_list
            .as_ref()
            .map(|list| list.iter().any(|allowed| allowed == value))
            .unwrap_or(true),
        VariableDataType::MemberList | VariableDataType::SequenceList => characteristics
            .values_list
            .as_ref()
            .map(|list| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .all(|item| list.iter().any(|allowed| allowed == item))
            })
            .unwrap_or(true),
        VariableDataType::String => true,
    }
}

fn within_limits(value: f64, characteristics: &VariableCharacteristics) -> bool {
    characteristics.min_limit.map(|min| value >= min).unwrap_or(true)
        && characteristics.max_limit.map(|max| value <= max).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::InMemoryStorage;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn model_with(declarations: Vec<VariableDeclaration>) -> Arc<DeviceModel> {
        DeviceModel::new(Arc::new(InMemoryStorage::new()), declarations).await
    }

    #[tokio::test]
    async fn reads_absent_variable_report_unknown() {
        let model = model_with(vec![VariableDeclaration::read_write(
            "OCPPCommCtrlr",
            "HeartbeatInterval",
            "300",
        )])
        .await;

        let (status, _) = model.request_value(
            &Component::named("OCPPCommCtrlr"),
            &Variable::named("NoSuchVariable"),
            AttributeKind::Actual,
        );
        assert_eq!(status, GetVariableStatusEnumType::UnknownVariable);

        let (status, _) = model.request_value(
            &Component::named("NoSuchCtrlr"),
            &Variable::named("HeartbeatInterval"),
            AttributeKind::Actual,
        );
        assert_eq!(status, GetVariableStatusEnumType::UnknownComponent);
    }

    #[tokio::test]
    async fn read_only_rejected_for_csms_but_not_internal() {
        let model = model_with(vec![VariableDeclaration::read_only(
            "ChargingStation",
            "AvailabilityState",
            "Available",
        )])
        .await;
        let component = Component::named("ChargingStation");
        let variable = Variable::named("AvailabilityState");

        let status = model
            .set_value(
                &component,
                &variable,
                AttributeKind::Actual,
                "Unavailable",
                ValueSource::Csms,
            )
            .await;
        assert_eq!(status, SetVariableStatusEnumType::Rejected);

        let status = model
            .set_read_only_value(&component, &variable, "Unavailable")
            .await;
        assert_eq!(status, SetVariableStatusEnumType::Accepted);
        assert_eq!(
            model.get(("ChargingStation", "AvailabilityState")).unwrap(),
            "Unavailable"
        );
    }

    #[tokio::test]
    async fn observers_fire_once_and_only_on_change() {
        let model = model_with(vec![VariableDeclaration::read_write(
            "OCPPCommCtrlr",
            "HeartbeatInterval",
            "300",
        )])
        .await;
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = fired.clone();
        model.subscribe(Box::new(move |_, _, _, _| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let component = Component::named("OCPPCommCtrlr");
        let variable = Variable::named("HeartbeatInterval");

        // unchanged write: no notification
        model
            .set_value(&component, &variable, AttributeKind::Actual, "300", ValueSource::Csms)
            .await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // changed write: exactly one notification
        model
            .set_value(&component, &variable, AttributeKind::Actual, "60", ValueSource::Csms)
            .await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn integer_range_validation() {
        let model = model_with(vec![VariableDeclaration::read_write(
            "OCPPCommCtrlr",
            "HeartbeatInterval",
            "300",
        )
        .with_characteristics(VariableCharacteristics {
            data_type: VariableDataType::Integer,
            min_limit: Some(1.0),
            max_limit: Some(86400.0),
            ..Default::default()
        })])
        .await;

        let component = Component::named("OCPPCommCtrlr");
        let variable = Variable::named("HeartbeatInterval");
        let set = |value: &'static str| {
            let model = model.clone();
            let component = component.clone();
            let variable = variable.clone();
            async move {
                model
                    .set_value(&component, &variable, AttributeKind::Actual, value, ValueSource::Csms)
                    .await
            }
        };

        assert_eq!(set("60").await, SetVariableStatusEnumType::Accepted);
        assert_eq!(set("0").await, SetVariableStatusEnumType::Rejected);
        assert_eq!(set("not-a-number").await, SetVariableStatusEnumType::Rejected);
    }

    #[tokio::test]
    async fn option_list_validation() {
        let model = model_with(vec![VariableDeclaration::read_write(
            "SmartChargingCtrlr",
            "ChargingScheduleChargingRateUnit",
            "A,W",
        )
        .with_characteristics(VariableCharacteristics {
            data_type: VariableDataType::MemberList,
            values_list: Some(vec!["A".into(), "W".into()]),
            ..Default::default()
        })])
        .await;

        let component = Component::named("SmartChargingCtrlr");
        let variable = Variable::named("ChargingScheduleChargingRateUnit");
        let status = model
            .set_value(&component, &variable, AttributeKind::Actual, "A", ValueSource::Csms)
            .await;
        assert_eq!(status, SetVariableStatusEnumType::Accepted);
        let status = model
            .set_value(&component, &variable, AttributeKind::Actual, "A,V", ValueSource::Csms)
            .await;
        assert_eq!(status, SetVariableStatusEnumType::Rejected);
    }

    #[tokio::test]
    async fn csms_writes_survive_restart() {
        let storage = Arc::new(InMemoryStorage::new());
        let declarations = || {
            vec![VariableDeclaration::read_write(
                "OCPPCommCtrlr",
                "HeartbeatInterval",
                "300",
            )]
        };
        let model = DeviceModel::new(storage.clone(), declarations()).await;
        model
            .set_value(
                &Component::named("OCPPCommCtrlr"),
                &Variable::named("HeartbeatInterval"),
                AttributeKind::Actual,
                "120",
                ValueSource::Csms,
            )
            .await;

        let reloaded = DeviceModel::new(storage, declarations()).await;
        assert_eq!(
            reloaded.get_or(vars::HEARTBEAT_INTERVAL, 0_i64),
            120
        );
    }

    #[tokio::test]
    async fn csl_reads_trim_entries() {
        let model = model_with(vec![VariableDeclaration::read_write(
            "AlignedDataCtrlr",
            "Measurands",
            "Energy.Active.Import.Register, Power.Active.Import",
        )])
        .await;
        assert_eq!(
            model.get_csl(vars::ALIGNED_DATA_MEASURANDS),
            vec!["Energy.Active.Import.Register", "Power.Active.Import"]
        );
    }

    #[tokio::test]
    async fn write_only_values_never_reported() {
        let model = model_with(vec![VariableDeclaration {
            component: Component::named("SecurityCtrlr"),
            variable: Variable::named("BasicAuthPassword"),
            value: "hunter2".into(),
            mutability: Mutability::WriteOnly,
            characteristics: VariableCharacteristics::default(),
        }])
        .await;

        let (status, value) = model.request_value(
            &Component::named("SecurityCtrlr"),
            &Variable::named("BasicAuthPassword"),
            AttributeKind::Actual,
        );
        assert_eq!(status, GetVariableStatusEnumType::Rejected);
        assert!(value.is_none());

        let report = model.report_data(None);
        assert_eq!(report.len(), 1);
        assert!(report[0].variable_attribute[0].value.is_none());
        assert_eq!(
            report[0].variable_attribute[0].mutability,
            Some(rust_ocpp::v2_0_1::enumerations::mutability_enum_type::MutabilityEnumType::WriteOnly)
        );
    }
}

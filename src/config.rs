//! Configuration module
//!
//! TOML-based bootstrap configuration with auto-creation and defaults:
//! station identity, EVSE/connector layout, and the initial network
//! connection profiles. Runtime OCPP variables (`MessageAttempts`,
//! `HeartbeatInterval`, ...) live in the device model, seeded from
//! [`StationConfig::default_variable_declarations`].

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::application::device_model::VariableDeclaration;
use crate::application::evse::CurrentPhaseType;
use crate::domain::device_model::{VariableCharacteristics, VariableDataType};
use crate::domain::NetworkConnectionProfile;

/// Root station configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// Station identity reported in BootNotification
    #[serde(default)]
    pub station: StationInfo,

    /// One entry per EVSE, in EVSE-id order
    #[serde(default = "default_evses")]
    pub evses: Vec<EvseConfig>,

    /// CSMS network connection profiles
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Identity reported to the CSMS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationInfo {
    /// Station identity, also the basic-auth username
    #[serde(default = "default_station_id")]
    pub id: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_vendor")]
    pub vendor_name: String,

    #[serde(default = "default_firmware_version")]
    pub firmware_version: String,

    #[serde(default)]
    pub serial_number: Option<String>,
}

/// One EVSE: connector count and supply type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvseConfig {
    #[serde(default = "default_connector_count")]
    pub connectors: u32,

    /// "AC" or "DC"
    #[serde(default = "default_supply")]
    pub supply: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_network_profiles")]
    pub profiles: Vec<NetworkProfileConfig>,

    /// Initial basic-auth password (writable later via BasicAuthPassword)
    #[serde(default)]
    pub basic_auth_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkProfileConfig {
    pub configuration_slot: i32,
    #[serde(default = "default_security_profile")]
    pub security_profile: i32,
    pub csms_url: String,
}

// ── Default value helpers ──────────────────────────────────────

fn default_station_id() -> String {
    "CS001".into()
}
fn default_model() -> String {
    "SingleSocketCharger".into()
}
fn default_vendor() -> String {
    "OpenEVSE".into()
}
fn default_firmware_version() -> String {
    "0.3.0".into()
}
fn default_connector_count() -> u32 {
    1
}
fn default_supply() -> String {
    "AC".into()
}
fn default_security_profile() -> i32 {
    1
}
fn default_evses() -> Vec<EvseConfig> {
    vec![EvseConfig {
        connectors: default_connector_count(),
        supply: default_supply(),
    }]
}
fn default_network_profiles() -> Vec<NetworkProfileConfig> {
    vec![NetworkProfileConfig {
        configuration_slot: 1,
        security_profile: default_security_profile(),
        csms_url: "ws://localhost:9000/ocpp/CS001".into(),
    }]
}

impl Default for StationInfo {
    fn default() -> Self {
        Self {
            id: default_station_id(),
            model: default_model(),
            vendor_name: default_vendor(),
            firmware_version: default_firmware_version(),
            serial_number: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            profiles: default_network_profiles(),
            basic_auth_password: String::new(),
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            station: StationInfo::default(),
            evses: default_evses(),
            network: NetworkConfig::default(),
        }
    }
}

// ── File I/O ───────────────────────────────────────────────────

impl StationConfig {
    /// Load configuration from a TOML file, creating it with defaults
    /// when missing.
    pub fn load(path: &Path) -> Result<Self, String> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
            toml::from_str(&content)
                .map_err(|e| format!("Invalid TOML in {}: {}", path.display(), e))
        } else {
            let config = StationConfig::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Cannot create {}: {}", parent.display(), e))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Cannot serialize config: {}", e))?;
        std::fs::write(path, content)
            .map_err(|e| format!("Cannot write {}: {}", path.display(), e))
    }

    // ── Derived views ──────────────────────────────────────

    pub fn evse_layout(&self) -> Vec<(u32, CurrentPhaseType)> {
        self.evses
            .iter()
            .map(|evse| {
                let phase_type = if evse.supply.eq_ignore_ascii_case("DC") {
                    CurrentPhaseType::Dc
                } else {
                    CurrentPhaseType::Ac
                };
                (evse.connectors, phase_type)
            })
            .collect()
    }

    pub fn network_profiles(&self) -> Vec<NetworkConnectionProfile> {
        self.network
            .profiles
            .iter()
            .map(|profile| NetworkConnectionProfile {
                configuration_slot: profile.configuration_slot,
                security_profile: profile.security_profile,
                ocpp_csms_url: profile.csms_url.clone(),
                basic_auth_identity: Some(self.station.id.clone()),
            })
            .collect()
    }

    /// Standardized controller variables with their factory defaults.
    pub fn default_variable_declarations(&self) -> Vec<VariableDeclaration> {
        let integer = |min: f64, max: f64| VariableCharacteristics {
            data_type: VariableDataType::Integer,
            min_limit: Some(min),
            max_limit: Some(max),
            ..Default::default()
        };
        let boolean = VariableCharacteristics {
            data_type: VariableDataType::Boolean,
            ..Default::default()
        };
        let rate_units = VariableCharacteristics {
            data_type: VariableDataType::MemberList,
            values_list: Some(vec!["A".into(), "W".into()]),
            ..Default::default()
        };

        let supply_phases = if self
            .evses
            .iter()
            .all(|evse| evse.supply.eq_ignore_ascii_case("DC"))
        {
            "0"
        } else {
            "3"
        };

        vec![
            VariableDeclaration::read_write("OCPPCommCtrlr", "MessageAttempts", "5")
                .with_characteristics(integer(1.0, 10.0)),
            VariableDeclaration::read_write("OCPPCommCtrlr", "MessageAttemptInterval", "10")
                .with_characteristics(integer(0.0, 3600.0)),
            VariableDeclaration::read_write("OCPPCommCtrlr", "MessageTimeout", "30")
                .with_characteristics(integer(1.0, 3600.0)),
            VariableDeclaration::read_write("OCPPCommCtrlr", "MessageQueueSizeThreshold", "200000")
                .with_characteristics(integer(1.0, 1e9)),
            VariableDeclaration::read_write("OCPPCommCtrlr", "MessageTypesDiscardForQueueing", ""),
            VariableDeclaration::read_write("OCPPCommCtrlr", "QueueAllMessages", "false")
                .with_characteristics(boolean.clone()),
            VariableDeclaration::read_write("OCPPCommCtrlr", "HeartbeatInterval", "300")
                .with_characteristics(integer(1.0, 86400.0)),
            VariableDeclaration::read_write("OCPPCommCtrlr", "OfflineThreshold", "3600")
                .with_characteristics(integer(0.0, 86400.0)),
            VariableDeclaration::read_write("OCPPCommCtrlr", "WebSocketPingInterval", "30")
                .with_characteristics(integer(0.0, 3600.0)),
            VariableDeclaration::read_write("OCPPCommCtrlr", "RetryBackOffRandomRange", "10")
                .with_characteristics(integer(0.0, 600.0)),
            VariableDeclaration::read_write("OCPPCommCtrlr", "RetryBackOffRepeatTimes", "5")
                .with_characteristics(integer(0.0, 20.0)),
            VariableDeclaration::read_write("OCPPCommCtrlr", "RetryBackOffWaitMinimum", "3")
                .with_characteristics(integer(1.0, 600.0)),
            VariableDeclaration::read_write("OCPPCommCtrlr", "NetworkProfileConnectionAttempts", "5")
                .with_characteristics(integer(1.0, 100.0)),
            VariableDeclaration::read_write("OCPPCommCtrlr", "NetworkConfigurationPriority", "1"),
            VariableDeclaration::read_only("SecurityCtrlr", "SecurityProfile", "1"),
            VariableDeclaration {
                component: crate::domain::Component::named("SecurityCtrlr"),
                variable: crate::domain::Variable::named("BasicAuthPassword"),
                value: self.network.basic_auth_password.clone(),
                mutability: crate::domain::Mutability::WriteOnly,
                characteristics: VariableCharacteristics::default(),
            },
            VariableDeclaration::read_write("AlignedDataCtrlr", "Interval", "900")
                .with_characteristics(integer(0.0, 86400.0)),
            VariableDeclaration::read_write("AlignedDataCtrlr", "SendDuringIdle", "false")
                .with_characteristics(boolean.clone()),
            VariableDeclaration::read_write(
                "AlignedDataCtrlr",
                "Measurands",
                "Energy.Active.Import.Register",
            ),
            VariableDeclaration::read_write(
                "AlignedDataCtrlr",
                "TxEndedMeasurands",
                "Energy.Active.Import.Register",
            ),
            VariableDeclaration::read_write(
                "SampledDataCtrlr",
                "TxStartedMeasurands",
                "Energy.Active.Import.Register",
            ),
            VariableDeclaration::read_write(
                "SampledDataCtrlr",
                "TxUpdatedMeasurands",
                "Energy.Active.Import.Register",
            ),
            VariableDeclaration::read_write(
                "SampledDataCtrlr",
                "TxEndedMeasurands",
                "Energy.Active.Import.Register",
            ),
            VariableDeclaration::read_write("SmartChargingCtrlr", "Enabled", "true")
                .with_characteristics(boolean.clone()),
            VariableDeclaration::read_only("SmartChargingCtrlr", "Available", "true"),
            VariableDeclaration::read_write("SmartChargingCtrlr", "ACPhaseSwitchingSupported", "false")
                .with_characteristics(boolean.clone()),
            VariableDeclaration::read_write(
                "SmartChargingCtrlr",
                "ChargingScheduleChargingRateUnit",
                "A,W",
            )
            .with_characteristics(rate_units),
            VariableDeclaration::read_only("ChargingStation", "SupplyPhases", supply_phases),
            VariableDeclaration::read_only("ChargingStation", "AvailabilityState", "Available"),
            VariableDeclaration::read_write("TxCtrlr", "StopTxOnInvalidId", "true")
                .with_characteristics(boolean.clone()),
            VariableDeclaration::read_write("AuthCacheCtrlr", "Enabled", "true")
                .with_characteristics(boolean.clone()),
            VariableDeclaration::read_write("LocalAuthListCtrlr", "Enabled", "true")
                .with_characteristics(boolean),
            VariableDeclaration::read_write("DeviceDataCtrlr", "ItemsPerMessageGetVariables", "50"),
            VariableDeclaration::read_write("DeviceDataCtrlr", "BytesPerMessageGetVariables", "8192"),
            VariableDeclaration::read_write("DeviceDataCtrlr", "ItemsPerMessageGetReport", "50"),
            VariableDeclaration::read_write("DeviceDataCtrlr", "BytesPerMessageGetReport", "8192"),
            VariableDeclaration::read_write(
                "DeviceDataCtrlr",
                "ItemsPerMessageSetVariableMonitoring",
                "20",
            ),
            VariableDeclaration::read_write(
                "DeviceDataCtrlr",
                "BytesPerMessageSetVariableMonitoring",
                "8192",
            ),
            VariableDeclaration::read_write("MonitoringCtrlr", "ActiveMonitoringBase", "All"),
            VariableDeclaration::read_write("MonitoringCtrlr", "ActiveMonitoringLevel", "9")
                .with_characteristics(integer(0.0, 9.0)),
            VariableDeclaration::read_write(
                "CustomerInformationCtrlr",
                "MaxCustomerInformationDataLength",
                "51200",
            ),
            VariableDeclaration::read_write("TariffCostCtrlr", "NumberOfDecimalsForCostValues", "3"),
        ]
    }
}

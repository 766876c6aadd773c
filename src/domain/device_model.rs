//! Device-model addressing, attribute metadata, and monitors
//!
//! The device model is a typed configuration store addressed by
//! `(component, variable, attribute)`. These are the domain types; the
//! store itself lives in the application layer. Conversions into the
//! `rust_ocpp` wire datatypes live here so every layer above reports
//! through the typed catalog.

use rust_ocpp::v2_0_1::datatypes::component_type::ComponentType;
use rust_ocpp::v2_0_1::datatypes::evse_type::EVSEType;
use rust_ocpp::v2_0_1::datatypes::variable_type::VariableType;
use rust_ocpp::v2_0_1::enumerations::attribute_enum_type::AttributeEnumType;
use rust_ocpp::v2_0_1::enumerations::monitor_enum_type::MonitorEnumType;
use rust_ocpp::v2_0_1::enumerations::mutability_enum_type::MutabilityEnumType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Addressing ─────────────────────────────────────────────────

/// Component address, e.g. `OCPPCommCtrlr` or `EVSE` with an evse id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evse_id: Option<i32>,
}

impl Component {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: None,
            evse_id: None,
        }
    }

    pub fn evse(name: impl Into<String>, evse_id: i32) -> Self {
        Self {
            name: name.into(),
            instance: None,
            evse_id: Some(evse_id),
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.evse_id {
            Some(id) => write!(f, "{}[evse={}]", self.name, id),
            None => f.write_str(&self.name),
        }
    }
}

impl From<&Component> for ComponentType {
    fn from(component: &Component) -> Self {
        ComponentType {
            name: component.name.clone(),
            instance: component.instance.clone(),
            evse: component.evse_id.map(|id| EVSEType {
                id,
                connector_id: None,
            }),
        }
    }
}

/// Variable address within a component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl Variable {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: None,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&Variable> for VariableType {
    fn from(variable: &Variable) -> Self {
        VariableType {
            name: variable.name.clone(),
            instance: variable.instance.clone(),
        }
    }
}

// ── Attributes ─────────────────────────────────────────────────

/// Attribute kind of a variable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AttributeKind {
    #[default]
    Actual,
    Target,
    MinSet,
    MaxSet,
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for AttributeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Actual" => Ok(Self::Actual),
            "Target" => Ok(Self::Target),
            "MinSet" => Ok(Self::MinSet),
            "MaxSet" => Ok(Self::MaxSet),
            other => Err(format!("Unknown attribute kind: {}", other)),
        }
    }
}

impl From<AttributeKind> for AttributeEnumType {
    fn from(kind: AttributeKind) -> Self {
        match kind {
            AttributeKind::Actual => AttributeEnumType::Actual,
            AttributeKind::Target => AttributeEnumType::Target,
            AttributeKind::MinSet => AttributeEnumType::MinSet,
            AttributeKind::MaxSet => AttributeEnumType::MaxSet,
        }
    }
}

/// Write permission of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Mutability {
    ReadOnly,
    WriteOnly,
    #[default]
    ReadWrite,
}

impl From<Mutability> for MutabilityEnumType {
    fn from(mutability: Mutability) -> Self {
        match mutability {
            Mutability::ReadOnly => MutabilityEnumType::ReadOnly,
            Mutability::WriteOnly => MutabilityEnumType::WriteOnly,
            Mutability::ReadWrite => MutabilityEnumType::ReadWrite,
        }
    }
}

/// Who performed a write. `Internal` writes bypass the mutability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueSource {
    Internal,
    Csms,
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => f.write_str("internal"),
            Self::Csms => f.write_str("csms"),
        }
    }
}

// ── Characteristics ────────────────────────────────────────────

/// Data type of a variable, used to validate writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VariableDataType {
    #[default]
    String,
    Decimal,
    Integer,
    Boolean,
    DateTime,
    OptionList,
    SequenceList,
    MemberList,
}

/// Validation metadata for a variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VariableCharacteristics {
    pub data_type: VariableDataType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_limit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_limit: Option<f64>,
    /// Allowed values for `OptionList`/`MemberList`/`SequenceList` types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values_list: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// One persisted attribute value row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredVariable {
    pub component: Component,
    pub variable: Variable,
    pub attribute: AttributeKind,
    pub value: String,
    pub source: ValueSource,
}

// ── Monitors ───────────────────────────────────────────────────

/// Monitor kind, per OCPP 2.0.1 `MonitorEnumType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorKind {
    UpperThreshold,
    LowerThreshold,
    Delta,
    Periodic,
    PeriodicClockAligned,
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<MonitorKind> for MonitorEnumType {
    fn from(kind: MonitorKind) -> Self {
        match kind {
            MonitorKind::UpperThreshold => MonitorEnumType::UpperThreshold,
            MonitorKind::LowerThreshold => MonitorEnumType::LowerThreshold,
            MonitorKind::Delta => MonitorEnumType::Delta,
            MonitorKind::Periodic => MonitorEnumType::Periodic,
            MonitorKind::PeriodicClockAligned => MonitorEnumType::PeriodicClockAligned,
        }
    }
}

/// An installed variable monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: i32,
    pub component: Component,
    pub variable: Variable,
    pub kind: MonitorKind,
    /// Threshold, delta, or period seconds depending on `kind`.
    pub value: f64,
    pub severity: i32,
    /// Only active while a transaction is running on the component's EVSE.
    pub transaction_scope: bool,
}

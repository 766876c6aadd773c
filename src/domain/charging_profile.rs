//! ChargingProfile domain entity and validation taxonomy
//!
//! Wire-compatible (OCPP 2.0.1 camelCase) profile structures plus the
//! result enum for profile admission. Stored profiles are serialized from
//! these structs straight into the profile store.

use chrono::{DateTime, Utc};
use rust_ocpp::v2_0_1::enumerations::charging_profile_kind_enum_type::ChargingProfileKindEnumType;
use rust_ocpp::v2_0_1::enumerations::charging_profile_purpose_enum_type::ChargingProfilePurposeEnumType;
use rust_ocpp::v2_0_1::enumerations::charging_rate_unit_enum_type::ChargingRateUnitEnumType;
use rust_ocpp::v2_0_1::enumerations::recurrency_kind_enum_type::RecurrencyKindEnumType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A time-bounded power/current schedule installed by the CSMS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingProfile {
    pub id: i32,
    pub stack_level: i32,
    pub charging_profile_purpose: ChargingProfilePurposeEnumType,
    pub charging_profile_kind: ChargingProfileKindEnumType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrency_kind: Option<RecurrencyKindEnumType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub charging_schedule: Vec<ChargingSchedule>,
}

/// One schedule of a profile; `Absolute`/`Recurring` profiles carry a
/// start, `Relative` ones anchor to the window (or transaction) start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSchedule {
    pub id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_schedule: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i32>,
    pub charging_rate_unit: ChargingRateUnitEnumType,
    pub charging_schedule_period: Vec<ChargingSchedulePeriod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_charging_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSchedulePeriod {
    /// Offset in seconds from the schedule start. First period must be 0,
    /// periods strictly increasing.
    pub start_period: i32,
    pub limit: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_phases: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_to_use: Option<i32>,
}

impl ChargingProfile {
    /// Whether the `[valid_from, valid_to]` window of `self` overlaps the
    /// window of `other`. Open ends extend to ±infinity.
    pub fn validity_overlaps(&self, other: &ChargingProfile) -> bool {
        let self_from = self.valid_from.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let self_to = self.valid_to.unwrap_or(DateTime::<Utc>::MAX_UTC);
        let other_from = other.valid_from.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let other_to = other.valid_to.unwrap_or(DateTime::<Utc>::MAX_UTC);
        self_from <= other_to && other_from <= self_to
    }

    /// Whether the profile window contains `at`.
    pub fn valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from.map(|f| f <= at).unwrap_or(true)
            && self.valid_to.map(|t| at <= t).unwrap_or(true)
    }
}

/// Stored profile row: profile plus the EVSE it is installed on
/// (0 = station-wide).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledProfile {
    pub evse_id: i32,
    pub profile: ChargingProfile,
}

// ── Validation taxonomy ────────────────────────────────────────

/// Outcome of charging-profile admission. `Valid` admits; every other
/// variant maps to a business rejection with a reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileValidationResult {
    Valid,
    EvseDoesNotExist,
    InvalidProfileType,
    TxProfileMissingTransactionId,
    TxProfileEvseIdNotGreaterThanZero,
    TxProfileTransactionNotOnEvse,
    TxProfileEvseHasNoActiveTransaction,
    TxProfileConflictingStackLevel,
    ChargingProfileNoChargingSchedulePeriods,
    ChargingProfileFirstStartScheduleIsNotZero,
    ChargingProfileMissingRequiredStartSchedule,
    ChargingProfileExtraneousStartSchedule,
    ChargingScheduleChargingRateUnitUnsupported,
    ChargingSchedulePeriodsOutOfOrder,
    ChargingSchedulePeriodInvalidPhaseToUse,
    ChargingSchedulePeriodPhaseToUseACPhaseSwitchingUnsupported,
    ChargingSchedulePeriodExtraneousPhaseValues,
    ChargingSchedulePeriodUnsupportedNumberPhases,
    DuplicateTxDefaultProfileFound,
    DuplicateProfileValidityPeriod,
    ChargingStationMaxProfileCannotBeRelative,
    ChargingStationMaxProfileEvseIdGreaterThanZero,
}

impl ProfileValidationResult {
    /// Short reason code reported in `statusInfo.reasonCode`.
    pub fn reason_code(&self) -> &'static str {
        use ProfileValidationResult::*;
        match self {
            Valid => "NoError",
            DuplicateProfileValidityPeriod | DuplicateTxDefaultProfileFound => "DuplicateProfile",
            TxProfileTransactionNotOnEvse | TxProfileEvseHasNoActiveTransaction => "TxNotFound",
            TxProfileConflictingStackLevel => "InvalidStackLevel",
            TxProfileMissingTransactionId => "MissingParam",
            ChargingScheduleChargingRateUnitUnsupported => "UnsupportedRateUnit",
            ChargingProfileNoChargingSchedulePeriods
            | ChargingProfileFirstStartScheduleIsNotZero
            | ChargingProfileMissingRequiredStartSchedule
            | ChargingProfileExtraneousStartSchedule
            | ChargingSchedulePeriodsOutOfOrder
            | ChargingSchedulePeriodInvalidPhaseToUse
            | ChargingSchedulePeriodPhaseToUseACPhaseSwitchingUnsupported
            | ChargingSchedulePeriodExtraneousPhaseValues
            | ChargingSchedulePeriodUnsupportedNumberPhases => "InvalidSchedule",
            EvseDoesNotExist
            | InvalidProfileType
            | TxProfileEvseIdNotGreaterThanZero
            | ChargingStationMaxProfileCannotBeRelative
            | ChargingStationMaxProfileEvseIdGreaterThanZero => "InvalidValue",
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl fmt::Display for ProfileValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(valid_from: Option<&str>, valid_to: Option<&str>) -> ChargingProfile {
        ChargingProfile {
            id: 1,
            stack_level: 0,
            charging_profile_purpose: ChargingProfilePurposeEnumType::TxDefaultProfile,
            charging_profile_kind: ChargingProfileKindEnumType::Absolute,
            recurrency_kind: None,
            valid_from: valid_from.map(|s| s.parse().unwrap()),
            valid_to: valid_to.map(|s| s.parse().unwrap()),
            transaction_id: None,
            charging_schedule: vec![],
        }
    }

    #[test]
    fn overlapping_windows_are_detected() {
        let a = profile(Some("2024-01-01T00:00:00Z"), Some("2024-02-01T00:00:00Z"));
        let b = profile(Some("2024-01-15T00:00:00Z"), Some("2024-02-15T00:00:00Z"));
        assert!(a.validity_overlaps(&b));
        assert!(b.validity_overlaps(&a));
    }

    #[test]
    fn disjoint_windows_do_not_overlap() {
        let a = profile(Some("2024-01-01T00:00:00Z"), Some("2024-02-01T00:00:00Z"));
        let b = profile(Some("2024-03-01T00:00:00Z"), Some("2024-04-01T00:00:00Z"));
        assert!(!a.validity_overlaps(&b));
    }

    #[test]
    fn open_ended_window_overlaps_everything_after_it() {
        let forever = profile(None, None);
        let b = profile(Some("2024-01-15T00:00:00Z"), Some("2024-02-15T00:00:00Z"));
        assert!(forever.validity_overlaps(&b));
    }

    #[test]
    fn profile_wire_shape_is_camel_case() {
        let p = profile(Some("2024-01-01T00:00:00Z"), None);
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["stackLevel"], 0);
        assert_eq!(json["chargingProfilePurpose"], "TxDefaultProfile");
        assert_eq!(json["chargingProfileKind"], "Absolute");
        assert!(json.get("validTo").is_none());
    }

    #[test]
    fn reason_codes_group_schedule_errors() {
        assert_eq!(
            ProfileValidationResult::ChargingSchedulePeriodsOutOfOrder.reason_code(),
            "InvalidSchedule"
        );
        assert_eq!(
            ProfileValidationResult::DuplicateProfileValidityPeriod.reason_code(),
            "DuplicateProfile"
        );
        assert_eq!(
            ProfileValidationResult::TxProfileEvseHasNoActiveTransaction.reason_code(),
            "TxNotFound"
        );
    }
}

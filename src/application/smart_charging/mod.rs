//! Smart charging engine
//!
//! Profile store keyed by `(evse, purpose, stack level)` with admission
//! validation (K01 functional requirements) and composite-schedule
//! resolution. Validation runs in a fixed order; the first failure wins.

pub mod composite;

pub use composite::{calculate_composite_schedule, CompositeSchedule};

use std::sync::Arc;

use rust_ocpp::v2_0_1::enumerations::charging_profile_kind_enum_type::ChargingProfileKindEnumType;
use rust_ocpp::v2_0_1::enumerations::charging_profile_purpose_enum_type::ChargingProfilePurposeEnumType;
use rust_ocpp::v2_0_1::enumerations::charging_rate_unit_enum_type::ChargingRateUnitEnumType;
use tracing::{info, warn};

use super::device_model::{vars, DeviceModel};
use super::evse::{CurrentPhaseType, EvseManager};
use crate::domain::charging_profile::{ChargingProfile, InstalledProfile, ProfileValidationResult};
use crate::domain::InfraResult;
use crate::infrastructure::StationStorage;

const DEFAULT_AC_PHASES: i32 = 3;

/// Criteria of a `ClearChargingProfile` request.
#[derive(Debug, Clone, Default)]
pub struct ClearProfileCriteria {
    pub profile_id: Option<i32>,
    pub evse_id: Option<i32>,
    pub purpose: Option<ChargingProfilePurposeEnumType>,
    pub stack_level: Option<i32>,
}

/// Criteria of a `GetChargingProfiles` request.
#[derive(Debug, Clone, Default)]
pub struct ReportProfileCriteria {
    pub evse_id: Option<i32>,
    pub profile_ids: Option<Vec<i32>>,
    pub purpose: Option<ChargingProfilePurposeEnumType>,
    pub stack_level: Option<i32>,
}

pub struct SmartChargingHandler {
    evse_manager: Arc<EvseManager>,
    device_model: Arc<DeviceModel>,
    storage: Arc<dyn StationStorage>,
}

impl SmartChargingHandler {
    pub fn new(
        evse_manager: Arc<EvseManager>,
        device_model: Arc<DeviceModel>,
        storage: Arc<dyn StationStorage>,
    ) -> Self {
        Self {
            evse_manager,
            device_model,
            storage,
        }
    }

    // ── Admission ──────────────────────────────────────────

    /// Validate in the fixed order, conforming AC periods with omitted
    /// `numberPhases` to 3 on the way (K01.FR.49).
    pub async fn conform_and_validate_profile(
        &self,
        profile: &mut ChargingProfile,
        evse_id: i32,
    ) -> ProfileValidationResult {
        let result = self.validate_evse_exists(evse_id);
        if !result.is_valid() {
            return result;
        }

        // purpose / evse-id compatibility
        match profile.charging_profile_purpose {
            ChargingProfilePurposeEnumType::ChargingStationMaxProfile => {
                let result = self.validate_charging_station_max_profile(profile, evse_id);
                if !result.is_valid() {
                    return result;
                }
            }
            ChargingProfilePurposeEnumType::TxProfile if evse_id <= 0 => {
                return ProfileValidationResult::TxProfileEvseIdNotGreaterThanZero;
            }
            _ => {}
        }

        let result = self.validate_profile_schedules(profile, evse_id).await;
        if !result.is_valid() {
            return result;
        }

        match profile.charging_profile_purpose {
            ChargingProfilePurposeEnumType::TxProfile => {
                let result = self.validate_tx_profile(profile, evse_id).await;
                if !result.is_valid() {
                    return result;
                }
            }
            ChargingProfilePurposeEnumType::TxDefaultProfile => {
                let result = self.validate_tx_default_profile(profile, evse_id).await;
                if !result.is_valid() {
                    return result;
                }
            }
            _ => {}
        }

        self.validate_no_validity_overlap(profile, evse_id).await
    }

    pub fn validate_evse_exists(&self, evse_id: i32) -> ProfileValidationResult {
        if evse_id == 0 || self.evse_manager.exists(evse_id) {
            ProfileValidationResult::Valid
        } else {
            ProfileValidationResult::EvseDoesNotExist
        }
    }

    pub fn validate_charging_station_max_profile(
        &self,
        profile: &ChargingProfile,
        evse_id: i32,
    ) -> ProfileValidationResult {
        if profile.charging_profile_purpose
            != ChargingProfilePurposeEnumType::ChargingStationMaxProfile
        {
            return ProfileValidationResult::InvalidProfileType;
        }
        // K04.FR.03
        if evse_id > 0 {
            return ProfileValidationResult::ChargingStationMaxProfileEvseIdGreaterThanZero;
        }
        // K01.FR.38
        if profile.charging_profile_kind == ChargingProfileKindEnumType::Relative {
            return ProfileValidationResult::ChargingStationMaxProfileCannotBeRelative;
        }
        ProfileValidationResult::Valid
    }

    /// Start-schedule, period ordering, rate-unit and phase rules.
    /// Conforms omitted AC `numberPhases` to 3.
    pub async fn validate_profile_schedules(
        &self,
        profile: &mut ChargingProfile,
        evse_id: i32,
    ) -> ProfileValidationResult {
        let supported_units = self
            .device_model
            .get_csl(vars::CHARGING_SCHEDULE_CHARGING_RATE_UNIT);
        let ac_phase_switching = self
            .device_model
            .get_bool(vars::AC_PHASE_SWITCHING_SUPPORTED);
        let supply_phases: i32 = self
            .device_model
            .get_or(vars::CHARGING_STATION_SUPPLY_PHASES, DEFAULT_AC_PHASES);

        let phase_type = if evse_id > 0 {
            match self.evse_manager.evse(evse_id) {
                Ok(evse) => evse.lock().await.phase_type(),
                Err(_) => return ProfileValidationResult::EvseDoesNotExist,
            }
        } else if supply_phases == 0 {
            CurrentPhaseType::Dc
        } else {
            CurrentPhaseType::Ac
        };

        for schedule in &mut profile.charging_schedule {
            // K01.FR.40 / K01.FR.41
            match profile.charging_profile_kind {
                ChargingProfileKindEnumType::Absolute
                | ChargingProfileKindEnumType::Recurring => {
                    if schedule.start_schedule.is_none() {
                        return ProfileValidationResult::ChargingProfileMissingRequiredStartSchedule;
                    }
                }
                ChargingProfileKindEnumType::Relative => {
                    if schedule.start_schedule.is_some() {
                        return ProfileValidationResult::ChargingProfileExtraneousStartSchedule;
                    }
                }
            }

            if schedule.charging_schedule_period.is_empty() {
                return ProfileValidationResult::ChargingProfileNoChargingSchedulePeriods;
            }
            // K01.FR.31
            if schedule.charging_schedule_period[0].start_period != 0 {
                return ProfileValidationResult::ChargingProfileFirstStartScheduleIsNotZero;
            }
            // K01.FR.35
            let ordered = schedule
                .charging_schedule_period
                .windows(2)
                .all(|pair| pair[0].start_period < pair[1].start_period);
            if !ordered {
                return ProfileValidationResult::ChargingSchedulePeriodsOutOfOrder;
            }

            // K01.FR.26
            let unit = match schedule.charging_rate_unit {
                ChargingRateUnitEnumType::A => "A",
                ChargingRateUnitEnumType::W => "W",
            };
            if !supported_units.iter().any(|u| u == unit) {
                return ProfileValidationResult::ChargingScheduleChargingRateUnitUnsupported;
            }

            for period in &mut schedule.charging_schedule_period {
                match phase_type {
                    CurrentPhaseType::Dc => {
                        // K01.FR.44
                        if period.number_phases.is_some() || period.phase_to_use.is_some() {
                            return ProfileValidationResult::ChargingSchedulePeriodExtraneousPhaseValues;
                        }
                    }
                    CurrentPhaseType::Ac => {
                        if let Some(number_phases) = period.number_phases {
                            // K01.FR.45
                            if number_phases > supply_phases.max(1) {
                                return ProfileValidationResult::ChargingSchedulePeriodUnsupportedNumberPhases;
                            }
                        } else {
                            // K01.FR.49
                            period.number_phases = Some(DEFAULT_AC_PHASES);
                        }

                        if period.phase_to_use.is_some() {
                            // K01.FR.19
                            if period.number_phases != Some(1) {
                                return ProfileValidationResult::ChargingSchedulePeriodInvalidPhaseToUse;
                            }
                            // K01.FR.20
                            if !ac_phase_switching {
                                return ProfileValidationResult::ChargingSchedulePeriodPhaseToUseACPhaseSwitchingUnsupported;
                            }
                        }
                    }
                }
            }
        }

        ProfileValidationResult::Valid
    }

    pub async fn validate_tx_profile(
        &self,
        profile: &ChargingProfile,
        evse_id: i32,
    ) -> ProfileValidationResult {
        // K01.FR.03
        let Some(transaction_id) = &profile.transaction_id else {
            return ProfileValidationResult::TxProfileMissingTransactionId;
        };
        // K01.FR.16
        if evse_id <= 0 {
            return ProfileValidationResult::TxProfileEvseIdNotGreaterThanZero;
        }

        let active = self.evse_manager.active_transaction_id(evse_id).await;
        match active {
            // K01.FR.09
            None => return ProfileValidationResult::TxProfileEvseHasNoActiveTransaction,
            // K01.FR.33
            Some(active) if active != *transaction_id => {
                return ProfileValidationResult::TxProfileTransactionNotOnEvse;
            }
            Some(_) => {}
        }

        // K01.FR.39: no second TxProfile with the same (transaction, stack level)
        match self.storage.profiles_for_transaction(transaction_id).await {
            Ok(existing) => {
                let conflict = existing.iter().any(|p| {
                    p.profile.stack_level == profile.stack_level && p.profile.id != profile.id
                });
                if conflict {
                    return ProfileValidationResult::TxProfileConflictingStackLevel;
                }
            }
            Err(e) => warn!(error = %e, "Could not check for conflicting TxProfiles"),
        }

        ProfileValidationResult::Valid
    }

    /// K01.FR.52/53: a station-wide TxDefaultProfile conflicts with one
    /// installed on a specific EVSE at the same stack level (and vice
    /// versa), unless it replaces the same profile id.
    pub async fn validate_tx_default_profile(
        &self,
        profile: &ChargingProfile,
        evse_id: i32,
    ) -> ProfileValidationResult {
        let existing = match self.storage.profiles_all().await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(error = %e, "Could not load profiles for TxDefault validation");
                return ProfileValidationResult::Valid;
            }
        };

        let duplicate = existing.iter().any(|p| {
            p.profile.charging_profile_purpose == ChargingProfilePurposeEnumType::TxDefaultProfile
                && p.profile.stack_level == profile.stack_level
                && p.profile.id != profile.id
                && ((p.evse_id == 0) != (evse_id == 0))
        });
        if duplicate {
            return ProfileValidationResult::DuplicateTxDefaultProfileFound;
        }
        ProfileValidationResult::Valid
    }

    /// K01.FR.06: reject a profile whose validity window overlaps an
    /// existing profile of the same `(purpose, stack level)` on the same
    /// EVSE, unless it replaces that profile id.
    async fn validate_no_validity_overlap(
        &self,
        profile: &ChargingProfile,
        evse_id: i32,
    ) -> ProfileValidationResult {
        let existing = match self.storage.profiles_all().await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(error = %e, "Could not load profiles for overlap validation");
                return ProfileValidationResult::Valid;
            }
        };

        let overlap = existing.iter().any(|p| {
            p.evse_id == evse_id
                && p.profile.charging_profile_purpose == profile.charging_profile_purpose
                && p.profile.stack_level == profile.stack_level
                && p.profile.id != profile.id
                && p.profile.validity_overlaps(profile)
        });
        if overlap {
            return ProfileValidationResult::DuplicateProfileValidityPeriod;
        }
        ProfileValidationResult::Valid
    }

    // ── Store ──────────────────────────────────────────────

    /// Validate and, on success, install (replacing any same-id profile).
    pub async fn conform_validate_and_add_profile(
        &self,
        mut profile: ChargingProfile,
        evse_id: i32,
    ) -> Result<ProfileValidationResult, crate::domain::InfraError> {
        let result = self.conform_and_validate_profile(&mut profile, evse_id).await;
        if !result.is_valid() {
            return Ok(result);
        }
        self.storage.profile_delete(profile.id).await?;
        self.storage
            .profile_upsert(&InstalledProfile { evse_id, profile })
            .await?;
        Ok(ProfileValidationResult::Valid)
    }

    /// Clear by id or criteria; returns whether anything was removed.
    pub async fn clear_profiles(&self, criteria: &ClearProfileCriteria) -> InfraResult<bool> {
        let existing = self.storage.profiles_all().await?;
        let mut cleared = false;
        for installed in existing {
            let profile = &installed.profile;
            // ExternalConstraints profiles are never cleared by the CSMS
            if profile.charging_profile_purpose
                == ChargingProfilePurposeEnumType::ChargingStationExternalConstraints
            {
                continue;
            }
            let matches = match criteria.profile_id {
                Some(id) => profile.id == id,
                None => {
                    criteria
                        .evse_id
                        .map(|e| installed.evse_id == e)
                        .unwrap_or(true)
                        && criteria
                            .purpose
                            .as_ref()
                            .map(|p| profile.charging_profile_purpose == *p)
                            .unwrap_or(true)
                        && criteria
                            .stack_level
                            .map(|s| profile.stack_level == s)
                            .unwrap_or(true)
                }
            };
            if matches && self.storage.profile_delete(profile.id).await? {
                info!(profile_id = profile.id, "Cleared charging profile");
                cleared = true;
            }
        }
        Ok(cleared)
    }

    /// Profiles matching a `GetChargingProfiles` request.
    pub async fn reported_profiles(
        &self,
        criteria: &ReportProfileCriteria,
    ) -> InfraResult<Vec<InstalledProfile>> {
        let existing = self.storage.profiles_all().await?;
        Ok(existing
            .into_iter()
            .filter(|installed| {
                let profile = &installed.profile;
                criteria
                    .evse_id
                    .map(|e| installed.evse_id == e)
                    .unwrap_or(true)
                    && criteria
                        .profile_ids
                        .as_ref()
                        .map(|ids| ids.contains(&profile.id))
                        .unwrap_or(true)
                    && criteria
                        .purpose
                        .as_ref()
                        .map(|p| profile.charging_profile_purpose == *p)
                        .unwrap_or(true)
                    && criteria
                        .stack_level
                        .map(|s| profile.stack_level == s)
                        .unwrap_or(true)
            })
            .collect())
    }

    /// K02.FR.05: drop the TxProfiles of a finished transaction.
    pub async fn delete_transaction_tx_profiles(&self, transaction_id: &str) {
        match self.storage.profiles_for_transaction(transaction_id).await {
            Ok(profiles) => {
                for installed in profiles {
                    if installed.profile.charging_profile_purpose
                        == ChargingProfilePurposeEnumType::TxProfile
                    {
                        let _ = self.storage.profile_delete(installed.profile.id).await;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Could not delete TxProfiles of finished transaction"),
        }
    }

    /// Revalidate everything in the store; invalid leftovers are purged.
    /// Runs at boot.
    pub async fn clear_invalid_profiles(&self) {
        let existing = match self.storage.profiles_all().await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(error = %e, "Could not load charging profiles for revalidation");
                return;
            }
        };
        for installed in existing {
            let mut profile = installed.profile.clone();
            // TxProfiles reference transactions that ended with the restart
            let result = self
                .conform_and_validate_profile(&mut profile, installed.evse_id)
                .await;
            if !result.is_valid() {
                info!(
                    profile_id = profile.id,
                    %result,
                    "Purging invalid stored charging profile"
                );
                let _ = self.storage.profile_delete(profile.id).await;
            }
        }
    }

    // ── Composite schedule ─────────────────────────────────

    /// Whether the requested unit is in `ChargingScheduleChargingRateUnit`;
    /// with no explicit request the first configured unit is used.
    pub fn resolve_rate_unit(
        &self,
        requested: Option<ChargingRateUnitEnumType>,
    ) -> Option<ChargingRateUnitEnumType> {
        let supported = self
            .device_model
            .get_csl(vars::CHARGING_SCHEDULE_CHARGING_RATE_UNIT);
        let parse = |s: &str| match s {
            "A" => Some(ChargingRateUnitEnumType::A),
            "W" => Some(ChargingRateUnitEnumType::W),
            _ => None,
        };
        match requested {
            Some(unit) => {
                let name = match unit {
                    ChargingRateUnitEnumType::A => "A",
                    ChargingRateUnitEnumType::W => "W",
                };
                supported.iter().any(|u| u == name).then_some(unit)
            }
            None => supported.first().and_then(|s| parse(s)),
        }
    }

    pub async fn composite_schedule(
        &self,
        evse_id: i32,
        start: chrono::DateTime<chrono::Utc>,
        duration_s: i32,
        unit: ChargingRateUnitEnumType,
    ) -> InfraResult<CompositeSchedule> {
        let profiles = self.storage.profiles_all().await?;
        Ok(calculate_composite_schedule(
            &profiles, evse_id, start, duration_s, unit,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::device_model::VariableDeclaration;
    use crate::domain::charging_profile::{ChargingSchedule, ChargingSchedulePeriod};
    use crate::infrastructure::InMemoryStorage;
    use chrono::{DateTime, Utc};
    use rust_ocpp::v2_0_1::enumerations::charging_state_enum_type::ChargingStateEnumType;

    const DEFAULT_TX_ID: &str = "10c75ff7-74f5-44f5-9d01-f649f3ac7b78";

    struct Fixture {
        handler: SmartChargingHandler,
        evse_manager: Arc<EvseManager>,
        storage: Arc<InMemoryStorage>,
    }

    async fn fixture() -> Fixture {
        fixture_with("true", &[(1, CurrentPhaseType::Ac), (1, CurrentPhaseType::Ac)]).await
    }

    async fn fixture_with(
        ac_phase_switching: &str,
        layout: &[(u32, CurrentPhaseType)],
    ) -> Fixture {
        let storage = Arc::new(InMemoryStorage::new());
        let device_model = DeviceModel::new(
            storage.clone(),
            vec![
                VariableDeclaration::read_write(
                    "SmartChargingCtrlr",
                    "ChargingScheduleChargingRateUnit",
                    "A,W",
                ),
                VariableDeclaration::read_write(
                    "SmartChargingCtrlr",
                    "ACPhaseSwitchingSupported",
                    ac_phase_switching,
                ),
                VariableDeclaration::read_write("ChargingStation", "SupplyPhases", "3"),
            ],
        )
        .await;
        let evse_manager = Arc::new(EvseManager::new(layout, storage.clone()));
        Fixture {
            handler: SmartChargingHandler::new(
                evse_manager.clone(),
                device_model,
                storage.clone(),
            ),
            evse_manager,
            storage,
        }
    }

    fn schedule(periods: Vec<(i32, f64)>, start: Option<&str>) -> ChargingSchedule {
        ChargingSchedule {
            id: 1,
            start_schedule: start.map(|s| s.parse::<DateTime<Utc>>().unwrap()),
            duration: None,
            charging_rate_unit: ChargingRateUnitEnumType::A,
            charging_schedule_period: periods
                .into_iter()
                .map(|(start_period, limit)| ChargingSchedulePeriod {
                    start_period,
                    limit,
                    number_phases: None,
                    phase_to_use: None,
                })
                .collect(),
            min_charging_rate: None,
        }
    }

    fn profile(
        id: i32,
        purpose: ChargingProfilePurposeEnumType,
        kind: ChargingProfileKindEnumType,
        stack_level: i32,
        transaction_id: Option<&str>,
        charging_schedule: Vec<ChargingSchedule>,
    ) -> ChargingProfile {
        ChargingProfile {
            id,
            stack_level,
            charging_profile_purpose: purpose,
            charging_profile_kind: kind,
            recurrency_kind: None,
            valid_from: None,
            valid_to: None,
            transaction_id: transaction_id.map(String::from),
            charging_schedule,
        }
    }

    async fn open_transaction(fixture: &Fixture, evse_id: i32, transaction_id: &str) {
        let evse = fixture.evse_manager.evse(evse_id).unwrap();
        evse.lock()
            .await
            .open_transaction(
                transaction_id,
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

    #[tokio::test]
    async fn tx_profile_missing_transaction_id_is_invalid() {
        let fixture = fixture().await;
        let p = profile(
            1,
            ChargingProfilePurposeEnumType::TxProfile,
            ChargingProfileKindEnumType::Relative,
            1,
            None,
            vec![schedule(vec![(0, 16.0)], None)],
        );
        assert_eq!(
            fixture.handler.validate_tx_profile(&p, 1).await,
            ProfileValidationResult::TxProfileMissingTransactionId
        );
    }

    #[tokio::test]
    async fn tx_profile_requires_positive_evse_id() {
        let fixture = fixture().await;
        let p = profile(
            1,
            ChargingProfilePurposeEnumType::TxProfile,
            ChargingProfileKindEnumType::Relative,
            1,
            Some(DEFAULT_TX_ID),
            vec![schedule(vec![(0, 16.0)], None)],
        );
        assert_eq!(
            fixture.handler.validate_tx_profile(&p, 0).await,
            ProfileValidationResult::TxProfileEvseIdNotGreaterThanZero
        );
    }

    #[tokio::test]
    async fn tx_profile_without_active_transaction_is_invalid() {
        let fixture = fixture().await;
        let p = profile(
            1,
            ChargingProfilePurposeEnumType::TxProfile,
            ChargingProfileKindEnumType::Relative,
            1,
            Some(DEFAULT_TX_ID),
            vec![schedule(vec![(0, 16.0)], None)],
        );
        assert_eq!(
            fixture.handler.validate_tx_profile(&p, 1).await,
            ProfileValidationResult::TxProfileEvseHasNoActiveTransaction
        );
    }

    #[tokio::test]
    async fn tx_profile_for_other_transaction_is_invalid() {
        let fixture = fixture().await;
        open_transaction(&fixture, 1, "some other transaction").await;
        let p = profile(
            1,
            ChargingProfilePurposeEnumType::TxProfile,
            ChargingProfileKindEnumType::Relative,
            1,
            Some(DEFAULT_TX_ID),
            vec![schedule(vec![(0, 16.0)], None)],
        );
        assert_eq!(
            fixture.handler.validate_tx_profile(&p, 1).await,
            ProfileValidationResult::TxProfileTransactionNotOnEvse
        );
    }

    #[tokio::test]
    async fn tx_profile_conflicting_stack_level() {
        let fixture = fixture().await;
        open_transaction(&fixture, 1, DEFAULT_TX_ID).await;

        let existing = profile(
            2,
            ChargingProfilePurposeEnumType::TxProfile,
            ChargingProfileKindEnumType::Relative,
            42,
            Some(DEFAULT_TX_ID),
            vec![schedule(vec![(0, 16.0)], None)],
        );
        fixture
            .storage
            .profile_upsert(&InstalledProfile {
                evse_id: 1,
                profile: existing,
            })
            .await
            .unwrap();

        let incoming = profile(
            1,
            ChargingProfilePurposeEnumType::TxProfile,
            ChargingProfileKindEnumType::Relative,
            42,
            Some(DEFAULT_TX_ID),
            vec![schedule(vec![(0, 16.0)], None)],
        );
        assert_eq!(
            fixture.handler.validate_tx_profile(&incoming, 1).await,
            ProfileValidationResult::TxProfileConflictingStackLevel
        );

        // different stack level on the same transaction is fine
        let different_stack = profile(
            3,
            ChargingProfilePurposeEnumType::TxProfile,
            ChargingProfileKindEnumType::Relative,
            43,
            Some(DEFAULT_TX_ID),
            vec![schedule(vec![(0, 16.0)], None)],
        );
        assert_eq!(
            fixture.handler.validate_tx_profile(&different_stack, 1).await,
            ProfileValidationResult::Valid
        );
    }

    #[tokio::test]
    async fn station_max_rules() {
        let fixture = fixture().await;
        let max = |kind| {
            profile(
                1,
                ChargingProfilePurposeEnumType::ChargingStationMaxProfile,
                kind,
                0,
                None,
                vec![schedule(vec![(0, 32.0)], Some("2024-01-17T17:00:00Z"))],
            )
        };

        assert_eq!(
            fixture
                .handler
                .validate_charging_station_max_profile(&max(ChargingProfileKindEnumType::Absolute), 0),
            ProfileValidationResult::Valid
        );
        assert_eq!(
            fixture
                .handler
                .validate_charging_station_max_profile(&max(ChargingProfileKindEnumType::Absolute), 1),
            ProfileValidationResult::ChargingStationMaxProfileEvseIdGreaterThanZero
        );
        assert_eq!(
            fixture
                .handler
                .validate_charging_station_max_profile(&max(ChargingProfileKindEnumType::Relative), 0),
            ProfileValidationResult::ChargingStationMaxProfileCannotBeRelative
        );

        let not_max = profile(
            1,
            ChargingProfilePurposeEnumType::TxDefaultProfile,
            ChargingProfileKindEnumType::Absolute,
            0,
            None,
            vec![],
        );
        assert_eq!(
            fixture.handler.validate_charging_station_max_profile(&not_max, 0),
            ProfileValidationResult::InvalidProfileType
        );
    }

    #[tokio::test]
    async fn schedule_rules() {
        let fixture = fixture().await;

        // missing start schedule for Absolute
        let mut p = profile(
            1,
            ChargingProfilePurposeEnumType::TxDefaultProfile,
            ChargingProfileKindEnumType::Absolute,
            1,
            None,
            vec![schedule(vec![(0, 16.0)], None)],
        );
        assert_eq!(
            fixture.handler.validate_profile_schedules(&mut p, 1).await,
            ProfileValidationResult::ChargingProfileMissingRequiredStartSchedule
        );

        // extraneous start schedule for Relative
        let mut p = profile(
            1,
            ChargingProfilePurposeEnumType::TxDefaultProfile,
            ChargingProfileKindEnumType::Relative,
            1,
            None,
            vec![schedule(vec![(0, 16.0)], Some("2024-01-17T17:00:00Z"))],
        );
        assert_eq!(
            fixture.handler.validate_profile_schedules(&mut p, 1).await,
            ProfileValidationResult::ChargingProfileExtraneousStartSchedule
        );

        // no periods
        let mut p = profile(
            1,
            ChargingProfilePurposeEnumType::TxDefaultProfile,
            ChargingProfileKindEnumType::Absolute,
            1,
            None,
            vec![schedule(vec![], Some("2024-01-17T17:00:00Z"))],
        );
        assert_eq!(
            fixture.handler.validate_profile_schedules(&mut p, 1).await,
            ProfileValidationResult::ChargingProfileNoChargingSchedulePeriods
        );

        // first period not zero
        let mut p = profile(
            1,
            ChargingProfilePurposeEnumType::TxDefaultProfile,
            ChargingProfileKindEnumType::Absolute,
            1,
            None,
            vec![schedule(vec![(1, 16.0)], Some("2024-01-17T17:00:00Z"))],
        );
        assert_eq!(
            fixture.handler.validate_profile_schedules(&mut p, 1).await,
            ProfileValidationResult::ChargingProfileFirstStartScheduleIsNotZero
        );

        // periods out of order
        let mut p = profile(
            1,
            ChargingProfilePurposeEnumType::TxDefaultProfile,
            ChargingProfileKindEnumType::Absolute,
            1,
            None,
            vec![schedule(
                vec![(0, 16.0), (2, 14.0), (1, 12.0)],
                Some("2024-01-17T17:00:00Z"),
            )],
        );
        assert_eq!(
            fixture.handler.validate_profile_schedules(&mut p, 1).await,
            ProfileValidationResult::ChargingSchedulePeriodsOutOfOrder
        );
    }

    #[tokio::test]
    async fn unsupported_rate_unit_is_rejected() {
        let fixture = fixture().await;
        fixture
            .handler
            .device_model
            .set_value(
                &crate::domain::Component::named("SmartChargingCtrlr"),
                &crate::domain::Variable::named("ChargingScheduleChargingRateUnit"),
                crate::domain::AttributeKind::Actual,
                "W",
                crate::domain::ValueSource::Internal,
            )
            .await;

        let mut p = profile(
            1,
            ChargingProfilePurposeEnumType::TxDefaultProfile,
            ChargingProfileKindEnumType::Absolute,
            1,
            None,
            vec![schedule(vec![(0, 16.0)], Some("2024-01-17T17:00:00Z"))],
        );
        assert_eq!(
            fixture.handler.validate_profile_schedules(&mut p, 1).await,
            ProfileValidationResult::ChargingScheduleChargingRateUnitUnsupported
        );
    }

    #[tokio::test]
    async fn phase_rules() {
        // phaseToUse with numberPhases != 1
        let fixture = fixture().await;
        let mut p = profile(
            1,
            ChargingProfilePurposeEnumType::TxProfile,
            ChargingProfileKindEnumType::Absolute,
            1,
            Some(DEFAULT_TX_ID),
            vec![ChargingSchedule {
                charging_schedule_period: vec![ChargingSchedulePeriod {
                    start_period: 0,
                    limit: 16.0,
                    number_phases: Some(3),
                    phase_to_use: Some(1),
                }],
                ..schedule(vec![], Some("2024-01-17T17:00:00Z"))
            }],
        );
        assert_eq!(
            fixture.handler.validate_profile_schedules(&mut p, 1).await,
            ProfileValidationResult::ChargingSchedulePeriodInvalidPhaseToUse
        );

        // phaseToUse without AC phase switching support
        let fixture = fixture_with("false", &[(1, CurrentPhaseType::Ac)]).await;
        let mut p = profile(
            1,
            ChargingProfilePurposeEnumType::TxProfile,
            ChargingProfileKindEnumType::Absolute,
            1,
            Some(DEFAULT_TX_ID),
            vec![ChargingSchedule {
                charging_schedule_period: vec![ChargingSchedulePeriod {
                    start_period: 0,
                    limit: 16.0,
                    number_phases: Some(1),
                    phase_to_use: Some(1),
                }],
                ..schedule(vec![], Some("2024-01-17T17:00:00Z"))
            }],
        );
        assert_eq!(
            fixture.handler.validate_profile_schedules(&mut p, 1).await,
            ProfileValidationResult::ChargingSchedulePeriodPhaseToUseACPhaseSwitchingUnsupported
        );
    }

    #[tokio::test]
    async fn dc_evse_rejects_phase_fields() {
        let fixture = fixture_with("true", &[(1, CurrentPhaseType::Dc)]).await;
        let mut p = profile(
            1,
            ChargingProfilePurposeEnumType::TxProfile,
            ChargingProfileKindEnumType::Absolute,
            1,
            Some(DEFAULT_TX_ID),
            vec![ChargingSchedule {
                charging_schedule_period: vec![ChargingSchedulePeriod {
                    start_period: 0,
                    limit: 16.0,
                    number_phases: Some(1),
                    phase_to_use: None,
                }],
                ..schedule(vec![], Some("2024-01-17T17:00:00Z"))
            }],
        );
        assert_eq!(
            fixture.handler.validate_profile_schedules(&mut p, 1).await,
            ProfileValidationResult::ChargingSchedulePeriodExtraneousPhaseValues
        );
    }

    #[tokio::test]
    async fn ac_phases_default_to_three() {
        let fixture = fixture().await;
        let mut p = profile(
            1,
            ChargingProfilePurposeEnumType::TxProfile,
            ChargingProfileKindEnumType::Absolute,
            1,
            Some(DEFAULT_TX_ID),
            vec![schedule(vec![(0, 16.0)], Some("2024-01-17T17:00:00Z"))],
        );
        assert_eq!(
            fixture.handler.validate_profile_schedules(&mut p, 1).await,
            ProfileValidationResult::Valid
        );
        assert_eq!(
            p.charging_schedule[0].charging_schedule_period[0].number_phases,
            Some(3)
        );
    }

    #[tokio::test]
    async fn tx_default_duplicates_across_station_and_evse() {
        let fixture = fixture().await;
        // existing TxDefault on EVSE 1
        fixture
            .storage
            .profile_upsert(&InstalledProfile {
                evse_id: 1,
                profile: profile(
                    1,
                    ChargingProfilePurposeEnumType::TxDefaultProfile,
                    ChargingProfileKindEnumType::Absolute,
                    1,
                    None,
                    vec![schedule(vec![(0, 16.0)], Some("2024-01-01T17:00:00Z"))],
                ),
            })
            .await
            .unwrap();

        // new station-wide TxDefault, same stack level, different id
        let incoming = profile(
            2,
            ChargingProfilePurposeEnumType::TxDefaultProfile,
            ChargingProfileKindEnumType::Absolute,
            1,
            None,
            vec![schedule(vec![(0, 16.0)], Some("2024-01-01T17:00:00Z"))],
        );
        assert_eq!(
            fixture.handler.validate_tx_default_profile(&incoming, 0).await,
            ProfileValidationResult::DuplicateTxDefaultProfileFound
        );

        // same profile id replaces instead of conflicting
        let replacement = profile(
            1,
            ChargingProfilePurposeEnumType::TxDefaultProfile,
            ChargingProfileKindEnumType::Absolute,
            1,
            None,
            vec![schedule(vec![(0, 16.0)], Some("2024-01-01T17:00:00Z"))],
        );
        assert_eq!(
            fixture.handler.validate_tx_default_profile(&replacement, 0).await,
            ProfileValidationResult::Valid
        );

        // different stack level is fine
        let different_stack = profile(
            3,
            ChargingProfilePurposeEnumType::TxDefaultProfile,
            ChargingProfileKindEnumType::Absolute,
            2,
            None,
            vec![schedule(vec![(0, 16.0)], Some("2024-01-01T17:00:00Z"))],
        );
        assert_eq!(
            fixture
                .handler
                .validate_tx_default_profile(&different_stack, 0)
                .await,
            ProfileValidationResult::Valid
        );

        // same EVSE again is fine
        let same_evse = profile(
            4,
            ChargingProfilePurposeEnumType::TxDefaultProfile,
            ChargingProfileKindEnumType::Absolute,
            1,
            None,
            vec![schedule(vec![(0, 16.0)], Some("2024-01-01T17:00:00Z"))],
        );
        assert_eq!(
            fixture.handler.validate_tx_default_profile(&same_evse, 1).await,
            ProfileValidationResult::Valid
        );
    }

    #[tokio::test]
    async fn overlapping_validity_window_is_rejected() {
        let fixture = fixture().await;
        let mut existing = profile(
            1,
            ChargingProfilePurposeEnumType::TxDefaultProfile,
            ChargingProfileKindEnumType::Absolute,
            0,
            None,
            vec![schedule(vec![(0, 16.0)], Some("2024-01-01T00:00:00Z"))],
        );
        existing.valid_from = Some("2024-01-01T00:00:00Z".parse().unwrap());
        existing.valid_to = Some("2024-02-01T00:00:00Z".parse().unwrap());
        fixture
            .storage
            .profile_upsert(&InstalledProfile {
                evse_id: 1,
                profile: existing,
            })
            .await
            .unwrap();

        let mut incoming = profile(
            2,
            ChargingProfilePurposeEnumType::TxDefaultProfile,
            ChargingProfileKindEnumType::Absolute,
            0,
            None,
            vec![schedule(vec![(0, 16.0)], Some("2024-01-15T00:00:00Z"))],
        );
        incoming.valid_from = Some("2024-01-15T00:00:00Z".parse().unwrap());
        incoming.valid_to = Some("2024-02-15T00:00:00Z".parse().unwrap());

        let result = fixture
            .handler
            .conform_and_validate_profile(&mut incoming, 1)
            .await;
        assert_eq!(result, ProfileValidationResult::DuplicateProfileValidityPeriod);
    }

    #[tokio::test]
    async fn unknown_evse_is_rejected_first() {
        let fixture = fixture().await;
        let mut p = profile(
            1,
            ChargingProfilePurposeEnumType::TxProfile,
            ChargingProfileKindEnumType::Relative,
            1,
            Some(DEFAULT_TX_ID),
            vec![schedule(vec![(0, 16.0)], None)],
        );
        assert_eq!(
            fixture.handler.conform_and_validate_profile(&mut p, 9).await,
            ProfileValidationResult::EvseDoesNotExist
        );
    }

    #[tokio::test]
    async fn valid_tx_profile_is_admitted_and_stored() {
        let fixture = fixture().await;
        open_transaction(&fixture, 1, DEFAULT_TX_ID).await;
        let p = profile(
            7,
            ChargingProfilePurposeEnumType::TxProfile,
            ChargingProfileKindEnumType::Relative,
            1,
            Some(DEFAULT_TX_ID),
            vec![schedule(vec![(0, 16.0)], None)],
        );
        let result = fixture
            .handler
            .conform_validate_and_add_profile(p, 1)
            .await
            .unwrap();
        assert_eq!(result, ProfileValidationResult::Valid);
        assert_eq!(fixture.storage.profiles_all().await.unwrap().len(), 1);

        // ended transaction drops its TxProfiles
        fixture.handler.delete_transaction_tx_profiles(DEFAULT_TX_ID).await;
        assert!(fixture.storage.profiles_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_profiles_by_id_and_criteria() {
        let fixture = fixture().await;
        for (id, evse_id, stack_level) in [(1, 0, 0), (2, 1, 1), (3, 1, 2)] {
            fixture
                .storage
                .profile_upsert(&InstalledProfile {
                    evse_id,
                    profile: profile(
                        id,
                        ChargingProfilePurposeEnumType::TxDefaultProfile,
                        ChargingProfileKindEnumType::Absolute,
                        stack_level,
                        None,
                        vec![schedule(vec![(0, 16.0)], Some("2024-01-01T00:00:00Z"))],
                    ),
                })
                .await
                .unwrap();
        }

        let cleared = fixture
            .handler
            .clear_profiles(&ClearProfileCriteria {
                profile_id: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(cleared);
        assert_eq!(fixture.storage.profiles_all().await.unwrap().len(), 2);

        let cleared = fixture
            .handler
            .clear_profiles(&ClearProfileCriteria {
                evse_id: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(cleared);
        let remaining = fixture.storage.profiles_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].profile.id, 1);

        let cleared = fixture
            .handler
            .clear_profiles(&ClearProfileCriteria {
                profile_id: Some(99),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!cleared);
    }

    #[tokio::test]
    async fn validation_is_idempotent() {
        let fixture = fixture().await;
        open_transaction(&fixture, 1, DEFAULT_TX_ID).await;
        let mut p = profile(
            1,
            ChargingProfilePurposeEnumType::TxProfile,
            ChargingProfileKindEnumType::Relative,
            1,
            Some(DEFAULT_TX_ID),
            vec![schedule(vec![(0, 16.0)], None)],
        );
        let first = fixture.handler.conform_and_validate_profile(&mut p, 1).await;
        let second = fixture.handler.conform_and_validate_profile(&mut p, 1).await;
        assert_eq!(first, second);
    }
}

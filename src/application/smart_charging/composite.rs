//! Composite schedule calculation
//!
//! Folds the installed, stacked charging profiles over a time window
//! into one resolved schedule. Pure over its inputs: the same stored
//! profiles and window always produce the same output.
//!
//! Stacking: at each instant the selected profile per purpose is the one
//! with the highest stack level that defines a limit; TxProfile shadows
//! TxDefaultProfile; ChargingStationMaxProfile caps the result over the
//! whole window.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_ocpp::v2_0_1::enumerations::charging_profile_kind_enum_type::ChargingProfileKindEnumType;
use rust_ocpp::v2_0_1::enumerations::charging_profile_purpose_enum_type::ChargingProfilePurposeEnumType;
use rust_ocpp::v2_0_1::enumerations::charging_rate_unit_enum_type::ChargingRateUnitEnumType;
use rust_ocpp::v2_0_1::enumerations::recurrency_kind_enum_type::RecurrencyKindEnumType;
use serde::{Deserialize, Serialize};

use crate::domain::charging_profile::{ChargingProfile, ChargingSchedulePeriod, InstalledProfile};

/// Fallback limits when no profile constrains an instant.
const DEFAULT_LIMIT_AMPS: f64 = 48.0;
const DEFAULT_LIMIT_WATTS: f64 = 33120.0;
/// Nominal phase-to-neutral voltage used for A<->W conversion.
const LOW_VOLTAGE: f64 = 230.0;
const DEFAULT_NUMBER_PHASES: i32 = 3;

/// The resolved schedule over a requested window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeSchedule {
    pub evse_id: i32,
    pub duration: i32,
    pub schedule_start: DateTime<Utc>,
    pub charging_rate_unit: ChargingRateUnitEnumType,
    pub charging_schedule_period: Vec<ChargingSchedulePeriod>,
}

/// A limit contributed by one profile at one instant.
#[derive(Debug, Clone)]
struct ActiveLimit {
    limit: f64,
    unit: ChargingRateUnitEnumType,
    number_phases: i32,
}

impl ActiveLimit {
    fn in_unit(&self, unit: &ChargingRateUnitEnumType) -> f64 {
        convert_rate(self.limit, &self.unit, unit, self.number_phases)
    }
}

/// Convert between charging-rate units using the nominal low voltage.
fn convert_rate(
    value: f64,
    from: &ChargingRateUnitEnumType,
    to: &ChargingRateUnitEnumType,
    number_phases: i32,
) -> f64 {
    match (from, to) {
        (ChargingRateUnitEnumType::A, ChargingRateUnitEnumType::W) => {
            value * LOW_VOLTAGE * number_phases as f64
        }
        (ChargingRateUnitEnumType::W, ChargingRateUnitEnumType::A) => {
            value / (LOW_VOLTAGE * number_phases as f64)
        }
        _ => value,
    }
}

/// Schedule base instant for a profile at evaluation time `at`.
/// `Absolute` uses the start schedule; `Recurring` shifts it to the
/// current recurrence; `Relative` anchors to the window start.
fn schedule_base(
    profile: &ChargingProfile,
    start_schedule: Option<DateTime<Utc>>,
    window_start: DateTime<Utc>,
    at: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match profile.charging_profile_kind {
        ChargingProfileKindEnumType::Absolute => start_schedule,
        ChargingProfileKindEnumType::Relative => Some(window_start),
        ChargingProfileKindEnumType::Recurring => {
            let base = start_schedule?;
            let period = match profile.recurrency_kind {
                Some(RecurrencyKindEnumType::Weekly) => ChronoDuration::weeks(1),
                _ => ChronoDuration::days(1),
            };
            if at < base {
                return Some(base);
            }
            let elapsed = at - base;
            let repetitions = elapsed.num_seconds() / period.num_seconds();
            Some(base + period * repetitions as i32)
        }
    }
}

/// The limit a single profile defines at `at`, if any.
fn profile_limit_at(
    installed: &InstalledProfile,
    window_start: DateTime<Utc>,
    at: DateTime<Utc>,
) -> Option<ActiveLimit> {
    let profile = &installed.profile;
    if !profile.valid_at(at) {
        return None;
    }

    for schedule in &profile.charging_schedule {
        let base = match schedule_base(profile, schedule.start_schedule, window_start, at) {
            Some(base) => base,
            None => continue,
        };
        if at < base {
            continue;
        }
        let offset = (at - base).num_seconds();
        if let Some(duration) = schedule.duration {
            if offset >= duration as i64 {
                continue;
            }
        }
        let period = schedule
            .charging_schedule_period
            .iter()
            .take_while(|p| p.start_period as i64 <= offset)
            .last()?;
        return Some(ActiveLimit {
            limit: period.limit,
            unit: schedule.charging_rate_unit.clone(),
            number_phases: period.number_phases.unwrap_or(DEFAULT_NUMBER_PHASES),
        });
    }
    None
}

/// The limit of a purpose group at `at`: highest stack level first,
/// falling through to lower stacks that define a limit.
fn purpose_limit_at(
    profiles: &[&InstalledProfile],
    window_start: DateTime<Utc>,
    at: DateTime<Utc>,
) -> Option<ActiveLimit> {
    let mut ranked: Vec<&&InstalledProfile> = profiles.iter().collect();
    ranked.sort_by_key(|p| std::cmp::Reverse(p.profile.stack_level));
    ranked
        .iter()
        .find_map(|p| profile_limit_at(p, window_start, at))
}

/// Instants inside `[start, end)` where any profile may change the
/// resolved limit.
fn transition_instants(
    profiles: &[&InstalledProfile],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let mut instants = vec![start];
    let mut push = |at: DateTime<Utc>| {
        if at > start && at < end {
            instants.push(at);
        }
    };

    for installed in profiles {
        let profile = &installed.profile;
        if let Some(from) = profile.valid_from {
            push(from);
        }
        if let Some(to) = profile.valid_to {
            push(to);
        }
        for schedule in &profile.charging_schedule {
            // recurring schedules repeat: expand bases covering the window
            let mut bases = Vec::new();
            match profile.charging_profile_kind {
                ChargingProfileKindEnumType::Recurring => {
                    let mut at = start;
                    while at < end {
                        if let Some(base) =
                            schedule_base(profile, schedule.start_schedule, start, at)
                        {
                            if !bases.contains(&base) {
                                bases.push(base);
                            }
                            let period = match profile.recurrency_kind {
                                Some(RecurrencyKindEnumType::Weekly) => ChronoDuration::weeks(1),
                                _ => ChronoDuration::days(1),
                            };
                            at = base + period;
                        } else {
                            break;
                        }
                    }
                }
                _ => {
                    if let Some(base) =
                        schedule_base(profile, schedule.start_schedule, start, start)
                    {
                        bases.push(base);
                    }
                }
            }

            for base in bases {
                for period in &schedule.charging_schedule_period {
                    push(base + ChronoDuration::seconds(period.start_period as i64));
                }
                if let Some(duration) = schedule.duration {
                    push(base + ChronoDuration::seconds(duration as i64));
                }
            }
        }
    }

    instants.sort();
    instants.dedup();
    instants
}

/// Fold the installed profiles over `[start, start + duration)`.
pub fn calculate_composite_schedule(
    installed: &[InstalledProfile],
    evse_id: i32,
    start: DateTime<Utc>,
    duration_s: i32,
    unit: ChargingRateUnitEnumType,
) -> CompositeSchedule {
    let end = start + ChronoDuration::seconds(duration_s as i64);

    let station_max: Vec<&InstalledProfile> = installed
        .iter()
        .filter(|p| {
            p.profile.charging_profile_purpose
                == ChargingProfilePurposeEnumType::ChargingStationMaxProfile
        })
        .collect();
    let tx_default: Vec<&InstalledProfile> = installed
        .iter()
        .filter(|p| {
            p.profile.charging_profile_purpose == ChargingProfilePurposeEnumType::TxDefaultProfile
                && (p.evse_id == 0 || p.evse_id == evse_id)
        })
        .collect();
    let tx: Vec<&InstalledProfile> = installed
        .iter()
        .filter(|p| {
            p.profile.charging_profile_purpose == ChargingProfilePurposeEnumType::TxProfile
                && p.evse_id == evse_id
        })
        .collect();

    let mut relevant: Vec<&InstalledProfile> = Vec::new();
    relevant.extend(&station_max);
    relevant.extend(&tx_default);
    relevant.extend(&tx);

    let default_limit = match unit {
        ChargingRateUnitEnumType::A => DEFAULT_LIMIT_AMPS,
        ChargingRateUnitEnumType::W => DEFAULT_LIMIT_WATTS,
    };

    let mut periods: Vec<ChargingSchedulePeriod> = Vec::new();
    for at in transition_instants(&relevant, start, end) {
        // TxProfile shadows TxDefaultProfile at every instant it covers.
        let tx_limit = purpose_limit_at(&tx, start, at)
            .or_else(|| purpose_limit_at(&tx_default, start, at));
        let cap = purpose_limit_at(&station_max, start, at);

        let (mut limit, number_phases) = match tx_limit {
            Some(active) => (active.in_unit(&unit), active.number_phases),
            None => (default_limit, DEFAULT_NUMBER_PHASES),
        };
        if let Some(cap) = cap {
            limit = limit.min(cap.in_unit(&unit));
        }

        let period = ChargingSchedulePeriod {
            start_period: (at - start).num_seconds() as i32,
            limit,
            number_phases: Some(number_phases),
            phase_to_use: None,
        };

        // consecutive identical periods coalesce
        match periods.last() {
            Some(last)
                if last.limit == period.limit && last.number_phases == period.number_phases => {}
            _ => periods.push(period),
        }
    }

    CompositeSchedule {
        evse_id,
        duration: duration_s,
        schedule_start: start,
        charging_rate_unit: unit,
        charging_schedule_period: periods,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn install(
        evse_id: i32,
        id: i32,
        purpose: ChargingProfilePurposeEnumType,
        kind: ChargingProfileKindEnumType,
        stack_level: i32,
        start_schedule: Option<DateTime<Utc>>,
        periods: Vec<(i32, f64)>,
    ) -> InstalledProfile {
        InstalledProfile {
            evse_id,
            profile: ChargingProfile {
                id,
                stack_level,
                charging_profile_purpose: purpose,
                charging_profile_kind: kind,
                recurrency_kind: None,
                valid_from: None,
                valid_to: None,
                transaction_id: None,
                charging_schedule: vec![crate::domain::ChargingSchedule {
                    id: 1,
                    start_schedule,
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
                }],
            },
        }
    }

    #[test]
    fn stacked_profiles_fold_with_station_cap() {
        let start = ts("2024-05-01T00:00:00Z");
        let profiles = vec![
            install(
                0,
                1,
                ChargingProfilePurposeEnumType::ChargingStationMaxProfile,
                ChargingProfileKindEnumType::Absolute,
                0,
                Some(start),
                vec![(0, 32.0)],
            ),
            install(
                0,
                2,
                ChargingProfilePurposeEnumType::TxDefaultProfile,
                ChargingProfileKindEnumType::Absolute,
                0,
                Some(start),
                vec![(0, 20.0)],
            ),
            install(
                1,
                3,
                ChargingProfilePurposeEnumType::TxProfile,
                ChargingProfileKindEnumType::Absolute,
                1,
                Some(start + ChronoDuration::seconds(300)),
                vec![(0, 16.0)],
            ),
        ];

        let schedule =
            calculate_composite_schedule(&profiles, 1, start, 600, ChargingRateUnitEnumType::A);

        assert_eq!(schedule.evse_id, 1);
        assert_eq!(schedule.duration, 600);
        let periods: Vec<(i32, f64)> = schedule
            .charging_schedule_period
            .iter()
            .map(|p| (p.start_period, p.limit))
            .collect();
        assert_eq!(periods, vec![(0, 20.0), (300, 16.0)]);
    }

    #[test]
    fn station_max_caps_the_default_limit() {
        let start = ts("2024-05-01T00:00:00Z");
        let profiles = vec![install(
            0,
            1,
            ChargingProfilePurposeEnumType::ChargingStationMaxProfile,
            ChargingProfileKindEnumType::Absolute,
            0,
            Some(start),
            vec![(0, 30.0)],
        )];

        let schedule =
            calculate_composite_schedule(&profiles, 1, start, 300, ChargingRateUnitEnumType::A);
        assert_eq!(schedule.charging_schedule_period.len(), 1);
        assert_eq!(schedule.charging_schedule_period[0].limit, 30.0);
    }

    #[test]
    fn tx_shadows_tx_default_and_higher_stack_wins() {
        let start = ts("2024-05-01T00:00:00Z");
        let profiles = vec![
            install(
                1,
                1,
                ChargingProfilePurposeEnumType::TxDefaultProfile,
                ChargingProfileKindEnumType::Absolute,
                0,
                Some(start),
                vec![(0, 20.0)],
            ),
            install(
                1,
                2,
                ChargingProfilePurposeEnumType::TxProfile,
                ChargingProfileKindEnumType::Absolute,
                0,
                Some(start),
                vec![(0, 10.0)],
            ),
            install(
                1,
                3,
                ChargingProfilePurposeEnumType::TxProfile,
                ChargingProfileKindEnumType::Absolute,
                5,
                Some(start),
                vec![(0, 8.0)],
            ),
        ];

        let schedule =
            calculate_composite_schedule(&profiles, 1, start, 60, ChargingRateUnitEnumType::A);
        assert_eq!(schedule.charging_schedule_period[0].limit, 8.0);
    }

    #[test]
    fn unit_conversion_applies_phase_count() {
        let start = ts("2024-05-01T00:00:00Z");
        let profiles = vec![install(
            1,
            1,
            ChargingProfilePurposeEnumType::TxDefaultProfile,
            ChargingProfileKindEnumType::Absolute,
            0,
            Some(start),
            vec![(0, 16.0)],
        )];

        let schedule =
            calculate_composite_schedule(&profiles, 1, start, 60, ChargingRateUnitEnumType::W);
        // 16 A * 230 V * 3 phases
        assert_eq!(schedule.charging_schedule_period[0].limit, 11040.0);
    }

    #[test]
    fn periods_within_a_schedule_produce_transitions() {
        let start = ts("2024-05-01T00:00:00Z");
        let profiles = vec![install(
            1,
            1,
            ChargingProfilePurposeEnumType::TxDefaultProfile,
            ChargingProfileKindEnumType::Absolute,
            0,
            Some(start),
            vec![(0, 20.0), (120, 10.0)],
        )];

        let schedule =
            calculate_composite_schedule(&profiles, 1, start, 300, ChargingRateUnitEnumType::A);
        let periods: Vec<(i32, f64)> = schedule
            .charging_schedule_period
            .iter()
            .map(|p| (p.start_period, p.limit))
            .collect();
        assert_eq!(periods, vec![(0, 20.0), (120, 10.0)]);
    }

    #[test]
    fn expired_validity_falls_back_to_default() {
        let start = ts("2024-05-01T00:00:00Z");
        let mut installed = install(
            1,
            1,
            ChargingProfilePurposeEnumType::TxDefaultProfile,
            ChargingProfileKindEnumType::Absolute,
            0,
            Some(start),
            vec![(0, 20.0)],
        );
        installed.profile.valid_to = Some(start + ChronoDuration::seconds(100));

        let schedule = calculate_composite_schedule(
            &[installed],
            1,
            start,
            300,
            ChargingRateUnitEnumType::A,
        );
        let periods: Vec<(i32, f64)> = schedule
            .charging_schedule_period
            .iter()
            .map(|p| (p.start_period, p.limit))
            .collect();
        assert_eq!(periods, vec![(0, 20.0), (100, DEFAULT_LIMIT_AMPS)]);
    }

    #[test]
    fn recurring_profile_expands_over_the_window() {
        let start = ts("2024-05-02T00:00:00Z");
        let mut installed = install(
            1,
            1,
            ChargingProfilePurposeEnumType::TxDefaultProfile,
            ChargingProfileKindEnumType::Recurring,
            0,
            // started the previous day; daily recurrence
            Some(ts("2024-05-01T00:00:00Z")),
            vec![(0, 20.0), (3600, 10.0)],
        );
        installed.profile.recurrency_kind = Some(RecurrencyKindEnumType::Daily);

        let schedule = calculate_composite_schedule(
            &[installed],
            1,
            start,
            7200,
            ChargingRateUnitEnumType::A,
        );
        let periods: Vec<(i32, f64)> = schedule
            .charging_schedule_period
            .iter()
            .map(|p| (p.start_period, p.limit))
            .collect();
        // recurrence re-bases at the window's day boundary
        assert_eq!(periods, vec![(0, 20.0), (3600, 10.0)]);
    }

    #[test]
    fn output_is_deterministic() {
        let start = ts("2024-05-01T00:00:00Z");
        let profiles = vec![
            install(
                0,
                1,
                ChargingProfilePurposeEnumType::ChargingStationMaxProfile,
                ChargingProfileKindEnumType::Absolute,
                0,
                Some(start),
                vec![(0, 32.0)],
            ),
            install(
                1,
                2,
                ChargingProfilePurposeEnumType::TxProfile,
                ChargingProfileKindEnumType::Absolute,
                1,
                Some(start),
                vec![(0, 16.0), (60, 8.0)],
            ),
        ];
        let a = calculate_composite_schedule(&profiles, 1, start, 600, ChargingRateUnitEnumType::A);
        let b = calculate_composite_schedule(&profiles, 1, start, 600, ChargingRateUnitEnumType::A);
        assert_eq!(a, b);
    }
}

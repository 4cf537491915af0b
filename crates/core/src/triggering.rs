//! Pure triggering predicates.
//!
//! Each triggering condition is a policy over candidate inputs. The
//! evaluator worker loads candidates and contextual rows from the store,
//! then calls into this module; nothing here touches the database, so every
//! predicate is unit-testable with plain structs.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::types::{MeasurementDay, Timestamp};

/// The subset of a raw-input row a predicate needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSnapshot {
    /// Upstream catalog id.
    pub input_id: String,
    /// Storage path of the artifact; the file stem carries acquisition
    /// timestamps for radar slices.
    pub input_path: String,
    /// Tile or zone the artifact covers.
    pub tile: String,
    /// Measurement day, `YYYYMMDD`.
    pub measurement_day: MeasurementDay,
    /// When the upstream catalog published the artifact.
    pub publishing_date: Timestamp,
    /// When the harvester wrote the row.
    pub harvest_date: Timestamp,
    /// Relative orbit number, when the mission has one.
    pub relative_orbit: Option<i32>,
    /// True for a slice that covers its tile only together with its
    /// chain neighbours.
    pub is_partial: bool,
}

/// Outcome of evaluating one candidate against one condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// All clauses hold: record a validation.
    Validate,
    /// A clause depends on data that may still arrive; re-evaluate later.
    Defer,
    /// A clause can never hold for this candidate; drop it.
    Reject,
}

/// Freshness clause shared by the time-bounded conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessWindow {
    /// Maximum age of the candidate relative to its publishing date, days.
    pub max_day_since_publication: i64,
    /// Maximum age of the candidate relative to its measurement day, days.
    pub max_day_since_measurement: i64,
}

/// Near-real-time gate.
///
/// An input is in scope when it was harvested shortly after publication, or
/// when its measurement day falls inside the configured backfill range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NrtRule {
    /// Maximum harvest lag after publication for the NRT path, hours.
    pub max_harvest_lag_hours: i64,
    /// Inclusive start of the backfill range, `YYYYMMDD`.
    #[serde(default)]
    pub backfill_start_day: Option<MeasurementDay>,
}

impl NrtRule {
    /// Whether the input was harvested promptly enough for the NRT path.
    pub fn is_prompt(&self, input: &InputSnapshot) -> bool {
        input.harvest_date - input.publishing_date <= Duration::hours(self.max_harvest_lag_hours)
    }

    /// Whether the input is eligible under the NRT or backfill path.
    pub fn is_in_scope(&self, input: &InputSnapshot) -> bool {
        if self.is_prompt(input) {
            return true;
        }
        match self.backfill_start_day {
            Some(start) => input.measurement_day >= start,
            None => false,
        }
    }

    /// The `is_nrt` flag stamped on a validation of this input.
    ///
    /// A configured backfill start day decides the flag by measurement day
    /// alone: the harvester is replaying the past, so harvest lag says
    /// nothing. Without one, a prompt harvest is NRT.
    pub fn nrt_flag(&self, input: &InputSnapshot) -> bool {
        match self.backfill_start_day {
            Some(start) => input.measurement_day >= start,
            None => self.is_prompt(input),
        }
    }
}

/// A policy: the shape of one triggering condition's predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TriggerPolicy {
    /// Validate a fresh input over a configured tile.
    Freshness {
        /// Tiles the routine covers; empty means all tiles.
        tiles: Vec<String>,
        window: FreshnessWindow,
        /// Relative orbits accepted per tile. A tile listed here rejects
        /// inputs on any other orbit; an absent tile accepts all orbits.
        #[serde(default)]
        tile_orbits: HashMap<String, Vec<i32>>,
    },
    /// Validate an input once a companion product covering the same tile and
    /// measurement day exists.
    CoOccurrence {
        /// Raster type of the companion product family.
        companion_raster_type: String,
        /// Relative orbits accepted for the candidate.
        candidate_orbits: Vec<i32>,
        /// Relative orbits accepted for the companion.
        companion_orbits: Vec<i32>,
        /// How long a candidate may wait for its companion, hours.
        max_wait_hours: i64,
    },
    /// Validate radar slices that form a contiguous acquisition chain over
    /// one tile, measurement day, and orbit.
    ChainContinuity {
        /// Maximum gap between the stop of one slice and the start of the
        /// next for them to count as adjacent, seconds.
        max_gap_seconds: i64,
        /// How long a slice with no neighbours may wait before it validates
        /// alone, seconds.
        orphan_grace_seconds: i64,
    },
}

/// How a task's `preceding_input_id` is derived at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PredecessorRule {
    /// The most recent input of a raster type on the same tile, looking
    /// back a bounded number of days.
    PriorOfType {
        raster_type: String,
        lookback_days: i32,
    },
    /// The chain-adjacent slice acquired immediately before the candidate.
    PrecedingSlice {
        /// Same adjacency tolerance as the chain predicate, seconds.
        max_gap_seconds: i64,
    },
}

/// A fully-resolved triggering condition, as loaded from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// Condition name, e.g. `CC_TC`.
    pub name: String,
    pub policy: TriggerPolicy,
    pub nrt: NrtRule,
    /// Offset applied to the candidate's measurement day when the routine
    /// produces a product dated differently from its input (in days).
    pub artificial_day_offset: Option<i64>,
    /// Dependency rule for the tasks this condition spawns, if any.
    pub predecessor: Option<PredecessorRule>,
}

impl ConditionConfig {
    /// Validate the configuration itself. Called once at load time so a
    /// malformed condition surfaces as a configuration error instead of a
    /// silent no-op predicate.
    pub fn check(&self) -> Result<(), DomainError> {
        let reason = match &self.policy {
            TriggerPolicy::Freshness { window, .. } => {
                if window.max_day_since_publication <= 0 || window.max_day_since_measurement <= 0 {
                    Some("freshness window bounds must be positive".to_string())
                } else {
                    None
                }
            }
            TriggerPolicy::CoOccurrence {
                candidate_orbits,
                companion_orbits,
                ..
            } => {
                if candidate_orbits.is_empty() || companion_orbits.is_empty() {
                    Some("co-occurrence orbit lists must be non-empty".to_string())
                } else {
                    None
                }
            }
            TriggerPolicy::ChainContinuity {
                max_gap_seconds,
                orphan_grace_seconds,
            } => {
                if *max_gap_seconds <= 0 || *orphan_grace_seconds <= 0 {
                    Some("chain continuity durations must be positive".to_string())
                } else {
                    None
                }
            }
        };
        match reason {
            Some(reason) => Err(DomainError::Configuration {
                condition: self.name.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// Convert a `YYYYMMDD` integer to a calendar date.
pub fn measurement_day_to_date(day: MeasurementDay) -> Result<NaiveDate, DomainError> {
    let year = day / 10_000;
    let month = (day / 100 % 100) as u32;
    let dom = (day % 100) as u32;
    NaiveDate::from_ymd_opt(year, month, dom).ok_or(DomainError::InvalidMeasurementDay(day))
}

/// Apply an artificial day offset to a measurement day.
///
/// Used by routines whose output product is dated relative to the input,
/// e.g. a gap-filled composite dated one day after its last observation.
pub fn shift_measurement_day(
    day: MeasurementDay,
    offset_days: i64,
) -> Result<MeasurementDay, DomainError> {
    let date = measurement_day_to_date(day)? + Duration::days(offset_days);
    let shifted = chrono::Datelike::year(&date) * 10_000
        + chrono::Datelike::month(&date) as i32 * 100
        + chrono::Datelike::day(&date) as i32;
    Ok(shifted)
}

/// Evaluate a freshness predicate for one candidate.
pub fn evaluate_freshness(
    tiles: &[String],
    window: &FreshnessWindow,
    tile_orbits: &HashMap<String, Vec<i32>>,
    input: &InputSnapshot,
    now: Timestamp,
) -> TriggerDecision {
    if !tiles.is_empty() && !tiles.iter().any(|t| t == &input.tile) {
        return TriggerDecision::Reject;
    }
    if let Some(valid_orbits) = tile_orbits.get(&input.tile) {
        match input.relative_orbit {
            Some(orbit) if valid_orbits.contains(&orbit) => {}
            _ => return TriggerDecision::Reject,
        }
    }
    if now - input.publishing_date > Duration::days(window.max_day_since_publication) {
        return TriggerDecision::Reject;
    }
    let measured = match measurement_day_to_date(input.measurement_day) {
        Ok(date) => date,
        Err(_) => return TriggerDecision::Reject,
    };
    let measured_at = Utc.from_utc_datetime(&measured.and_hms_opt(0, 0, 0).unwrap_or_default());
    if now - measured_at > Duration::days(window.max_day_since_measurement) {
        return TriggerDecision::Reject;
    }
    TriggerDecision::Validate
}

/// Evaluate a co-occurrence predicate.
///
/// `companions` are inputs of the partner product family sharing the
/// candidate's tile and measurement day, already filtered by the caller.
pub fn evaluate_co_occurrence(
    candidate_orbits: &[i32],
    companion_orbits: &[i32],
    max_wait_hours: i64,
    input: &InputSnapshot,
    companions: &[InputSnapshot],
    now: Timestamp,
) -> TriggerDecision {
    match input.relative_orbit {
        Some(orbit) if candidate_orbits.contains(&orbit) => {}
        _ => return TriggerDecision::Reject,
    }
    let matched = companions.iter().any(|c| {
        c.tile == input.tile
            && c.measurement_day == input.measurement_day
            && matches!(c.relative_orbit, Some(o) if companion_orbits.contains(&o))
    });
    if matched {
        TriggerDecision::Validate
    } else if now - input.harvest_date > Duration::hours(max_wait_hours) {
        TriggerDecision::Reject
    } else {
        TriggerDecision::Defer
    }
}

/// Acquisition window of a radar slice, recovered from its path stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceWindow {
    pub start: Timestamp,
    pub stop: Timestamp,
}

/// Parse the acquisition start/stop timestamps out of a slice's input path.
///
/// Slice file stems follow the mission naming scheme, underscore-separated,
/// with the start and stop timestamps in the fifth and sixth fields as
/// `YYYYMMDDThhmmss`.
pub fn parse_slice_window(input_path: &str) -> Option<SliceWindow> {
    let stem = input_path
        .rsplit('/')
        .next()?
        .split('.')
        .next()?;
    let mut fields = stem.split('_');
    let start = fields.nth(4)?;
    let stop = fields.next()?;
    let parse = |s: &str| {
        NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
            .ok()
            .map(|dt| Utc.from_utc_datetime(&dt))
    };
    let start = parse(start)?;
    let stop = parse(stop)?;
    if stop <= start {
        return None;
    }
    Some(SliceWindow { start, stop })
}

/// The chain-adjacent slice acquired immediately before `input`, if any.
///
/// Used at task-creation time: the preceding slice's task must finish
/// before the candidate's routine runs, because the routine stitches its
/// output onto the predecessor's.
pub fn preceding_slice(
    input: &InputSnapshot,
    group: &[InputSnapshot],
    max_gap_seconds: i64,
) -> Option<String> {
    let window = parse_slice_window(&input.input_path)?;
    let max_gap = Duration::seconds(max_gap_seconds);
    group
        .iter()
        .filter(|other| other.input_id != input.input_id)
        .filter_map(|other| {
            let other_window = parse_slice_window(&other.input_path)?;
            let gap = window.start - other_window.stop;
            if gap >= Duration::zero() && gap <= max_gap {
                Some((gap, other.input_id.clone()))
            } else {
                None
            }
        })
        .min_by_key(|(gap, _)| *gap)
        .map(|(_, input_id)| input_id)
}

/// The contiguous run of slices containing `input`, ordered by start time.
///
/// Walks the group outward from the candidate in both directions, following
/// stop-to-start gaps within tolerance. The candidate is always part of the
/// run; an unparseable neighbour ends the run on that side.
pub fn chain_run(
    input: &InputSnapshot,
    group: &[InputSnapshot],
    max_gap_seconds: i64,
) -> Vec<String> {
    let Some(window) = parse_slice_window(&input.input_path) else {
        return vec![input.input_id.clone()];
    };
    let max_gap = Duration::seconds(max_gap_seconds);

    let mut slices: Vec<(SliceWindow, &str)> = group
        .iter()
        .filter(|other| other.input_id != input.input_id)
        .filter_map(|other| {
            parse_slice_window(&other.input_path).map(|w| (w, other.input_id.as_str()))
        })
        .collect();
    slices.push((window, input.input_id.as_str()));
    slices.sort_by_key(|(w, _)| w.start);

    let position = slices
        .iter()
        .position(|(_, id)| *id == input.input_id)
        .unwrap_or(0);
    let mut first = position;
    while first > 0 && slices[first].0.start - slices[first - 1].0.stop <= max_gap {
        first -= 1;
    }
    let mut last = position;
    while last + 1 < slices.len() && slices[last + 1].0.start - slices[last].0.stop <= max_gap {
        last += 1;
    }

    slices[first..=last]
        .iter()
        .map(|(_, id)| (*id).to_string())
        .collect()
}

/// Evaluate chain continuity for one slice against its group.
///
/// `group` is every slice sharing the candidate's tile, measurement day and
/// relative orbit (the candidate itself may be among them). A full-footprint
/// slice validates on its own. A partial slice validates once an adjacent
/// neighbour is present, so the whole run can be claimed by one validation;
/// with no neighbour it validates alone only after the orphan grace has
/// elapsed, since the missing slice may never be published.
pub fn evaluate_chain_continuity(
    max_gap_seconds: i64,
    orphan_grace_seconds: i64,
    input: &InputSnapshot,
    group: &[InputSnapshot],
    now: Timestamp,
) -> TriggerDecision {
    if !input.is_partial {
        return TriggerDecision::Validate;
    }
    if parse_slice_window(&input.input_path).is_none() {
        return TriggerDecision::Reject;
    }
    if chain_run(input, group, max_gap_seconds).len() > 1 {
        TriggerDecision::Validate
    } else if now - input.harvest_date >= Duration::seconds(orphan_grace_seconds) {
        TriggerDecision::Validate
    } else {
        TriggerDecision::Defer
    }
}

/// Evaluate one candidate against a condition.
///
/// The NRT gate runs first for every policy; out-of-scope inputs are
/// rejected without touching the policy clauses. `context` carries the
/// policy-specific sibling rows (companions or chain group).
pub fn evaluate(
    config: &ConditionConfig,
    input: &InputSnapshot,
    context: &[InputSnapshot],
    now: Timestamp,
) -> TriggerDecision {
    if !config.nrt.is_in_scope(input) {
        return TriggerDecision::Reject;
    }
    match &config.policy {
        TriggerPolicy::Freshness {
            tiles,
            window,
            tile_orbits,
        } => evaluate_freshness(tiles, window, tile_orbits, input, now),
        TriggerPolicy::CoOccurrence {
            candidate_orbits,
            companion_orbits,
            max_wait_hours,
            ..
        } => evaluate_co_occurrence(
            candidate_orbits,
            companion_orbits,
            *max_wait_hours,
            input,
            context,
            now,
        ),
        TriggerPolicy::ChainContinuity {
            max_gap_seconds,
            orphan_grace_seconds,
        } => evaluate_chain_continuity(
            *max_gap_seconds,
            *orphan_grace_seconds,
            input,
            context,
            now,
        ),
    }
}

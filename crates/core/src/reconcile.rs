//! Freshness reconciliation of the two station feeds.
//!
//! Produces exactly one [`ReconciledStation`] per station id. Readings are
//! chosen attribute by attribute: the water level comes from whichever feed
//! measured it last, the flow likewise, independently of each other.
//! Identical timestamps resolve to source A (`hydro`) so output never depends
//! on input timing.
//!
//! Output order is source A's order followed by B-only stations in B's
//! order. Nothing here reads the clock; `now` is a parameter.

use crate::Error;
use crate::model::{
    AlarmStatus, CoordinateSource, Coordinates, DataFreshness, PinnedCoordinates, RawStationReading,
    ReconciledStation, SourceTag, round1,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Default age after which a reading is reported as stale.
pub const DEFAULT_FRESHNESS_THRESHOLD_HOURS: f64 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreshnessPolicy {
    pub threshold_hours: f64,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self { threshold_hours: DEFAULT_FRESHNESS_THRESHOLD_HOURS }
    }
}

impl FreshnessPolicy {
    /// Age in hours (one decimal, never negative) and the resulting class.
    /// The class is decided on the exact age, not the rounded one.
    pub fn assess(&self, measured_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> (Option<f64>, DataFreshness) {
        match measured_at {
            None => (None, DataFreshness::Stale),
            Some(at) => {
                let seconds = now.signed_duration_since(at).num_seconds().max(0);
                let hours = seconds as f64 / 3600.0;
                let freshness =
                    if hours <= self.threshold_hours { DataFreshness::Fresh } else { DataFreshness::Stale };
                (Some(round1(hours)), freshness)
            }
        }
    }

    /// Recompute `hoursOld`/`dataFreshness` of an already reconciled station.
    pub fn refresh_age(&self, station: &mut ReconciledStation, now: DateTime<Utc>) {
        let (hours, freshness) = self.assess(station.water_level_date.or(station.flow_date), now);
        station.hours_old = hours;
        station.data_freshness = freshness;
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    policy: FreshnessPolicy,
}

impl Reconciler {
    pub fn new(policy: FreshnessPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FreshnessPolicy {
        self.policy
    }

    /// Merge the two feeds.
    ///
    /// `None` means that feed failed; the other is used alone. Both `None`
    /// is a [`Error::TotalFetchFailure`]. An empty list is valid data.
    pub fn reconcile(
        &self, primary: Option<&[RawStationReading]>, secondary: Option<&[RawStationReading]>,
        pinned: &HashMap<String, PinnedCoordinates>, now: DateTime<Utc>,
    ) -> Result<Vec<ReconciledStation>, Error> {
        if primary.is_none() && secondary.is_none() {
            return Err(Error::TotalFetchFailure("no station data from either source".into()));
        }

        let primary = collapse_duplicates(primary.unwrap_or_default());
        let secondary = collapse_duplicates(secondary.unwrap_or_default());

        let secondary_by_id: HashMap<&str, &RawStationReading> =
            secondary.iter().map(|r| (r.id.as_str(), *r)).collect();
        let primary_ids: HashSet<&str> = primary.iter().map(|r| r.id.as_str()).collect();

        let mut stations = Vec::with_capacity(primary.len() + secondary.len());

        for a in &primary {
            let b = secondary_by_id.get(a.id.as_str()).copied();
            stations.push(self.merge(a, Some(a), b, pinned.get(&a.id), now));
        }

        for b in secondary.iter().filter(|b| !primary_ids.contains(b.id.as_str())) {
            stations.push(self.merge(b, None, Some(b), pinned.get(&b.id), now));
        }

        tracing::debug!(
            primary = primary.len(),
            secondary = secondary.len(),
            reconciled = stations.len(),
            "station feeds reconciled"
        );

        Ok(stations)
    }

    /// `identity` is A's reading when present, otherwise B's.
    fn merge(
        &self, identity: &RawStationReading, a: Option<&RawStationReading>, b: Option<&RawStationReading>,
        pin: Option<&PinnedCoordinates>, now: DateTime<Utc>,
    ) -> ReconciledStation {
        let other = b.filter(|b| !std::ptr::eq(*b, identity));

        if let Some(other) = other {
            warn_on_identity_conflict(identity, other);
        }

        let level = pick_latest(a, b, |r| r.water_level, |r| r.water_level_at);
        let flow = pick_latest(a, b, |r| r.flow, |r| r.flow_at);
        let (coordinates, coordinates_source, coordinates_verified) = pick_coordinates(a, b, pin);

        let water_level_date = level.and_then(|r| r.water_level_at);
        let flow_date = flow.and_then(|r| r.flow_at);
        let (hours_old, data_freshness) = self.policy.assess(water_level_date.or(flow_date), now);

        ReconciledStation {
            id: identity.id.clone(),
            name: identity.name.clone(),
            river: identity.river.clone().or_else(|| other.and_then(|o| o.river.clone())),
            voivodeship: identity.voivodeship.clone().or_else(|| other.and_then(|o| o.voivodeship.clone())),
            coordinates,
            coordinates_source,
            coordinates_verified,
            water_level: level.and_then(|r| r.water_level),
            water_level_date,
            water_level_source: level.map(|r| r.source),
            flow: flow.and_then(|r| r.flow),
            flow_date,
            flow_source: flow.map(|r| r.source),
            data_freshness,
            hours_old,
            source: level.map_or(identity.source, |r| r.source),
            alarm_status: AlarmStatus::Unknown,
            alarm_message: String::new(),
            warning_level: None,
            alarm_level: None,
        }
    }
}

/// Keep one reading per id: the newest water level, at the first position seen.
fn collapse_duplicates(readings: &[RawStationReading]) -> Vec<&RawStationReading> {
    let mut ordered: Vec<&RawStationReading> = Vec::with_capacity(readings.len());
    let mut position: HashMap<&str, usize> = HashMap::with_capacity(readings.len());

    for reading in readings {
        match position.get(reading.id.as_str()) {
            Some(&i) => {
                tracing::debug!(station = %reading.id, source = %reading.source, "duplicate station id in feed");
                if reading.water_level_at > ordered[i].water_level_at {
                    ordered[i] = reading;
                }
            }
            None => {
                position.insert(reading.id.as_str(), ordered.len());
                ordered.push(reading);
            }
        }
    }

    ordered
}

/// The reading that supplies one attribute.
///
/// A present value beats a missing one, a timestamped value beats an
/// untimestamped one, the later timestamp wins, and ties go to `a`.
fn pick_latest<'r>(
    a: Option<&'r RawStationReading>, b: Option<&'r RawStationReading>,
    value: impl Fn(&RawStationReading) -> Option<f64>, at: impl Fn(&RawStationReading) -> Option<DateTime<Utc>>,
) -> Option<&'r RawStationReading> {
    let a = a.filter(|r| value(r).is_some());
    let b = b.filter(|r| value(r).is_some());

    match (a, b) {
        (Some(a), Some(b)) => match (at(a), at(b)) {
            (Some(ta), Some(tb)) if tb > ta => Some(b),
            (None, Some(_)) => Some(b),
            _ => Some(a),
        },
        (a, b) => a.or(b),
    }
}

/// Verified pin, then A, then B, then an unverified pin.
fn pick_coordinates(
    a: Option<&RawStationReading>, b: Option<&RawStationReading>, pin: Option<&PinnedCoordinates>,
) -> (Option<Coordinates>, Option<CoordinateSource>, bool) {
    let pin = pin.filter(|p| p.coordinates.is_usable());

    if let Some(p) = pin.filter(|p| p.verified) {
        return (Some(p.coordinates), Some(CoordinateSource::Pinned), true);
    }

    let upstream = [a, b]
        .into_iter()
        .flatten()
        .find_map(|r| r.coordinates.filter(Coordinates::is_usable).map(|c| (c, r.source)));

    match (upstream, pin) {
        (Some((coords, source)), _) => (Some(coords), Some(CoordinateSource::from(source)), false),
        (None, Some(p)) => (Some(p.coordinates), Some(CoordinateSource::Pinned), false),
        (None, None) => (None, None, false),
    }
}

fn normalized(s: &str) -> String {
    s.trim().to_lowercase()
}

fn warn_on_identity_conflict(a: &RawStationReading, b: &RawStationReading) {
    let name_differs = normalized(&a.name) != normalized(&b.name);
    let river_differs = match (&a.river, &b.river) {
        (Some(ra), Some(rb)) => normalized(ra) != normalized(rb),
        _ => false,
    };

    if name_differs || river_differs {
        tracing::warn!(
            station = %a.id,
            hydro_name = %a.name,
            hydro2_name = %b.name,
            hydro_river = ?a.river,
            hydro2_river = ?b.river,
            "station identity differs between sources; keeping {} identity",
            SourceTag::Hydro
        );
    }
}

/// Simulation time.
///
/// A `SimTime` is a point on the simulation clock, stored in canonical
/// seconds. Time advances only when the engine dispatches an event whose
/// scheduled time is later than the current one; it never follows the wall
/// clock. Conversions into user-facing units go through the
/// [`TimeUnitRegistry`](crate::units::TimeUnitRegistry).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::EngineResult;
use crate::units::TimeUnitRegistry;

/// A point in simulation time, in canonical seconds.
///
/// Ordering is total (`f64::total_cmp`), so times can key a priority queue.
/// Negative zero is folded into positive zero on construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimTime(f64);

impl SimTime {
    /// The zero-point of simulation time.
    pub const ZERO: SimTime = SimTime(0.0);

    /// The largest representable finite time. Used as an open end.
    pub const MAX: SimTime = SimTime(f64::MAX);

    /// Create a time from canonical seconds.
    #[inline]
    pub fn from_secs(secs: f64) -> Self {
        if secs == 0.0 {
            SimTime(0.0)
        } else {
            SimTime(secs)
        }
    }

    /// Create a time from a value expressed in `unit`.
    pub fn from_unit(value: f64, unit: &str, units: &TimeUnitRegistry) -> EngineResult<Self> {
        Ok(SimTime::from_secs(units.to_seconds(value, unit)?))
    }

    /// Return the time in canonical seconds.
    #[inline]
    pub fn as_secs(self) -> f64 {
        self.0
    }

    /// Express this time in `unit`.
    pub fn in_unit(self, unit: &str, units: &TimeUnitRegistry) -> EngineResult<f64> {
        units.from_seconds(self.0, unit)
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.0.is_finite()
    }

    /// Compute the time `delay` seconds after `self`.
    /// Returns `None` if the result is not finite.
    #[inline]
    pub fn plus(self, delay: f64) -> Option<SimTime> {
        let t = self.0 + delay;
        t.is_finite().then(|| SimTime::from_secs(t))
    }

    /// Returns `true` if `self` is strictly before `other`.
    #[inline]
    pub fn is_before(self, other: SimTime) -> bool {
        self < other
    }

    /// Returns the duration in seconds between two points in time.
    /// Returns `None` if `other` is after `self`.
    #[inline]
    pub fn duration_since(self, other: SimTime) -> Option<f64> {
        (self >= other).then(|| self.0 - other.0)
    }
}

impl Default for SimTime {
    fn default() -> Self {
        SimTime::ZERO
    }
}

impl PartialEq for SimTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SimTime {}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T={}s", self.0)
    }
}

/// Milliseconds since the Unix epoch, for wall-clock stamps on snapshots and
/// cache entries. Never feeds simulation time.
pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

//! Time-unit registry.
//!
//! Every duration in tessera is stored in canonical seconds. Named units are
//! resolved through a [`TimeUnitRegistry`], which knows the built-in units
//! and any user-defined ones. Built-ins use an astronomical year of 365.25
//! days, with `month = year / 12` and `week = year / 52`, so that conversions
//! between week, month and year compose exactly.
//!
//! Unit names are case-insensitive, accept plurals (`"years"`) and the
//! `d<unit>` spelling (`"dyear"`). The local scope is searched before the
//! global scope and the built-ins, so a module can shadow a built-in unit.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

pub const SECONDS_PER_SECOND: f64 = 1.0;
pub const SECONDS_PER_MINUTE: f64 = 60.0;
pub const SECONDS_PER_HOUR: f64 = 3_600.0;
pub const SECONDS_PER_DAY: f64 = 86_400.0;
pub const SECONDS_PER_YEAR: f64 = 365.25 * SECONDS_PER_DAY;
pub const SECONDS_PER_MONTH: f64 = SECONDS_PER_YEAR / 12.0;
pub const SECONDS_PER_WEEK: f64 = SECONDS_PER_YEAR / 52.0;

/// The unit used when no module declares one.
pub const DEFAULT_TIME_UNIT: &str = "second";

fn builtin_seconds(name: &str) -> Option<f64> {
    match name {
        "second" => Some(SECONDS_PER_SECOND),
        "minute" => Some(SECONDS_PER_MINUTE),
        "hour" => Some(SECONDS_PER_HOUR),
        "day" => Some(SECONDS_PER_DAY),
        "week" => Some(SECONDS_PER_WEEK),
        "month" => Some(SECONDS_PER_MONTH),
        "year" => Some(SECONDS_PER_YEAR),
        _ => None,
    }
}

/// Spellings tried, in order, when resolving a unit name.
fn candidates(unit: &str) -> Vec<String> {
    let base = unit.trim().to_lowercase();
    let mut out = vec![base.clone()];
    if let Some(singular) = base.strip_suffix('s') {
        out.push(singular.to_string());
    }
    if let Some(stripped) = base.strip_prefix('d') {
        out.push(stripped.to_string());
        if let Some(singular) = stripped.strip_suffix('s') {
            out.push(singular.to_string());
        }
    }
    out.retain(|c| !c.is_empty());
    out
}

/// Canonical duration table for named time units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeUnitRegistry {
    global: IndexMap<String, f64>,
    local: IndexMap<String, f64>,
}

impl TimeUnitRegistry {
    /// Create a registry holding only the built-in units.
    pub fn new() -> Self {
        TimeUnitRegistry::default()
    }

    /// Register a global unit of `seconds_per_unit` seconds.
    pub fn register(&mut self, name: &str, seconds_per_unit: f64) -> EngineResult<()> {
        let key = Self::key(name, seconds_per_unit)?;
        self.global.insert(key, seconds_per_unit);
        Ok(())
    }

    /// Register a unit in the local scope, shadowing global and built-in
    /// units of the same name.
    pub fn register_local(&mut self, name: &str, seconds_per_unit: f64) -> EngineResult<()> {
        let key = Self::key(name, seconds_per_unit)?;
        self.local.insert(key, seconds_per_unit);
        Ok(())
    }

    /// Drop every local-scope unit.
    pub fn clear_local(&mut self) {
        self.local.clear();
    }

    fn key(name: &str, seconds_per_unit: f64) -> EngineResult<String> {
        let key = name.trim().to_lowercase();
        if key.is_empty() || !seconds_per_unit.is_finite() || seconds_per_unit <= 0.0 {
            return Err(EngineError::InvalidTimeUnit {
                name: name.to_string(),
                seconds: seconds_per_unit,
            });
        }
        Ok(key)
    }

    /// User units match on `key` or on its `d<key>` spelling, so a unit
    /// registered as `"dfortnight"` also resolves as `"fortnight"`.
    fn lookup_user(table: &IndexMap<String, f64>, key: &str) -> Option<f64> {
        table
            .get(key)
            .or_else(|| table.get(&format!("d{}", key)))
            .copied()
    }

    fn lookup_exact(&self, key: &str) -> Option<f64> {
        Self::lookup_user(&self.local, key)
            .or_else(|| Self::lookup_user(&self.global, key))
            .or_else(|| builtin_seconds(key))
    }

    /// Number of seconds in one `unit`.
    pub fn canonical_seconds(&self, unit: &str) -> EngineResult<f64> {
        candidates(unit)
            .iter()
            .find_map(|c| self.lookup_exact(c))
            .ok_or_else(|| EngineError::UnknownTimeUnit(unit.to_string()))
    }

    /// Returns `true` if `unit` resolves in any scope.
    pub fn is_known(&self, unit: &str) -> bool {
        self.canonical_seconds(unit).is_ok()
    }

    /// Convert `value` from `from` units into `to` units.
    ///
    /// Matching units are a no-op and are not looked up.
    pub fn convert(&self, value: f64, from: &str, to: &str) -> EngineResult<f64> {
        if from.trim().eq_ignore_ascii_case(to.trim()) {
            return Ok(value);
        }
        let from_secs = self.canonical_seconds(from)?;
        let to_secs = self.canonical_seconds(to)?;
        if from_secs == to_secs {
            return Ok(value);
        }
        Ok(value * from_secs / to_secs)
    }

    /// Convert `value` expressed in `unit` into seconds.
    pub fn to_seconds(&self, value: f64, unit: &str) -> EngineResult<f64> {
        Ok(value * self.canonical_seconds(unit)?)
    }

    /// Express `seconds` in `unit`.
    pub fn from_seconds(&self, seconds: f64, unit: &str) -> EngineResult<f64> {
        Ok(seconds / self.canonical_seconds(unit)?)
    }

    /// The finest-grained unit among `units`. Ties keep the first one given.
    /// Returns `Ok(None)` when `units` is empty.
    pub fn min_unit<'a, I>(&self, units: I) -> EngineResult<Option<String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut best: Option<(&'a str, f64)> = None;
        for unit in units {
            let secs = self.canonical_seconds(unit)?;
            match best {
                Some((_, b)) if b <= secs => {}
                _ => best = Some((unit, secs)),
            }
        }
        Ok(best.map(|(u, _)| u.to_string()))
    }

    /// Names of all user-defined units, local scope first.
    pub fn user_units(&self) -> impl Iterator<Item = &str> {
        self.local.keys().chain(self.global.keys()).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_units() {
        let units = TimeUnitRegistry::new();
        assert_eq!(units.canonical_seconds("second").unwrap(), 1.0);
        assert_eq!(units.canonical_seconds("hour").unwrap(), 3_600.0);
        assert_eq!(units.canonical_seconds("day").unwrap(), 86_400.0);
        assert_eq!(units.canonical_seconds("year").unwrap(), 31_557_600.0);
    }

    #[test]
    fn test_week_month_year_compose() {
        let units = TimeUnitRegistry::new();
        assert_eq!(units.convert(12.0, "month", "year").unwrap(), 1.0);
        assert_eq!(units.convert(52.0, "week", "year").unwrap(), 1.0);
        assert_eq!(units.convert(1.0, "year", "day").unwrap(), 365.25);
    }

    #[test]
    fn test_plurals_case_and_d_prefix() {
        let units = TimeUnitRegistry::new();
        assert_eq!(units.canonical_seconds("Years").unwrap(), SECONDS_PER_YEAR);
        assert_eq!(units.canonical_seconds("dyear").unwrap(), SECONDS_PER_YEAR);
        assert_eq!(units.canonical_seconds("days").unwrap(), SECONDS_PER_DAY);
        assert_eq!(units.canonical_seconds("dday").unwrap(), SECONDS_PER_DAY);
    }

    #[test]
    fn test_same_unit_is_noop_even_if_unknown() {
        let units = TimeUnitRegistry::new();
        assert_eq!(units.convert(7.5, "fortnight", "fortnight").unwrap(), 7.5);
    }

    #[test]
    fn test_unknown_unit_fails() {
        let units = TimeUnitRegistry::new();
        let err = units.convert(1.0, "fortnight", "day").unwrap_err();
        assert!(matches!(err, EngineError::UnknownTimeUnit(ref u) if u == "fortnight"));
    }

    #[test]
    fn test_register_user_unit() {
        let mut units = TimeUnitRegistry::new();
        units.register("fortnight", 14.0 * SECONDS_PER_DAY).unwrap();
        assert_eq!(units.convert(1.0, "fortnight", "day").unwrap(), 14.0);
        assert_eq!(units.convert(2.0, "dfortnights", "day").unwrap(), 28.0);
    }

    #[test]
    fn test_d_prefixed_registration_resolves_bare_name() {
        let mut units = TimeUnitRegistry::new();
        units.register("dfortnight", 14.0 * SECONDS_PER_DAY).unwrap();
        assert_eq!(units.convert(1.0, "fortnight", "day").unwrap(), 14.0);
        assert_eq!(units.convert(2.0, "Fortnights", "day").unwrap(), 28.0);
        assert_eq!(units.convert(1.0, "dfortnight", "day").unwrap(), 14.0);

        units.register_local("dsol", 88_775.0).unwrap();
        assert_eq!(units.canonical_seconds("sol").unwrap(), 88_775.0);
        assert!(matches!(
            units.canonical_seconds("ay"),
            Err(EngineError::UnknownTimeUnit(_))
        ));
    }

    #[test]
    fn test_local_scope_shadows_builtin() {
        let mut units = TimeUnitRegistry::new();
        units.register_local("year", 365.0 * SECONDS_PER_DAY).unwrap();
        assert_eq!(units.convert(1.0, "year", "day").unwrap(), 365.0);
        units.clear_local();
        assert_eq!(units.convert(1.0, "year", "day").unwrap(), 365.25);
    }

    #[test]
    fn test_invalid_unit_length() {
        let mut units = TimeUnitRegistry::new();
        assert!(matches!(
            units.register("never", 0.0),
            Err(EngineError::InvalidTimeUnit { .. })
        ));
        assert!(units.register("nan", f64::NAN).is_err());
        assert!(units.register("", 1.0).is_err());
    }

    #[test]
    fn test_min_unit_is_finest() {
        let units = TimeUnitRegistry::new();
        let min = units.min_unit(["year", "day", "month"]).unwrap();
        assert_eq!(min.as_deref(), Some("day"));
        assert_eq!(units.min_unit(std::iter::empty::<&str>()).unwrap(), None);
        assert!(units.min_unit(["year", "eon"]).is_err());
    }
}

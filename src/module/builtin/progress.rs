//! `ProgressModule`: logs how far the run has advanced at a fixed interval.

use tracing::info;

use crate::error::ModuleError;
use crate::event::{priority, Event};
use crate::module::descriptor::ModuleDescriptor;
use crate::module::traits::SimModule;
use crate::state::SimState;
use crate::value::Value;

/// Registration name of the progress module.
pub const PROGRESS_MODULE: &str = ".progress";

/// Emits an `info!` progress line every `interval` simulation time units.
///
/// Parameter `interval` (default 1.0, in the simulation time unit); a
/// non-positive interval disables reporting. The number of reports so far
/// is kept in the module's private state under `reports`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressModule;

impl ProgressModule {
    fn report(state: &mut SimState) -> Result<(), ModuleError> {
        let span = state.end().as_secs() - state.start().as_secs();
        let done = state.now().as_secs() - state.start().as_secs();
        let percent = if span > 0.0 { 100.0 * done / span } else { 100.0 };
        info!(
            time = %state.now(),
            percent = percent.min(100.0),
            completed = state.completed().total_recorded(),
            "simulation progress"
        );
        let reports = state.module_state_mut(PROGRESS_MODULE);
        let count = reports.get("reports").and_then(Value::as_i64).unwrap_or(0);
        reports.insert("reports".into(), Value::Int(count + 1));
        Self::schedule_next(state)
    }

    fn schedule_next(state: &mut SimState) -> Result<(), ModuleError> {
        let interval = state.param_f64(PROGRESS_MODULE, "interval")?;
        if interval <= 0.0 {
            return Ok(());
        }
        let unit = state.time_unit().to_string();
        let delay = state.units().to_seconds(interval, &unit)?;
        match state.now().plus(delay) {
            Some(next) if next <= state.end() => {
                state.schedule(next, PROGRESS_MODULE, "progress", priority::LAST)?;
            }
            _ => {}
        }
        Ok(())
    }
}

impl SimModule for ProgressModule {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor::new(PROGRESS_MODULE)
            .param("interval", 1.0)
            .description("periodic progress report")
    }

    fn dispatch(&self, state: &mut SimState, event: &Event) -> Result<(), ModuleError> {
        match event.event_type.as_str() {
            "init" => {
                let interval = state.param_f64(PROGRESS_MODULE, "interval")?;
                if interval > 0.0 {
                    let now = state.now();
                    state.schedule(now, PROGRESS_MODULE, "progress", priority::LAST)?;
                }
                Ok(())
            }
            "progress" => Self::report(state),
            other => Err(ModuleError::UndefinedEventType {
                module: PROGRESS_MODULE.into(),
                event_type: other.into(),
            }),
        }
    }
}

//! `LoadModule`: reads objects listed in the inputs table.

use std::collections::BTreeSet;
use tracing::debug;

use crate::error::ModuleError;
use crate::event::{priority, Event};
use crate::io::IoRegistry;
use crate::module::descriptor::ModuleDescriptor;
use crate::module::traits::SimModule;
use crate::state::{PathRole, SimState};
use crate::time::SimTime;

use super::resolve_file;

/// Registration name of the load module.
pub const LOAD_MODULE: &str = ".load";

/// Loads each row of the inputs table into the object store at its
/// `load_time` and marks the row `loaded`. Rows due at or before the
/// moment `init` runs are loaded immediately; later rows get a `load` event
/// with [`priority::FIRST`]. A failed load fails the event.
#[derive(Debug, Clone, Default)]
pub struct LoadModule {
    io: IoRegistry,
}

impl LoadModule {
    pub fn new(io: IoRegistry) -> Self {
        LoadModule { io }
    }

    fn load_due(&self, state: &mut SimState) -> Result<(), ModuleError> {
        let now = state.now();
        let due: Vec<usize> = state
            .inputs()
            .iter()
            .enumerate()
            .filter(|(_, row)| !row.loaded && row.load_time <= now)
            .map(|(i, _)| i)
            .collect();
        for i in due {
            let row = state.inputs()[i].clone();
            let path = resolve_file(state, PathRole::Inputs, &row.file);
            let value = self.io.load(&row.object, &path)?;
            debug!(object = %row.object, path = %path.display(), "object loaded");
            state.set_object(row.object.clone(), value);
            state.inputs_mut()[i].loaded = true;
        }
        Ok(())
    }

    fn schedule_loads(state: &mut SimState) -> Result<(), ModuleError> {
        let now = state.now();
        let times: BTreeSet<SimTime> = state
            .inputs()
            .iter()
            .filter(|row| !row.loaded && row.load_time > now)
            .map(|row| row.load_time)
            .collect();
        for time in times {
            state.schedule(time, LOAD_MODULE, "load", priority::FIRST)?;
        }
        Ok(())
    }
}

impl SimModule for LoadModule {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor::new(LOAD_MODULE).description("loads objects from the inputs table")
    }

    fn dispatch(&self, state: &mut SimState, event: &Event) -> Result<(), ModuleError> {
        match event.event_type.as_str() {
            "init" => {
                self.load_due(state)?;
                Self::schedule_loads(state)
            }
            "load" => self.load_due(state),
            other => Err(ModuleError::UndefinedEventType {
                module: LOAD_MODULE.into(),
                event_type: other.into(),
            }),
        }
    }
}

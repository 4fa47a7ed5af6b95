//! `SaveModule`: writes objects listed in the outputs table.

use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::error::ModuleError;
use crate::event::{priority, Event};
use crate::io::IoRegistry;
use crate::module::descriptor::ModuleDescriptor;
use crate::module::traits::SimModule;
use crate::state::{PathRole, SimState};
use crate::time::SimTime;

use super::resolve_file;

/// Registration name of the save module.
pub const SAVE_MODULE: &str = ".save";

/// Saves each row of the outputs table at its `save_time` through the I/O
/// collaborator and marks the row `saved`. Save events run with
/// [`priority::LAST`] so every other event at the same instant goes first.
///
/// An object that is absent when its row comes due is skipped with a
/// warning and the row stays unsaved.
#[derive(Debug, Clone, Default)]
pub struct SaveModule {
    io: IoRegistry,
}

impl SaveModule {
    pub fn new(io: IoRegistry) -> Self {
        SaveModule { io }
    }

    fn schedule_saves(state: &mut SimState) -> Result<(), ModuleError> {
        let now = state.now();
        let times: BTreeSet<SimTime> = state
            .outputs()
            .iter()
            .filter(|row| !row.saved && row.save_time >= now)
            .map(|row| row.save_time)
            .collect();
        for time in times {
            state.schedule(time, SAVE_MODULE, "save", priority::LAST)?;
        }
        Ok(())
    }

    fn save_due(&self, state: &mut SimState) -> Result<(), ModuleError> {
        let now = state.now();
        let due: Vec<usize> = state
            .outputs()
            .iter()
            .enumerate()
            .filter(|(_, row)| !row.saved && row.save_time == now)
            .map(|(i, _)| i)
            .collect();
        for i in due {
            let row = state.outputs()[i].clone();
            let Some(value) = state.objects().get(&row.object).cloned() else {
                warn!(object = %row.object, time = %now, "output object missing at save time; not saved");
                continue;
            };
            let path = resolve_file(state, PathRole::Outputs, &row.file);
            self.io.save(&row.object, &value, &path)?;
            debug!(object = %row.object, path = %path.display(), "object saved");
            state.outputs_mut()[i].saved = true;
        }
        Ok(())
    }
}

impl SimModule for SaveModule {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor::new(SAVE_MODULE).description("saves objects from the outputs table")
    }

    fn dispatch(&self, state: &mut SimState, event: &Event) -> Result<(), ModuleError> {
        match event.event_type.as_str() {
            "init" => Self::schedule_saves(state),
            "save" => self.save_due(state),
            other => Err(ModuleError::UndefinedEventType {
                module: SAVE_MODULE.into(),
                event_type: other.into(),
            }),
        }
    }
}

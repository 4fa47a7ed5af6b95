//! Built-in core modules: progress reporting and the object load/save
//! drivers.
//!
//! Core modules are ordinary [`SimModule`](crate::module::SimModule)s whose
//! names start with a dot so they never collide with user modules. They are
//! opted into by registering them and listing them among the simulation's
//! modules.

pub mod load;
pub mod progress;
pub mod save;

pub use load::LoadModule;
pub use progress::ProgressModule;
pub use save::SaveModule;

use std::path::{Path, PathBuf};

use crate::state::{PathRole, SimState};

/// Resolve a table file against the path registered for `role`.
pub(crate) fn resolve_file(state: &SimState, role: PathRole, file: &Path) -> PathBuf {
    match state.path(role) {
        Some(base) if file.is_relative() => base.join(file),
        _ => file.to_path_buf(),
    }
}

//! Modules: descriptors, the dispatch capability and the registry.
//!
//! A module is a value implementing [`SimModule`]: it reports its
//! [`ModuleDescriptor`] and dispatches events against the state container.
//! Modules are registered in a [`ModuleRegistry`] at startup under the name
//! their descriptor declares.
//!
//! # Module structure
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`descriptor`] | [`ModuleDescriptor`], [`ParamSpec`], [`ObjectSpec`] |
//! | [`traits`] | [`SimModule`] trait, [`FnModule`], [`GroupModule`] |
//! | [`registry`] | [`ModuleRegistry`] |
//! | [`builtin`] | [`ProgressModule`], [`SaveModule`], [`LoadModule`] |

pub mod builtin;
pub mod descriptor;
pub mod registry;
pub mod traits;

pub use builtin::{LoadModule, ProgressModule, SaveModule};
pub use descriptor::{ModuleDescriptor, ObjectSpec, ParamSpec};
pub use registry::ModuleRegistry;
pub use traits::{FnModule, GroupModule, Handler, SimModule};

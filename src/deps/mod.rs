//! Module dependency resolution.
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`graph`] | [`DependencyGraph`], [`DepEdge`], [`EdgeKind`] |
//! | [`resolve`] | [`expand_groups`], [`resolve_load_order`] |
//! | [`diagnose`] | [`diagnose()`], [`Diagnostic`] |

pub mod diagnose;
pub mod graph;
pub mod resolve;

pub use diagnose::{diagnose, DiagnoseContext, Diagnostic, DiagnosticKind, Severity};
pub use graph::{DepEdge, DependencyGraph, EdgeKind};
pub use resolve::{dedupe, expand_groups, resolve_load_order, DescriptorSource};

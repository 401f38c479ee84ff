//! Dependency graph and the cross-file binder built on it.

pub mod bind;
pub mod graph;

pub use bind::{BindMode, Binder, DefOrigin};
pub use graph::{DepGraph, EdgeKind};

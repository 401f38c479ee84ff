//! Lading - a source-package bundler core
//!
//! This crate provides the cross-file binding and build-orchestration layer
//! of a JavaScript-package bundler: dependency-graph construction, reference
//! resolution against build targets and intrinsics, incremental re-binding,
//! and debounced watch-mode rebuilds. Parsing and code generation are
//! external collaborators behind the [`Parser`] and
//! [`ops::CodegenBackend`] seams.

pub mod binder;
pub mod core;
pub mod ops;
pub mod util;
pub mod watch;

/// Test utilities for lading unit tests.
///
/// This module is only available when compiling with `--cfg test` or
/// running tests. It provides a fixture parser standing in for the external
/// JavaScript frontend.
#[cfg(test)]
pub mod test_support;

pub use crate::core::{
    intrinsic::IntrinsicRegistry, package::Package, target::EnvRegistry, target::EsSpec,
    target::Target, target::TargetOptions, unit::ParseOutput, unit::Parser, unit::SourceUnit,
    unit::UnitId,
};

pub use binder::{BindMode, Binder, DepGraph, EdgeKind};
pub use util::{Diagnostic, DiagnosticKind, Ident, Severity, SrcLoc};
pub use watch::DirWatcher;

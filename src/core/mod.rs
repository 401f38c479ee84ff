//! Core data model: packages, units, targets, intrinsics.

pub mod intrinsic;
pub mod package;
pub mod target;
pub mod unit;

pub use intrinsic::IntrinsicRegistry;
pub use package::Package;
pub use target::{EnvRegistry, EsSpec, Target, TargetOptions};
pub use unit::{ParseOutput, Parser, SourceUnit, UnitId};

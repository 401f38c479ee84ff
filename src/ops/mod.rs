//! Build pipeline orchestration.

pub mod build;

pub use build::{
    build, build_and_watch, BuildError, BuildOutcome, CodegenBackend, Destination, GeneratedCode,
    Product,
};

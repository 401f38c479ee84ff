//! Build orchestration.
//!
//! Drives one package through parse → bind → assemble → optimize → generate
//! for each configured destination, and optionally keeps rebuilding on
//! filesystem changes. Code generation itself lives behind the
//! [`CodegenBackend`] seam; this module only sequences the pipeline and
//! splices intrinsic helper sources ahead of the package code.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::binder::Binder;
use crate::core::package::Package;
use crate::core::target::Target;
use crate::core::unit::{ParsedModule, Parser, SourceUnit};
use crate::util::{Diagnostic, Ident};
use crate::watch::DirWatcher;

/// Output of [`CodegenBackend::generate`] for one destination.
#[derive(Debug, Clone)]
pub struct GeneratedCode {
    pub code: String,
    /// Present when the destination's target requested a source map.
    pub source_map: Option<String>,
}

/// The external code-generation subsystem.
///
/// The program tree is opaque here; the backend owns its representation end
/// to end. `assemble` merges the ordered unit trees into one program,
/// `optimize` rewrites it (called only when the target's optimization level
/// is above zero), `generate` renders text and an optional source map.
pub trait CodegenBackend: Send + Sync {
    fn assemble(&self, units: &[&SourceUnit], target: &Target) -> Result<ParsedModule>;
    fn optimize(&self, program: ParsedModule, target: &Target) -> Result<ParsedModule>;
    fn generate(&self, program: &ParsedModule, target: &Target) -> Result<GeneratedCode>;
}

/// One output the build produces.
#[derive(Debug, Clone)]
pub struct Destination {
    /// Environment and language level to generate for.
    pub target: Target,
    /// Text prepended verbatim to the output (banner, shebang, ...).
    pub preamble: String,
    /// Where to write the code; `None` keeps the product in memory. A source
    /// map, when generated, lands next to it with a `.map` suffix.
    pub out_file: Option<PathBuf>,
    /// Product name override; defaults to the package name.
    pub pkg_name: Option<String>,
}

impl Destination {
    /// An in-memory destination for `target` with no preamble.
    pub fn in_memory(target: Target) -> Self {
        Destination {
            target,
            preamble: String::new(),
            out_file: None,
            pkg_name: None,
        }
    }
}

/// One generated product.
#[derive(Debug, Clone)]
pub struct Product {
    pub name: String,
    pub target: Target,
    pub generated: GeneratedCode,
    pub out_file: Option<PathBuf>,
}

/// Result of one successful build pass.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// False (incremental mode) when nothing changed; all other fields are
    /// then empty and no codegen ran.
    pub changed: bool,
    /// Advisory warnings from the bind.
    pub warnings: Vec<Diagnostic>,
    /// Names the package exports.
    pub exports: BTreeSet<Ident>,
    /// Unit paths in emission order.
    pub order: Vec<PathBuf>,
    /// GraphViz body of the file dependency graph.
    pub filedep_dot: String,
    /// One product per destination.
    pub products: Vec<Product>,
}

impl BuildOutcome {
    fn unchanged() -> Self {
        BuildOutcome {
            changed: false,
            warnings: Vec::new(),
            exports: BTreeSet::new(),
            order: Vec::new(),
            filedep_dot: String::new(),
            products: Vec::new(),
        }
    }
}

/// A build that stopped on blocking diagnostics.
///
/// `first` is the lead problem; `report` carries every error line, parse
/// failures first, in bind order.
#[derive(Debug, Error)]
#[error("{first}")]
pub struct BuildError {
    pub first: String,
    pub report: Vec<String>,
}

/// Run one full build pass over `pkg` for every destination.
///
/// Returns `Ok` with `changed == false` (incremental binders only) when no
/// source changed and nothing was regenerated. Blocking diagnostics surface
/// as a [`BuildError`]; warnings are logged and carried in the outcome.
pub fn build(
    pkg: &mut Package,
    binder: &mut Binder,
    parser: &dyn Parser,
    backend: &dyn CodegenBackend,
    destinations: &[Destination],
) -> Result<BuildOutcome> {
    let changed = binder.parse_and_bind(pkg, parser)?;

    // Errors take precedence over "nothing changed": an unchanged pass after
    // a failed one still carries the previous pass's diagnostics, and the
    // package is still broken.
    if binder.has_errors() {
        let report = binder.error_report();
        let first = report.first().cloned().unwrap_or_default();
        return Err(BuildError { first, report }.into());
    }

    if !changed {
        tracing::info!("{} is up to date", pkg);
        return Ok(BuildOutcome::unchanged());
    }

    for warning in binder.warnings() {
        tracing::warn!("{}", warning);
    }

    let ordered = binder.ordered_units(pkg);
    let mut products = Vec::with_capacity(destinations.len());
    for dest in destinations {
        products.push(generate_product(pkg, binder, backend, &ordered, dest)?);
    }

    Ok(BuildOutcome {
        changed: true,
        warnings: binder.warnings().to_vec(),
        exports: binder.exports().clone(),
        order: ordered.iter().map(|u| u.path().to_path_buf()).collect(),
        filedep_dot: binder.filedep_dot(pkg),
        products,
    })
}

fn generate_product(
    pkg: &Package,
    binder: &Binder,
    backend: &dyn CodegenBackend,
    ordered: &[&SourceUnit],
    dest: &Destination,
) -> Result<Product> {
    let target = &dest.target;

    let mut program = backend.assemble(ordered, target)?;
    if target.opt_level() > 0 {
        program = backend.optimize(program, target)?;
    }
    let generated = backend.generate(&program, target)?;

    // Final text: preamble, then intrinsic helpers, then package code.
    let mut code = String::new();
    if !dest.preamble.is_empty() {
        code.push_str(&dest.preamble);
        if !dest.preamble.ends_with('\n') {
            code.push('\n');
        }
    }
    for name in binder.intrinsics_used() {
        if let Some(source) = binder.intrinsics().source_for(*name, target) {
            code.push_str(source.trim_end());
            code.push('\n');
        }
    }
    code.push_str(&generated.code);

    let generated = GeneratedCode {
        code,
        source_map: generated.source_map,
    };

    if let Some(out_file) = &dest.out_file {
        std::fs::write(out_file, &generated.code)
            .with_context(|| format!("failed to write {}", out_file.display()))?;
        if let Some(map) = &generated.source_map {
            let map_file = PathBuf::from(format!("{}.map", out_file.display()));
            std::fs::write(&map_file, map)
                .with_context(|| format!("failed to write {}", map_file.display()))?;
        }
        tracing::info!("wrote {} ({})", out_file.display(), target);
    }

    Ok(Product {
        name: dest
            .pkg_name
            .clone()
            .unwrap_or_else(|| pkg.name().to_string()),
        target: target.clone(),
        generated,
        out_file: dest.out_file.clone(),
    })
}

/// Build once, then keep rebuilding on debounced filesystem changes.
///
/// Every pass's result (including the initial one) is delivered through
/// `on_outcome`. A failing rebuild is reported there and logged, but never
/// stops the watch; the next change set triggers another attempt. The
/// returned watcher is open; closing or dropping it ends watch mode.
///
/// The binder should be in incremental mode, otherwise every change set
/// rebuilds the whole package from scratch.
pub fn build_and_watch<F>(
    mut pkg: Package,
    mut binder: Binder,
    parser: Arc<dyn Parser>,
    backend: Arc<dyn CodegenBackend>,
    destinations: Vec<Destination>,
    debounce: Duration,
    mut on_outcome: F,
) -> Result<DirWatcher>
where
    F: FnMut(Result<BuildOutcome>) + Send + 'static,
{
    on_outcome(build(
        &mut pkg,
        &mut binder,
        parser.as_ref(),
        backend.as_ref(),
        &destinations,
    ));

    let mut watcher = DirWatcher::with_debounce(pkg.dir(), debounce);
    watcher.open(move |changes| {
        tracing::info!("{} change(s) detected, rebuilding", changes.len());
        if let Err(err) = pkg.refresh() {
            tracing::error!("failed to rescan {}: {:#}", pkg.dir().display(), err);
            on_outcome(Err(err));
            return;
        }
        let result = build(
            &mut pkg,
            &mut binder,
            parser.as_ref(),
            backend.as_ref(),
            &destinations,
        );
        if let Err(err) = &result {
            tracing::error!("rebuild failed: {:#}", err);
        }
        on_outcome(result);
    })?;

    Ok(watcher)
}

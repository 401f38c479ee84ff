//! The cross-file binder.
//!
//! Binding discovers every top-level definition across a package's units,
//! resolves every unresolved reference to an intra-package definition, an
//! environment global, a built-in intrinsic, or an error, and produces a
//! dependency-respecting emission order together with diagnostics.
//!
//! One [`Binder`] serves one package across repeated bind passes; in
//! incremental mode it remembers unit fingerprints so an unchanged source set
//! costs nothing.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use anyhow::{ensure, Result};
use rayon::prelude::*;

use crate::binder::graph::{DepGraph, EdgeKind};
use crate::core::intrinsic::IntrinsicRegistry;
use crate::core::package::Package;
use crate::core::target::{EnvRegistry, Target};
use crate::core::unit::{ParseError, ParseState, Parser, SourceUnit, UnitId};
use crate::util::{fmt_list, Diagnostic, DiagnosticKind, Ident, SrcLoc};

/// Where a package-wide definition lives.
///
/// Valid for one parse generation of the defining unit; the whole table is
/// rebuilt on every bind pass.
#[derive(Debug, Clone)]
pub struct DefOrigin {
    /// The defining unit.
    pub unit: UnitId,
    /// Definition site.
    pub loc: SrcLoc,
    /// Number of units referencing this definition.
    pub refcount: u32,
    /// Exported from the package?
    pub exported: bool,
}

/// Binder behavior switches.
#[derive(Debug, Clone, Default)]
pub struct BindMode {
    /// Keep accumulating diagnostics past the first error phase (linting).
    pub continue_on_error: bool,
    /// Track unit fingerprints and skip work for unchanged sources.
    pub incremental: bool,
    /// Attach "did you mean target X" hints to undefined-reference errors.
    pub verbose_hints: bool,
}

/// Binds a package's units against a set of build targets.
///
/// Binding uses the *union* of all requested targets' global sets: emitted
/// code is shared between destinations, so a reference satisfied by any
/// requested environment is accepted.
#[derive(Debug)]
pub struct Binder {
    targets: Vec<Target>,
    envs: EnvRegistry,
    intrinsics: IntrinsicRegistry,
    mode: BindMode,

    // State below is rebuilt by each bind pass.
    parse_errors: Vec<ParseError>,
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
    filedeps: DepGraph<UnitId>,
    definitions: BTreeMap<Ident, DefOrigin>,
    exports: BTreeSet<Ident>,
    intrinsics_used: BTreeSet<Ident>,
    order: Vec<UnitId>,
    // Fingerprints as of the last pass, by unit path (incremental only).
    versions: HashMap<PathBuf, String>,
}

impl Binder {
    /// Create a binder for the given targets and registries.
    ///
    /// Registries are passed in explicitly so independent builds (and tests)
    /// never share mutable state.
    pub fn new(
        targets: Vec<Target>,
        envs: EnvRegistry,
        intrinsics: IntrinsicRegistry,
        mode: BindMode,
    ) -> Result<Self> {
        ensure!(!targets.is_empty(), "at least one build target is required");
        Ok(Binder {
            targets,
            envs,
            intrinsics,
            mode,
            parse_errors: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            filedeps: DepGraph::new(),
            definitions: BTreeMap::new(),
            exports: BTreeSet::new(),
            intrinsics_used: BTreeSet::new(),
            order: Vec::new(),
            versions: HashMap::new(),
        })
    }

    /// Parse every unit and, when anything changed, re-run the full bind.
    ///
    /// All units are parsed concurrently; a failure in one unit does not stop
    /// the others, but any failure prevents the bind phases from running.
    /// Returns whether anything changed: `false` (incremental mode only)
    /// means the caller may skip all downstream build steps.
    pub fn parse_and_bind(&mut self, pkg: &mut Package, parser: &dyn Parser) -> Result<bool> {
        self.parse_errors.clear();

        if self.mode.incremental {
            for unit in pkg.units_mut() {
                unit.enable_incremental()?;
            }
        }

        // Embarrassingly parallel: every unit is parsed independently and we
        // join on all outcomes before binding.
        let results: Vec<(UnitId, Result<ParseState, ParseError>)> = pkg
            .units_mut()
            .par_iter_mut()
            .enumerate()
            .map(|(i, unit)| (UnitId(i), unit.parse(parser)))
            .collect();

        let mut nchanges = 0usize;
        for (id, result) in results {
            match result {
                Ok(ParseState::Unchanged) => {
                    tracing::debug!("parse {} -> unchanged", pkg.unit(id));
                }
                Ok(ParseState::Parsed) => {
                    if self.mode.incremental {
                        let unit = pkg.unit(id);
                        let known = self.versions.contains_key(unit.path());
                        tracing::debug!(
                            "parse {} -> {}",
                            unit,
                            if known { "changed" } else { "added" }
                        );
                        if let Some(version) = unit.version() {
                            self.versions
                                .insert(unit.path().to_path_buf(), version.to_string());
                        }
                    }
                    nchanges += 1;
                }
                Err(err) => {
                    self.parse_errors.push(err);
                    nchanges += 1;
                }
            }
        }

        if self.mode.incremental {
            // Units that disappeared since the last pass also count as
            // changes and must be forgotten.
            let current: HashSet<PathBuf> =
                pkg.units().iter().map(|u| u.path().to_path_buf()).collect();
            let gone: Vec<PathBuf> = self
                .versions
                .keys()
                .filter(|p| !current.contains(*p))
                .cloned()
                .collect();
            for path in gone {
                tracing::debug!("parse {} -> removed", path.display());
                self.versions.remove(&path);
                nchanges += 1;
            }
        }

        if nchanges > 0 {
            self.reset_bind_state();
            if !self.should_stop() {
                self.bind(pkg);
            }
            pkg.set_exports(self.exports.clone());

            if tracing::enabled!(tracing::Level::DEBUG) {
                tracing::debug!(
                    "{} intrinsics used: {}",
                    pkg,
                    if self.intrinsics_used.is_empty() {
                        "(none)".to_string()
                    } else {
                        fmt_list(&self.intrinsics_used)
                    }
                );
                tracing::debug!("{} exported names: {}", pkg, fmt_list(&self.exports));
            }
        }

        Ok(nchanges > 0)
    }

    fn reset_bind_state(&mut self) {
        self.errors.clear();
        self.warnings.clear();
        self.filedeps = DepGraph::new();
        self.definitions.clear();
        self.exports.clear();
        self.intrinsics_used.clear();
        self.order.clear();
    }

    fn should_stop(&self) -> bool {
        self.has_errors() && !self.mode.continue_on_error
    }

    /// Any build-blocking problem so far (parse failure or bind error)?
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || !self.parse_errors.is_empty()
    }

    /// Bind-phase errors.
    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    /// Advisory warnings.
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    /// Per-unit parse failures collected during the parse phase.
    pub fn parse_errors(&self) -> &[ParseError] {
        &self.parse_errors
    }

    /// Package-wide definition table of the last bind.
    pub fn definitions(&self) -> &BTreeMap<Ident, DefOrigin> {
        &self.definitions
    }

    /// Exported names of the last bind.
    pub fn exports(&self) -> &BTreeSet<Ident> {
        &self.exports
    }

    /// Intrinsics referenced by the package in the last bind.
    pub fn intrinsics_used(&self) -> &BTreeSet<Ident> {
        &self.intrinsics_used
    }

    /// The intrinsic registry this binder consults.
    pub fn intrinsics(&self) -> &IntrinsicRegistry {
        &self.intrinsics
    }

    /// The targets this binder binds against.
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Emission order from the last bind. Only trustworthy when
    /// [`Binder::has_errors`] is false.
    pub fn order(&self) -> &[UnitId] {
        &self.order
    }

    /// Units of `pkg` in emission order.
    pub fn ordered_units<'p>(&self, pkg: &'p Package) -> Vec<&'p SourceUnit> {
        self.order.iter().map(|&id| pkg.unit(id)).collect()
    }

    /// The unit dependency graph, read-only, for external rendering.
    pub fn filedeps(&self) -> &DepGraph<UnitId> {
        &self.filedeps
    }

    /// GraphViz body describing the file dependency graph.
    ///
    /// Runtime-dereferenced edges are drawn soft (hollow arrow, translucent,
    /// no layout constraint); init-time edges are plain.
    pub fn filedep_dot(&self, pkg: &Package) -> String {
        let nodes: Vec<UnitId> = pkg.unit_ids().collect();
        self.filedeps.to_dot(
            Some(&nodes),
            |id| {
                let path = pkg.unit(id).path();
                let label = path.strip_prefix(pkg.dir()).unwrap_or(path);
                Some(format!(
                    "[label=\"{}\"]",
                    label.display().to_string().replace('"', "\\\"")
                ))
            },
            |_, _, kind| match kind {
                EdgeKind::Runtime => Some(
                    "[arrowhead=\"empty\", color=\"#00000022\", constraint=false]".to_string(),
                ),
                EdgeKind::Init => Some(String::new()),
            },
        )
    }

    /// Render every error as a report line (parse failures first).
    pub fn error_report(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.parse_errors.iter().map(|e| e.to_string()).collect();
        lines.extend(self.errors.iter().map(|e| e.to_string()));
        lines
    }

    // ---- bind phases -------------------------------------------------------

    fn bind(&mut self, pkg: &Package) {
        self.register_definitions(pkg);
        if self.should_stop() {
            return;
        }

        // Union of globals across every requested target: binding must
        // satisfy all of them simultaneously.
        let globals: HashSet<Ident> = self
            .targets
            .iter()
            .flat_map(|t| t.globals().iter().copied())
            .collect();

        self.resolve_references(pkg, &globals);
        if self.should_stop() {
            return;
        }

        self.check_unused();
        self.sort_units(pkg);
    }

    /// Phase 1: build the package-wide definition table.
    fn register_definitions(&mut self, pkg: &Package) {
        for id in pkg.unit_ids() {
            for (name, def) in pkg.unit(id).definitions() {
                if let Some(other) = self.definitions.get(name) {
                    // Duplicate: report and stop tracking this name, but keep
                    // registering the unit's other definitions.
                    self.errors.push(Diagnostic::new(
                        DiagnosticKind::DuplicateIdentifier,
                        format!("duplicate identifier `{}`; also defined at {}", name, other.loc),
                        def.loc.clone(),
                    ));
                    continue;
                }

                self.definitions.insert(
                    *name,
                    DefOrigin {
                        unit: id,
                        loc: def.loc.clone(),
                        refcount: 0,
                        exported: def.exported,
                    },
                );
                if def.exported {
                    self.exports.insert(*name);
                }
            }
        }
    }

    /// Phase 2+3: resolve references into graph edges, globals, intrinsics
    /// or undefined-reference errors.
    fn resolve_references(&mut self, pkg: &Package, globals: &HashSet<Ident>) {
        for id in pkg.unit_ids() {
            self.filedeps.add_node(id);

            for (name, sites) in pkg.unit(id).references() {
                let Some(first) = sites.first() else { continue };

                if let Some(def) = self.definitions.get_mut(name) {
                    // Intra-package reference: record a file-to-file edge.
                    def.refcount += 1;
                    let def_unit = def.unit;
                    if def_unit == id {
                        continue;
                    }

                    // An existing init edge already dominates; otherwise
                    // assume runtime and upgrade if any single site
                    // dereferences at init time.
                    if self.filedeps.edge(id, def_unit) != Some(EdgeKind::Init) {
                        let kind = if sites.iter().any(|s| s.init_scope) {
                            EdgeKind::Init
                        } else {
                            EdgeKind::Runtime
                        };
                        self.filedeps.set_edge(id, def_unit, kind);
                    }
                } else if globals.contains(name) {
                    // Environment-provided; accepted silently.
                } else if self.intrinsics.contains(*name) {
                    self.intrinsics_used.insert(*name);
                } else {
                    let mut diag = Diagnostic::new(
                        DiagnosticKind::UndefinedReference,
                        format!("`{}` is not defined", name),
                        first.loc.clone(),
                    );
                    if self.mode.verbose_hints {
                        for env in self.envs.envs_with_global(*name) {
                            diag = diag.with_detail(format!(
                                "Hint: \"{}\" target has {}",
                                env.name(),
                                name
                            ));
                        }
                    }
                    self.errors.push(diag);
                }
            }
        }
    }

    /// Phase 4: warn about definitions nobody references.
    fn check_unused(&mut self) {
        for (name, def) in &self.definitions {
            if def.refcount == 0 && !def.exported {
                self.warnings.push(Diagnostic::new(
                    DiagnosticKind::UnusedDefinition,
                    format!("`{}` defined but not used", name),
                    def.loc.clone(),
                ));
            }
        }
    }

    /// Phase 5: topological sort with cycle classification.
    fn sort_units(&mut self, pkg: &Package) {
        let graph = &self.filedeps;
        let definitions = &self.definitions;
        let errors = &mut self.errors;
        let warnings = &mut self.warnings;

        let order = graph.sort(|to, from, kind| {
            let unit1 = pkg.unit(from);
            let unit2 = pkg.unit(to);

            // Names each side references from the other, for the report.
            let names_between = |src: &SourceUnit, dst: UnitId| -> Vec<String> {
                src.references()
                    .keys()
                    .filter(|n| definitions.get(*n).is_some_and(|d| d.unit == dst))
                    .map(|n| format!("`{}`", n))
                    .collect()
            };
            let forward = names_between(unit1, to);
            let backward = names_between(unit2, from);

            let detail1 = format!(
                "{} references {} defined in {}.",
                unit1,
                fmt_list(&forward),
                unit2
            );
            let detail2 = format!(
                "{} references {} defined in {}.",
                unit2,
                fmt_list(&backward),
                unit1
            );

            // Fatal when either direction of the cycle is dereferenced at
            // init time, regardless of which edge the traversal closed on.
            let reverse = graph.edge(to, from);
            let init_cycle = kind == EdgeKind::Init || reverse == Some(EdgeKind::Init);

            if !init_cycle {
                // Likely fine: both sides defer the access until runtime.
                warnings.push(
                    Diagnostic::new(
                        DiagnosticKind::RuntimeCycle,
                        format!("possible mutual dependency with {}", unit1),
                        SrcLoc::file_only(unit2.path()),
                    )
                    .with_detail(detail1)
                    .with_detail(detail2),
                );
                true
            } else {
                errors.push(
                    Diagnostic::new(
                        DiagnosticKind::InitCycle,
                        format!("cyclic dependency with {}", unit1),
                        SrcLoc::file_only(unit2.path()),
                    )
                    .with_detail(detail1)
                    .with_detail(detail2),
                );
                false
            }
        });

        self.order = order;
    }
}

//! End-to-end pipeline tests against the public API, using a minimal
//! function-call frontend and a concatenating backend.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use lading::core::unit::{DefInfo, ParseError, ParsedModule, RefSite};
use lading::ops::{build, build_and_watch, BuildError, CodegenBackend, Destination, GeneratedCode};
use lading::{
    BindMode, Binder, DiagnosticKind, EnvRegistry, Ident, IntrinsicRegistry, Package, ParseOutput,
    Parser, SourceUnit, SrcLoc, Target, TargetOptions,
};

/// Route build logging through `RUST_LOG` when debugging these tests.
fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Recognizes `function name(...)` definitions (exported when the name is
/// capitalized) and bare `name()` calls as references. A call at the left
/// margin runs at module init; an indented call is deferred.
struct ToyParser;

impl Parser for ToyParser {
    fn parse(&self, file: &Path, source: &str) -> Result<ParseOutput, ParseError> {
        let mut definitions = BTreeMap::new();
        let mut references: BTreeMap<Ident, Vec<RefSite>> = BTreeMap::new();

        for (i, raw) in source.lines().enumerate() {
            let lineno = (i + 1) as u32;
            let line = raw.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }

            if let Some(rest) = line.strip_prefix("function ") {
                let name = rest.split('(').next().unwrap_or("").trim();
                if name.is_empty() || !is_ident(name) {
                    return Err(ParseError {
                        file: file.to_path_buf(),
                        message: format!("malformed function declaration: {}", line),
                        loc: Some(SrcLoc::new(file, lineno, 0)),
                    });
                }
                let exported = name.starts_with(|c: char| c.is_ascii_uppercase());
                definitions.insert(
                    Ident::new(name),
                    DefInfo {
                        loc: SrcLoc::new(file, lineno, 9),
                        exported,
                    },
                );
            } else if let Some(name) = line.strip_suffix("()") {
                if !is_ident(name) {
                    continue;
                }
                let init_scope = !raw.starts_with(char::is_whitespace);
                references.entry(Ident::new(name)).or_default().push(RefSite {
                    loc: SrcLoc::new(file, lineno, 0),
                    init_scope,
                });
            }
        }

        Ok(ParseOutput {
            module: ParsedModule(Box::new(source.to_string())),
            definitions,
            references,
        })
    }
}

fn is_ident(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

struct ConcatBackend;

impl CodegenBackend for ConcatBackend {
    fn assemble(&self, units: &[&SourceUnit], _target: &Target) -> Result<ParsedModule> {
        let mut text = String::new();
        for unit in units {
            if let Some(source) = unit.module().and_then(|m| m.0.downcast_ref::<String>()) {
                text.push_str(source);
            }
        }
        Ok(ParsedModule(Box::new(text)))
    }

    fn optimize(&self, program: ParsedModule, _target: &Target) -> Result<ParsedModule> {
        Ok(program)
    }

    fn generate(&self, program: &ParsedModule, target: &Target) -> Result<GeneratedCode> {
        Ok(GeneratedCode {
            code: program.0.downcast_ref::<String>().cloned().unwrap_or_default(),
            source_map: target.source_map().then(|| "{}".to_string()),
        })
    }
}

fn write_pkg(dir: &Path, files: &[(&str, &str)]) {
    for (name, content) in files {
        std::fs::write(dir.join(name), content).unwrap();
    }
}

fn new_binder(envs: &[&[&str]], mode: BindMode) -> Binder {
    let registry = EnvRegistry::standard();
    let targets = envs
        .iter()
        .map(|e| Target::new(&registry, e, None, TargetOptions::default()).unwrap())
        .collect();
    Binder::new(targets, registry, IntrinsicRegistry::standard(), mode).unwrap()
}

#[test]
fn test_clean_package_builds_in_dependency_order() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    write_pkg(
        tmp.path(),
        &[
            (
                "app.js",
                "function Main() {\n  helper()\n  assert()\n}\nMain()\n",
            ),
            ("lib.js", "function helper() {\n  setTimeout()\n}\n"),
        ],
    );

    let mut pkg = Package::discover(tmp.path()).unwrap();
    let mut binder = new_binder(&[&["nodejs"]], BindMode::default());
    let target = binder.targets()[0].clone();

    let outcome = build(
        &mut pkg,
        &mut binder,
        &ToyParser,
        &ConcatBackend,
        &[Destination::in_memory(target)],
    )
    .unwrap();

    assert!(outcome.changed);
    // app.js depends on lib.js, so lib.js is emitted first.
    assert!(outcome.order[0].ends_with("lib.js"));
    assert!(outcome.order[1].ends_with("app.js"));
    // The assert intrinsic was spliced in ahead of package code.
    let code = &outcome.products[0].generated.code;
    assert!(code.contains("assert"));
    assert!(code.find("function helper").unwrap() < code.find("function Main").unwrap());
    // Capitalized definitions are exported.
    assert!(outcome.exports.contains(&Ident::new("Main")));
    // Graph description names the units.
    assert!(outcome.filedep_dot.contains("app.js"));
}

#[test]
fn test_union_of_targets_binds_what_neither_alone_would() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    write_pkg(
        tmp.path(),
        &[(
            "app.js",
            "function Main() {\n  window()\n  require()\n}\n",
        )],
    );

    // nodejs alone lacks `window`.
    let mut pkg = Package::discover(tmp.path()).unwrap();
    let mut binder = new_binder(&[&["nodejs"]], BindMode::default());
    let target = binder.targets()[0].clone();
    let err = build(
        &mut pkg,
        &mut binder,
        &ToyParser,
        &ConcatBackend,
        &[Destination::in_memory(target)],
    )
    .unwrap_err();
    let build_err = err.downcast_ref::<BuildError>().unwrap();
    assert!(build_err.first.contains("`window` is not defined"));

    // nodejs + browser together cover both references.
    let mut pkg = Package::discover(tmp.path()).unwrap();
    let mut binder = new_binder(&[&["nodejs"], &["browser"]], BindMode::default());
    let targets: Vec<Destination> = binder
        .targets()
        .iter()
        .cloned()
        .map(Destination::in_memory)
        .collect();
    let outcome = build(&mut pkg, &mut binder, &ToyParser, &ConcatBackend, &targets).unwrap();
    assert_eq!(outcome.products.len(), 2);
}

#[test]
fn test_init_cycle_fails_runtime_cycle_warns() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    write_pkg(
        tmp.path(),
        &[
            ("a.js", "function Alpha() {\n}\nbeta()\n"),
            ("b.js", "function beta() {\n}\nAlpha()\n"),
        ],
    );

    let mut pkg = Package::discover(tmp.path()).unwrap();
    let mut binder = new_binder(&[&["unknown"]], BindMode::default());
    let target = binder.targets()[0].clone();
    let err = build(
        &mut pkg,
        &mut binder,
        &ToyParser,
        &ConcatBackend,
        &[Destination::in_memory(target.clone())],
    )
    .unwrap_err();
    assert!(err.to_string().contains("cyclic dependency"));

    // The same shape with deferred references only warns.
    write_pkg(
        tmp.path(),
        &[
            ("a.js", "function Alpha() {\n  beta()\n}\n"),
            ("b.js", "function beta() {\n  Alpha()\n}\n"),
        ],
    );
    let mut pkg = Package::discover(tmp.path()).unwrap();
    let mut binder = new_binder(&[&["unknown"]], BindMode::default());
    let outcome = build(
        &mut pkg,
        &mut binder,
        &ToyParser,
        &ConcatBackend,
        &[Destination::in_memory(target)],
    )
    .unwrap();
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.warnings[0].kind, DiagnosticKind::RuntimeCycle);
    assert_eq!(outcome.order.len(), 2);
}

#[test]
fn test_watch_mode_picks_up_edits() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    write_pkg(tmp.path(), &[("app.js", "function Main() {\n}\n")]);

    let pkg = Package::discover(tmp.path()).unwrap();
    let binder = new_binder(
        &[&["unknown"]],
        BindMode {
            incremental: true,
            ..Default::default()
        },
    );
    let target = binder.targets()[0].clone();

    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = build_and_watch(
        pkg,
        binder,
        Arc::new(ToyParser),
        Arc::new(ConcatBackend),
        vec![Destination::in_memory(target)],
        Duration::from_millis(25),
        move |outcome| {
            tx.send(outcome.map(|o| o.exports.clone())).unwrap();
        },
    )
    .unwrap();

    let initial = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
    assert!(initial.contains(&Ident::new("Main")));

    std::thread::sleep(Duration::from_millis(50));
    std::fs::write(
        tmp.path().join("more.js"),
        "function Extra() {\n}\n",
    )
    .unwrap();

    let rebuilt = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
    assert!(rebuilt.contains(&Ident::new("Extra")));
    watcher.close().unwrap();
}

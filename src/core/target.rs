//! Build targets and target environments.
//!
//! A [`TargetEnv`] is a named bundle of globally available identifiers with an
//! optional base environment (e.g. `nodejs` extends `commonjs` extends
//! `unknown`). A [`Target`] is an immutable description of one output: the
//! requested environments, the language level, and compilation flags.
//!
//! Environment and level validation happens at construction time, never at
//! bind time; an unknown name fails fast with the list of acceptable values.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::util::{fmt_list, Ident};

/// Error constructing a [`Target`] or [`EnvRegistry`] entry.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum TargetError {
    #[error("unknown environment \"{name}\"; acceptable values: {}", fmt_list(.valid))]
    #[diagnostic(code(lading::target::unknown_env))]
    UnknownEnvironment { name: String, valid: Vec<String> },

    #[error("unknown ES specification \"{name}\"; acceptable values: {}", fmt_list(.valid))]
    #[diagnostic(code(lading::target::unknown_es_spec))]
    UnknownEsSpec { name: String, valid: Vec<String> },

    #[error("environment \"{name}\" is already defined")]
    #[diagnostic(code(lading::target::duplicate_env))]
    DuplicateEnvironment { name: String },
}

/// ECMAScript language level for an output.
///
/// Shorthand aliases (`es6`, `es9`, `latest`, ...) resolve to canonical
/// levels, the same way compiler standards parse in C build tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum EsSpec {
    Es5,
    Es2015,
    Es2016,
    Es2017,
    #[default]
    EsNext,
}

impl EsSpec {
    /// Numeric edition (5 through 9), useful for capability comparisons.
    pub fn edition(&self) -> u8 {
        match self {
            EsSpec::Es5 => 5,
            EsSpec::Es2015 => 6,
            EsSpec::Es2016 => 7,
            EsSpec::Es2017 => 8,
            EsSpec::EsNext => 9,
        }
    }

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EsSpec::Es5 => "es5",
            EsSpec::Es2015 => "es2015",
            EsSpec::Es2016 => "es2016",
            EsSpec::Es2017 => "es2017",
            EsSpec::EsNext => "esnext",
        }
    }

    /// All canonical names.
    pub fn all() -> &'static [&'static str] {
        &["es5", "es2015", "es2016", "es2017", "esnext"]
    }
}

impl FromStr for EsSpec {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "es5" => Ok(EsSpec::Es5),
            "es2015" | "es6" => Ok(EsSpec::Es2015),
            "es2016" | "es7" => Ok(EsSpec::Es2016),
            "es2017" | "es8" => Ok(EsSpec::Es2017),
            "esnext" | "es2018" | "es9" | "latest" => Ok(EsSpec::EsNext),
            _ => Err(TargetError::UnknownEsSpec {
                name: s.to_string(),
                valid: EsSpec::all().iter().map(|s| s.to_string()).collect(),
            }),
        }
    }
}

impl fmt::Display for EsSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named environment: its own globals plus an optional base environment.
#[derive(Debug, Clone)]
pub struct TargetEnv {
    name: String,
    globals: HashSet<Ident>,
    base: Option<String>,
}

impl TargetEnv {
    /// Environment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This environment's own globals, excluding inherited ones.
    pub fn own_globals(&self) -> &HashSet<Ident> {
        &self.globals
    }

    /// Name of the base environment, if any.
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }
}

/// Registry of known target environments.
///
/// Built once at startup and passed explicitly into [`Target`] construction
/// and the binder, so independent builds (and tests) never share mutable
/// global state.
#[derive(Debug, Clone)]
pub struct EnvRegistry {
    // BTreeMap keeps hint iteration deterministic.
    envs: BTreeMap<String, TargetEnv>,
}

impl EnvRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        EnvRegistry {
            envs: BTreeMap::new(),
        }
    }

    /// The standard registry: `unknown`, `browser`, `commonjs`, `nodejs`.
    pub fn standard() -> Self {
        let mut reg = EnvRegistry::empty();

        // unknown is the lowest common denominator of all targets and serves
        // as the base for the more specific ones.
        reg.insert("unknown", None, nameset(UNKNOWN_GLOBALS));
        reg.insert("browser", Some("unknown"), nameset(BROWSER_GLOBALS));
        reg.insert("commonjs", Some("unknown"), nameset(COMMONJS_GLOBALS));
        reg.insert("nodejs", Some("commonjs"), nameset(NODEJS_GLOBALS));

        reg
    }

    fn insert(&mut self, name: &str, base: Option<&str>, globals: Vec<Ident>) {
        self.envs.insert(
            name.to_string(),
            TargetEnv {
                name: name.to_string(),
                globals: globals.into_iter().collect(),
                base: base.map(|b| b.to_string()),
            },
        );
    }

    /// Define a new environment.
    pub fn define(
        &mut self,
        name: &str,
        base: Option<&str>,
        globals: impl IntoIterator<Item = Ident>,
    ) -> Result<(), TargetError> {
        if self.envs.contains_key(name) {
            return Err(TargetError::DuplicateEnvironment {
                name: name.to_string(),
            });
        }
        if let Some(base) = base {
            if !self.envs.contains_key(base) {
                return Err(TargetError::UnknownEnvironment {
                    name: base.to_string(),
                    valid: self.names().map(|s| s.to_string()).collect(),
                });
            }
        }
        self.insert(name, base, globals.into_iter().collect());
        Ok(())
    }

    /// Look up an environment by name.
    pub fn get(&self, name: &str) -> Option<&TargetEnv> {
        self.envs.get(name)
    }

    /// Names of all known environments, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.envs.keys().map(|k| k.as_str())
    }

    /// Union of globals for `name` and its whole base chain.
    pub fn resolved_globals(&self, name: &str) -> Result<HashSet<Ident>, TargetError> {
        let mut globals = HashSet::new();
        let mut current = Some(name);
        while let Some(env_name) = current {
            let env = self
                .get(env_name)
                .ok_or_else(|| TargetError::UnknownEnvironment {
                    name: env_name.to_string(),
                    valid: self.names().map(|s| s.to_string()).collect(),
                })?;
            globals.extend(env.globals.iter().copied());
            current = env.base();
        }
        Ok(globals)
    }

    /// Environments whose *own* global set contains `name`.
    ///
    /// Used for "did you mean target X" hints on undefined references.
    pub fn envs_with_global(&self, name: Ident) -> impl Iterator<Item = &TargetEnv> {
        self.envs.values().filter(move |env| env.globals.contains(&name))
    }
}

impl Default for EnvRegistry {
    fn default() -> Self {
        EnvRegistry::standard()
    }
}

/// Flags for [`Target`] construction.
#[derive(Debug, Clone, Default)]
pub struct TargetOptions {
    /// Optimization level; 0 disables the optimize pipeline step.
    pub opt_level: u8,
    /// Debug build: intrinsics generate checked variants.
    pub debug: bool,
    /// Emit a source map alongside generated code.
    pub source_map: bool,
    /// Extra global identifiers beyond the environments' sets.
    pub extra_globals: Vec<String>,
}

/// The environment some code is being built for.
///
/// Immutable once constructed. The global set is the union over every
/// requested environment's full inheritance chain plus any extra globals.
#[derive(Debug, Clone)]
pub struct Target {
    envs: Vec<String>,
    es_spec: EsSpec,
    globals: HashSet<Ident>,
    opt_level: u8,
    debug: bool,
    source_map: bool,
}

impl Target {
    /// Construct a target for the given environments and language level.
    ///
    /// An empty environment list means `unknown`. A `None` level means the
    /// latest specification. Unknown environment or level names fail here,
    /// not at bind time.
    pub fn new(
        registry: &EnvRegistry,
        envs: &[&str],
        es_spec: Option<&str>,
        options: TargetOptions,
    ) -> Result<Self, TargetError> {
        let env_names: Vec<String> = if envs.is_empty() {
            vec!["unknown".to_string()]
        } else {
            envs.iter().map(|e| e.to_string()).collect()
        };

        let es_spec = match es_spec {
            Some(s) => s.parse()?,
            None => EsSpec::EsNext,
        };

        let mut globals: HashSet<Ident> = options
            .extra_globals
            .iter()
            .map(|g| Ident::new(g))
            .collect();
        for env in &env_names {
            globals.extend(registry.resolved_globals(env)?);
        }

        Ok(Target {
            envs: env_names,
            es_spec,
            globals,
            opt_level: options.opt_level,
            debug: options.debug,
            source_map: options.source_map,
        })
    }

    /// Requested environment names.
    pub fn envs(&self) -> &[String] {
        &self.envs
    }

    /// Whether this target includes the named environment.
    pub fn has_env(&self, name: &str) -> bool {
        self.envs.iter().any(|e| e == name)
    }

    /// Language level.
    pub fn es_spec(&self) -> EsSpec {
        self.es_spec
    }

    /// Full global identifier set.
    pub fn globals(&self) -> &HashSet<Ident> {
        &self.globals
    }

    /// Optimization level.
    pub fn opt_level(&self) -> u8 {
        self.opt_level
    }

    /// Debug build?
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Source-map emission requested?
    pub fn source_map(&self) -> bool {
        self.source_map
    }

    /// Stable key identifying this target's code-shape inputs.
    ///
    /// Two targets with equal keys generate identical intrinsic source, so
    /// the intrinsic registry memoizes per key.
    pub fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.envs.join(","),
            self.es_spec,
            if self.debug { "debug" } else { "release" }
        )
    }
}

/// Parse a whitespace/comment-structured name list into idents.
///
/// Lines starting with `//` are ignored; remaining whitespace-separated words
/// become identifiers.
fn nameset(s: &str) -> Vec<Ident> {
    s.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("//"))
        .flat_map(|line| line.split_whitespace())
        .map(Ident::new)
        .collect()
}

const UNKNOWN_GLOBALS: &str = "
    // Value properties
    Infinity NaN undefined

    // Function properties
    eval isFinite isNaN parseFloat parseInt decodeURI decodeURIComponent
    encodeURI encodeURIComponent escape unescape console uneval
    clearTimeout setTimeout clearInterval setInterval

    // Fundamental objects
    Object Function Boolean Symbol Error EvalError InternalError RangeError
    ReferenceError SyntaxError TypeError URIError

    // Numbers and dates
    Number Math Date

    // Text processing
    String RegExp

    // Indexed collections
    Array Int8Array Uint8Array Uint8ClampedArray Int16Array Uint16Array
    Int32Array Uint32Array Float32Array Float64Array

    // Keyed collections
    Map Set WeakMap WeakSet

    // Vector collections
    SIMD

    // Structured data
    JSON ArrayBuffer DataView Atomics SharedArrayBuffer

    // Control abstraction objects
    Promise Generator GeneratorFunction AsyncFunction

    // Reflection
    Reflect Proxy

    // Internationalization
    Intl

    // WebAssembly
    WebAssembly

    // module wrapper
    module exports
";

const BROWSER_GLOBALS: &str = "
    window document location atob btoa
    TextDecoder TextEncoder
    WebSocket
    Worker
";

const COMMONJS_GLOBALS: &str = "
    require
";

const NODEJS_GLOBALS: &str = "
    Buffer
";

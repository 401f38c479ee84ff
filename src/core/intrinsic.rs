//! Built-in runtime helpers.
//!
//! An intrinsic is a helper the bundler can inject into output, but only when
//! a reference to its name is otherwise unresolved: not defined in the
//! package and not provided by any requested target environment. Generated
//! source depends on the target (debug vs release, nodejs vs generic), so it
//! is memoized per (name, target key).

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use thiserror::Error;

use crate::core::target::Target;
use crate::util::Ident;

/// Generator producing helper source text for a given target.
pub type IntrinsicGen = Box<dyn Fn(&Target) -> String + Send + Sync>;

/// Error registering an intrinsic.
#[derive(Debug, Error)]
pub enum IntrinsicError {
    #[error("intrinsic `{name}` is already defined")]
    AlreadyDefined { name: Ident },
}

/// A named built-in helper.
pub struct Intrinsic {
    name: Ident,
    gen: IntrinsicGen,
}

impl Intrinsic {
    /// Helper name, as referenced in source.
    pub fn name(&self) -> Ident {
        self.name
    }
}

impl fmt::Debug for Intrinsic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Intrinsic").field("name", &self.name).finish()
    }
}

/// Registry of built-in helpers.
///
/// Like [`crate::core::target::EnvRegistry`], this is write-once-at-startup
/// configuration passed explicitly into the binder, not ambient global state.
#[derive(Debug, Default)]
pub struct IntrinsicRegistry {
    intrinsics: HashMap<Ident, Intrinsic>,
    // Generated source per (name, target cache key).
    cache: Mutex<HashMap<(Ident, String), String>>,
}

impl IntrinsicRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        IntrinsicRegistry::default()
    }

    /// The standard registry: `assert` and `DEBUG`.
    pub fn standard() -> Self {
        let mut reg = IntrinsicRegistry::empty();
        reg.define("assert", Box::new(gen_assert))
            .unwrap_or_else(|_| unreachable!("empty registry"));
        reg.define("DEBUG", Box::new(gen_debug))
            .unwrap_or_else(|_| unreachable!("empty registry"));
        reg
    }

    /// Register a helper under `name`.
    pub fn define(&mut self, name: &str, gen: IntrinsicGen) -> Result<(), IntrinsicError> {
        let name = Ident::new(name);
        if self.intrinsics.contains_key(&name) {
            return Err(IntrinsicError::AlreadyDefined { name });
        }
        self.intrinsics.insert(name, Intrinsic { name, gen });
        Ok(())
    }

    /// Whether `name` is a known intrinsic.
    pub fn contains(&self, name: Ident) -> bool {
        self.intrinsics.contains_key(&name)
    }

    /// Generate (or reuse) the helper source for `name` under `target`.
    ///
    /// Returns `None` when `name` is not a registered intrinsic.
    pub fn source_for(&self, name: Ident, target: &Target) -> Option<String> {
        let intrinsic = self.intrinsics.get(&name)?;
        let key = (name, target.cache_key());

        let mut cache = self.cache.lock().unwrap();
        if let Some(cached) = cache.get(&key) {
            return Some(cached.clone());
        }
        let source = (intrinsic.gen)(target);
        cache.insert(key, source.clone());
        Some(source)
    }
}

fn gen_debug(target: &Target) -> String {
    format!(
        "const DEBUG = {}",
        if target.debug() { "true" } else { "false" }
    )
}

fn gen_assert(target: &Target) -> String {
    if !target.debug() {
        return "const assert = () => {}".to_string();
    }

    let mut envcode = "";
    if target.has_env("nodejs") {
        if target.envs().len() == 1 {
            return "var assert = require(\"assert\")".to_string();
        }
        envcode = "(typeof require != \"undefined\" && require(\"assert\")) ||";
    }

    format!(
        r#"
var assert = {envcode} function(cond, message) {{
  if (!cond) {{
    var e
    if (!message) {{
      e = new Error()
      message = 'Assertion failed ' + e.stack.split('\n')[2].trim()
    }}
    if (typeof AssertionError == 'undefined') {{
      e = new Error(message)
      e.name = 'AssertionError'
    }} else {{
      e = new AssertionError(message)
    }}
    try {{
      var s = e.stack.split('\n')
      s.splice(1,1)
      e.stack = s.join('\n')
    }} catch (_) {{}}
    throw e;
  }}
}}"#
    )
}

//! Source units and the parser collaborator contract.
//!
//! A [`SourceUnit`] wraps one file's parsed representation together with the
//! two tables the binder consumes: top-level definitions this unit
//! introduces, and unresolved identifier references it makes. Both tables are
//! rebuilt atomically on every (re)parse; a unit is never left with a mix of
//! old and new entries.
//!
//! Parsing itself is owned by an external subsystem behind the [`Parser`]
//! trait. The parsed tree is opaque to the core; only the definition and
//! reference tables are inspected here.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use thiserror::Error;

use crate::util::hash::sha256_bytes;
use crate::util::{Ident, SrcLoc};

/// Stable handle for a unit within its package (index into the unit list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(pub usize);

/// An opaque parsed module tree, owned by the external parser subsystem.
pub struct ParsedModule(pub Box<dyn Any + Send + Sync>);

impl fmt::Debug for ParsedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ParsedModule(..)")
    }
}

/// A top-level definition reported by the parser.
#[derive(Debug, Clone)]
pub struct DefInfo {
    /// Where the definition appears.
    pub loc: SrcLoc,
    /// Whether the definition is exported from the package (derived from a
    /// naming convention or an explicit marker; the parser decides).
    pub exported: bool,
}

/// One use of an unresolved identifier.
#[derive(Debug, Clone)]
pub struct RefSite {
    /// Where the reference appears.
    pub loc: SrcLoc,
    /// True when the enclosing scope is top-level, i.e. the reference is
    /// dereferenced at module-init time rather than inside a deferred scope.
    pub init_scope: bool,
}

/// Everything the parser reports for one unit.
#[derive(Debug)]
pub struct ParseOutput {
    /// The annotated tree, passed through to the codegen backend untouched.
    pub module: ParsedModule,
    /// Top-level definitions by name.
    pub definitions: BTreeMap<Ident, DefInfo>,
    /// Unresolved references by name; every site is recorded, with its scope.
    pub references: BTreeMap<Ident, Vec<RefSite>>,
}

/// A parse failure in one unit.
#[derive(Debug, Error)]
#[error("{file}: {message}")]
pub struct ParseError {
    pub file: PathBuf,
    pub message: String,
    pub loc: Option<SrcLoc>,
}

/// The external parsing subsystem.
///
/// Implementations must report top-level definitions with their export flag
/// and every unresolved identifier use together with whether its enclosing
/// scope is top-level or nested/deferred.
pub trait Parser: Send + Sync {
    fn parse(&self, file: &Path, source: &str) -> Result<ParseOutput, ParseError>;
}

/// Outcome of re-parsing a unit in incremental mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// The unit was (re)parsed and its tables replaced.
    Parsed,
    /// The content fingerprint matched; existing tables were reused as-is.
    Unchanged,
}

/// One source file's parsed, bound representation. Identity is the file path.
#[derive(Debug)]
pub struct SourceUnit {
    path: PathBuf,
    module: Option<ParsedModule>,
    definitions: BTreeMap<Ident, DefInfo>,
    references: BTreeMap<Ident, Vec<RefSite>>,
    incremental: bool,
    // Content fingerprint of the last parsed version; only tracked when
    // incremental parsing is enabled.
    version: Option<String>,
}

impl SourceUnit {
    /// Create an unparsed unit for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SourceUnit {
            path: path.into(),
            module: None,
            definitions: BTreeMap::new(),
            references: BTreeMap::new(),
            incremental: false,
            version: None,
        }
    }

    /// Turn on incremental parse support.
    ///
    /// Must happen before the first parse; enabling it afterwards would leave
    /// the unit without a fingerprint for content it already holds.
    pub fn enable_incremental(&mut self) -> Result<()> {
        if !self.incremental {
            if self.module.is_some() {
                bail!(
                    "cannot enable incremental parsing for {}: already parsed",
                    self.path.display()
                );
            }
            self.incremental = true;
        }
        Ok(())
    }

    /// File path identifying this unit.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Content fingerprint of the current parse generation, when known.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Definitions this unit introduces at top level.
    pub fn definitions(&self) -> &BTreeMap<Ident, DefInfo> {
        &self.definitions
    }

    /// Unresolved references within this unit.
    pub fn references(&self) -> &BTreeMap<Ident, Vec<RefSite>> {
        &self.references
    }

    /// The opaque parsed tree, when parsed.
    pub fn module(&self) -> Option<&ParsedModule> {
        self.module.as_ref()
    }

    /// Read the unit from disk and parse it.
    ///
    /// In incremental mode the raw content is fingerprinted first; when the
    /// fingerprint matches the last successfully parsed version the existing
    /// tables are reused verbatim and no parse work happens. A version that
    /// failed to parse is never recorded, so it cannot match later.
    pub fn parse(&mut self, parser: &dyn Parser) -> Result<ParseState, ParseError> {
        let bytes = std::fs::read(&self.path).map_err(|e| ParseError {
            file: self.path.clone(),
            message: format!("failed to read source: {}", e),
            loc: None,
        })?;

        let mut fingerprint = None;
        if self.incremental {
            let version = sha256_bytes(&bytes);
            if self.module.is_some() && self.version.as_deref() == Some(version.as_str()) {
                return Ok(ParseState::Unchanged);
            }
            fingerprint = Some(version);
        }

        let source = String::from_utf8(bytes).map_err(|e| ParseError {
            file: self.path.clone(),
            message: format!("source is not valid UTF-8: {}", e),
            loc: None,
        })?;

        let output = parser.parse(&self.path, &source)?;

        // Replace wholesale; a failed parse above leaves the previous
        // generation fully intact. The fingerprint is committed only now,
        // so content that failed to parse is re-attempted on the next pass
        // instead of matching as "unchanged" against stale tables.
        if let Some(version) = fingerprint {
            self.version = Some(version);
        }
        self.module = Some(output.module);
        self.definitions = output.definitions;
        self.references = output.references;

        Ok(ParseState::Parsed)
    }
}

impl fmt::Display for SourceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

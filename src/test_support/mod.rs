//! Test utilities for lading unit tests.
//!
//! Provides a tiny line-oriented stand-in for the external parser so binder
//! behavior can be exercised without a real JavaScript frontend.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::unit::{DefInfo, ParseError, ParseOutput, ParsedModule, Parser, RefSite};
use crate::util::{Ident, SrcLoc};

/// Line-oriented fixture parser.
///
/// Directives, one per line (1-based line numbers become locations):
///
/// - `def NAME`: top-level definition; exported when NAME starts upper-case
/// - `export def NAME`: explicitly exported definition
/// - `use NAME`: reference from a nested, deferred scope
/// - `init NAME`: reference at top-level/init scope
/// - `!error MESSAGE`: fail parsing with MESSAGE
/// - `# ...` and blank lines are ignored
pub struct FixtureParser;

impl Parser for FixtureParser {
    fn parse(&self, file: &Path, source: &str) -> Result<ParseOutput, ParseError> {
        let mut definitions: BTreeMap<Ident, DefInfo> = BTreeMap::new();
        let mut references: BTreeMap<Ident, Vec<RefSite>> = BTreeMap::new();

        for (i, line) in source.lines().enumerate() {
            let line = line.trim();
            let lineno = (i + 1) as u32;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(message) = line.strip_prefix("!error") {
                return Err(ParseError {
                    file: file.to_path_buf(),
                    message: message.trim().to_string(),
                    loc: Some(SrcLoc::new(file, lineno, 0)),
                });
            }

            let loc = SrcLoc::new(file, lineno, 0);
            if let Some(name) = line.strip_prefix("export def ") {
                definitions.insert(Ident::new(name.trim()), DefInfo { loc, exported: true });
            } else if let Some(name) = line.strip_prefix("def ") {
                let name = name.trim();
                let exported = name.chars().next().is_some_and(|c| c.is_ascii_uppercase());
                definitions.insert(Ident::new(name), DefInfo { loc, exported });
            } else if let Some(name) = line.strip_prefix("use ") {
                references
                    .entry(Ident::new(name.trim()))
                    .or_default()
                    .push(RefSite {
                        loc,
                        init_scope: false,
                    });
            } else if let Some(name) = line.strip_prefix("init ") {
                references
                    .entry(Ident::new(name.trim()))
                    .or_default()
                    .push(RefSite {
                        loc,
                        init_scope: true,
                    });
            } else {
                return Err(ParseError {
                    file: file.to_path_buf(),
                    message: format!("unrecognized fixture directive: {}", line),
                    loc: Some(SrcLoc::new(file, lineno, 0)),
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

/// Write fixture files into `dir` and return their paths in the given order.
pub fn write_fixtures(dir: &Path, files: &[(&str, &str)]) -> Vec<PathBuf> {
    files
        .iter()
        .map(|(name, content)| {
            let path = dir.join(name);
            std::fs::write(&path, content).unwrap();
            path
        })
        .collect()
}

//! Package - an ordered set of source units rooted in one directory.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::core::unit::{SourceUnit, UnitId};
use crate::util::Ident;

/// A package: one directory of same-language source units.
///
/// The package owns its units; a unit never outlives its package. Unit order
/// is the order of addition (discovery order is sorted by path, so a
/// discovered package is deterministic).
#[derive(Debug)]
pub struct Package {
    dir: PathBuf,
    name: String,
    units: Vec<SourceUnit>,
    exports: BTreeSet<Ident>,
}

impl Package {
    /// Create an empty package rooted at `dir`.
    ///
    /// The package name is the directory basename; `.` resolves to the
    /// current directory's name.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let resolved = if dir == Path::new(".") {
            dir.canonicalize()
                .with_context(|| "failed to resolve current directory".to_string())?
        } else {
            dir.clone()
        };
        let name = resolved
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "package".to_string());

        Ok(Package {
            dir,
            name,
            units: Vec::new(),
            exports: BTreeSet::new(),
        })
    }

    /// Create a package and populate it with every `.js` file directly in
    /// `dir` (non-recursive), sorted by path.
    pub fn discover(dir: impl Into<PathBuf>) -> Result<Self> {
        let mut pkg = Package::new(dir)?;
        for path in source_files(&pkg.dir)? {
            pkg.add_file(path);
        }
        Ok(pkg)
    }

    /// Append a source file as a new unit.
    pub fn add_file(&mut self, path: impl Into<PathBuf>) {
        self.units.push(SourceUnit::new(path));
    }

    /// Package root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Package name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The units, in addition order (not emission order).
    pub fn units(&self) -> &[SourceUnit] {
        &self.units
    }

    /// Mutable access to the units, for the parse phase.
    pub fn units_mut(&mut self) -> &mut [SourceUnit] {
        &mut self.units
    }

    /// Unit ids in addition order.
    pub fn unit_ids(&self) -> impl Iterator<Item = UnitId> {
        (0..self.units.len()).map(UnitId)
    }

    /// Look up a unit by id.
    pub fn unit(&self, id: UnitId) -> &SourceUnit {
        &self.units[id.0]
    }

    /// Names exported by the package, as of the last successful bind.
    pub fn exports(&self) -> &BTreeSet<Ident> {
        &self.exports
    }

    /// Replace the derived export set (called by the binder).
    pub fn set_exports(&mut self, exports: BTreeSet<Ident>) {
        self.exports = exports;
    }

    /// Reconcile the unit list with the directory contents.
    ///
    /// Units whose files still exist are kept with their parse state intact;
    /// new files are appended; units whose files disappeared are dropped.
    /// Returns true when the unit set changed. Used by watch mode, where
    /// files may be added or removed between rebuilds.
    pub fn refresh(&mut self) -> Result<bool> {
        let current = source_files(&self.dir)?;
        let current_set: BTreeSet<PathBuf> = current.iter().cloned().collect();

        let before = self.units.len();
        self.units.retain(|u| current_set.contains(u.path()));
        let removed = before - self.units.len();

        let known: BTreeSet<PathBuf> = self.units.iter().map(|u| u.path().to_path_buf()).collect();
        let mut added = 0;
        for path in current {
            if !known.contains(&path) {
                self.add_file(path);
                added += 1;
            }
        }

        Ok(removed > 0 || added > 0)
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.name.replace('"', "\\\""))
    }
}

/// All `.js` files directly inside `dir`, sorted.
fn source_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("failed to scan {}", dir.display()))?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|e| e == "js") {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discover_sorted_js_only() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.js"), "").unwrap();
        std::fs::write(tmp.path().join("a.js"), "").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "").unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/c.js"), "").unwrap();

        let pkg = Package::discover(tmp.path()).unwrap();
        let names: Vec<String> = pkg
            .units()
            .iter()
            .map(|u| u.path().file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        // Sorted, top-level only, .js only.
        assert_eq!(names, vec!["a.js", "b.js"]);
    }

    #[test]
    fn test_refresh_tracks_added_and_removed() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.js"), "").unwrap();

        let mut pkg = Package::discover(tmp.path()).unwrap();
        assert_eq!(pkg.units().len(), 1);
        assert!(!pkg.refresh().unwrap());

        std::fs::write(tmp.path().join("b.js"), "").unwrap();
        assert!(pkg.refresh().unwrap());
        assert_eq!(pkg.units().len(), 2);

        std::fs::remove_file(tmp.path().join("a.js")).unwrap();
        assert!(pkg.refresh().unwrap());
        assert_eq!(pkg.units().len(), 1);
    }

    #[test]
    fn test_display_form() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("mylib");
        std::fs::create_dir(&dir).unwrap();
        let pkg = Package::new(&dir).unwrap();
        assert_eq!(pkg.name(), "mylib");
        assert_eq!(pkg.to_string(), "<mylib>");
    }
}

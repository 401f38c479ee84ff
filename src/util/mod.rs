//! Shared utilities: hashing, diagnostics, identifier interning.

pub mod diagnostic;
pub mod hash;
pub mod interning;

pub use diagnostic::{Diagnostic, DiagnosticKind, Severity, SrcLoc};
pub use interning::Ident;

/// Format a collection as a natural-language list, e.g. `a, b and c`.
pub fn fmt_list<I, T>(items: I) -> String
where
    I: IntoIterator<Item = T>,
    T: std::fmt::Display,
{
    let items: Vec<String> = items.into_iter().map(|i| i.to_string()).collect();
    match items.len() {
        0 => String::new(),
        1 => items.into_iter().next().unwrap(),
        n => format!("{} and {}", items[..n - 1].join(", "), items[n - 1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_list() {
        assert_eq!(fmt_list(Vec::<&str>::new()), "");
        assert_eq!(fmt_list(["x"]), "x");
        assert_eq!(fmt_list(["x", "y"]), "x and y");
        assert_eq!(fmt_list(["x", "y", "z"]), "x, y and z");
    }
}

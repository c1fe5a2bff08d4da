//! Executor error classification.
//!
//! Two keyword families scanned over exception text and captured output:
//! syntax-class failures are fixable by regenerating the code, locator-class
//! failures need a fresh observation of the page.

use crate::state::ErrorClass;

/// The two keyword sets, exposed for tests.
pub struct ErrorKeywords;

impl ErrorKeywords {
    pub const SYNTAX: &'static [&'static str] = &[
        "syntax error",
        "syntaxerror",
        "indentation",
        "name error",
        "nameerror",
        "type error",
        "typeerror",
        "attribute error",
        "attributeerror",
    ];

    pub const LOCATOR: &'static [&'static str] = &[
        "element not found",
        "elementnotfound",
        "timeout",
        "stale",
        "not interactable",
    ];
}

/// Scans combined runner output. Syntax keywords win over locator keywords
/// when both appear (a broken program explains everything downstream of it).
pub fn classify_output(text: &str) -> Option<ErrorClass> {
    let lower = text.to_lowercase();
    if ErrorKeywords::SYNTAX.iter().any(|k| lower.contains(k)) {
        return Some(ErrorClass::Syntax);
    }
    if ErrorKeywords::LOCATOR.iter().any(|k| lower.contains(k)) {
        return Some(ErrorClass::Locator);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: each family is detected case-insensitively; clean output
    /// classifies as none; syntax wins over locator.
    #[test]
    fn classification_rules() {
        assert_eq!(
            classify_output("Traceback...\nNameError: x is not defined"),
            Some(ErrorClass::Syntax)
        );
        assert_eq!(
            classify_output("SyntaxError: invalid syntax"),
            Some(ErrorClass::Syntax)
        );
        assert_eq!(
            classify_output("Element Not Found: #missing"),
            Some(ErrorClass::Locator)
        );
        assert_eq!(
            classify_output("wait timeout after 10s"),
            Some(ErrorClass::Locator)
        );
        assert_eq!(classify_output("scraped 20 rows, saved items.json"), None);
        assert_eq!(
            classify_output("TypeError after element not found"),
            Some(ErrorClass::Syntax)
        );
    }
}

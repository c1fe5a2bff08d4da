//! Dynamic-field type inference.
//!
//! Scraped values arrive as messy strings ("$1,234", "87%", "N/A"). Numbers
//! filter and sort in the store; strings don't. Inference is conservative:
//! anything that survives currency/percent/comma stripping and parses as a
//! float becomes a number, everything else stays a string, and null-likes are
//! dropped entirely.

/// Inferred value plus whether the raw text carried a trailing percent sign.
#[derive(Clone, Debug, PartialEq)]
pub enum DynValue {
    Number { value: f64, from_percent: bool },
    Str(String),
}

const NULL_LIKES: &[&str] = &["", "-", "--", "N/A", "null", "None"];

const CURRENCY_PREFIXES: &[char] = &['$', '¥', '€', '£'];

/// Infers a dynamic value from raw text. `None` means drop the field.
pub fn infer_dynamic_value(raw: &str) -> Option<DynValue> {
    let trimmed = raw.trim();
    if NULL_LIKES.iter().any(|n| trimmed.eq_ignore_ascii_case(n)) || trimmed.is_empty() {
        return None;
    }

    let mut candidate = trimmed;
    for prefix in CURRENCY_PREFIXES {
        if let Some(rest) = candidate.strip_prefix(*prefix) {
            candidate = rest.trim_start();
            break;
        }
    }
    let from_percent = candidate.ends_with('%');
    if from_percent {
        candidate = candidate[..candidate.len() - 1].trim_end();
    }
    let no_commas = candidate.replace(',', "");

    match no_commas.parse::<f64>() {
        Ok(value) if value.is_finite() => Some(DynValue::Number { value, from_percent }),
        _ => Some(DynValue::Str(trimmed.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: null-likes drop; case-insensitive.
    #[test]
    fn null_likes_dropped() {
        for raw in ["", "  ", "-", "--", "N/A", "n/a", "null", "NULL", "None", "none"] {
            assert_eq!(infer_dynamic_value(raw), None, "raw: {raw:?}");
        }
    }

    /// **Scenario**: currency prefixes, thousands commas, and percent suffixes
    /// strip before the parse; percent origin is remembered.
    #[test]
    fn numeric_forms() {
        assert_eq!(
            infer_dynamic_value("$1,234.5"),
            Some(DynValue::Number { value: 1234.5, from_percent: false })
        );
        assert_eq!(
            infer_dynamic_value("87%"),
            Some(DynValue::Number { value: 87.0, from_percent: true })
        );
        assert_eq!(
            infer_dynamic_value("¥ 2,000"),
            Some(DynValue::Number { value: 2000.0, from_percent: false })
        );
        assert_eq!(
            infer_dynamic_value("-3.5"),
            Some(DynValue::Number { value: -3.5, from_percent: false })
        );
    }

    /// **Scenario**: non-numeric text stays a string, original spelling kept.
    #[test]
    fn strings_preserved() {
        assert_eq!(
            infer_dynamic_value(" Action / Drama "),
            Some(DynValue::Str("Action / Drama".into()))
        );
        assert_eq!(
            infer_dynamic_value("12 monkeys"),
            Some(DynValue::Str("12 monkeys".into()))
        );
    }
}

//! FILENAME: filter-grammar/src/numeric.rs
//! Numeric filter expressions - the small text grammar users type into a
//! numeric column's filter field.
//!
//! Canonical grammar (whitespace tolerant, sign may be followed by a space):
//!
//! ```text
//! <n | >n | <=n | >=n | =n | lo<>hi | n (substring) | else (substring)
//! ```
//!
//! A bare number is a substring match against the stringified cell, not an
//! equality test. Unrecognized input falls back to case-insensitive
//! substring matching, so parsing never produces an error.

use serde::{Deserialize, Serialize};
use table_model::Value;

// ============================================================================
// FILTER DESCRIPTOR
// ============================================================================

/// Parsed form of a numeric filter expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum NumericFilter {
    LessThan { value: f64 },
    GreaterThan { value: f64 },
    LessOrEqual { value: f64 },
    GreaterOrEqual { value: f64 },
    Equal { value: f64 },
    /// Inclusive range; operands are reordered on parse so min <= max.
    Between { min: f64, max: f64 },
    /// Case-insensitive substring over the stringified cell.
    Contains { needle: String },
}

impl NumericFilter {
    /// Parses a filter expression. Total: unrecognized text becomes a
    /// substring filter.
    pub fn parse(input: &str) -> NumericFilter {
        let text = input.trim();

        // Range form first: `lo<>hi`.
        if let Some(pos) = text.find("<>") {
            let (lo, hi) = (&text[..pos], &text[pos + 2..]);
            if let (Some(a), Some(b)) = (parse_signed(lo), parse_signed(hi)) {
                return NumericFilter::Between {
                    min: a.min(b),
                    max: a.max(b),
                };
            }
        }

        // Relational prefixes, two-character operators before one-character.
        let prefixed: &[(&str, fn(f64) -> NumericFilter)] = &[
            ("<=", |v| NumericFilter::LessOrEqual { value: v }),
            (">=", |v| NumericFilter::GreaterOrEqual { value: v }),
            ("<", |v| NumericFilter::LessThan { value: v }),
            (">", |v| NumericFilter::GreaterThan { value: v }),
            ("=", |v| NumericFilter::Equal { value: v }),
        ];
        for (op, build) in prefixed {
            if let Some(rest) = text.strip_prefix(op) {
                if let Some(n) = parse_signed(rest) {
                    return build(n);
                }
                // An operator with a malformed operand is not a number
                // search; treat the whole input as text.
                return NumericFilter::Contains {
                    needle: text.to_lowercase(),
                };
            }
        }

        // Bare number: substring match against the canonical number string,
        // so "- 5" and "-5" produce identical filters.
        if let Some(n) = parse_signed(text) {
            return NumericFilter::Contains {
                needle: Value::number(n).to_display_string(),
            };
        }

        NumericFilter::Contains {
            needle: text.to_lowercase(),
        }
    }

    /// Evaluates the filter against a cell. Relational kinds cast the cell
    /// to a number; non-numeric cells never match them.
    pub fn matches(&self, cell: &Value) -> bool {
        match self {
            NumericFilter::Contains { needle } => cell
                .to_display_string()
                .to_lowercase()
                .contains(needle.as_str()),
            _ => {
                let n = match cell.as_number() {
                    Some(n) => n,
                    None => return false,
                };
                match self {
                    NumericFilter::LessThan { value } => n < *value,
                    NumericFilter::GreaterThan { value } => n > *value,
                    NumericFilter::LessOrEqual { value } => n <= *value,
                    NumericFilter::GreaterOrEqual { value } => n >= *value,
                    NumericFilter::Equal { value } => n == *value,
                    NumericFilter::Between { min, max } => n >= *min && n <= *max,
                    NumericFilter::Contains { .. } => unreachable!(),
                }
            }
        }
    }
}

/// Parses a number with an optional sign that may be separated from the
/// digits by whitespace (`"- 10"` is -10). Returns None for anything else.
fn parse_signed(text: &str) -> Option<f64> {
    let text = text.trim();
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => (-1.0, rest.trim_start()),
        None => match text.strip_prefix('+') {
            Some(rest) => (1.0, rest.trim_start()),
            None => (1.0, text),
        },
    };
    if digits.is_empty() || digits.starts_with('+') || digits.starts_with('-') {
        return None;
    }
    digits.parse::<f64>().ok().map(|n| sign * n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(v: f64) -> Value {
        Value::number(v)
    }

    #[test]
    fn less_than_excludes_the_bound() {
        let f = NumericFilter::parse("<10");
        assert!(f.matches(&n(5.0)));
        assert!(!f.matches(&n(10.0)));
        assert!(!f.matches(&n(15.0)));
    }

    #[test]
    fn greater_or_equal_includes_the_bound() {
        let f = NumericFilter::parse(">=10");
        assert!(!f.matches(&n(5.0)));
        assert!(f.matches(&n(10.0)));
        assert!(f.matches(&n(15.0)));
    }

    #[test]
    fn range_is_inclusive_and_reorders_operands() {
        let f = NumericFilter::parse("10<>20");
        assert!(f.matches(&n(10.0)));
        assert!(f.matches(&n(15.0)));
        assert!(f.matches(&n(20.0)));
        assert!(!f.matches(&n(9.0)));
        assert!(!f.matches(&n(21.0)));
        assert_eq!(NumericFilter::parse("20<>10"), f);
    }

    #[test]
    fn sign_with_space_parses_like_plain_sign() {
        assert_eq!(NumericFilter::parse("- 5"), NumericFilter::parse("-5"));
        assert_eq!(NumericFilter::parse("< - 10"), NumericFilter::parse("<-10"));
        assert!(NumericFilter::parse("<-10").matches(&n(-11.0)));
        assert!(!NumericFilter::parse("<-10").matches(&n(-10.0)));
    }

    #[test]
    fn bare_number_is_a_substring_match() {
        let f = NumericFilter::parse("5");
        assert!(f.matches(&n(5.0)));
        assert!(f.matches(&n(15.0)));
        assert!(f.matches(&n(50.0)));
        assert!(!f.matches(&n(12.0)));
    }

    #[test]
    fn unrecognized_text_falls_back_to_substring() {
        let f = NumericFilter::parse("Foo");
        assert_eq!(
            f,
            NumericFilter::Contains {
                needle: "foo".to_string()
            }
        );
        assert!(f.matches(&Value::text("FOOBAR")));
    }

    #[test]
    fn relational_kinds_reject_non_numeric_cells() {
        let f = NumericFilter::parse(">=10");
        assert!(!f.matches(&Value::text("ten")));
        assert!(!f.matches(&Value::Null));
        // Numeric text casts.
        assert!(f.matches(&Value::text("12")));
    }
}

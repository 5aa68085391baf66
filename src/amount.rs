//! Permissive parsing of monetary amounts returned by the VLM.
//!
//! The extraction prompt asks for plain JSON numbers without thousands
//! separators, but models still answer with `"5,000.00"`, `"₦ 1 200"` or
//! accounting-style `"(300.00)"` often enough that a strict decoder would
//! throw away good statements. A trailing minus (`"500-"`) is a debit, and a
//! comma after the last dot (`"1.200,50"`) is read as a decimal comma. Anything that cannot be read as a number
//! becomes `None` rather than an error.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

static RE_NON_NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9.,\-]").unwrap());

/// Parse a textual amount. Returns `None` for blanks, dashes and junk.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        return None;
    }

    let (mut negative, body) = match trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };

    let kept = RE_NON_NUMERIC.replace_all(body, "");
    let mut digits = kept.as_ref();
    if let Some(rest) = digits.strip_suffix('-') {
        if rest.contains('-') {
            return None;
        }
        negative = true;
        digits = rest;
    }
    if !digits.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalised = match (digits.rfind(','), digits.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => digits.replace('.', "").replace(',', "."),
        _ => digits.replace(',', ""),
    };
    let value = Decimal::from_str(&normalised).ok()?;
    Some(if negative { -value } else { value })
}

/// Convert a JSON number without going through `f64` arithmetic.
pub fn parse_amount_number(n: &serde_json::Number) -> Option<Decimal> {
    let text = n.to_string();
    if text.contains(['e', 'E']) {
        Decimal::from_scientific(&text).ok()
    } else {
        Decimal::from_str(&text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_separated() {
        assert_eq!(parse_amount("5000"), Some(Decimal::from(5000)));
        assert_eq!(parse_amount("45,000.50"), Some(Decimal::new(4500050, 2)));
        assert_eq!(parse_amount(" 1 200 "), Some(Decimal::from(1200)));
    }

    #[test]
    fn currency_and_accounting_negative() {
        assert_eq!(parse_amount("₦5,000.00"), Some(Decimal::new(500000, 2)));
        assert_eq!(parse_amount("(300.00)"), Some(Decimal::new(-30000, 2)));
        assert_eq!(parse_amount("-12.5"), Some(Decimal::new(-125, 1)));
    }

    #[test]
    fn junk_is_absent() {
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("-"), None);
        assert_eq!(parse_amount("null"), None);
        assert_eq!(parse_amount("n/a"), None);
        assert_eq!(parse_amount("1.2.3"), None);
    }

    #[test]
    fn trailing_minus_is_negative() {
        assert_eq!(parse_amount("500-"), Some(Decimal::from(-500)));
        assert_eq!(parse_amount("1,250.00 -"), Some(Decimal::new(-125000, 2)));
        assert_eq!(parse_amount("-500-"), None);
    }

    #[test]
    fn decimal_comma_after_last_dot() {
        assert_eq!(parse_amount("1.200,50"), Some(Decimal::new(120050, 2)));
        assert_eq!(parse_amount("12,5"), Some(Decimal::from(125)));
        assert_eq!(parse_amount("1,200.50"), Some(Decimal::new(120050, 2)));
    }

    #[test]
    fn json_numbers() {
        let n: serde_json::Number = serde_json::from_str("45000.25").unwrap();
        assert_eq!(parse_amount_number(&n), Some(Decimal::new(4500025, 2)));
        let n: serde_json::Number = serde_json::from_str("1e3").unwrap();
        assert_eq!(parse_amount_number(&n), Some(Decimal::from(1000)));
    }
}

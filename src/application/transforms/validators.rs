//! Format validator functions
//!
//! Each returns a boolean; a null input is simply invalid, never an error.

use regex::Regex;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;

use crate::domain::value_objects::Value;

use super::{TransformError, TransformResult};

fn input_string(args: &[Value]) -> Option<String> {
    if args[0].is_null() {
        None
    } else {
        Some(args[0].coerce_string())
    }
}

fn regex_of(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("validator pattern is well-formed"))
}

pub fn email(args: &[Value]) -> TransformResult {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = regex_of(&RE, r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$");
    Ok(Value::Bool(
        input_string(args).is_some_and(|s| re.is_match(&s)),
    ))
}

pub fn url(args: &[Value]) -> TransformResult {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = regex_of(&RE, r"^https?://[^\s/$.?#][^\s]*$");
    Ok(Value::Bool(
        input_string(args).is_some_and(|s| re.is_match(&s)),
    ))
}

/// International or local phone number: digits with optional `+`, spaces,
/// dashes and parentheses, 7 to 15 digits total
pub fn phone(args: &[Value]) -> TransformResult {
    let Some(input) = input_string(args) else {
        return Ok(Value::Bool(false));
    };
    let trimmed = input.trim();
    let valid_chars = trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'));
    let digits = trimmed.chars().filter(char::is_ascii_digit).count();
    let plus_ok = !trimmed.contains('+') || trimmed.starts_with('+');
    Ok(Value::Bool(
        valid_chars && plus_ok && (7..=15).contains(&digits),
    ))
}

pub fn uuid(args: &[Value]) -> TransformResult {
    Ok(Value::Bool(input_string(args).is_some_and(|s| {
        ::uuid::Uuid::parse_str(s.trim()).is_ok()
    })))
}

/// Luhn checksum over 12-19 digits; spaces and dashes are ignored
pub fn credit_card(args: &[Value]) -> TransformResult {
    let Some(input) = input_string(args) else {
        return Ok(Value::Bool(false));
    };
    let digits: Vec<u32> = input
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .map(|c| c.to_digit(10))
        .collect::<Option<Vec<_>>>()
        .unwrap_or_default();
    if !(12..=19).contains(&digits.len()) {
        return Ok(Value::Bool(false));
    }
    let checksum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    Ok(Value::Bool(checksum % 10 == 0))
}

pub fn ipv4(args: &[Value]) -> TransformResult {
    Ok(Value::Bool(input_string(args).is_some_and(|s| {
        s.trim().parse::<Ipv4Addr>().is_ok()
    })))
}

pub fn ipv6(args: &[Value]) -> TransformResult {
    Ok(Value::Bool(input_string(args).is_some_and(|s| {
        s.trim().parse::<Ipv6Addr>().is_ok()
    })))
}

/// `postal_code(input, country)` for the countries the platform ships with
pub fn postal_code(args: &[Value]) -> TransformResult {
    let Some(input) = input_string(args) else {
        return Ok(Value::Bool(false));
    };
    let country = args
        .get(1)
        .map(Value::coerce_string)
        .unwrap_or_default()
        .to_ascii_uppercase();
    let input = input.trim();

    static KR: OnceLock<Regex> = OnceLock::new();
    static US: OnceLock<Regex> = OnceLock::new();
    static GB: OnceLock<Regex> = OnceLock::new();
    static JP: OnceLock<Regex> = OnceLock::new();
    static DE: OnceLock<Regex> = OnceLock::new();
    static CA: OnceLock<Regex> = OnceLock::new();

    let matched = match country.as_str() {
        "KR" => regex_of(&KR, r"^\d{5}$").is_match(input),
        "US" => regex_of(&US, r"^\d{5}(-\d{4})?$").is_match(input),
        "GB" => regex_of(&GB, r"^[A-Za-z]{1,2}\d[A-Za-z\d]? ?\d[A-Za-z]{2}$").is_match(input),
        "JP" => regex_of(&JP, r"^\d{3}-?\d{4}$").is_match(input),
        "DE" => regex_of(&DE, r"^\d{5}$").is_match(input),
        "CA" => regex_of(&CA, r"^[A-Za-z]\d[A-Za-z] ?\d[A-Za-z]\d$").is_match(input),
        other => {
            return Err(TransformError::new(format!(
                "unsupported postal-code country '{}'",
                other
            )));
        }
    };
    Ok(Value::Bool(matched))
}

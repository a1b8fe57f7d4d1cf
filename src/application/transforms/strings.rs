//! String transform functions
//!
//! All functions coerce their primary input to a string (null stays null)
//! and never panic on malformed arguments.

use regex::Regex;

use crate::domain::value_objects::Value;

use super::{TransformError, TransformResult};

fn input_string(args: &[Value]) -> Option<String> {
    if args[0].is_null() {
        None
    } else {
        Some(args[0].coerce_string())
    }
}

fn arg_string(args: &[Value], idx: usize) -> String {
    args.get(idx).map(Value::coerce_string).unwrap_or_default()
}

pub fn upper(args: &[Value]) -> TransformResult {
    Ok(input_string(args).map_or(Value::Null, |s| Value::String(s.to_uppercase())))
}

pub fn lower(args: &[Value]) -> TransformResult {
    Ok(input_string(args).map_or(Value::Null, |s| Value::String(s.to_lowercase())))
}

pub fn trim(args: &[Value]) -> TransformResult {
    Ok(input_string(args).map_or(Value::Null, |s| Value::String(s.trim().to_string())))
}

/// `replace(input, pattern, replacement)` with a regex pattern
pub fn replace(args: &[Value]) -> TransformResult {
    let Some(input) = input_string(args) else {
        return Ok(Value::Null);
    };
    let pattern = arg_string(args, 1);
    let replacement = arg_string(args, 2);
    let re = Regex::new(&pattern)
        .map_err(|e| TransformError::new(format!("invalid pattern '{}': {}", pattern, e)))?;
    Ok(Value::String(re.replace_all(&input, replacement.as_str()).into_owned()))
}

pub fn split(args: &[Value]) -> TransformResult {
    let Some(input) = input_string(args) else {
        return Ok(Value::Null);
    };
    let separator = arg_string(args, 1);
    let parts: Vec<Value> = if separator.is_empty() {
        input.chars().map(|c| Value::String(c.to_string())).collect()
    } else {
        input
            .split(separator.as_str())
            .map(|p| Value::String(p.to_string()))
            .collect()
    };
    Ok(Value::Array(parts))
}

/// `join(array, separator)`; nulls inside the array are skipped
pub fn join(args: &[Value]) -> TransformResult {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Array(items) => {
            let separator = arg_string(args, 1);
            let joined = items
                .iter()
                .filter(|v| !v.is_null())
                .map(Value::coerce_string)
                .collect::<Vec<_>>()
                .join(&separator);
            Ok(Value::String(joined))
        }
        other => Err(TransformError::new(format!(
            "join expects an array, got {}",
            other
        ))),
    }
}

fn pad(args: &[Value], left: bool) -> TransformResult {
    let Some(input) = input_string(args) else {
        return Ok(Value::Null);
    };
    let width = args
        .get(1)
        .and_then(Value::as_i64)
        .ok_or_else(|| TransformError::new("pad width must be a number"))? as usize;
    let pad_char = args
        .get(2)
        .map(Value::coerce_string)
        .and_then(|s| s.chars().next())
        .unwrap_or(' ');
    let current = input.chars().count();
    if current >= width {
        return Ok(Value::String(input));
    }
    let padding: String = std::iter::repeat(pad_char).take(width - current).collect();
    Ok(Value::String(if left {
        format!("{}{}", padding, input)
    } else {
        format!("{}{}", input, padding)
    }))
}

pub fn pad_left(args: &[Value]) -> TransformResult {
    pad(args, true)
}

pub fn pad_right(args: &[Value]) -> TransformResult {
    pad(args, false)
}

/// Truncates to `length` characters, appending an ellipsis when cut
pub fn truncate(args: &[Value]) -> TransformResult {
    let Some(input) = input_string(args) else {
        return Ok(Value::Null);
    };
    let length = args
        .get(1)
        .and_then(Value::as_i64)
        .ok_or_else(|| TransformError::new("truncate length must be a number"))?
        .max(0) as usize;
    if input.chars().count() <= length {
        return Ok(Value::String(input));
    }
    let cut: String = input.chars().take(length).collect();
    Ok(Value::String(format!("{}...", cut)))
}

pub fn slugify(args: &[Value]) -> TransformResult {
    let Some(input) = input_string(args) else {
        return Ok(Value::Null);
    };
    let mut slug = String::with_capacity(input.len());
    let mut last_dash = true;
    for c in input.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    if slug.ends_with('-') {
        slug.pop();
    }
    Ok(Value::String(slug))
}

fn words(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in input.chars() {
        if c == '_' || c == '-' || c.is_whitespace() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            prev_lower = false;
        } else if c.is_uppercase() && prev_lower {
            out.push(std::mem::take(&mut current));
            current.push(c);
            prev_lower = false;
        } else {
            prev_lower = c.is_lowercase();
            current.push(c);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

pub fn camel_case(args: &[Value]) -> TransformResult {
    let Some(input) = input_string(args) else {
        return Ok(Value::Null);
    };
    let mut out = String::new();
    for (i, word) in words(&input).iter().enumerate() {
        let lower = word.to_lowercase();
        if i == 0 {
            out.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    Ok(Value::String(out))
}

pub fn snake_case(args: &[Value]) -> TransformResult {
    let Some(input) = input_string(args) else {
        return Ok(Value::Null);
    };
    Ok(Value::String(
        words(&input)
            .iter()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join("_"),
    ))
}

pub fn kebab_case(args: &[Value]) -> TransformResult {
    let Some(input) = input_string(args) else {
        return Ok(Value::Null);
    };
    Ok(Value::String(
        words(&input)
            .iter()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join("-"),
    ))
}

// Hangul syllable decomposition. A precomposed syllable sits in
// U+AC00..=U+D7A3 and factors into initial (choseong), medial (jungseong)
// and optional final (jongseong) jamo.
const CHOSEONG: [char; 19] = [
    'ㄱ', 'ㄲ', 'ㄴ', 'ㄷ', 'ㄸ', 'ㄹ', 'ㅁ', 'ㅂ', 'ㅃ', 'ㅅ', 'ㅆ', 'ㅇ', 'ㅈ', 'ㅉ', 'ㅊ',
    'ㅋ', 'ㅌ', 'ㅍ', 'ㅎ',
];
const JUNGSEONG: [char; 21] = [
    'ㅏ', 'ㅐ', 'ㅑ', 'ㅒ', 'ㅓ', 'ㅔ', 'ㅕ', 'ㅖ', 'ㅗ', 'ㅘ', 'ㅙ', 'ㅚ', 'ㅛ', 'ㅜ', 'ㅝ',
    'ㅞ', 'ㅟ', 'ㅠ', 'ㅡ', 'ㅢ', 'ㅣ',
];
const JONGSEONG: [&str; 28] = [
    "", "ㄱ", "ㄲ", "ㄳ", "ㄴ", "ㄵ", "ㄶ", "ㄷ", "ㄹ", "ㄺ", "ㄻ", "ㄼ", "ㄽ", "ㄾ", "ㄿ",
    "ㅀ", "ㅁ", "ㅂ", "ㅄ", "ㅅ", "ㅆ", "ㅇ", "ㅈ", "ㅊ", "ㅋ", "ㅌ", "ㅍ", "ㅎ",
];

const HANGUL_BASE: u32 = 0xAC00;
const HANGUL_END: u32 = 0xD7A3;

fn decompose_syllable(c: char) -> Option<(usize, usize, usize)> {
    let code = c as u32;
    if !(HANGUL_BASE..=HANGUL_END).contains(&code) {
        return None;
    }
    let offset = code - HANGUL_BASE;
    Some((
        (offset / 588) as usize,
        ((offset % 588) / 28) as usize,
        (offset % 28) as usize,
    ))
}

/// Decomposes Hangul syllables into their jamo; other characters pass through
pub fn jamo_decompose(args: &[Value]) -> TransformResult {
    let Some(input) = input_string(args) else {
        return Ok(Value::Null);
    };
    let mut out = String::new();
    for c in input.chars() {
        match decompose_syllable(c) {
            Some((cho, jung, jong)) => {
                out.push(CHOSEONG[cho]);
                out.push(JUNGSEONG[jung]);
                out.push_str(JONGSEONG[jong]);
            }
            None => out.push(c),
        }
    }
    Ok(Value::String(out))
}

/// Extracts the initial consonant of each Hangul syllable (search-index style)
pub fn jamo_initials(args: &[Value]) -> TransformResult {
    let Some(input) = input_string(args) else {
        return Ok(Value::Null);
    };
    let mut out = String::new();
    for c in input.chars() {
        match decompose_syllable(c) {
            Some((cho, _, _)) => out.push(CHOSEONG[cho]),
            None => out.push(c),
        }
    }
    Ok(Value::String(out))
}

//! Date transform functions
//!
//! Dates travel through records as strings (or unix-millisecond integers);
//! these functions parse, reformat and shift them. Format strings use the
//! familiar `YYYY/MM/DD/HH/mm/ss` tokens rather than strftime.

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::domain::value_objects::Value;

use super::{TransformError, TransformResult};

const CANONICAL: &str = "%Y-%m-%dT%H:%M:%S";

/// Formats tried in order when no explicit format is given
const GUESS_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y%m%d",
];

fn tokens_to_strftime(tokens: &str) -> String {
    tokens
        .replace("YYYY", "%Y")
        .replace("MM", "%m")
        .replace("DD", "%d")
        .replace("HH", "%H")
        .replace("mm", "%M")
        .replace("ss", "%S")
}

fn parse_with(input: &str, fmt: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(input, fmt).ok().or_else(|| {
        NaiveDate::parse_from_str(input, fmt)
            .ok()
            .map(|d| d.and_time(NaiveTime::MIN))
    })
}

fn parse_value(value: &Value, fmt: Option<&str>) -> Result<Option<NaiveDateTime>, TransformError> {
    match value {
        Value::Null => Ok(None),
        Value::Int(millis) => Ok(Utc
            .timestamp_millis_opt(*millis)
            .single()
            .map(|t| t.naive_utc())),
        other => {
            let text = other.coerce_string();
            let text = text.trim();
            if let Some(fmt) = fmt {
                let strftime = tokens_to_strftime(fmt);
                return parse_with(text, &strftime)
                    .map(Some)
                    .ok_or_else(|| {
                        TransformError::new(format!("'{}' does not match format '{}'", text, fmt))
                    });
            }
            // RFC3339 with offset first, then the naive formats.
            if let Ok(t) = chrono::DateTime::parse_from_rfc3339(text) {
                return Ok(Some(t.naive_utc()));
            }
            for guess in GUESS_FORMATS {
                if let Some(t) = parse_with(text, guess) {
                    return Ok(Some(t));
                }
            }
            Err(TransformError::new(format!("unparseable date '{}'", text)))
        }
    }
}

/// `parse(input, format?)` normalises any supported form to ISO seconds
pub fn parse(args: &[Value]) -> TransformResult {
    let fmt = args.get(1).filter(|v| !v.is_null()).map(Value::coerce_string);
    match parse_value(&args[0], fmt.as_deref())? {
        Some(t) => Ok(Value::String(t.format(CANONICAL).to_string())),
        None => Ok(Value::Null),
    }
}

/// `format(input, tokens)` renders with `YYYY/MM/DD/HH/mm/ss` tokens
pub fn format(args: &[Value]) -> TransformResult {
    let Some(t) = parse_value(&args[0], None)? else {
        return Ok(Value::Null);
    };
    let tokens = args
        .get(1)
        .map(Value::coerce_string)
        .ok_or_else(|| TransformError::new("format requires a token string"))?;
    Ok(Value::String(t.format(&tokens_to_strftime(&tokens)).to_string()))
}

fn shift(args: &[Value], apply: impl Fn(NaiveDateTime, i64) -> Option<NaiveDateTime>) -> TransformResult {
    let Some(t) = parse_value(&args[0], None)? else {
        return Ok(Value::Null);
    };
    let amount = args
        .get(1)
        .and_then(Value::as_i64)
        .ok_or_else(|| TransformError::new("shift amount must be a number"))?;
    let shifted = apply(t, amount).ok_or_else(|| TransformError::new("date out of range"))?;
    Ok(Value::String(shifted.format(CANONICAL).to_string()))
}

pub fn add_days(args: &[Value]) -> TransformResult {
    shift(args, |t, n| t.checked_add_signed(Duration::days(n)))
}

pub fn add_months(args: &[Value]) -> TransformResult {
    shift(args, |t, n| {
        if n >= 0 {
            t.checked_add_months(Months::new(n as u32))
        } else {
            t.checked_sub_months(Months::new((-n) as u32))
        }
    })
}

pub fn add_years(args: &[Value]) -> TransformResult {
    shift(args, |t, n| {
        let years = 12i64.checked_mul(n)?;
        if years >= 0 {
            t.checked_add_months(Months::new(years as u32))
        } else {
            t.checked_sub_months(Months::new((-years) as u32))
        }
    })
}

/// `diff(a, b, unit)` returns `a - b` truncated to the unit
pub fn diff(args: &[Value]) -> TransformResult {
    let (Some(a), Some(b)) = (parse_value(&args[0], None)?, parse_value(&args[1], None)?) else {
        return Ok(Value::Null);
    };
    let unit = args.get(2).map(Value::coerce_string).unwrap_or_default();
    let delta = a - b;
    let out = match unit.as_str() {
        "milliseconds" | "millis" => delta.num_milliseconds(),
        "seconds" => delta.num_seconds(),
        "minutes" => delta.num_minutes(),
        "hours" => delta.num_hours(),
        "days" => delta.num_days(),
        "weeks" => delta.num_weeks(),
        "months" => {
            (a.year() as i64 * 12 + a.month() as i64) - (b.year() as i64 * 12 + b.month() as i64)
        }
        "years" => a.year() as i64 - b.year() as i64,
        other => {
            return Err(TransformError::new(format!("unknown diff unit '{}'", other)));
        }
    };
    Ok(Value::Int(out))
}

/// Unix milliseconds of the input, treated as UTC
pub fn to_millis(args: &[Value]) -> TransformResult {
    match parse_value(&args[0], None)? {
        Some(t) => Ok(Value::Int(t.and_utc().timestamp_millis())),
        None => Ok(Value::Null),
    }
}

pub fn from_millis(args: &[Value]) -> TransformResult {
    if args[0].is_null() {
        return Ok(Value::Null);
    }
    let millis = args[0]
        .as_i64()
        .ok_or_else(|| TransformError::new("from_millis expects a number"))?;
    let t = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| TransformError::new("timestamp out of range"))?;
    Ok(Value::String(t.naive_utc().format(CANONICAL).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Value {
        Value::String(v.to_string())
    }

    #[test]
    fn test_parse_guesses_common_formats() {
        assert_eq!(parse(&[s("2024-03-05")]).unwrap(), s("2024-03-05T00:00:00"));
        assert_eq!(
            parse(&[s("2024-03-05 10:20:30")]).unwrap(),
            s("2024-03-05T10:20:30")
        );
        assert_eq!(parse(&[s("20240305")]).unwrap(), s("2024-03-05T00:00:00"));
        assert!(parse(&[s("yesterday")]).is_err());
    }

    #[test]
    fn test_parse_explicit_tokens() {
        assert_eq!(
            parse(&[s("05/03/2024"), s("DD/MM/YYYY")]).unwrap(),
            s("2024-03-05T00:00:00")
        );
    }

    #[test]
    fn test_parse_rfc3339_normalises_to_utc() {
        assert_eq!(
            parse(&[s("2024-03-05T09:00:00+09:00")]).unwrap(),
            s("2024-03-05T00:00:00")
        );
    }

    #[test]
    fn test_format_tokens() {
        assert_eq!(
            format(&[s("2024-03-05T10:20:30"), s("YYYY/MM/DD HH:mm")]).unwrap(),
            s("2024/03/05 10:20")
        );
    }

    #[test]
    fn test_add_and_diff() {
        assert_eq!(
            add_days(&[s("2024-02-28"), Value::Int(2)]).unwrap(),
            s("2024-03-01T00:00:00")
        );
        assert_eq!(
            add_months(&[s("2024-01-31"), Value::Int(1)]).unwrap(),
            s("2024-02-29T00:00:00")
        );
        assert_eq!(
            diff(&[s("2024-03-05"), s("2024-03-01"), s("days")]).unwrap(),
            Value::Int(4)
        );
    }

    #[test]
    fn test_millis_round_trip() {
        let millis = to_millis(&[s("2024-01-01T00:00:00")]).unwrap();
        assert_eq!(millis, Value::Int(1_704_067_200_000));
        assert_eq!(from_millis(&[millis]).unwrap(), s("2024-01-01T00:00:00"));
    }

    #[test]
    fn test_null_propagation() {
        assert_eq!(parse(&[Value::Null]).unwrap(), Value::Null);
        assert_eq!(add_days(&[Value::Null, Value::Int(1)]).unwrap(), Value::Null);
    }
}

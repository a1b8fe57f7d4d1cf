//! Numeric transform functions

use rand::Rng;

use crate::domain::value_objects::Value;

use super::{TransformError, TransformResult};

fn input_f64(args: &[Value]) -> Result<Option<f64>, TransformError> {
    if args[0].is_null() {
        return Ok(None);
    }
    args[0]
        .as_f64()
        .map(Some)
        .ok_or_else(|| TransformError::new(format!("not a number: {}", args[0])))
}

pub fn parse_int(args: &[Value]) -> TransformResult {
    if args[0].is_null() {
        return Ok(Value::Null);
    }
    match args[0].as_i64() {
        Some(n) => Ok(Value::Int(n)),
        None => Ok(Value::Null),
    }
}

pub fn parse_float(args: &[Value]) -> TransformResult {
    if args[0].is_null() {
        return Ok(Value::Null);
    }
    match args[0].as_f64() {
        Some(f) => Ok(Value::Float(f)),
        None => Ok(Value::Null),
    }
}

/// `round(input, digits = 0)`
pub fn round(args: &[Value]) -> TransformResult {
    let Some(input) = input_f64(args)? else {
        return Ok(Value::Null);
    };
    let digits = args.get(1).and_then(Value::as_i64).unwrap_or(0);
    let factor = 10f64.powi(digits as i32);
    let rounded = (input * factor).round() / factor;
    Ok(if digits <= 0 {
        Value::Int(rounded as i64)
    } else {
        Value::Float(rounded)
    })
}

pub fn floor(args: &[Value]) -> TransformResult {
    Ok(input_f64(args)?.map_or(Value::Null, |f| Value::Int(f.floor() as i64)))
}

pub fn ceil(args: &[Value]) -> TransformResult {
    Ok(input_f64(args)?.map_or(Value::Null, |f| Value::Int(f.ceil() as i64)))
}

pub fn abs(args: &[Value]) -> TransformResult {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Int(n) => Ok(Value::Int(n.abs())),
        other => Ok(other
            .as_f64()
            .map_or(Value::Null, |f| Value::Float(f.abs()))),
    }
}

/// `fixed(input, digits)` renders with exactly `digits` decimals
pub fn fixed(args: &[Value]) -> TransformResult {
    let Some(input) = input_f64(args)? else {
        return Ok(Value::Null);
    };
    let digits = args
        .get(1)
        .and_then(Value::as_i64)
        .ok_or_else(|| TransformError::new("fixed digits must be a number"))?
        .clamp(0, 17) as usize;
    Ok(Value::String(format!("{:.*}", digits, input)))
}

fn thousands(int_part: i64) -> String {
    let raw = int_part.abs().to_string();
    let mut grouped = String::new();
    for (i, c) in raw.chars().enumerate() {
        if i > 0 && (raw.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if int_part < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

/// `currency(input, code = "USD", decimals = 2)`
pub fn currency(args: &[Value]) -> TransformResult {
    let Some(input) = input_f64(args)? else {
        return Ok(Value::Null);
    };
    let code = args
        .get(1)
        .filter(|v| !v.is_null())
        .map(Value::coerce_string)
        .unwrap_or_else(|| "USD".to_string());
    let decimals = args.get(2).and_then(Value::as_i64).unwrap_or(2).clamp(0, 6) as usize;
    let int_part = input.trunc() as i64;
    let frac = (input.fract().abs() * 10f64.powi(decimals as i32)).round() as u64;
    let formatted = if decimals == 0 {
        thousands(int_part)
    } else {
        format!("{}.{:0width$}", thousands(int_part), frac, width = decimals)
    };
    Ok(Value::String(format!("{} {}", formatted, code)))
}

/// `percent(input, digits = 1)`; 0.15 becomes `"15.0%"`
pub fn percent(args: &[Value]) -> TransformResult {
    let Some(input) = input_f64(args)? else {
        return Ok(Value::Null);
    };
    let digits = args.get(1).and_then(Value::as_i64).unwrap_or(1).clamp(0, 6) as usize;
    Ok(Value::String(format!("{:.*}%", digits, input * 100.0)))
}

/// Human-readable byte size (`1536` becomes `"1.5 KB"`)
pub fn bytes(args: &[Value]) -> TransformResult {
    let Some(input) = input_f64(args)? else {
        return Ok(Value::Null);
    };
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = input.abs();
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    let sign = if input < 0.0 { "-" } else { "" };
    Ok(Value::String(if unit == 0 {
        format!("{}{} {}", sign, size as u64, UNITS[unit])
    } else {
        format!("{}{:.1} {}", sign, size, UNITS[unit])
    }))
}

pub fn clamp(args: &[Value]) -> TransformResult {
    let Some(input) = input_f64(args)? else {
        return Ok(Value::Null);
    };
    let min = args
        .get(1)
        .and_then(Value::as_f64)
        .ok_or_else(|| TransformError::new("clamp min must be a number"))?;
    let max = args
        .get(2)
        .and_then(Value::as_f64)
        .ok_or_else(|| TransformError::new("clamp max must be a number"))?;
    if min > max {
        return Err(TransformError::new("clamp min is greater than max"));
    }
    Ok(Value::Float(input.clamp(min, max)))
}

/// `random()` in `[0, 1)`, or `random(min, max)` as an integer range
pub fn random(args: &[Value]) -> TransformResult {
    let mut rng = rand::thread_rng();
    match (args.first().and_then(Value::as_i64), args.get(1).and_then(Value::as_i64)) {
        (Some(min), Some(max)) if min <= max => Ok(Value::Int(rng.gen_range(min..=max))),
        (Some(_), Some(_)) => Err(TransformError::new("random min is greater than max")),
        _ => Ok(Value::Float(rng.gen::<f64>())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_integer() {
        assert_eq!(round(&[Value::Float(3.4)]).unwrap(), Value::Int(3));
        assert_eq!(round(&[Value::Float(3.5)]).unwrap(), Value::Int(4));
        assert_eq!(
            round(&[Value::Float(3.14159), Value::Int(2)]).unwrap(),
            Value::Float(3.14)
        );
    }

    #[test]
    fn test_parse_functions() {
        assert_eq!(parse_int(&[Value::String(" 42 ".into())]).unwrap(), Value::Int(42));
        assert_eq!(parse_int(&[Value::String("nope".into())]).unwrap(), Value::Null);
        assert_eq!(
            parse_float(&[Value::String("2.5".into())]).unwrap(),
            Value::Float(2.5)
        );
    }

    #[test]
    fn test_fixed() {
        assert_eq!(
            fixed(&[Value::Float(3.14159), Value::Int(2)]).unwrap(),
            Value::String("3.14".into())
        );
    }

    #[test]
    fn test_currency_grouping() {
        assert_eq!(
            currency(&[Value::Int(1234567), Value::String("KRW".into()), Value::Int(0)]).unwrap(),
            Value::String("1,234,567 KRW".into())
        );
        assert_eq!(
            currency(&[Value::Float(1234.5)]).unwrap(),
            Value::String("1,234.50 USD".into())
        );
    }

    #[test]
    fn test_percent() {
        assert_eq!(
            percent(&[Value::Float(0.155)]).unwrap(),
            Value::String("15.5%".into())
        );
    }

    #[test]
    fn test_bytes() {
        assert_eq!(bytes(&[Value::Int(512)]).unwrap(), Value::String("512 B".into()));
        assert_eq!(bytes(&[Value::Int(1536)]).unwrap(), Value::String("1.5 KB".into()));
        assert_eq!(
            bytes(&[Value::Int(3 * 1024 * 1024)]).unwrap(),
            Value::String("3.0 MB".into())
        );
    }

    #[test]
    fn test_clamp() {
        assert_eq!(
            clamp(&[Value::Int(15), Value::Int(0), Value::Int(10)]).unwrap(),
            Value::Float(10.0)
        );
        assert!(clamp(&[Value::Int(1), Value::Int(5), Value::Int(0)]).is_err());
    }

    #[test]
    fn test_random_range() {
        for _ in 0..100 {
            let v = random(&[Value::Int(1), Value::Int(3)]).unwrap();
            let n = v.as_i64().unwrap();
            assert!((1..=3).contains(&n));
        }
    }

    #[test]
    fn test_null_propagation() {
        assert_eq!(round(&[Value::Null]).unwrap(), Value::Null);
        assert_eq!(bytes(&[Value::Null]).unwrap(), Value::Null);
        assert_eq!(abs(&[Value::Null]).unwrap(), Value::Null);
    }
}

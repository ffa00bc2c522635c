//! Scalar encoding and decoding for engine XML leaves.
//!
//! The engine is picky about number formatting: scientific notation uses an
//! uppercase `E` with a signed two-digit exponent, while integer-valued
//! reals in the normal range are written without decimals.

use serde_json::Value;

use crate::error::{MqError, Result};
use crate::params::schema::SchemaType;

/// Encode a scalar value as element text, checked against its declared type.
pub fn encode_scalar(value: &Value, ty: SchemaType) -> Result<String> {
    match ty {
        SchemaType::String => match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(mismatch("string", other)),
        },
        SchemaType::Boolean => match value {
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(mismatch("boolean", other)),
        },
        SchemaType::Integer => match value.as_i64() {
            Some(i) => Ok(i.to_string()),
            None => Err(mismatch("integer", value)),
        },
        SchemaType::Number => match value.as_f64() {
            Some(f) => Ok(encode_number(f)),
            None => Err(mismatch("number", value)),
        },
        SchemaType::Object | SchemaType::Array => Err(MqError::SchemaMismatch(format!(
            "expected a scalar, schema declares {}",
            ty.name()
        ))),
    }
}

fn mismatch(expected: &str, value: &Value) -> MqError {
    MqError::SchemaMismatch(format!("expected a {expected}, got {value}"))
}

/// Encode a real number the way the engine expects it.
pub fn encode_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let magnitude = value.abs();
    if value.fract() == 0.0 && (1e-4..1e15).contains(&magnitude) {
        return format!("{}", value as i64);
    }
    if magnitude < 1e-4 || magnitude >= 1e16 {
        return scientific(value);
    }
    format!("{value}")
}

/// Uppercase scientific notation with a signed, zero-padded exponent.
fn scientific(value: f64) -> String {
    let formatted = format!("{value:E}");
    match formatted.split_once('E') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{mantissa}E{sign}{digits:0>2}")
        }
        None => formatted,
    }
}

/// Decode element text into a value of the declared scalar type.
pub fn decode(text: &str, ty: SchemaType) -> Result<Value> {
    let text = text.trim();
    match ty {
        SchemaType::String => Ok(Value::String(text.to_string())),
        SchemaType::Integer => text
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| MqError::SchemaMismatch(format!("not an integer: '{text}'"))),
        SchemaType::Number => decode_number(text),
        SchemaType::Boolean => match text {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            other => Err(MqError::SchemaMismatch(format!("not a bool: '{other}'"))),
        },
        SchemaType::Object | SchemaType::Array => Err(MqError::SchemaMismatch(format!(
            "cannot decode a leaf as {}",
            ty.name()
        ))),
    }
}

fn decode_number(text: &str) -> Result<Value> {
    // Fractionless leaves decode to integers so that whole numbers survive
    // a round trip unchanged; JSON does not tell 4 and 4.0 apart on disk.
    if !text.contains(['.', 'e', 'E']) {
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Value::from(i));
        }
    }
    let parsed = text
        .parse::<f64>()
        .map_err(|_| MqError::SchemaMismatch(format!("not a number: '{text}'")))?;
    serde_json::Number::from_f64(parsed)
        .map(Value::Number)
        .ok_or_else(|| MqError::SchemaMismatch(format!("not a finite number: '{text}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_booleans() {
        assert_eq!(encode_scalar(&json!(true), SchemaType::Boolean).unwrap(), "true");
        assert_eq!(encode_scalar(&json!(false), SchemaType::Boolean).unwrap(), "false");
    }

    #[test]
    fn test_encode_numbers() {
        assert_eq!(encode_number(0.0), "0");
        assert_eq!(encode_number(1.0), "1");
        assert_eq!(encode_number(1.5), "1.5");
        assert_eq!(encode_number(1e20), "1E+20");
        assert_eq!(encode_number(f64::NAN), "NaN");
        assert_eq!(encode_number(-2.0), "-2");
        assert_eq!(encode_number(0.8), "0.8");
    }

    #[test]
    fn test_encode_strings_verbatim() {
        assert_eq!(encode_scalar(&json!("abc"), SchemaType::String).unwrap(), "abc");
        assert_eq!(encode_scalar(&json!(" a b "), SchemaType::String).unwrap(), " a b ");
    }

    #[test]
    fn test_encode_integer_zero() {
        assert_eq!(encode_scalar(&json!(0), SchemaType::Integer).unwrap(), "0");
        assert_eq!(encode_scalar(&json!(0), SchemaType::Number).unwrap(), "0");
    }

    #[test]
    fn test_encode_rejects_type_mismatch() {
        assert!(encode_scalar(&json!("abc"), SchemaType::Boolean).is_err());
        assert!(encode_scalar(&json!(1.5), SchemaType::Integer).is_err());
        assert!(encode_scalar(&json!(true), SchemaType::Number).is_err());
    }

    #[test]
    fn test_decode_booleans_case_sensitive() {
        assert_eq!(decode("true", SchemaType::Boolean).unwrap(), json!(true));
        assert_eq!(decode("false", SchemaType::Boolean).unwrap(), json!(false));
        assert!(decode("True", SchemaType::Boolean).is_err());
        assert!(decode("FALSE", SchemaType::Boolean).is_err());
    }

    #[test]
    fn test_decode_strips_whitespace() {
        assert_eq!(decode(" 3 ", SchemaType::Integer).unwrap(), json!(3));
        assert_eq!(decode("  abc ", SchemaType::String).unwrap(), json!("abc"));
    }

    #[test]
    fn test_decode_numbers() {
        assert_eq!(decode("4", SchemaType::Number).unwrap(), json!(4));
        assert_eq!(decode("0.8", SchemaType::Number).unwrap(), json!(0.8));
        assert_eq!(decode("1E+20", SchemaType::Number).unwrap(), json!(1e20));
        assert!(decode("abc", SchemaType::Number).is_err());
    }

    #[test]
    fn test_decode_rejects_malformed_integers() {
        assert!(decode("3.5", SchemaType::Integer).is_err());
        assert!(decode("", SchemaType::Integer).is_err());
    }
}

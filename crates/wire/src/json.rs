//! A deliberately minimal JSON dialect: maps, arrays, and quoted scalars
//! only. No numbers, booleans, nulls, or escapes beyond `\"`. Numeric fields
//! are carried as quoted strings on the wire; the parser additionally
//! accepts a bare (unquoted) numeric token for the same field so that
//! slightly different encoders on either end of the wire still interop.

use std::fmt::Write as _;

/// A parsed JSON-dialect value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Map(Vec<(String, Value)>),
    Array(Vec<Value>),
}

impl Value {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(m) => Some(m.as_slice()),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JsonError {
    #[error("unexpected end of input")]
    Eof,
    #[error("unexpected byte {0:?} at offset {1}")]
    Unexpected(char, usize),
    #[error("trailing data after value")]
    TrailingData,
}

/// Parses a single value, requiring the entire input to be consumed.
pub fn parse(input: &str) -> Result<Value, JsonError> {
    let bytes = input.as_bytes();
    let mut pos = 0;
    skip_ws(bytes, &mut pos);
    let value = parse_value(bytes, &mut pos)?;
    skip_ws(bytes, &mut pos);
    if pos != bytes.len() {
        return Err(JsonError::TrailingData);
    }
    Ok(value)
}

fn skip_ws(bytes: &[u8], pos: &mut usize) {
    while *pos < bytes.len() && bytes[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
}

fn parse_value(bytes: &[u8], pos: &mut usize) -> Result<Value, JsonError> {
    skip_ws(bytes, pos);
    match bytes.get(*pos) {
        None => Err(JsonError::Eof),
        Some(b'"') => parse_quoted(bytes, pos).map(Value::Str),
        Some(b'{') => parse_map(bytes, pos),
        Some(b'[') => parse_array(bytes, pos),
        Some(b'-') | Some(b'0'..=b'9') => parse_bare_number(bytes, pos).map(Value::Str),
        Some(&c) => Err(JsonError::Unexpected(c as char, *pos)),
    }
}

fn parse_quoted(bytes: &[u8], pos: &mut usize) -> Result<String, JsonError> {
    debug_assert_eq!(bytes[*pos], b'"');
    *pos += 1;
    let mut out = String::new();
    loop {
        match bytes.get(*pos) {
            None => return Err(JsonError::Eof),
            Some(b'"') => {
                *pos += 1;
                return Ok(out);
            }
            Some(b'\\') => {
                *pos += 1;
                match bytes.get(*pos) {
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    Some(&c) => return Err(JsonError::Unexpected(c as char, *pos)),
                    None => return Err(JsonError::Eof),
                }
                *pos += 1;
            }
            Some(&c) => {
                out.push(c as char);
                *pos += 1;
            }
        }
    }
}

fn parse_bare_number(bytes: &[u8], pos: &mut usize) -> Result<String, JsonError> {
    let start = *pos;
    if bytes.get(*pos) == Some(&b'-') {
        *pos += 1;
    }
    while matches!(bytes.get(*pos), Some(b'0'..=b'9')) {
        *pos += 1;
    }
    if *pos == start {
        return Err(JsonError::Eof);
    }
    Ok(String::from_utf8_lossy(&bytes[start..*pos]).into_owned())
}

fn parse_map(bytes: &[u8], pos: &mut usize) -> Result<Value, JsonError> {
    debug_assert_eq!(bytes[*pos], b'{');
    *pos += 1;
    let mut entries = Vec::new();
    skip_ws(bytes, pos);
    if bytes.get(*pos) == Some(&b'}') {
        *pos += 1;
        return Ok(Value::Map(entries));
    }
    loop {
        skip_ws(bytes, pos);
        if bytes.get(*pos) != Some(&b'"') {
            return Err(JsonError::Unexpected(
                bytes.get(*pos).map_or('\0', |&c| c as char),
                *pos,
            ));
        }
        let key = parse_quoted(bytes, pos)?;
        skip_ws(bytes, pos);
        if bytes.get(*pos) != Some(&b':') {
            return Err(JsonError::Unexpected(
                bytes.get(*pos).map_or('\0', |&c| c as char),
                *pos,
            ));
        }
        *pos += 1;
        let value = parse_value(bytes, pos)?;
        entries.push((key, value));
        skip_ws(bytes, pos);
        match bytes.get(*pos) {
            Some(b',') => {
                *pos += 1;
            }
            Some(b'}') => {
                *pos += 1;
                break;
            }
            Some(&c) => return Err(JsonError::Unexpected(c as char, *pos)),
            None => return Err(JsonError::Eof),
        }
    }
    Ok(Value::Map(entries))
}

fn parse_array(bytes: &[u8], pos: &mut usize) -> Result<Value, JsonError> {
    debug_assert_eq!(bytes[*pos], b'[');
    *pos += 1;
    let mut entries = Vec::new();
    skip_ws(bytes, pos);
    if bytes.get(*pos) == Some(&b']') {
        *pos += 1;
        return Ok(Value::Array(entries));
    }
    loop {
        entries.push(parse_value(bytes, pos)?);
        skip_ws(bytes, pos);
        match bytes.get(*pos) {
            Some(b',') => {
                *pos += 1;
            }
            Some(b']') => {
                *pos += 1;
                break;
            }
            Some(&c) => return Err(JsonError::Unexpected(c as char, *pos)),
            None => return Err(JsonError::Eof),
        }
    }
    Ok(Value::Array(entries))
}

/// Encodes a value back to the minimal JSON dialect. Strings are always
/// quoted, including numeric-looking fields, per the wire convention.
pub fn encode(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Str(s) => write_quoted(out, s),
        Value::Map(entries) => {
            out.push('{');
            for (i, (key, value)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_quoted(out, key);
                out.push(':');
                write_value(out, value);
            }
            out.push('}');
        }
        Value::Array(entries) => {
            out.push('[');
            for (i, value) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, value);
            }
            out.push(']');
        }
    }
}

fn write_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => {
                let _ = write!(out, "{c}");
            }
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_flat_map() {
        let v = Value::Map(vec![
            ("cmd".into(), Value::Str("LIST".into())),
            ("s".into(), Value::Str("0".into())),
        ]);
        let encoded = encode(&v);
        assert_eq!(parse(&encoded).unwrap(), v);
    }

    #[test]
    fn round_trips_nested_map() {
        let v = Value::Map(vec![(
            "a.log".into(),
            Value::Map(vec![("s".into(), Value::Str("10".into()))]),
        )]);
        let encoded = encode(&v);
        assert_eq!(parse(&encoded).unwrap(), v);
    }

    #[test]
    fn accepts_bare_numeric_scalar() {
        let v = parse(r#"{"o":10}"#).unwrap();
        assert_eq!(v.get("o").unwrap().as_str(), Some("10"));
    }

    #[test]
    fn rejects_unescaped_control() {
        assert!(parse(r#"{"f":"#).is_err());
    }

    #[test]
    fn escapes_quote_in_string_value() {
        let v = Value::Map(vec![("f".into(), Value::Str("a\"b".into()))]);
        let encoded = encode(&v);
        assert_eq!(parse(&encoded).unwrap(), v);
    }
}

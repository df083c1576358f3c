//! Value escaping and `?`-placeholder substitution.
//!
//! Every interpolated value in the crate goes through [`escape`]; no other
//! component hand-formats literals. [`format`] substitutes `?` placeholders
//! positionally and requires an exact 1:1 match with the supplied parameters.

use crate::error::{MapperError, MapperResult};
use crate::value::Value;

/// Convert a [`Value`] to a SQL literal.
///
/// Arrays escape to a bare comma-joined list without surrounding
/// parentheses; the caller (or the query builder) supplies them.
pub fn escape(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => escape_str(s),
        Value::Timestamp(t) => escape_str(&t.to_rfc3339()),
        Value::Date(d) => escape_str(&d.to_string()),
        Value::Json(j) => escape_str(&j.to_string()),
        Value::Hstore(map) => escape_str(&hstore_text(map)),
        Value::Array(vs) => {
            let parts: Vec<String> = vs.iter().map(escape).collect();
            parts.join(",")
        }
    }
}

/// Single-quote a string, escaping quote, backslash, NUL and control
/// characters (`'` doubles; NUL/LF/CR/BS/TAB/SUB become backslash escapes).
fn escape_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{8}' => out.push_str("\\b"),
            '\t' => out.push_str("\\t"),
            '\u{1a}' => out.push_str("\\Z"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

fn hstore_text(map: &std::collections::BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (i, (k, v)) in map.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push('"');
        out.push_str(&k.replace('"', "\\\""));
        out.push_str("\"=>\"");
        out.push_str(&v.replace('"', "\\\""));
        out.push('"');
    }
    out
}

/// Substitute each `?` in `template` with the escaped form of the next
/// parameter, left to right.
///
/// Fails with [`MapperError::ParameterCount`] when the placeholder and
/// parameter counts differ in either direction.
pub fn format(template: &str, params: &[Value]) -> MapperResult<String> {
    let placeholders = template.matches('?').count();
    if placeholders != params.len() {
        return Err(MapperError::ParameterCount {
            placeholders,
            params: params.len(),
        });
    }

    let mut out = String::with_capacity(template.len());
    let mut next = params.iter();
    for ch in template.chars() {
        if ch == '?' {
            // counts were checked above
            let param = next.next().ok_or(MapperError::ParameterCount {
                placeholders,
                params: params.len(),
            })?;
            out.push_str(&escape(param));
        } else {
            out.push(ch);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    #[test]
    fn escape_null_and_bool() {
        assert_eq!(escape(&Value::Null), "NULL");
        assert_eq!(escape(&Value::Bool(true)), "true");
        assert_eq!(escape(&Value::Bool(false)), "false");
    }

    #[test]
    fn escape_numbers_unquoted() {
        assert_eq!(escape(&Value::Int(42)), "42");
        assert_eq!(escape(&Value::Int(-7)), "-7");
        assert_eq!(escape(&Value::Float(1.5)), "1.5");
    }

    #[test]
    fn escape_plain_string() {
        assert_eq!(escape(&"hello".into()), "'hello'");
    }

    #[test]
    fn escape_quote_doubles() {
        assert_eq!(escape(&"it's".into()), "'it''s'");
    }

    #[test]
    fn escape_control_characters() {
        assert_eq!(escape(&"a\nb".into()), "'a\\nb'");
        assert_eq!(escape(&"a\rb".into()), "'a\\rb'");
        assert_eq!(escape(&"a\tb".into()), "'a\\tb'");
        assert_eq!(escape(&"a\0b".into()), "'a\\0b'");
        assert_eq!(escape(&"a\u{8}b".into()), "'a\\bb'");
        assert_eq!(escape(&"a\u{1a}b".into()), "'a\\Zb'");
        assert_eq!(escape(&"a\\b".into()), "'a\\\\b'");
    }

    #[test]
    fn escape_array_is_bare_csv() {
        let v = Value::Array(vec![Value::Int(1), Value::Text("x".into()), Value::Null]);
        assert_eq!(escape(&v), "1,'x',NULL");
    }

    #[test]
    fn escape_nested_array_recurses() {
        let v = Value::Array(vec![Value::Array(vec![Value::Int(1), Value::Int(2)])]);
        assert_eq!(escape(&v), "1,2");
    }

    #[test]
    fn escape_timestamp_iso() {
        let t = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(escape(&Value::Timestamp(t)), "'2024-03-01T12:30:00+00:00'");
    }

    #[test]
    fn escape_hstore_literal() {
        let mut m = BTreeMap::new();
        m.insert("a".to_string(), "1".to_string());
        m.insert("b".to_string(), "2".to_string());
        assert_eq!(escape(&Value::Hstore(m)), r#"'"a"=>"1", "b"=>"2"'"#);
    }

    #[test]
    fn format_substitutes_positionally() {
        let sql = format(
            "SELECT * FROM t WHERE a = ? AND b = ?",
            &[Value::Int(1), Value::Text("x".into())],
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = 1 AND b = 'x'");
    }

    #[test]
    fn format_rejects_too_few_params() {
        let err = format("a = ? AND b = ?", &[Value::Int(1)]).unwrap_err();
        assert!(err.is_parameter_count());
    }

    #[test]
    fn format_rejects_too_many_params() {
        let err = format("a = ?", &[Value::Int(1), Value::Int(2)]).unwrap_err();
        assert!(err.is_parameter_count());
    }

    #[test]
    fn format_in_list_from_array() {
        let sql = format(
            "id IN (?)",
            &[Value::Array(vec![Value::Int(1), Value::Int(2)])],
        )
        .unwrap();
        assert_eq!(sql, "id IN (1,2)");
    }

    #[test]
    fn format_no_placeholders_no_params() {
        assert_eq!(format("SELECT 1", &[]).unwrap(), "SELECT 1");
    }
}

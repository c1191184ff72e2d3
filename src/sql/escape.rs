use chrono::SecondsFormat;

use crate::value::{Row, Value};

/// Quote an identifier, doubling embedded double quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes.
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Render a value as a SQL expression for dynamically built statements.
///
/// Dates become quoted ISO-8601 strings and objects become quoted JSON text.
/// Prefer bound parameters wherever the statement shape allows it.
pub fn escape(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::Number(v) => number_literal(*v),
        Value::String(s) => quote_literal(s),
        Value::Date(d) => quote_literal(&d.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Value::Buffer(bytes) => blob_literal(bytes),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(escape).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(_) => quote_literal(&value.to_json().to_string()),
    }
}

/// Like [`escape`], but produces typed literals: `TRUE`/`FALSE`,
/// `TIMESTAMP '...'` and `'...'::JSON`.
pub fn to_literal(value: &Value) -> String {
    match value {
        Value::Boolean(true) => "TRUE".to_string(),
        Value::Boolean(false) => "FALSE".to_string(),
        Value::Date(d) => format!(
            "TIMESTAMP {}",
            quote_literal(&d.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
        ),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(to_literal).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(_) => format!("{}::JSON", quote_literal(&value.to_json().to_string())),
        other => escape(other),
    }
}

/// Build a `WHERE` clause joining each condition with `AND`.
///
/// Null values compare with `IS NULL`; an empty row yields an empty string.
pub fn where_clause(conditions: &Row) -> String {
    if conditions.is_empty() {
        return String::new();
    }
    let predicates = conditions
        .iter()
        .map(|(column, value)| match value {
            Value::Null => format!("{} IS NULL", quote_ident(column)),
            other => format!("{} = {}", quote_ident(column), escape(other)),
        })
        .collect::<Vec<_>>();
    format!("WHERE {}", predicates.join(" AND "))
}

fn number_literal(v: f64) -> String {
    if v.is_finite() {
        v.to_string()
    } else if v.is_nan() {
        "'NaN'::DOUBLE".to_string()
    } else if v > 0.0 {
        "'Infinity'::DOUBLE".to_string()
    } else {
        "'-Infinity'::DOUBLE".to_string()
    }
}

fn blob_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4 + 10);
    out.push('\'');
    for b in bytes {
        out.push_str(&format!("\\x{b:02X}"));
    }
    out.push_str("'::BLOB");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn escape_scalars() {
        assert_eq!(escape(&Value::Null), "NULL");
        assert_eq!(escape(&Value::from("O'Brien")), "'O''Brien'");
        assert_eq!(escape(&Value::from(42)), "42");
        assert_eq!(escape(&Value::from(1.5)), "1.5");
        assert_eq!(escape(&Value::from(true)), "true");
        assert_eq!(escape(&Value::Buffer(vec![0xab, 0x01])), "'\\xAB\\x01'::BLOB");
    }

    #[test]
    fn escape_dates_and_nested_values() {
        let date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(escape(&Value::Date(date)), "'2024-05-01T12:30:00.000Z'");
        assert_eq!(
            to_literal(&Value::Date(date)),
            "TIMESTAMP '2024-05-01 12:30:00.000000'"
        );

        let array = Value::Array(vec![Value::from(1), Value::from("a")]);
        assert_eq!(escape(&array), "[1, 'a']");

        let object = Value::Object(vec![("k".to_string(), Value::from("it's"))]);
        assert_eq!(escape(&object), r#"'{"k":"it''s"}'"#);
        assert_eq!(to_literal(&object), r#"'{"k":"it''s"}'::JSON"#);
    }

    #[test]
    fn to_literal_uppercases_booleans() {
        assert_eq!(to_literal(&Value::from(false)), "FALSE");
        assert_eq!(to_literal(&Value::Null), "NULL");
    }

    #[test]
    fn where_clause_joins_conditions() {
        assert_eq!(where_clause(&Row::new()), "");
        let row = Row::new().with("name", "a").with("deleted_at", Value::Null);
        assert_eq!(
            where_clause(&row),
            "WHERE \"name\" = 'a' AND \"deleted_at\" IS NULL"
        );
    }
}

use crate::value::Value;

/// SQL column type for a sampled value.
pub fn infer_sql_type(value: &Value) -> &'static str {
    match value {
        Value::Null | Value::String(_) => "VARCHAR",
        Value::Integer(v) if i32::try_from(*v).is_ok() => "INTEGER",
        Value::Integer(_) | Value::BigInt(_) => "BIGINT",
        Value::Number(v) if v.is_finite() && v.fract() == 0.0 => {
            if *v >= f64::from(i32::MIN) && *v <= f64::from(i32::MAX) {
                "INTEGER"
            } else {
                "BIGINT"
            }
        }
        Value::Number(_) => "DOUBLE",
        Value::Boolean(_) => "BOOLEAN",
        Value::Date(_) => "TIMESTAMP",
        Value::Buffer(_) => "BLOB",
        Value::Array(_) | Value::Object(_) => "JSON",
    }
}

const DELIMITER_CANDIDATES: [char; 4] = [',', ';', '\t', '|'];
const SAMPLE_LINES: usize = 5;

/// Guess the field delimiter of a CSV sample.
///
/// A candidate qualifies when it occurs the same number of times on each of
/// the first non-empty lines; the qualifying candidate with the highest count
/// wins. Falls back to `,`.
pub fn detect_csv_delimiter(sample: &str) -> char {
    let lines = sample
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(SAMPLE_LINES)
        .collect::<Vec<_>>();
    if lines.is_empty() {
        return ',';
    }

    let mut best = (',', 0usize);
    for candidate in DELIMITER_CANDIDATES {
        let mut counts = lines.iter().map(|line| line.matches(candidate).count());
        let Some(first) = counts.next() else {
            continue;
        };
        if first == 0 || counts.any(|count| count != first) {
            continue;
        }
        if first > best.1 {
            best = (candidate, first);
        }
    }
    best.0
}

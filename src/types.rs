//! Type conversion between the engine, Arrow batches and application values.
//!
//! This module centralizes:
//! - mapping native DuckDB type names and Arrow field types to [`FieldType`],
//! - read-time coercion of result batches (see [`QueryOptions`]),
//! - materializing Arrow columns into [`Row`]s,
//! - converting bound parameters into DuckDB values.

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use duckdb::arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Date64Array, Decimal128Array,
    FixedSizeBinaryArray, FixedSizeListArray, Float32Array, Float64Array, Int16Array, Int32Array,
    Int64Array, Int8Array, LargeBinaryArray, LargeListArray, LargeStringArray, ListArray, MapArray,
    StringArray, StructArray, TimestampMicrosecondArray, TimestampMillisecondArray,
    TimestampNanosecondArray, TimestampSecondArray, UInt16Array, UInt32Array, UInt64Array,
    UInt8Array,
};
use duckdb::arrow::compute::cast;
use duckdb::arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use duckdb::arrow::record_batch::RecordBatch;
use duckdb::arrow::util::display::{ArrayFormatter, FormatOptions};
use duckdb::types::{TimeUnit as DuckTimeUnit, Value as DuckValue};
use serde::{Deserialize, Serialize};

use crate::config::QueryOptions;
use crate::error::ClientError;
use crate::value::{Row, Value};

/// Closed set of column types exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Bigint,
    Number,
    Buffer,
    String,
    Boolean,
    Date,
    Array,
    Object,
    Other,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Bigint => "bigint",
            FieldType::Number => "number",
            FieldType::Buffer => "buffer",
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Other => "other",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column description produced from a result schema or from `DESCRIBE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub database_type: String,
    pub nullable: bool,
}

/// Map a DuckDB type name (as printed by `DESCRIBE`) to a [`FieldType`].
pub fn map_engine_type(engine_type: &str) -> FieldType {
    let upper = engine_type.trim().to_uppercase();
    match upper.as_str() {
        "BIGINT" | "INT8" | "LONG" | "HUGEINT" | "UBIGINT" | "UHUGEINT" => FieldType::Bigint,
        "DOUBLE" | "DOUBLE PRECISION" | "FLOAT8" | "REAL" | "FLOAT" | "FLOAT4" | "DECIMAL"
        | "NUMERIC" => FieldType::Number,
        "INTEGER" | "INT" | "INT4" | "SIGNED" | "SMALLINT" | "INT2" | "SHORT" | "TINYINT"
        | "INT1" | "USMALLINT" | "UINTEGER" | "UTINYINT" => FieldType::Integer,
        "BOOLEAN" | "BOOL" | "LOGICAL" => FieldType::Boolean,
        "DATE" | "TIME" | "TIMESTAMP" | "DATETIME" | "TIMESTAMP WITH TIME ZONE"
        | "TIMESTAMPTZ" | "TIMESTAMP_S" | "TIMESTAMP_MS" | "TIMESTAMP_NS" => FieldType::Date,
        "VARCHAR" | "CHAR" | "BPCHAR" | "TEXT" | "STRING" | "UUID" => FieldType::String,
        "BLOB" | "BYTEA" | "BINARY" | "VARBINARY" => FieldType::Buffer,
        "LIST" => FieldType::Array,
        "STRUCT" | "MAP" => FieldType::Object,
        s if s.ends_with(']') => FieldType::Array,
        s if s.starts_with("STRUCT(") || s.starts_with("MAP(") => FieldType::Object,
        s if s.starts_with("DECIMAL(") || s.starts_with("NUMERIC(") => FieldType::Number,
        _ => FieldType::Other,
    }
}

/// Map an Arrow field type to a [`FieldType`].
pub fn map_arrow_type(data_type: &DataType) -> FieldType {
    match data_type {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => FieldType::Integer,
        DataType::Int64 | DataType::UInt64 => FieldType::Bigint,
        DataType::Float16
        | DataType::Float32
        | DataType::Float64
        | DataType::Decimal128(_, _)
        | DataType::Decimal256(_, _) => FieldType::Number,
        DataType::Binary | DataType::LargeBinary | DataType::FixedSizeBinary(_) => {
            FieldType::Buffer
        }
        DataType::Utf8 | DataType::LargeUtf8 => FieldType::String,
        DataType::Boolean => FieldType::Boolean,
        DataType::Date32
        | DataType::Date64
        | DataType::Timestamp(_, _)
        | DataType::Time32(_)
        | DataType::Time64(_) => FieldType::Date,
        DataType::List(_) | DataType::LargeList(_) | DataType::FixedSizeList(_, _) => {
            FieldType::Array
        }
        DataType::Struct(_) | DataType::Map(_, _) => FieldType::Object,
        DataType::Dictionary(_, value_type) => map_arrow_type(value_type),
        _ => FieldType::Other,
    }
}

/// Describe every field of a result schema.
pub fn schema_fields(schema: &Schema) -> Vec<TableField> {
    schema
        .fields()
        .iter()
        .map(|field| TableField {
            name: field.name().clone(),
            field_type: map_arrow_type(field.data_type()),
            database_type: field.data_type().to_string(),
            nullable: field.is_nullable(),
        })
        .collect()
}

/// Build a [`TableField`] from one `DESCRIBE` row.
pub fn describe_field(name: &str, engine_type: &str, null: &str) -> TableField {
    TableField {
        name: name.to_string(),
        field_type: map_engine_type(engine_type),
        database_type: engine_type.to_string(),
        nullable: !null.eq_ignore_ascii_case("NO"),
    }
}

/// Apply the read-time casts configured in [`QueryOptions`] to a batch.
pub fn coerce_batch(batch: RecordBatch, options: &QueryOptions) -> Result<RecordBatch, ClientError> {
    let schema = batch.schema();
    let mut changed = false;
    let mut fields = Vec::with_capacity(schema.fields().len());
    let mut columns = Vec::with_capacity(batch.num_columns());

    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        match coerced_type(field.data_type(), options) {
            Some(target) => {
                let casted = cast(column.as_ref(), &target).map_err(|err| {
                    ClientError::Internal(format!(
                        "failed to cast column {} from {} to {target}: {err}",
                        field.name(),
                        field.data_type()
                    ))
                })?;
                fields.push(Arc::new(
                    Field::new(field.name(), target, field.is_nullable())
                        .with_metadata(field.metadata().clone()),
                ));
                columns.push(casted);
                changed = true;
            }
            None => {
                fields.push(field.clone());
                columns.push(column.clone());
            }
        }
    }

    if !changed {
        return Ok(batch);
    }
    let coerced: SchemaRef = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    RecordBatch::try_new(coerced, columns)
        .map_err(|err| ClientError::Internal(format!("failed to rebuild coerced batch: {err}")))
}

fn coerced_type(data_type: &DataType, options: &QueryOptions) -> Option<DataType> {
    match data_type {
        DataType::Int64 | DataType::UInt64 if options.cast_bigint_to_double => {
            Some(DataType::Float64)
        }
        // HUGEINT arrives as a zero-scale wide decimal.
        DataType::Decimal128(precision, 0) if *precision > 18 && options.cast_bigint_to_double => {
            Some(DataType::Float64)
        }
        DataType::Timestamp(_, _) if options.cast_timestamp_to_date => Some(DataType::Date64),
        DataType::Timestamp(_, _) => Some(DataType::Int64),
        _ => None,
    }
}

/// Materialize every row of a batch.
pub fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<Row>, ClientError> {
    let schema = batch.schema();
    let mut columns = Vec::with_capacity(batch.num_columns());
    for column in batch.columns() {
        columns.push(array_to_values(column)?.into_iter());
    }

    let mut rows = Vec::with_capacity(batch.num_rows());
    for _ in 0..batch.num_rows() {
        let mut row = Row::with_capacity(columns.len());
        for (field, values) in schema.fields().iter().zip(columns.iter_mut()) {
            row.push(field.name().clone(), values.next().unwrap_or(Value::Null));
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Convert an Arrow array into application values, one per slot.
pub fn array_to_values(array: &ArrayRef) -> Result<Vec<Value>, ClientError> {
    let mut values = Vec::with_capacity(array.len());

    macro_rules! push_values {
        ($arr_type:ty, |$v:ident| $make:expr) => {{
            let arr = downcast_array::<$arr_type>(array)?;
            for idx in 0..arr.len() {
                if arr.is_null(idx) {
                    values.push(Value::Null);
                } else {
                    let $v = arr.value(idx);
                    values.push($make);
                }
            }
        }};
    }

    match array.data_type() {
        DataType::Null => values.resize(array.len(), Value::Null),
        DataType::Boolean => push_values!(BooleanArray, |v| Value::Boolean(v)),
        DataType::Int8 => push_values!(Int8Array, |v| Value::Integer(i64::from(v))),
        DataType::Int16 => push_values!(Int16Array, |v| Value::Integer(i64::from(v))),
        DataType::Int32 => push_values!(Int32Array, |v| Value::Integer(i64::from(v))),
        DataType::Int64 => push_values!(Int64Array, |v| Value::BigInt(i128::from(v))),
        DataType::UInt8 => push_values!(UInt8Array, |v| Value::Integer(i64::from(v))),
        DataType::UInt16 => push_values!(UInt16Array, |v| Value::Integer(i64::from(v))),
        DataType::UInt32 => push_values!(UInt32Array, |v| Value::Integer(i64::from(v))),
        DataType::UInt64 => push_values!(UInt64Array, |v| Value::BigInt(i128::from(v))),
        DataType::Float32 => push_values!(Float32Array, |v| Value::Number(f64::from(v))),
        DataType::Float64 => push_values!(Float64Array, |v| Value::Number(v)),
        DataType::Decimal128(_, scale) => {
            let divisor = 10f64.powi(i32::from(*scale));
            push_values!(Decimal128Array, |v| Value::Number(v as f64 / divisor))
        }
        DataType::Utf8 => push_values!(StringArray, |v| Value::String(v.to_string())),
        DataType::LargeUtf8 => push_values!(LargeStringArray, |v| Value::String(v.to_string())),
        DataType::Binary => push_values!(BinaryArray, |v| Value::Buffer(v.to_vec())),
        DataType::LargeBinary => push_values!(LargeBinaryArray, |v| Value::Buffer(v.to_vec())),
        DataType::FixedSizeBinary(_) => {
            push_values!(FixedSizeBinaryArray, |v| Value::Buffer(v.to_vec()))
        }
        DataType::Date32 => push_values!(Date32Array, |v| date_value(
            DateTime::from_timestamp(i64::from(v) * 86_400, 0)
        )),
        DataType::Date64 => push_values!(Date64Array, |v| date_value(
            DateTime::from_timestamp_millis(v)
        )),
        DataType::Timestamp(unit, _) => match unit {
            TimeUnit::Second => push_values!(TimestampSecondArray, |v| date_value(
                DateTime::from_timestamp(v, 0)
            )),
            TimeUnit::Millisecond => push_values!(TimestampMillisecondArray, |v| date_value(
                DateTime::from_timestamp_millis(v)
            )),
            TimeUnit::Microsecond => push_values!(TimestampMicrosecondArray, |v| date_value(
                DateTime::from_timestamp_micros(v)
            )),
            TimeUnit::Nanosecond => push_values!(TimestampNanosecondArray, |v| Value::Date(
                DateTime::from_timestamp_nanos(v)
            )),
        },
        DataType::List(_) => {
            let arr = downcast_array::<ListArray>(array)?;
            for idx in 0..arr.len() {
                if arr.is_null(idx) {
                    values.push(Value::Null);
                } else {
                    values.push(Value::Array(array_to_values(&arr.value(idx))?));
                }
            }
        }
        DataType::LargeList(_) => {
            let arr = downcast_array::<LargeListArray>(array)?;
            for idx in 0..arr.len() {
                if arr.is_null(idx) {
                    values.push(Value::Null);
                } else {
                    values.push(Value::Array(array_to_values(&arr.value(idx))?));
                }
            }
        }
        DataType::FixedSizeList(_, _) => {
            let arr = downcast_array::<FixedSizeListArray>(array)?;
            for idx in 0..arr.len() {
                if arr.is_null(idx) {
                    values.push(Value::Null);
                } else {
                    values.push(Value::Array(array_to_values(&arr.value(idx))?));
                }
            }
        }
        DataType::Struct(fields) => {
            let arr = downcast_array::<StructArray>(array)?;
            let mut children = Vec::with_capacity(fields.len());
            for column in arr.columns() {
                children.push(array_to_values(column)?);
            }
            for idx in 0..arr.len() {
                if arr.is_null(idx) {
                    values.push(Value::Null);
                    continue;
                }
                let entries = fields
                    .iter()
                    .zip(children.iter())
                    .map(|(field, child)| (field.name().clone(), child[idx].clone()))
                    .collect();
                values.push(Value::Object(entries));
            }
        }
        DataType::Map(_, _) => {
            let arr = downcast_array::<MapArray>(array)?;
            for idx in 0..arr.len() {
                if arr.is_null(idx) {
                    values.push(Value::Null);
                    continue;
                }
                let entries = arr.value(idx);
                let keys = array_to_values(entries.column(0))?;
                let vals = array_to_values(entries.column(1))?;
                let object = keys
                    .into_iter()
                    .zip(vals)
                    .map(|(k, v)| (key_string(k), v))
                    .collect();
                values.push(Value::Object(object));
            }
        }
        DataType::Dictionary(_, value_type) => {
            let decoded = cast(array.as_ref(), value_type).map_err(|err| {
                ClientError::Internal(format!("failed to decode dictionary column: {err}"))
            })?;
            return array_to_values(&decoded);
        }
        _ => {
            // Times, intervals, wide decimals and anything else: display form.
            let formatter = ArrayFormatter::try_new(array.as_ref(), &FormatOptions::default())
                .map_err(|err| {
                    ClientError::Internal(format!(
                        "unsupported column type {}: {err}",
                        array.data_type()
                    ))
                })?;
            for idx in 0..array.len() {
                if array.is_null(idx) {
                    values.push(Value::Null);
                } else {
                    values.push(Value::String(formatter.value(idx).to_string()));
                }
            }
        }
    }

    Ok(values)
}

fn date_value(parsed: Option<DateTime<Utc>>) -> Value {
    parsed.map(Value::Date).unwrap_or(Value::Null)
}

fn key_string(key: Value) -> String {
    match key {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn downcast_array<T: 'static>(array: &ArrayRef) -> Result<&T, ClientError> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        ClientError::Internal(format!(
            "expected {} but found {}",
            type_name::<T>(),
            array.data_type()
        ))
    })
}

/// Convert an application value into a bindable DuckDB value.
pub fn value_to_engine(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Boolean(b) => DuckValue::Boolean(*b),
        Value::Integer(v) => DuckValue::BigInt(*v),
        Value::BigInt(v) => match i64::try_from(*v) {
            Ok(small) => DuckValue::BigInt(small),
            Err(_) => DuckValue::HugeInt(*v),
        },
        Value::Number(v) => DuckValue::Double(*v),
        Value::String(s) => DuckValue::Text(s.clone()),
        Value::Date(d) => DuckValue::Timestamp(DuckTimeUnit::Microsecond, d.timestamp_micros()),
        Value::Buffer(bytes) => DuckValue::Blob(bytes.clone()),
        Value::Array(_) | Value::Object(_) => DuckValue::Text(value.to_json().to_string()),
    }
}

pub fn values_to_engine(values: &[Value]) -> Vec<DuckValue> {
    values.iter().map(value_to_engine).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use duckdb::arrow::array::{Int64Array, StringArray};

    #[test]
    fn engine_integer_mappings() {
        assert_eq!(map_engine_type("INTEGER"), FieldType::Integer);
        assert_eq!(map_engine_type("bigint"), FieldType::Bigint);
        assert_eq!(map_engine_type("HUGEINT"), FieldType::Bigint);
        assert_eq!(map_engine_type("UTINYINT"), FieldType::Integer);
    }

    #[test]
    fn engine_decimal_pattern_maps_to_number() {
        assert_eq!(map_engine_type("DECIMAL(18,3)"), FieldType::Number);
        assert_eq!(map_engine_type("DECIMAL"), FieldType::Number);
        assert_eq!(map_engine_type("NUMERIC(60,5)"), FieldType::Number);
    }

    #[test]
    fn engine_nested_and_unknown_types() {
        assert_eq!(map_engine_type("INTEGER[]"), FieldType::Array);
        assert_eq!(map_engine_type("STRUCT(a INTEGER)"), FieldType::Object);
        assert_eq!(map_engine_type("MAP(VARCHAR, INTEGER)"), FieldType::Object);
        assert_eq!(map_engine_type("GEOMETRY"), FieldType::Other);
        assert_eq!(map_engine_type("INTERVAL"), FieldType::Other);
    }

    #[test]
    fn arrow_type_mappings() {
        assert_eq!(map_arrow_type(&DataType::Int32), FieldType::Integer);
        assert_eq!(map_arrow_type(&DataType::Int64), FieldType::Bigint);
        assert_eq!(map_arrow_type(&DataType::Utf8), FieldType::String);
        assert_eq!(map_arrow_type(&DataType::Date64), FieldType::Date);
        assert_eq!(map_arrow_type(&DataType::Decimal128(10, 2)), FieldType::Number);
        assert_eq!(map_arrow_type(&DataType::Interval(duckdb::arrow::datatypes::IntervalUnit::MonthDayNano)), FieldType::Other);
    }

    #[test]
    fn describe_field_reads_null_column() {
        let field = describe_field("id", "INTEGER", "NO");
        assert!(!field.nullable);
        assert_eq!(field.field_type, FieldType::Integer);
        assert!(describe_field("name", "VARCHAR", "YES").nullable);
    }

    #[test]
    fn coerce_batch_casts_bigint_to_double() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("n", DataType::Int64, false),
            Field::new("s", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec![Some("a"), None])),
            ],
        )
        .unwrap();

        let coerced = coerce_batch(batch.clone(), &QueryOptions::default()).unwrap();
        assert_eq!(coerced.schema().field(0).data_type(), &DataType::Float64);
        let rows = batch_to_rows(&coerced).unwrap();
        assert_eq!(rows[1].get("n"), Some(&Value::Number(2.0)));
        assert_eq!(rows[1].get("s"), Some(&Value::Null));

        let raw = QueryOptions {
            cast_bigint_to_double: false,
            cast_timestamp_to_date: true,
        };
        let untouched = coerce_batch(batch, &raw).unwrap();
        let rows = batch_to_rows(&untouched).unwrap();
        assert_eq!(rows[0].get("n"), Some(&Value::BigInt(1)));
    }

    #[test]
    fn duplicate_column_names_keep_every_column() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int64, false),
            Field::new("a", DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1])),
                Arc::new(StringArray::from(vec!["two"])),
            ],
        )
        .unwrap();

        let rows = batch_to_rows(&batch).unwrap();
        assert_eq!(rows[0].len(), schema_fields(&batch.schema()).len());
        assert_eq!(
            rows[0].clone().into_values(),
            vec![Value::BigInt(1), Value::from("two")]
        );
        assert_eq!(rows[0].get("a"), Some(&Value::BigInt(1)));
    }

    #[test]
    fn timestamps_become_dates_or_ticks() {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "ts",
            DataType::Timestamp(TimeUnit::Microsecond, None),
            true,
        )]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(TimestampMicrosecondArray::from(vec![1_000_000]))],
        )
        .unwrap();

        let as_date = coerce_batch(batch.clone(), &QueryOptions::default()).unwrap();
        let rows = batch_to_rows(&as_date).unwrap();
        let expected = DateTime::from_timestamp(1, 0).unwrap();
        assert_eq!(rows[0].get("ts"), Some(&Value::Date(expected)));

        let ticks = QueryOptions {
            cast_bigint_to_double: false,
            cast_timestamp_to_date: false,
        };
        let coerced = coerce_batch(batch, &ticks).unwrap();
        assert_eq!(
            schema_fields(&coerced.schema())[0].field_type,
            FieldType::Bigint
        );
        let rows = batch_to_rows(&coerced).unwrap();
        assert_eq!(rows[0].get("ts"), Some(&Value::BigInt(1_000_000)));
    }

    #[test]
    fn list_columns_materialize_as_arrays() {
        use duckdb::arrow::array::ListBuilder;
        use duckdb::arrow::array::Int32Builder;

        let mut builder = ListBuilder::new(Int32Builder::new());
        builder.values().append_value(1);
        builder.values().append_value(2);
        builder.append(true);
        builder.append(false);
        let array: ArrayRef = Arc::new(builder.finish());

        let values = array_to_values(&array).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Array(vec![Value::Integer(1), Value::Integer(2)]),
                Value::Null
            ]
        );
    }

    #[test]
    fn parameters_convert_to_engine_values() {
        assert_eq!(value_to_engine(&Value::Integer(5)), DuckValue::BigInt(5));
        assert_eq!(
            value_to_engine(&Value::BigInt(i128::from(i64::MAX) + 1)),
            DuckValue::HugeInt(i128::from(i64::MAX) + 1)
        );
        assert_eq!(
            value_to_engine(&Value::Array(vec![Value::from(1)])),
            DuckValue::Text("[1]".to_string())
        );
    }
}

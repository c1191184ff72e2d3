//! SQL for the engine's file readers.
//!
//! File locations are inlined as escaped string literals because table
//! function arguments must be constants.

use std::collections::BTreeMap;

use crate::ingest::source::{CsvOptions, JsonFormat, JsonOptions};
use crate::sql::{quote_ident, quote_literal};

/// Reader table functions understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reader {
    Csv,
    Tsv,
    Json,
    Parquet,
    Xlsx,
    /// Legacy spreadsheets go through the spatial GDAL reader.
    Xls,
}

impl Reader {
    /// Reader for a bare extension, used for views over remote files.
    pub fn for_extension(extension: &str) -> Option<Self> {
        match extension {
            "csv" => Some(Reader::Csv),
            "tsv" => Some(Reader::Tsv),
            "json" | "ndjson" | "jsonl" => Some(Reader::Json),
            "parquet" => Some(Reader::Parquet),
            _ => None,
        }
    }

    /// Auto-detecting scan expression over `location`.
    pub fn scan(&self, location: &str) -> String {
        let path = quote_literal(location);
        match self {
            Reader::Csv => format!("read_csv_auto({path})"),
            Reader::Tsv => format!("read_csv_auto({path}, delim = {})", quote_literal("\t")),
            Reader::Json => format!("read_json_auto({path})"),
            Reader::Parquet => format!("parquet_scan({path})"),
            Reader::Xlsx => format!("read_xlsx({path})"),
            Reader::Xls => format!("st_read({path})"),
        }
    }
}

pub fn qualified_name(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

pub fn create_view(target: &str, scan: &str) -> String {
    format!("CREATE VIEW {target} AS SELECT * FROM {scan}")
}

pub fn create_table(target: &str, scan: &str) -> String {
    format!("CREATE TABLE {target} AS SELECT * FROM {scan}")
}

/// Typed CSV scan: header and schema detection plus caller overrides.
pub fn typed_csv_scan(location: &str, options: &CsvOptions, tab_separated: bool) -> String {
    let mut args = vec![
        quote_literal(location),
        "auto_detect = true".to_string(),
        format!("header = {}", options.header.unwrap_or(true)),
    ];
    push_dialect(&mut args, options, tab_separated);
    if let Some(format) = &options.date_format {
        args.push(format!("dateformat = {}", quote_literal(format)));
    }
    if let Some(format) = &options.timestamp_format {
        args.push(format!("timestampformat = {}", quote_literal(format)));
    }
    if !options.column_types.is_empty() {
        args.push(format!("types = {}", struct_literal(&options.column_types)));
    }
    format!("read_csv({})", args.join(", "))
}

/// Text-only CSV scan used after a typed load failed to convert values.
///
/// The delimiter is always spelled out so the sniffer only has to find the
/// header; caller type overrides are dropped.
pub fn untyped_csv_scan(
    location: &str,
    options: &CsvOptions,
    tab_separated: bool,
    detected_delimiter: char,
) -> String {
    let mut args = vec![
        quote_literal(location),
        "all_varchar = true".to_string(),
        "auto_detect = true".to_string(),
        format!("header = {}", options.header.unwrap_or(true)),
    ];
    let mut dialect = options.clone();
    if dialect.delimiter.is_none() && !tab_separated {
        dialect.delimiter = Some(detected_delimiter.to_string());
    }
    push_dialect(&mut args, &dialect, tab_separated);
    format!("read_csv({})", args.join(", "))
}

fn push_dialect(args: &mut Vec<String>, options: &CsvOptions, tab_separated: bool) {
    match (&options.delimiter, tab_separated) {
        (Some(delimiter), _) => args.push(format!("delim = {}", quote_literal(delimiter))),
        (None, true) => args.push(format!("delim = {}", quote_literal("\t"))),
        (None, false) => {}
    }
    if let Some(quote) = &options.quote {
        args.push(format!("quote = {}", quote_literal(quote)));
    }
    if let Some(escape) = &options.escape {
        args.push(format!("escape = {}", quote_literal(escape)));
    }
    if let Some(skip) = options.skip {
        args.push(format!("skip = {skip}"));
    }
}

/// Typed JSON scan honoring the declared format and column types.
pub fn typed_json_scan(location: &str, options: &JsonOptions) -> String {
    let mut args = vec![quote_literal(location)];
    if options.format != JsonFormat::Auto {
        args.push(format!("format = {}", quote_literal(options.format.as_str())));
    }
    if !options.column_types.is_empty() {
        args.push(format!("columns = {}", struct_literal(&options.column_types)));
    }
    format!("read_json({})", args.join(", "))
}

fn struct_literal(columns: &BTreeMap<String, String>) -> String {
    let entries = columns
        .iter()
        .map(|(column, ty)| format!("{}: {}", quote_literal(column), quote_literal(ty)))
        .collect::<Vec<_>>();
    format!("{{{}}}", entries.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_csv_includes_overrides() {
        let mut options = CsvOptions {
            delimiter: Some(";".to_string()),
            skip: Some(2),
            ..CsvOptions::default()
        };
        options
            .column_types
            .insert("id".to_string(), "INTEGER".to_string());
        assert_eq!(
            typed_csv_scan("/tmp/a.csv", &options, false),
            "read_csv('/tmp/a.csv', auto_detect = true, header = true, delim = ';', skip = 2, \
             types = {'id': 'INTEGER'})"
        );
    }

    #[test]
    fn tab_separated_defaults_to_tab() {
        let scan = typed_csv_scan("a.tsv", &CsvOptions::default(), true);
        assert!(scan.contains("delim = '\t'"));
    }

    #[test]
    fn untyped_csv_spells_out_delimiter() {
        let scan = untyped_csv_scan("a.csv", &CsvOptions::default(), false, '|');
        assert_eq!(
            scan,
            "read_csv('a.csv', all_varchar = true, auto_detect = true, header = true, delim = '|')"
        );
    }

    #[test]
    fn json_scan_omits_auto_format() {
        assert_eq!(
            typed_json_scan("a.json", &JsonOptions::default()),
            "read_json('a.json')"
        );
        let options = JsonOptions {
            format: JsonFormat::Array,
            ..JsonOptions::default()
        };
        assert_eq!(
            typed_json_scan("a.json", &options),
            "read_json('a.json', format = 'array')"
        );
    }

    #[test]
    fn qualified_names_quote_both_parts() {
        assert_eq!(qualified_name("main", "my \"t\""), "\"main\".\"my \"\"t\"\"\"");
        assert_eq!(
            create_view("\"v\"", &Reader::Parquet.scan("x.parquet")),
            "CREATE VIEW \"v\" AS SELECT * FROM parquet_scan('x.parquet')"
        );
    }
}

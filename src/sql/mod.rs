//! SQL text helpers: identifier and literal quoting, type inference for
//! generated DDL, and the parameterized query template.

mod escape;
mod infer;
mod template;

pub use escape::{escape, quote_ident, quote_literal, to_literal, where_clause};
pub use infer::{detect_csv_delimiter, infer_sql_type};
pub use template::SqlQuery;

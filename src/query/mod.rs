//! Query execution: lazily streamed batches and materialized results.

mod result;
mod stream;

pub use result::QueryResult;
pub use stream::QueryStream;
pub(crate) use stream::StreamSettings;

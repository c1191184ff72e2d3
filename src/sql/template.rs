use crate::error::ClientError;
use crate::value::Value;

const PLACEHOLDER: &str = "{}";

/// Statement text with `?` placeholders plus the values bound to them.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub text: String,
    pub params: Vec<Value>,
}

impl SqlQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    /// Join literal `parts` with `?`, binding one value per gap.
    pub fn build<S: AsRef<str>>(parts: &[S], values: Vec<Value>) -> Result<Self, ClientError> {
        if parts.len() != values.len() + 1 {
            return Err(ClientError::Precondition(format!(
                "sql template has {} literal parts for {} values",
                parts.len(),
                values.len()
            )));
        }
        let text = parts
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("?");
        Ok(Self {
            text,
            params: values,
        })
    }

    /// Split a `{}` template into literal parts and bind `values` to the gaps.
    pub fn from_template(template: &str, values: Vec<Value>) -> Result<Self, ClientError> {
        let parts = template.split(PLACEHOLDER).collect::<Vec<_>>();
        Self::build(&parts, values)
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// Build a [`SqlQuery`] from a literal template, binding every argument as a
/// parameter in place of each `{}`.
///
/// ```
/// let query = ducklens::sql!("SELECT * FROM users WHERE id = {} AND name = {}", 7, "a")?;
/// assert_eq!(query.text, "SELECT * FROM users WHERE id = ? AND name = ?");
/// # Ok::<(), ducklens::ClientError>(())
/// ```
#[macro_export]
macro_rules! sql {
    ($template:literal $(, $arg:expr)* $(,)?) => {
        $crate::sql::SqlQuery::from_template(
            $template,
            ::std::vec![$($crate::Value::from($arg)),*],
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_joins_parts_with_placeholders() {
        let query = SqlQuery::build(&["SELECT ", " + ", ""], vec![1.into(), 2.into()]).unwrap();
        assert_eq!(query.text, "SELECT ? + ?");
        assert_eq!(query.params, vec![Value::Integer(1), Value::Integer(2)]);
    }

    #[test]
    fn build_rejects_mismatched_parts() {
        let err = SqlQuery::build(&["SELECT ", ""], vec![]).unwrap_err();
        assert!(matches!(err, ClientError::Precondition(_)));
    }

    #[test]
    fn macro_never_inlines_values() {
        let name = "x'; DROP TABLE t; --";
        let query = crate::sql!("SELECT * FROM t WHERE name = {}", name).unwrap();
        assert_eq!(query.text, "SELECT * FROM t WHERE name = ?");
        assert_eq!(query.params, vec![Value::from(name)]);
    }

    #[test]
    fn macro_without_arguments() {
        let query = crate::sql!("SELECT 1").unwrap();
        assert_eq!(query, SqlQuery::new("SELECT 1"));
    }
}

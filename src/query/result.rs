use std::ops::Index;

use serde::Serialize;

use crate::types::TableField;
use crate::value::Row;

/// Fully materialized query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult<T = Row> {
    pub schema: Vec<TableField>,
    pub rows: Vec<T>,
}

impl<T> QueryResult<T> {
    pub fn new(schema: Vec<TableField>, rows: Vec<T>) -> Self {
        Self { schema, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&T> {
        self.rows.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.rows.iter()
    }

    pub fn field(&self, name: &str) -> Option<&TableField> {
        self.schema.iter().find(|field| field.name == name)
    }

    pub fn into_rows(self) -> Vec<T> {
        self.rows
    }

    /// Convert every row, keeping the schema.
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<QueryResult<U>, E> {
        let rows = self.rows.into_iter().map(f).collect::<Result<Vec<_>, E>>()?;
        Ok(QueryResult {
            schema: self.schema,
            rows,
        })
    }
}

impl<T> Index<usize> for QueryResult<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.rows[index]
    }
}

impl<T> IntoIterator for QueryResult<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a QueryResult<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

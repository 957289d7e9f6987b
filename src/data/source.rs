//! Declarative read queries and the remote source that executes them.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::FetchError;

/// A single column filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
  Eq { column: String, value: String },
  /// Case-insensitive pattern match; `*` is the wildcard
  ILike { column: String, pattern: String },
  /// Matches when any of `patterns` matches case-insensitively
  AnyILike { column: String, patterns: Vec<String> },
  Gte { column: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
  pub column: String,
  pub ascending: bool,
}

/// Description of one `select` against a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
  pub table: String,
  pub columns: String,
  pub filters: Vec<Filter>,
  pub order: Option<Order>,
  pub limit: Option<usize>,
}

impl SelectQuery {
  /// Select all columns of `table`.
  pub fn from(table: impl Into<String>) -> Self {
    Self {
      table: table.into(),
      columns: "*".to_string(),
      filters: Vec::new(),
      order: None,
      limit: None,
    }
  }

  pub fn select(mut self, columns: impl Into<String>) -> Self {
    self.columns = columns.into();
    self
  }

  pub fn eq(mut self, column: impl Into<String>, value: impl ToString) -> Self {
    self.filters.push(Filter::Eq {
      column: column.into(),
      value: value.to_string(),
    });
    self
  }

  pub fn ilike(mut self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
    self.filters.push(Filter::ILike {
      column: column.into(),
      pattern: pattern.into(),
    });
    self
  }

  pub fn any_ilike<I, S>(mut self, column: impl Into<String>, patterns: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.filters.push(Filter::AnyILike {
      column: column.into(),
      patterns: patterns.into_iter().map(Into::into).collect(),
    });
    self
  }

  pub fn gte(mut self, column: impl Into<String>, value: impl ToString) -> Self {
    self.filters.push(Filter::Gte {
      column: column.into(),
      value: value.to_string(),
    });
    self
  }

  pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
    self.order = Some(Order {
      column: column.into(),
      ascending,
    });
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }
}

/// Hosted record provider. Implementations classify their failures into
/// [`FetchError`] so callers can tell network trouble from bad requests.
#[async_trait]
pub trait RemoteSource: Send + Sync {
  async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, FetchError>;
}

//! Supabase (PostgREST) implementation of [`RemoteSource`].

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::FetchError;

use super::source::{Filter, RemoteSource, SelectQuery};

/// PostgREST client for a Supabase project.
#[derive(Clone)]
pub struct SupabaseSource {
  http: reqwest::Client,
  rest_url: Url,
  api_key: String,
}

impl SupabaseSource {
  pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
      base.push('/');
    }
    let rest_url = Url::parse(&base)
      .and_then(|url| url.join("rest/v1/"))
      .map_err(|e| eyre!("Invalid Supabase URL {}: {}", base_url, e))?;

    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      rest_url,
      api_key,
    })
  }

  /// Build the PostgREST URL for `query`.
  pub fn query_url(&self, query: &SelectQuery) -> std::result::Result<Url, FetchError> {
    let mut url = self
      .rest_url
      .join(&query.table)
      .map_err(|e| FetchError::Validation(format!("invalid table {}: {}", query.table, e)))?;

    {
      let mut pairs = url.query_pairs_mut();
      pairs.append_pair("select", &query.columns);
      for filter in &query.filters {
        let (column, expr) = filter_param(filter);
        pairs.append_pair(column, &expr);
      }
      if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        pairs.append_pair("order", &format!("{}.{}", order.column, direction));
      }
      if let Some(limit) = query.limit {
        pairs.append_pair("limit", &limit.to_string());
      }
    }

    Ok(url)
  }
}

#[async_trait]
impl RemoteSource for SupabaseSource {
  async fn select(&self, query: &SelectQuery) -> std::result::Result<Vec<Value>, FetchError> {
    let url = self.query_url(query)?;
    debug!(table = %query.table, %url, "select");

    let response = self
      .http
      .get(url)
      .header("apikey", &self.api_key)
      .bearer_auth(&self.api_key)
      .header("Accept", "application/json")
      .send()
      .await
      .map_err(classify_transport)?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(classify_status(status, &body));
    }

    response
      .json::<Vec<Value>>()
      .await
      .map_err(|e| FetchError::Unknown(format!("failed to decode {} rows: {}", query.table, e)))
  }
}

fn filter_param(filter: &Filter) -> (&str, String) {
  match filter {
    Filter::Eq { column, value } => (column.as_str(), format!("eq.{}", value)),
    Filter::ILike { column, pattern } => (column.as_str(), format!("ilike.{}", pattern)),
    Filter::Gte { column, value } => (column.as_str(), format!("gte.{}", value)),
    Filter::AnyILike { column, patterns } => {
      let list: Vec<String> = patterns
        .iter()
        .map(|p| format!("{}.ilike.{}", column, quote(p)))
        .collect();
      ("or", format!("({})", list.join(",")))
    }
  }
}

/// Quote `or` operands containing PostgREST reserved characters.
fn quote(value: &str) -> String {
  if value.contains([',', '.', ':', '(', ')', '"', ' ']) {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
  } else {
    value.to_string()
  }
}

fn classify_transport(e: reqwest::Error) -> FetchError {
  if e.is_builder() {
    FetchError::Validation(e.to_string())
  } else {
    FetchError::Network(e.to_string())
  }
}

#[derive(Deserialize)]
struct PostgrestError {
  message: Option<String>,
}

fn classify_status(status: StatusCode, body: &str) -> FetchError {
  let message = serde_json::from_str::<PostgrestError>(body)
    .ok()
    .and_then(|e| e.message)
    .filter(|m| !m.is_empty())
    .unwrap_or_else(|| {
      let body = body.trim();
      if body.is_empty() {
        status.to_string()
      } else {
        body.to_string()
      }
    });

  match status.as_u16() {
    401 | 403 => FetchError::Auth(message),
    404 | 406 => FetchError::NotFound(message),
    400..=499 => FetchError::Validation(message),
    _ => FetchError::Unknown(message),
  }
}

//! PostgREST-style HTTP data source.

use chrono::{DateTime, NaiveDateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{Map, Value};
use std::time::Duration;
use url::Url;

use super::{ChunkQuery, DataSource, ResultRecord, Scope};
use crate::config::{LookupConfig, SourceConfig};

type Row = Map<String, Value>;

/// Data service client for one lookup table.
#[derive(Clone)]
pub struct RestSource {
  client: reqwest::Client,
  base_url: Url,
  table: LookupConfig,
}

impl RestSource {
  pub fn new(source: &SourceConfig, table: &LookupConfig, api_key: Option<String>) -> Result<Self> {
    let base_url = Url::parse(&source.url)
      .map_err(|e| eyre!("Invalid data service URL {}: {}", source.url, e))?;

    let mut headers = HeaderMap::new();
    if let Some(key) = api_key {
      let apikey = HeaderValue::from_str(&key).map_err(|e| eyre!("Invalid API key: {}", e))?;
      let bearer = HeaderValue::from_str(&format!("Bearer {}", key))
        .map_err(|e| eyre!("Invalid API key: {}", e))?;
      headers.insert("apikey", apikey);
      headers.insert(AUTHORIZATION, bearer);
    }

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(Duration::from_secs(source.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      table: table.clone(),
    })
  }

  /// Request URL for one chunk: `id in (...)`, optional scope, newest first.
  fn query_url(&self, query: &ChunkQuery) -> Result<Url> {
    let table = &self.table;
    let mut url = self.base_url.clone();

    url
      .path_segments_mut()
      .map_err(|_| eyre!("Data service URL cannot be a base: {}", self.base_url))?
      .pop_if_empty()
      .push(&table.table);

    let mut select = vec![
      table.id_column.as_str(),
      table.value_column.as_str(),
      table.created_at_column.as_str(),
    ];
    if let Some(scope_column) = &table.scope_column {
      select.push(scope_column);
    }

    let ids: Vec<String> = query.ids.iter().map(|id| quote(id)).collect();

    {
      let mut pairs = url.query_pairs_mut();
      pairs.append_pair("select", &select.join(","));
      pairs.append_pair(&table.id_column, &format!("in.({})", ids.join(",")));
      if let (Some(scope_column), Some(scope)) = (&table.scope_column, &query.scope) {
        pairs.append_pair(scope_column, &format!("eq.{}", scope));
      }
      pairs.append_pair("order", &format!("{}.desc", table.created_at_column));
    }

    Ok(url)
  }

  /// Map one JSON row onto a record. Rows with a null value are skipped.
  fn decode_row(&self, row: &Row) -> Result<Option<ResultRecord<String>>> {
    let table = &self.table;

    let id = match row.get(&table.id_column) {
      Some(Value::String(s)) => s.clone(),
      Some(Value::Number(n)) => n.to_string(),
      other => return Err(eyre!("Row has no usable {}: {:?}", table.id_column, other)),
    };

    let value = match row.get(&table.value_column) {
      None | Some(Value::Null) => return Ok(None),
      Some(Value::String(s)) => s.clone(),
      Some(other) => other.to_string(),
    };

    let created_at = row
      .get(&table.created_at_column)
      .and_then(Value::as_str)
      .ok_or_else(|| eyre!("Row {} has no {}", id, table.created_at_column))
      .and_then(parse_timestamp)?;

    let scope = table
      .scope_column
      .as_ref()
      .and_then(|column| row.get(column))
      .and_then(|v| match v {
        Value::String(s) => Some(Scope::new(s.as_str())),
        Value::Null => None,
        other => Some(Scope::new(other.to_string())),
      });

    Ok(Some(ResultRecord {
      id,
      value,
      created_at,
      scope,
    }))
  }
}

impl DataSource for RestSource {
  type Value = String;

  async fn query(&self, query: ChunkQuery) -> Result<Vec<ResultRecord<String>>> {
    let url = self.query_url(&query)?;

    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to query {}: {}", self.table.table, e))?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(eyre!(
        "Query on {} failed with {}: {}",
        self.table.table,
        status,
        body
      ));
    }

    let rows: Vec<Row> = response
      .json()
      .await
      .map_err(|e| eyre!("Failed to decode rows from {}: {}", self.table.table, e))?;

    let mut records = Vec::with_capacity(rows.len());
    for row in &rows {
      if let Some(record) = self.decode_row(row)? {
        records.push(record);
      }
    }

    Ok(records)
  }
}

/// Quote an id for a PostgREST `in.(...)` list.
fn quote(id: &str) -> String {
  format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\""))
}

/// RFC 3339, or a zone-less timestamp taken as UTC.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
  if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
    return Ok(parsed.with_timezone(&Utc));
  }

  NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
    .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
    .map(|naive| naive.and_utc())
    .map_err(|e| eyre!("Invalid timestamp {}: {}", value, e))
}

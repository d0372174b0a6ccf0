// src/ingest/providers/json_api.rs
//! Generic JSON endpoint fetcher for `api` and `custom` sources.
//!
//! Config keys: `itemsPath` (dot path to the array of items), `idField`
//! (default `id`), `headers` (object of extra request headers).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use serde_json::Value;

use crate::error::FetchError;
use crate::ingest::types::{Fetcher, Record};
use crate::source::Source;

fn at_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|seg| !seg.is_empty())
        .try_fold(root, |cur, seg| match cur {
            Value::Object(m) => m.get(seg),
            Value::Array(a) => seg.parse::<usize>().ok().and_then(|i| a.get(i)),
            _ => None,
        })
}

fn item_id(item: &Value, id_field: &str) -> Option<String> {
    match item.get(id_field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Split a decoded body into records. An array yields one record per
/// element, anything else a single record.
pub fn extract_records(
    body: &Value,
    items_path: Option<&str>,
    id_field: &str,
) -> Result<Vec<Record>, FetchError> {
    let items = match items_path {
        Some(p) => at_path(body, p)
            .ok_or_else(|| FetchError::Format(format!("itemsPath '{p}' not found in response")))?,
        None => body,
    };
    let records = match items {
        Value::Array(a) => a
            .iter()
            .map(|v| Record {
                id: item_id(v, id_field),
                payload: v.clone(),
                ingested_at: None,
            })
            .collect(),
        other => vec![Record {
            id: item_id(other, id_field),
            payload: other.clone(),
            ingested_at: None,
        }],
    };
    Ok(records)
}

fn extra_headers(source: &Source) -> Result<HeaderMap, FetchError> {
    let mut map = HeaderMap::new();
    map.insert(ACCEPT, HeaderValue::from_static("application/json"));
    let Some(obj) = source.config.get("headers").and_then(Value::as_object) else {
        return Ok(map);
    };
    for (k, v) in obj {
        let Some(v) = v.as_str() else { continue };
        let name = HeaderName::from_bytes(k.as_bytes())
            .map_err(|e| FetchError::Misconfigured(format!("header name '{k}': {e}")))?;
        let value = HeaderValue::from_str(v)
            .map_err(|e| FetchError::Misconfigured(format!("header '{k}': {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

pub struct JsonApiFetcher {
    client: reqwest::Client,
}

impl JsonApiFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for JsonApiFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<Record>, FetchError> {
        let headers = extra_headers(source)?;
        let resp = self
            .client
            .get(&source.source_url)
            .headers(headers)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Network(format!(
                "HTTP {status} from {}",
                source.source_url
            )));
        }
        let text = resp.text().await?;
        let body: Value = serde_json::from_str(&text)
            .map_err(|e| FetchError::Format(format!("response is not JSON: {e}")))?;
        extract_records(
            &body,
            source.config_str("itemsPath"),
            source.config_str("idField").unwrap_or("id"),
        )
    }

    fn name(&self) -> &'static str {
        "json_api"
    }
}

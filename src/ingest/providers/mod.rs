// src/ingest/providers/mod.rs
pub mod json_api;
pub mod rss;
pub mod weather;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};

use crate::ingest::types::FetcherSet;
use crate::source::SourceType;

use self::{json_api::JsonApiFetcher, rss::RssFetcher, weather::WeatherFetcher};

/// Shared HTTP client for all built-in fetchers. The scheduler applies the
/// per-cycle timeout; `request_timeout` is a backstop for the transport.
pub fn http_client(user_agent: &str, request_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(request_timeout)
        .build()
        .context("building http client")
}

/// Built-in fetchers: rss/news -> RSS+Atom, weather -> OpenWeatherMap,
/// api/custom -> generic JSON. `social` has none.
pub fn default_fetchers(client: reqwest::Client, user_agent: &str, rss_items: usize) -> FetcherSet {
    let rss = Arc::new(RssFetcher::new(client.clone(), user_agent, rss_items));
    let json = Arc::new(JsonApiFetcher::new(client.clone()));
    FetcherSet::new()
        .with(SourceType::Rss, rss.clone())
        .with(SourceType::News, rss)
        .with(SourceType::Weather, Arc::new(WeatherFetcher::new(client)))
        .with(SourceType::Api, json.clone())
        .with(SourceType::Custom, json)
}

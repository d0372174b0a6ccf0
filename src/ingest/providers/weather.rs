// src/ingest/providers/weather.rs
//! OpenWeatherMap "current weather" fetcher for `weather` sources.
//!
//! Source config keys: `cities` (array of names, default `["New York"]`),
//! `apiKey` (required), `units` (default `metric`). The source URL is the
//! endpoint, e.g. `https://api.openweathermap.org/data/2.5/weather`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::FetchError;
use crate::ingest::types::{Fetcher, Record};
use crate::source::Source;

const DEFAULT_CITY: &str = "New York";
const PLACEHOLDER_KEYS: [&str; 2] = ["demo", "demo-key"];

#[derive(Debug, Deserialize)]
struct Owm {
    name: Option<String>,
    dt: Option<i64>,
    main: OwmMain,
    #[serde(default)]
    weather: Vec<OwmCondition>,
    wind: Option<OwmWind>,
    coord: Option<OwmCoord>,
}

#[derive(Debug, Deserialize)]
struct OwmMain {
    temp: f64,
    humidity: Option<f64>,
    pressure: Option<f64>,
    feels_like: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwmCondition {
    main: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwmWind {
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwmCoord {
    lat: f64,
    lon: f64,
}

fn cities(source: &Source) -> Vec<String> {
    let list: Vec<String> = source
        .config
        .get("cities")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if list.is_empty() {
        vec![DEFAULT_CITY.to_string()]
    } else {
        list
    }
}

fn api_key(source: &Source) -> Result<&str, FetchError> {
    match source.config_str("apiKey").map(str::trim) {
        Some(k) if !k.is_empty() && !PLACEHOLDER_KEYS.contains(&k) => Ok(k),
        _ => Err(FetchError::Misconfigured(
            "weather source needs config.apiKey".to_string(),
        )),
    }
}

/// Turn one OpenWeatherMap response body into a record for `city`.
pub fn parse_observation(city: &str, body: &str) -> Result<Record, FetchError> {
    let owm: Owm = serde_json::from_str(body)
        .map_err(|e| FetchError::Format(format!("weather response for {city}: {e}")))?;
    let condition = owm.weather.first();
    let name = owm.name.unwrap_or_else(|| city.to_string());
    let payload = json!({
        "city": name,
        "temperature": owm.main.temp,
        "feelsLike": owm.main.feels_like,
        "condition": condition.and_then(|c| c.main.clone()),
        "description": condition.and_then(|c| c.description.clone()),
        "humidity": owm.main.humidity,
        "pressure": owm.main.pressure,
        "windSpeed": owm.wind.and_then(|w| w.speed).unwrap_or(0.0),
        "coordinates": owm.coord.map(|c| json!({ "lat": c.lat, "lon": c.lon })),
        "observedAt": owm.dt,
        "type": "weather_observation",
    });
    // same observation twice is the same entry
    let id = owm.dt.map(|dt| format!("{}-{dt}", name.to_ascii_lowercase().replace(' ', "_")));
    Ok(Record {
        id,
        payload,
        ingested_at: None,
    })
}

pub struct WeatherFetcher {
    client: reqwest::Client,
}

impl WeatherFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_city(
        &self,
        url: &str,
        city: &str,
        key: &str,
        units: &str,
    ) -> Result<Record, FetchError> {
        let resp = self
            .client
            .get(url)
            .query(&[("q", city), ("appid", key), ("units", units)])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Network(format!("HTTP {status} for city {city}")));
        }
        let body = resp.text().await?;
        parse_observation(city, &body)
    }
}

#[async_trait]
impl Fetcher for WeatherFetcher {
    /// One record per city that answered. The cycle fails only when every
    /// city failed, with the first city's error.
    async fn fetch(&self, source: &Source) -> Result<Vec<Record>, FetchError> {
        let key = api_key(source)?;
        let units = source.config_str("units").unwrap_or("metric");

        let mut out = Vec::new();
        let mut first_err = None;
        for city in cities(source) {
            match self.fetch_city(&source.source_url, &city, key, units).await {
                Ok(rec) => out.push(rec),
                Err(e) => {
                    warn!(
                        target: "ingest",
                        source_id = %source.source_id,
                        city = %city,
                        error = %e,
                        "weather city skipped"
                    );
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) if out.is_empty() => Err(e),
            _ => Ok(out),
        }
    }

    fn name(&self) -> &'static str {
        "weather"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{NewSource, SourceLimits};
    use axum::{extract::Query, http::StatusCode, routing::get, Router};
    use std::collections::HashMap;

    const BODY: &str = r#"{
        "coord": {"lon": 139.69, "lat": 35.69},
        "weather": [{"id": 800, "main": "Clear", "description": "clear sky", "icon": "01d"}],
        "main": {"temp": 22.5, "feels_like": 21.9, "pressure": 1013, "humidity": 65},
        "wind": {"speed": 3.5, "deg": 180},
        "dt": 1749528000,
        "name": "Tokyo"
    }"#;

    fn source(config: Value) -> Source {
        NewSource::new("w", "weather", "https://api.openweathermap.org/data/2.5/weather")
            .with_config(config)
            .into_source(&SourceLimits::default())
            .unwrap()
    }

    #[test]
    fn parses_observation() {
        let rec = parse_observation("Tokyo", BODY).unwrap();
        assert_eq!(rec.id.as_deref(), Some("tokyo-1749528000"));
        assert_eq!(rec.payload["temperature"], 22.5);
        assert_eq!(rec.payload["description"], "clear sky");
        assert_eq!(rec.payload["coordinates"]["lat"], 35.69);
    }

    #[test]
    fn bad_body_is_format_error() {
        let err = parse_observation("Tokyo", "<html>").unwrap_err();
        assert!(matches!(err, FetchError::Format(_)));
    }

    #[test]
    fn placeholder_key_is_misconfigured() {
        assert!(api_key(&source(json!({}))).is_err());
        assert!(api_key(&source(json!({"apiKey": "demo-key"}))).is_err());
        assert_eq!(api_key(&source(json!({"apiKey": "abc"}))).unwrap(), "abc");
    }

    #[test]
    fn city_defaults() {
        assert_eq!(cities(&source(json!({}))), vec!["New York".to_string()]);
        assert_eq!(
            cities(&source(json!({"cities": ["Paris", " ", "Berlin"]}))),
            vec!["Paris".to_string(), "Berlin".to_string()]
        );
    }

    /// Local OpenWeatherMap stand-in: only Tokyo exists.
    async fn owm_server() -> String {
        let app = Router::new().route(
            "/weather",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                match q.get("q").map(String::as_str) {
                    Some("Tokyo") => (StatusCode::OK, BODY.to_string()),
                    _ => (StatusCode::NOT_FOUND, r#"{"cod":"404"}"#.to_string()),
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/weather")
    }

    fn source_at(url: &str, cities: Value) -> Source {
        NewSource::new("w", "weather", url)
            .with_config(json!({ "apiKey": "abc", "cities": cities }))
            .into_source(&SourceLimits::default())
            .unwrap()
    }

    #[tokio::test]
    async fn failing_city_does_not_drop_the_others() {
        let url = owm_server().await;
        let fetcher = WeatherFetcher::new(reqwest::Client::new());

        let records = fetcher
            .fetch(&source_at(&url, json!(["Tokyo", "Atlantis"])))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload["city"], "Tokyo");

        let err = fetcher
            .fetch(&source_at(&url, json!(["Atlantis", "Lemuria"])))
            .await
            .unwrap_err();
        match err {
            FetchError::Network(msg) => assert!(msg.contains("Atlantis"), "{msg}"),
            other => panic!("expected network error, got {other:?}"),
        }
    }
}

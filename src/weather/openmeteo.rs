//! Open-Meteo forecast API, used outside Australia.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::MonitorError;
use crate::weather::{Condition, Forecast, RainAmount, WeatherReport, get_json};

const API: &str = "https://api.open-meteo.com/v1/forecast";
const CURRENT: &str = "temperature_2m,apparent_temperature,precipitation,weather_code";
const DAILY: &str =
    "temperature_2m_max,temperature_2m_min,precipitation_sum,precipitation_probability_mean,uv_index_max,sunrise,sunset";
const LOCAL_TIME: &str = "%Y-%m-%dT%H:%M";

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    utc_offset_seconds: i32,
    current: Current,
    daily: Daily,
}

#[derive(Deserialize)]
struct Current {
    temperature_2m: Option<f64>,
    apparent_temperature: Option<f64>,
    precipitation: Option<f64>,
    weather_code: Option<u8>,
}

/// Each field is a one-element array since only today is requested.
#[derive(Deserialize, Default)]
#[serde(default)]
struct Daily {
    temperature_2m_max: Vec<Option<f64>>,
    temperature_2m_min: Vec<Option<f64>>,
    precipitation_sum: Vec<Option<f64>>,
    precipitation_probability_mean: Vec<Option<f64>>,
    uv_index_max: Vec<Option<f64>>,
    sunrise: Vec<Option<String>>,
    sunset: Vec<Option<String>>,
}

fn today<T: Clone>(values: &[Option<T>]) -> Option<T> {
    values.first().cloned().flatten()
}

/// Sunrise and sunset come back as local wall-clock time without an offset.
fn local_time(value: Option<String>, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let value = value?;
    match NaiveDateTime::parse_from_str(&value, LOCAL_TIME) {
        Ok(naive) => offset.from_local_datetime(&naive).single().map(|t| t.with_timezone(&Utc)),
        Err(e) => {
            debug!(%value, error = %e, "unparseable local time");
            None
        }
    }
}

pub async fn fetch(client: &Client, latitude: f64, longitude: f64, timezone: &str) -> Result<WeatherReport, MonitorError> {
    let query = [
        ("latitude", latitude.to_string()),
        ("longitude", longitude.to_string()),
        ("current", CURRENT.to_string()),
        ("daily", DAILY.to_string()),
        ("timezone", timezone.to_string()),
        ("forecast_days", "1".to_string()),
    ];
    let response: Response = get_json(client, API, &query).await?;
    assemble(response, Utc::now())
}

fn assemble(response: Response, now: DateTime<Utc>) -> Result<WeatherReport, MonitorError> {
    let offset = FixedOffset::east_opt(response.utc_offset_seconds)
        .ok_or_else(|| MonitorError::protocol(format!("bad UTC offset {}", response.utc_offset_seconds)))?;
    let daily = response.daily;
    let forecast = |values: &[Option<f64>]| today(values).map(|temperature| Forecast { temperature, label: None });

    Ok(WeatherReport {
        location: None,
        fetched_at: now,
        temperature: response.current.temperature_2m,
        feels_like: response.current.apparent_temperature,
        condition: response.current.weather_code.map(Condition::Wmo),
        high: forecast(&daily.temperature_2m_max),
        low: forecast(&daily.temperature_2m_min),
        rain_chance: today(&daily.precipitation_probability_mean).map(|p| p.round().clamp(0.0, 100.0) as u32),
        rain_amount: today(&daily.precipitation_sum).map(RainAmount::Total),
        rain_since_9am: response.current.precipitation,
        uv_max: today(&daily.uv_index_max),
        sunrise: local_time(today(&daily.sunrise), offset),
        sunset: local_time(today(&daily.sunset), offset),
    })
}

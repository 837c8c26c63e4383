//! Bureau of Meteorology location API.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::error::MonitorError;
use crate::weather::{Condition, Forecast, RainAmount, WeatherReport, get_json};

const API: &str = "https://api.weather.bom.gov.au/v1/locations";

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    metadata: Metadata,
    data: T,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Metadata {
    response_timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Location {
    name: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Observations {
    temp: Option<f64>,
    temp_feels_like: Option<f64>,
    rain_since_9am: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Daily {
    short_text: Option<String>,
    icon_descriptor: Option<String>,
    temp_max: Option<f64>,
    temp_min: Option<f64>,
    rain: Option<Rain>,
    uv: Option<Uv>,
    astronomical: Option<Astronomical>,
    now: Option<Now>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Rain {
    chance: Option<u32>,
    amount: Option<Amount>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Amount {
    min: Option<f64>,
    max: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Uv {
    max_index: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Astronomical {
    sunrise_time: Option<DateTime<Utc>>,
    sunset_time: Option<DateTime<Utc>>,
}

/// Today's "now" and "later" temperatures, e.g. Max and Overnight min.
#[derive(Deserialize, Default)]
#[serde(default)]
struct Now {
    temp_now: Option<f64>,
    temp_later: Option<f64>,
    now_label: Option<String>,
    later_label: Option<String>,
}

/// Observations are published for the first six geohash characters only.
fn observation_geohash(geohash: &str) -> &str {
    geohash.get(..6).unwrap_or(geohash)
}

pub async fn fetch(client: &Client, geohash: &str, location: Option<String>) -> Result<WeatherReport, MonitorError> {
    let location = match location {
        Some(name) => Some(name),
        None => {
            let url = format!("{API}/{geohash}");
            get_json::<Envelope<Location>>(client, &url, &[]).await?.data.name
        }
    };
    let url = format!("{API}/{}/observations", observation_geohash(geohash));
    let observations: Envelope<Observations> = get_json(client, &url, &[]).await?;
    let url = format!("{API}/{geohash}/forecasts/daily");
    let forecast: Envelope<Vec<Daily>> = get_json(client, &url, &[]).await?;
    assemble(location, observations, forecast, Utc::now())
}

fn assemble(
    location: Option<String>,
    observations: Envelope<Observations>,
    forecast: Envelope<Vec<Daily>>,
    now: DateTime<Utc>,
) -> Result<WeatherReport, MonitorError> {
    let today = forecast
        .data
        .into_iter()
        .next()
        .ok_or_else(|| MonitorError::protocol("BOM forecast has no days"))?;

    let (high, low) = match today.now {
        Some(now) => (
            now.temp_now.map(|temperature| Forecast { temperature, label: now.now_label }),
            now.temp_later.map(|temperature| Forecast { temperature, label: now.later_label }),
        ),
        None => (
            today.temp_max.map(|temperature| Forecast { temperature, label: None }),
            today.temp_min.map(|temperature| Forecast { temperature, label: None }),
        ),
    };
    let rain = today.rain.unwrap_or_default();
    let astronomical = today.astronomical.unwrap_or_default();

    Ok(WeatherReport {
        location,
        fetched_at: observations.metadata.response_timestamp.unwrap_or(now),
        temperature: observations.data.temp,
        feels_like: observations.data.temp_feels_like,
        condition: today.short_text.map(|outlook| Condition::Bom {
            outlook,
            descriptor: today.icon_descriptor,
        }),
        high,
        low,
        rain_chance: rain.chance,
        rain_amount: rain.amount.map(|a| RainAmount::Range { min: a.min, max: a.max }),
        rain_since_9am: observations.data.rain_since_9am,
        uv_max: today.uv.and_then(|uv| uv.max_index),
        sunrise: astronomical.sunrise_time,
        sunset: astronomical.sunset_time,
    })
}

/// Builds a report from raw response bodies.
#[cfg(test)]
fn report_from_json(location: Option<String>, observations: &str, forecast: &str, now: DateTime<Utc>) -> Result<WeatherReport, MonitorError> {
    assemble(location, serde_json::from_str(observations)?, serde_json::from_str(forecast)?, now)
}

//! Weather panel: a cache of the latest successful fetch, refreshed on a
//! timer and dropped once it goes stale.

pub mod bom;
pub mod icons;
pub mod openmeteo;

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, trace, warn};

use crate::config::{Config, WeatherSource};
use crate::error::MonitorError;
use crate::event::{Event, EventSender, TimerKind};
use crate::timers::TimerSet;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Bom { outlook: String, descriptor: Option<String> },
    Wmo(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RainAmount {
    /// Forecast range in mm. A missing maximum means no rain is expected.
    Range { min: Option<f64>, max: Option<f64> },
    Total(f64),
}

/// A labelled forecast temperature.
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub temperature: f64,
    pub label: Option<String>,
}

/// Everything one successful fetch produced.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub location: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub feels_like: Option<f64>,
    pub condition: Option<Condition>,
    pub high: Option<Forecast>,
    pub low: Option<Forecast>,
    pub rain_chance: Option<u32>,
    pub rain_amount: Option<RainAmount>,
    pub rain_since_9am: Option<f64>,
    pub uv_max: Option<f64>,
    pub sunrise: Option<DateTime<Utc>>,
    pub sunset: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeatherDisplay {
    pub available: bool,
    pub location: String,
    pub temperature: String,
    pub feels_like: String,
    pub outlook: String,
    pub icon: String,
    pub icon_alt: String,
    pub forecast_high: String,
    pub forecast_high_label: String,
    pub forecast_low: String,
    pub forecast_low_label: String,
    pub rain_chance: String,
    pub rain_amount: String,
    pub rain_since_9am: String,
    pub uv_max: String,
    pub uv_text: String,
    pub uv_icon: String,
    pub moon_phase: String,
    pub moon_icon: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoonPhase {
    New,
    WaxingCrescent,
    FirstQuarter,
    WaxingGibbous,
    Full,
    WaningGibbous,
    LastQuarter,
    WaningCrescent,
}

const MOON_PHASES: [MoonPhase; 8] = [
    MoonPhase::New,
    MoonPhase::WaxingCrescent,
    MoonPhase::FirstQuarter,
    MoonPhase::WaxingGibbous,
    MoonPhase::Full,
    MoonPhase::WaningGibbous,
    MoonPhase::LastQuarter,
    MoonPhase::WaningCrescent,
];

const SYNODIC_MONTH_DAYS: f64 = 29.530_588_853;
/// 2000-01-06 18:14 UTC
const REFERENCE_NEW_MOON: i64 = 947_182_440;

impl MoonPhase {
    pub fn at(when: DateTime<Utc>) -> Self {
        let days = (when.timestamp() - REFERENCE_NEW_MOON) as f64 / 86_400.0;
        let age = days.rem_euclid(SYNODIC_MONTH_DAYS) / SYNODIC_MONTH_DAYS;
        MOON_PHASES[((age * 8.0).round() as usize) % 8]
    }

    pub fn name(self) -> &'static str {
        match self {
            MoonPhase::New => "New Moon",
            MoonPhase::WaxingCrescent => "Waxing Crescent",
            MoonPhase::FirstQuarter => "First Quarter",
            MoonPhase::WaxingGibbous => "Waxing Gibbous",
            MoonPhase::Full => "Full Moon",
            MoonPhase::WaningGibbous => "Waning Gibbous",
            MoonPhase::LastQuarter => "Last Quarter",
            MoonPhase::WaningCrescent => "Waning Crescent",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            MoonPhase::New => "moon-new.svg",
            MoonPhase::WaxingCrescent => "moon-waxing-crescent.svg",
            MoonPhase::FirstQuarter => "moon-first-quarter.svg",
            MoonPhase::WaxingGibbous => "moon-waxing-gibbous.svg",
            MoonPhase::Full => "moon-full.svg",
            MoonPhase::WaningGibbous => "moon-waning-gibbous.svg",
            MoonPhase::LastQuarter => "moon-last-quarter.svg",
            MoonPhase::WaningCrescent => "moon-waning-crescent.svg",
        }
    }
}

/// Night is strictly before sunrise or after sunset. Without both times
/// it is treated as day.
pub fn is_night(now: DateTime<Utc>, sunrise: Option<DateTime<Utc>>, sunset: Option<DateTime<Utc>>) -> bool {
    match (sunrise, sunset) {
        (Some(sunrise), Some(sunset)) => now < sunrise || now > sunset,
        _ => false,
    }
}

/// Orders a forecast pair so the low is never above the high.
pub fn order_high_low(high: Option<Forecast>, low: Option<Forecast>) -> (Option<Forecast>, Option<Forecast>) {
    match (high, low) {
        (Some(high), Some(low)) if low.temperature > high.temperature => {
            debug!(high = high.temperature, low = low.temperature, "forecast high and low inverted, swapping");
            (Some(low), Some(high))
        }
        pair => pair,
    }
}

/// One decimal place at most, `21.0` shown as `21`.
fn degrees(value: f64) -> String {
    format!("{}°", (value * 10.0).round() / 10.0)
}

fn whole_degrees(value: f64) -> String {
    format!("{:.0}°", value)
}

fn millimetres(value: f64) -> String {
    format!("{}", (value * 10.0).round() / 10.0)
}

pub fn project(report: &WeatherReport, now: DateTime<Utc>, icon_path: &str) -> WeatherDisplay {
    let night = is_night(now, report.sunrise, report.sunset);
    let mut display = WeatherDisplay {
        available: true,
        location: report.location.clone().unwrap_or_default(),
        temperature: report.temperature.map(degrees).unwrap_or_default(),
        feels_like: report.feels_like.map(degrees).unwrap_or_default(),
        rain_since_9am: report.rain_since_9am.map(millimetres).unwrap_or_default(),
        ..Default::default()
    };

    match &report.condition {
        Some(Condition::Bom { outlook, descriptor }) => {
            display.outlook = outlook.trim().trim_end_matches('.').to_string();
            if let Some((icon, alt)) = icons::bom_icon(outlook, descriptor.as_deref(), night) {
                display.icon = format!("{icon_path}{icon}");
                display.icon_alt = alt;
            }
        }
        Some(Condition::Wmo(code)) => {
            display.outlook = icons::wmo_outlook(*code).unwrap_or_default().to_string();
            if let Some(icon) = icons::wmo_icon(*code) {
                display.icon = format!("{icon_path}{icon}");
                display.icon_alt = display.outlook.clone();
            }
        }
        None => {}
    }

    let (high, low) = order_high_low(report.high.clone(), report.low.clone());
    if let Some(high) = high {
        display.forecast_high = whole_degrees(high.temperature);
        display.forecast_high_label = high.label.unwrap_or_default();
    }
    if let Some(low) = low {
        display.forecast_low = whole_degrees(low.temperature);
        display.forecast_low_label = low.label.unwrap_or_default();
    }

    match &report.rain_amount {
        Some(RainAmount::Range { min, max: Some(max) }) => {
            display.rain_amount = format!("{}-{}mm", millimetres(min.unwrap_or(0.0)), millimetres(*max));
            display.rain_chance = report.rain_chance.map(|c| format!("{c}%")).unwrap_or_default();
        }
        Some(RainAmount::Range { max: None, .. }) => {
            display.rain_amount = "no rain".to_string();
            display.rain_chance = report
                .rain_chance
                .map(|c| format!("{}%", 100u32.saturating_sub(c)))
                .unwrap_or_default();
        }
        Some(RainAmount::Total(total)) => {
            display.rain_amount = format!("{}mm", millimetres(*total));
            display.rain_chance = report.rain_chance.map(|c| format!("{c}%")).unwrap_or_default();
        }
        None => {
            display.rain_chance = report.rain_chance.map(|c| format!("{c}%")).unwrap_or_default();
        }
    }

    if night {
        let phase = MoonPhase::at(now);
        display.moon_phase = phase.name().to_string();
        display.moon_icon = format!("{icon_path}{}", phase.icon());
    } else if let Some(raw) = report.uv_max {
        let index = icons::uv_index(raw);
        display.uv_max = index.to_string();
        display.uv_text = icons::uv_text(index).unwrap_or_default().to_string();
        display.uv_icon = format!("{icon_path}{}", icons::uv_icon(index));
    }

    display
}

/// GET `url` and decode its JSON body.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
) -> Result<T, MonitorError> {
    trace!(url, "fetching");
    let response = client
        .get(url)
        .query(query)
        .header(ACCEPT, "application/json")
        .timeout(FETCH_TIMEOUT)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(MonitorError::Status { status: status.as_u16(), url: url.to_string() });
    }
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

async fn fetch(client: Client, source: WeatherSource, location: Option<String>) -> Result<WeatherReport, MonitorError> {
    match source {
        WeatherSource::Bom { geohash } => bom::fetch(&client, &geohash, location).await,
        WeatherSource::OpenMeteo { latitude, longitude, timezone } => {
            openmeteo::fetch(&client, latitude, longitude, &timezone).await
        }
    }
}

/// Owns the weather timers and the cached report.
pub struct WeatherMonitor {
    source: Option<WeatherSource>,
    client: Client,
    events: EventSender,
    timers: TimerSet,
    report: Option<WeatherReport>,
    /// Location names never change, so they are fetched once.
    location: Option<String>,
    display: WeatherDisplay,
    /// The last fetch failed; hidden until one succeeds.
    failed: bool,
    refresh_interval: Duration,
    stale_after: chrono::Duration,
    icon_path: String,
}

impl WeatherMonitor {
    pub fn from_config(config: &Config, events: EventSender) -> Result<Self, MonitorError> {
        let client = Client::builder().build()?;
        Ok(Self::new(
            config.weather.clone(),
            client,
            events,
            config.weather_interval(),
            config.staleness_threshold(),
            config.icon_path.clone(),
        ))
    }

    pub fn new(
        source: Option<WeatherSource>,
        client: Client,
        events: EventSender,
        refresh_interval: Duration,
        stale_after: chrono::Duration,
        icon_path: String,
    ) -> Self {
        Self {
            source,
            client,
            timers: TimerSet::new(events.clone()),
            events,
            report: None,
            location: None,
            display: WeatherDisplay::default(),
            failed: false,
            refresh_interval,
            stale_after,
            icon_path,
        }
    }

    pub fn display(&self) -> &WeatherDisplay {
        &self.display
    }

    pub fn report(&self) -> Option<&WeatherReport> {
        self.report.as_ref()
    }

    pub fn start(&mut self) {
        let Some(source) = &self.source else {
            return;
        };
        info!(?source, every = ?self.refresh_interval, "starting weather");
        self.timers.arm_every(TimerKind::WeatherRefresh, self.refresh_interval);
        self.timers.arm_every(TimerKind::WeatherStaleness, self.refresh_interval * 3);
        self.fetch();
    }

    pub fn stop(&mut self) {
        self.timers.cancel_all();
    }

    fn fetch(&mut self) {
        let Some(source) = self.source.clone() else {
            return;
        };
        let client = self.client.clone();
        let location = self.location.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = fetch(client, source, location).await;
            let _ = events.send(Event::Weather(result));
        });
    }

    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Timer { kind, generation } => {
                if !self.timers.accept(kind, generation) {
                    return;
                }
                match kind {
                    TimerKind::WeatherRefresh => self.fetch(),
                    TimerKind::WeatherStaleness => {
                        self.check_staleness(Utc::now());
                    }
                    _ => {}
                }
            }
            Event::Weather(result) => self.on_fetched(result, Utc::now()),
            _ => {}
        }
    }

    pub fn on_fetched(&mut self, result: Result<WeatherReport, MonitorError>, now: DateTime<Utc>) {
        match result {
            Ok(report) => {
                debug!(fetched_at = %report.fetched_at, "weather updated");
                if report.location.is_some() {
                    self.location = report.location.clone();
                }
                self.report = Some(report);
                self.failed = false;
                self.tick(now);
            }
            Err(e) => {
                warn!(error = %e, "weather fetch failed");
                self.failed = true;
                self.display.available = false;
            }
        }
    }

    /// Drops the cached report once it is older than the threshold.
    /// Returns true if it was dropped.
    pub fn check_staleness(&mut self, now: DateTime<Utc>) -> bool {
        let Some(report) = &self.report else {
            return false;
        };
        let age = now - report.fetched_at;
        if age <= self.stale_after {
            trace!(minutes = age.num_minutes(), "weather is fresh");
            return false;
        }
        warn!(minutes = age.num_minutes(), "weather is stale, hiding it");
        self.report = None;
        self.display = WeatherDisplay::default();
        true
    }

    /// Rebuilds display fields; day/night and the moon follow the clock.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        if let Some(report) = &self.report {
            self.display = project(report, now, &self.icon_path);
            self.display.available = !self.failed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
    }

    fn report() -> WeatherReport {
        WeatherReport {
            location: Some("Ascot Vale".into()),
            fetched_at: at(1, 0),
            temperature: Some(14.3),
            feels_like: Some(12.0),
            condition: Some(Condition::Bom { outlook: "Mostly sunny.".into(), descriptor: Some("sunny".into()) }),
            high: Some(Forecast { temperature: 9.0, label: Some("Max".into()) }),
            low: Some(Forecast { temperature: 18.0, label: Some("Overnight min".into()) }),
            rain_chance: Some(20),
            rain_amount: Some(RainAmount::Range { min: Some(0.0), max: None }),
            rain_since_9am: Some(0.2),
            uv_max: Some(13.0),
            sunrise: Some(at(21, 0) - chrono::Duration::days(1)),
            sunset: Some(at(7, 30)),
        }
    }

    fn monitor() -> WeatherMonitor {
        let (tx, _rx) = event::channel();
        WeatherMonitor::new(
            None,
            Client::new(),
            tx,
            Duration::from_secs(300),
            chrono::Duration::minutes(60),
            "icons/".into(),
        )
    }

    #[test]
    fn daytime_projection() {
        let display = project(&report(), at(2, 0), "icons/");
        assert!(display.available);
        assert_eq!(display.temperature, "14.3°");
        assert_eq!(display.feels_like, "12°");
        assert_eq!(display.outlook, "Mostly sunny");
        assert_eq!(display.icon, "icons/partly-cloudy-day.svg");
        assert_eq!(display.uv_max, "11");
        assert_eq!(display.uv_text, "Extreme");
        assert_eq!(display.moon_phase, "");
    }

    #[test]
    fn inverted_high_low_is_swapped() {
        let display = project(&report(), at(2, 0), "icons/");
        assert_eq!(display.forecast_high, "18°");
        assert_eq!(display.forecast_high_label, "Overnight min");
        assert_eq!(display.forecast_low, "9°");
        assert_eq!(display.forecast_low_label, "Max");
    }

    #[test]
    fn no_rain_inverts_the_chance() {
        let display = project(&report(), at(2, 0), "icons/");
        assert_eq!(display.rain_amount, "no rain");
        assert_eq!(display.rain_chance, "80%");

        let mut wet = report();
        wet.rain_amount = Some(RainAmount::Range { min: Some(1.0), max: Some(5.0) });
        let display = project(&wet, at(2, 0), "icons/");
        assert_eq!(display.rain_amount, "1-5mm");
        assert_eq!(display.rain_chance, "20%");
    }

    #[test]
    fn night_shows_the_moon_instead_of_uv() {
        let display = project(&report(), at(9, 0), "icons/");
        assert_eq!(display.uv_max, "");
        assert!(!display.moon_phase.is_empty());
        assert!(display.moon_icon.starts_with("icons/moon-"));
        assert_eq!(display.icon, "icons/partly-cloudy-night.svg");
    }

    #[test]
    fn night_is_before_sunrise_or_after_sunset() {
        let sunrise = Some(at(6, 0));
        let sunset = Some(at(18, 0));
        assert!(is_night(at(5, 59), sunrise, sunset));
        assert!(!is_night(at(12, 0), sunrise, sunset));
        assert!(is_night(at(18, 1), sunrise, sunset));
        assert!(!is_night(at(23, 0), None, sunset));
    }

    #[test]
    fn moon_phases() {
        let reference = Utc.with_ymd_and_hms(2000, 1, 6, 18, 14, 0).unwrap();
        assert_eq!(MoonPhase::at(reference), MoonPhase::New);
        let full = reference + chrono::Duration::hours(354);
        assert_eq!(MoonPhase::at(full), MoonPhase::Full);
        let first_quarter = reference + chrono::Duration::hours(177);
        assert_eq!(MoonPhase::at(first_quarter), MoonPhase::FirstQuarter);
        let next_cycle = reference + chrono::Duration::hours(709);
        assert_eq!(MoonPhase::at(next_cycle), MoonPhase::New);
    }

    #[tokio::test]
    async fn stale_reports_are_dropped() {
        let mut monitor = monitor();
        assert!(!monitor.check_staleness(at(1, 0)));

        monitor.on_fetched(Ok(report()), at(1, 30));
        assert!(monitor.display().available);
        assert!(!monitor.check_staleness(at(2, 0)));
        assert!(monitor.display().available);

        assert!(monitor.check_staleness(at(2, 1)));
        assert_eq!(monitor.display(), &WeatherDisplay::default());
        assert!(monitor.report().is_none());
    }

    #[tokio::test]
    async fn failed_fetch_hides_weather_until_the_next_success() {
        let mut monitor = monitor();
        monitor.on_fetched(Ok(report()), at(1, 30));
        monitor.on_fetched(Err(MonitorError::protocol("boom")), at(1, 35));
        assert!(!monitor.display().available);
        monitor.tick(at(1, 36));
        assert!(!monitor.display().available);
        monitor.on_fetched(Ok(report()), at(1, 40));
        assert!(monitor.display().available);
    }
}

use std::time::Duration;

use clap::Parser;

/// Which media server the dashboard follows.
#[derive(Debug, Clone, Copy, PartialEq, clap::ValueEnum)]
pub enum MediaSource {
    /// Kodi JSON-RPC over WebSocket
    Kodi,
    /// Jellyfin HTTP sessions plus event socket
    Jellyfin,
    /// No media panel, weather and clock only
    None,
}

/// Where weather comes from, resolved from the location flags.
#[derive(Debug, Clone, PartialEq)]
pub enum WeatherSource {
    Bom { geohash: String },
    OpenMeteo { latitude: f64, longitude: f64, timezone: String },
}

/// BOM location used when no location is supplied (Ascot Vale, Victoria).
pub const DEFAULT_BOM_LOCATION: &str = "r1r11df";

/// Configuration parsed from command-line arguments.
#[derive(Debug, Parser, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Media server to follow: "kodi", "jellyfin" or "none"
    #[arg(long = "media", value_enum, default_value_t = MediaSource::Kodi)]
    pub media: MediaSource,
    /// Kodi host
    #[arg(long = "kodi", default_value = "127.0.0.1")]
    pub kodi_host: String,
    /// Kodi JSON-RPC (WebSocket) port
    #[arg(long = "kodi-json", default_value_t = 9090)]
    pub kodi_json_port: u16,
    /// Kodi web server port (artwork)
    #[arg(long = "kodi-web", default_value_t = 8080)]
    pub kodi_web_port: u16,
    /// Use wss/https for Kodi
    #[arg(long = "kodi-ssl", default_value_t = false, action = clap::ArgAction::SetTrue)]
    pub kodi_ssl: bool,
    /// Jellyfin host[:port]
    #[arg(long = "jellyfin", default_value = "127.0.0.1:8096")]
    pub jellyfin_host: String,
    /// Use wss/https for Jellyfin
    #[arg(long = "jellyfin-ssl", default_value_t = false, action = clap::ArgAction::SetTrue)]
    pub jellyfin_ssl: bool,
    /// Jellyfin API key
    #[arg(long = "jellyfin-api-key")]
    pub jellyfin_api_key: Option<String>,
    /// Device id reported on the Jellyfin socket
    #[arg(long = "device-id", default_value = "mirrordash")]
    pub device_id: String,
    /// BOM location geohash
    #[arg(long = "bom")]
    pub bom: Option<String>,
    /// Open-Meteo latitude
    #[arg(long = "latitude", allow_hyphen_values = true)]
    pub latitude: Option<f64>,
    /// Open-Meteo longitude
    #[arg(long = "longitude", allow_hyphen_values = true)]
    pub longitude: Option<f64>,
    /// Open-Meteo timezone
    #[arg(long = "timezone", default_value = "auto")]
    pub timezone: String,
    /// Settle delay before the first media connection (ms)
    #[arg(long = "startup-delay-ms", default_value_t = 2000)]
    pub startup_delay_ms: u64,
    /// Smallest reconnect delay (ms)
    #[arg(long = "min-reconnect-ms", default_value_t = 500)]
    pub min_reconnect_ms: u64,
    /// Largest reconnect delay (ms)
    #[arg(long = "max-reconnect-ms", default_value_t = 5000)]
    pub max_reconnect_ms: u64,
    /// Multiplier applied to the reconnect delay after each failure
    #[arg(long = "reconnect-grow", default_value_t = 1.3)]
    pub reconnect_grow: f64,
    /// Health check interval (s)
    #[arg(long = "health-check-secs", default_value_t = 30)]
    pub health_check_secs: u64,
    /// Time remaining refresh interval while playing (ms)
    #[arg(long = "refresh-ms", default_value_t = 500)]
    pub refresh_ms: u64,
    /// Kodi active player poll while idle (ms, 0 disables)
    #[arg(long = "poll-ms", default_value_t = 0)]
    pub poll_ms: u64,
    /// Weather refresh interval (minutes)
    #[arg(long = "weather-minutes", default_value_t = 5)]
    pub weather_minutes: u64,
    /// Age after which weather is hidden (minutes)
    #[arg(long = "stale-minutes", default_value_t = 60)]
    pub stale_minutes: i64,
    /// Artwork shown when the media server has none
    #[arg(long = "placeholder", default_value = "/images/jellyfin-logo.png")]
    pub placeholder: String,
    /// Prefix for weather icon paths
    #[arg(long = "icon-path", default_value = "images/weather-icons/svg/")]
    pub icon_path: String,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long = "debug", default_value_t = false, action = clap::ArgAction::SetTrue)]
    pub debug: bool,
    #[arg(skip)]
    pub weather: Option<WeatherSource>,
}

impl Config {
    /// Parse arguments and compute derived fields.
    pub fn parse() -> Self {
        <Self as Parser>::parse().normalized()
    }

    fn normalized(mut self) -> Self {
        self.kodi_host = strip_scheme(&self.kodi_host);
        self.jellyfin_host = strip_scheme(&self.jellyfin_host);
        self.jellyfin_api_key = self
            .jellyfin_api_key
            .take()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        self.reconnect_grow = self.reconnect_grow.max(1.0);
        self.max_reconnect_ms = self.max_reconnect_ms.max(self.min_reconnect_ms);
        self.weather = match (&self.bom, self.latitude, self.longitude) {
            (Some(geohash), _, _) => Some(WeatherSource::Bom { geohash: geohash.clone() }),
            (None, Some(latitude), Some(longitude)) => Some(WeatherSource::OpenMeteo {
                latitude,
                longitude,
                timezone: self.timezone.clone(),
            }),
            _ => Some(WeatherSource::Bom { geohash: DEFAULT_BOM_LOCATION.to_string() }),
        };
        self
    }

    pub fn kodi_socket_url(&self) -> String {
        let scheme = if self.kodi_ssl { "wss" } else { "ws" };
        format!("{}://{}:{}/jsonrpc", scheme, self.kodi_host, self.kodi_json_port)
    }

    pub fn kodi_web_url(&self) -> String {
        let scheme = if self.kodi_ssl { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.kodi_host, self.kodi_web_port)
    }

    pub fn jellyfin_base_url(&self) -> String {
        let scheme = if self.jellyfin_ssl { "https" } else { "http" };
        format!("{}://{}", scheme, self.jellyfin_host)
    }

    /// Socket endpoint; `None` when no API key was supplied.
    pub fn jellyfin_socket_url(&self) -> Option<String> {
        let scheme = if self.jellyfin_ssl { "wss" } else { "ws" };
        self.jellyfin_api_key.as_ref().map(|key| {
            format!(
                "{}://{}/socket?api_key={}&deviceId={}",
                scheme,
                self.jellyfin_host,
                urlencoding::encode(key),
                urlencoding::encode(&self.device_id)
            )
        })
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_secs.max(1))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_ms.max(100))
    }

    /// Safety-net poll for Kodi; Jellyfin always polls.
    pub fn kodi_poll_interval(&self) -> Option<Duration> {
        (self.poll_ms > 0).then(|| Duration::from_millis(self.poll_ms))
    }

    pub fn weather_interval(&self) -> Duration {
        Duration::from_secs(self.weather_minutes.max(1) * 60)
    }

    pub fn staleness_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_minutes)
    }
}

/// Users paste full URLs as often as bare hosts.
fn strip_scheme(host: &str) -> String {
    let host = host.trim();
    let host = host
        .strip_prefix("http://")
        .or_else(|| host.strip_prefix("https://"))
        .or_else(|| host.strip_prefix("ws://"))
        .or_else(|| host.strip_prefix("wss://"))
        .unwrap_or(host);
    host.trim_end_matches('/').to_string()
}

#[cfg(test)]
pub fn test_config(args: &[&str]) -> Config {
    let mut argv = vec!["mirrordash"];
    argv.extend_from_slice(args);
    <Config as Parser>::try_parse_from(argv).unwrap().normalized()
}

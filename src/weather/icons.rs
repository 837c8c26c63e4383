//! Icon and text lookups for weather conditions. All pure.

use tracing::warn;

/// BOM condition key (`<condition>-day` / `<condition>-night`) to icon file.
pub fn bom_condition_icon(key: &str) -> Option<&'static str> {
    let icon = match key {
        "clear-day" => "clear-day.svg",
        "clear-night" => "clear-night.svg",
        "cloudy-day" => "cloudy.svg",
        "cloudy-night" => "partly-cloudy-night.svg",
        "dusty-day" => "dust-day.svg",
        "dusty-night" => "dust-night.svg",
        "fog-day" => "fog-day.svg",
        "fog-night" => "fog-night.svg",
        "frost-day" | "frost-night" => "thermometer-snow.svg",
        "hazy-day" => "haze-day.svg",
        "hazy-night" => "haze-night.svg",
        "heavy_shower-day" => "extreme-day-rain.svg",
        "heavy_shower-night" => "extreme-night-rain.svg",
        "light_rain-day" => "extreme-day-drizzle.svg",
        "light_rain-night" => "extreme-night-drizzle.svg",
        "light_shower-day" => "overcast-day-drizzle.svg",
        "light_shower-night" => "overcast-night-drizzle.svg",
        "mostly_sunny-day" => "partly-cloudy-day.svg",
        "mostly_sunny-night" => "partly-cloudy-night.svg",
        "partly_cloudy-day" => "partly-cloudy-day.svg",
        "partly_cloudy-night" => "partly-cloudy-night.svg",
        "rain-day" => "rain.svg",
        "rain-night" => "partly-cloudy-night-rain.svg",
        "shower-day" => "partly-cloudy-day-rain.svg",
        "shower-night" => "partly-cloudy-night-rain.svg",
        "snow-day" => "snow.svg",
        "snow-night" => "overcast-night-snow.svg",
        "storm-day" => "thunderstorms-overcast-rain.svg",
        "storm-night" => "thunderstorms-night-overcast-rain.svg",
        "sunny-day" => "clear-day.svg",
        "sunny-night" => "clear-night.svg",
        "tropical_cyclone-day" | "tropical_cyclone-night" => "hurricane.svg",
        "windy-day" => "wind-onshore.svg",
        "windy-night" => "windsock.svg",
        _ => return None,
    };
    Some(icon)
}

/// `Mostly sunny.` becomes `mostly_sunny`.
pub fn bom_condition_key(outlook: &str) -> String {
    outlook
        .trim()
        .trim_end_matches('.')
        .to_lowercase()
        .replace(' ', "_")
}

/// Picks a BOM icon from the outlook text, falling back to the forecast's
/// icon descriptor. Returns the icon file and its alt text.
pub fn bom_icon(outlook: &str, descriptor: Option<&str>, night: bool) -> Option<(&'static str, String)> {
    let suffix = if night { "-night" } else { "-day" };
    let key = format!("{}{}", bom_condition_key(outlook), suffix);
    if let Some(icon) = bom_condition_icon(&key) {
        return Some((icon, key));
    }
    let descriptor = descriptor?;
    let icon = bom_condition_icon(&format!("{descriptor}{suffix}"))?;
    Some((icon, descriptor.to_string()))
}

/// WMO weather interpretation code to icon file.
pub fn wmo_icon(code: u8) -> Option<&'static str> {
    let icon = match code {
        0 | 1 => "clear-day.svg",
        2 => "partly-cloudy-day.svg",
        3 => "cloudy.svg",
        45 | 48 => "fog.svg",
        51 | 53 | 61 | 80 => "drizzle.svg",
        55 | 63 | 81 => "rain.svg",
        56 | 66 => "sleet.svg",
        57 => "extreme-sleet.svg",
        65 | 67 | 82 => "extreme-rain.svg",
        71 | 73 | 77 | 85 => "snow.svg",
        75 | 86 => "extreme-snow.svg",
        95 | 96 => "thunderstorms-rain.svg",
        99 => "hail.svg",
        _ => return None,
    };
    Some(icon)
}

/// WMO weather interpretation code to outlook text.
pub fn wmo_outlook(code: u8) -> Option<&'static str> {
    let outlook = match code {
        0 => "Sunny",
        1 => "Mostly Sunny",
        2 => "Partly Cloudy",
        3 => "Cloudy",
        45 | 48 => "Fog",
        51 => "Light Drizzle",
        53 => "Drizzle",
        55 => "Heavy Drizzle",
        56 => "Light Sleet",
        57 => "Sleet",
        61 => "Light Rain",
        63 => "Rain",
        65 => "Heavy Rain",
        66 => "Freezing Rain",
        67 => "Heavy Freezing Rain",
        71 => "Light Snow",
        73 | 77 => "Snow",
        75 => "Heavy Snow",
        80 => "Light Showers",
        81 => "Showers",
        82 => "Heavy Showers",
        85 => "Snow Showers",
        86 => "Heavy Snow Showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with Hail",
        99 => "Thunderstorm with Heavy Hail",
        _ => return None,
    };
    Some(outlook)
}

pub const MAX_UV_INDEX: u8 = 11;

/// Rounds and clamps a UV index into 0..=11.
pub fn uv_index(raw: f64) -> u8 {
    if raw > f64::from(MAX_UV_INDEX) {
        warn!(uv = raw, "UV index out of range, clamping");
        return MAX_UV_INDEX;
    }
    raw.round().max(0.0) as u8
}

pub fn uv_text(index: u8) -> Option<&'static str> {
    let text = match index {
        1 => "Very Low",
        2 => "Low",
        3 => "Low Moderate",
        4 => "Moderate",
        5 => "High Moderate",
        6 | 7 => "High",
        8 | 9 => "Very High",
        10 | 11 => "Extreme",
        _ => return None,
    };
    Some(text)
}

pub fn uv_icon(index: u8) -> String {
    format!("uv-index-{index}.svg")
}

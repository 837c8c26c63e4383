//! Turns the current playback session into display fields.

use chrono::{DateTime, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::media::{ItemKind, PlaybackSession, Progress};

pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// `H:MM:SS`, `HH:MM:SS` or `MM:SS`, as Kodi formats its labels.
static REMAINING_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:(\d+):)?(\d{1,2}):(\d{2})$").expect("remaining label pattern"));

/// Everything the media panel shows. Empty strings mean "show nothing".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisplayState {
    pub available: bool,
    pub artwork: Option<String>,
    pub title: String,
    pub season: String,
    pub episode: String,
    pub time_remaining: String,
    pub finish_time: String,
}

pub fn project<Tz: TimeZone>(session: Option<&PlaybackSession>, now: &DateTime<Tz>) -> DisplayState
where
    Tz::Offset: std::fmt::Display,
{
    let Some(session) = session else {
        return DisplayState::default();
    };
    if session.item.kind == ItemKind::Picture || session.item.title.trim().is_empty() {
        return DisplayState::default();
    }

    let remaining = session.progress.as_ref().and_then(remaining_seconds);
    DisplayState {
        available: true,
        artwork: session.artwork.clone(),
        title: session.item.title.clone(),
        season: session.item.season.map(|s| s.to_string()).unwrap_or_default(),
        episode: session.item.episode.map(|e| e.to_string()).unwrap_or_default(),
        time_remaining: remaining.map(format_remaining).unwrap_or_default(),
        finish_time: remaining.map(|secs| finish_time(now, secs)).unwrap_or_default(),
    }
}

/// Whole seconds left, or `None` when the server gave nothing usable.
pub fn remaining_seconds(progress: &Progress) -> Option<u64> {
    match progress {
        Progress::Remaining(label) => parse_remaining_label(label),
        Progress::Clock { elapsed, total } => {
            (!total.is_zero()).then(|| total.saturating_sub(*elapsed).as_secs())
        }
        Progress::Ticks { position, runtime } => {
            if *runtime <= 0 {
                return None;
            }
            let left = (runtime - position).max(0) / TICKS_PER_SECOND;
            u64::try_from(left).ok()
        }
    }
}

pub fn parse_remaining_label(label: &str) -> Option<u64> {
    let caps = REMAINING_LABEL.captures(label.trim())?;
    let hours: u64 = caps.get(1).map_or(Ok(0), |h| h.as_str().parse()).ok()?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: u64 = caps[3].parse().ok()?;
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// `-H:MM:SS` from an hour up, `-M:SS` below.
pub fn format_remaining(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let seconds = seconds % 60;
    if hours > 0 {
        format!("-{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("-{}:{:02}", minutes, seconds)
    }
}

/// Wall-clock time playback ends, like `9:05pm`.
pub fn finish_time<Tz: TimeZone>(now: &DateTime<Tz>, remaining: u64) -> String
where
    Tz::Offset: std::fmt::Display,
{
    i64::try_from(remaining)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|left| now.clone().checked_add_signed(left))
        .map(|end| end.format("%-I:%M%P").to_string())
        .unwrap_or_default()
}

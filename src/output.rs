use chrono::{DateTime, TimeZone};
use serde::Serialize;
use std::fmt::Display;

use crate::media::projector::DisplayState;
use crate::weather::WeatherDisplay;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClockFields {
    /// `12:34pm`
    pub time: String,
    /// `12:34`
    pub time_short: String,
    /// `:05`
    pub seconds: String,
}

impl ClockFields {
    pub fn at<Tz: TimeZone>(now: &DateTime<Tz>) -> Self
    where
        Tz::Offset: Display,
    {
        Self {
            time: now.format("%-I:%M%P").to_string(),
            time_short: now.format("%-I:%M").to_string(),
            seconds: now.format(":%S").to_string(),
        }
    }
}

/// One line of stdout.
#[derive(Serialize)]
pub struct Frame<'a> {
    pub clock: ClockFields,
    pub media: &'a DisplayState,
    pub weather: &'a WeatherDisplay,
}

/// Prints frames, but only when they change.
#[derive(Default)]
pub struct Renderer {
    last_output: String,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The serialized frame if it differs from the last one rendered.
    pub fn render(&mut self, frame: &Frame<'_>) -> Option<String> {
        let json_output = match serde_json::to_string(frame) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "could not serialize frame");
                return None;
            }
        };
        if self.last_output == json_output {
            return None;
        }
        self.last_output = json_output.clone();
        Some(json_output)
    }

    pub fn emit(&mut self, frame: &Frame<'_>) {
        if let Some(line) = self.render(frame) {
            println!("{line}");
        }
    }
}

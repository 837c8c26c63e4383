//! The single event loop: routes events to the media and weather panels and
//! prints a frame whenever the combined state changes.

use std::time::Duration;

use anyhow::Result;
use chrono::{Local, Utc};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

use crate::config::Config;
use crate::event::{self, Event};
use crate::media::connection::ConnectionManager;
use crate::media::projector::DisplayState;
use crate::output::{ClockFields, Frame, Renderer};
use crate::weather::WeatherMonitor;

const RENDER_INTERVAL: Duration = Duration::from_secs(1);

fn is_weather_event(event: &Event) -> bool {
    match event {
        Event::Timer { kind, .. } => kind.is_weather(),
        Event::Weather(_) => true,
        _ => false,
    }
}

fn emit(renderer: &mut Renderer, media: Option<&ConnectionManager>, weather: &WeatherMonitor) {
    let idle = DisplayState::default();
    let frame = Frame {
        clock: ClockFields::at(&Local::now()),
        media: media.map_or(&idle, |m| m.display()),
        weather: weather.display(),
    };
    renderer.emit(&frame);
}

pub async fn run(config: Config) -> Result<()> {
    let (events, mut event_rx) = event::channel();
    let mut media = ConnectionManager::from_config(&config, events.clone())?;
    let mut weather = WeatherMonitor::from_config(&config, events)?;
    let mut renderer = Renderer::new();

    if media.is_none() {
        info!("media panel disabled");
    }
    if let Some(media) = media.as_mut() {
        media.start();
    }
    weather.start();
    emit(&mut renderer, media.as_ref(), &weather);

    let mut render = interval(RENDER_INTERVAL);
    render.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            received = event_rx.recv() => {
                let Some(event) = received else {
                    debug!("event channel closed");
                    break;
                };
                if is_weather_event(&event) {
                    weather.handle(event);
                } else if let Some(media) = media.as_mut() {
                    media.handle(event);
                }
            }
            _ = render.tick() => {
                if let Some(media) = media.as_mut() {
                    media.tick();
                }
                weather.tick(Utc::now());
            }
        }
        emit(&mut renderer, media.as_ref(), &weather);
    }

    if let Some(media) = media.as_mut() {
        media.stop();
    }
    weather.stop();
    emit(&mut renderer, media.as_ref(), &weather);
    Ok(())
}

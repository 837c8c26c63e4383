//! Backend-neutral message shapes.
//!
//! Each backend decodes its wire format into [`Inbound`] exactly once, at the
//! connection boundary, so the reconciler never looks at raw JSON.

use std::time::Duration;

use crate::config::{Config, MediaSource};
use crate::error::MonitorError;
use crate::media::jellyfin::JellyfinCodec;
use crate::media::kodi::KodiCodec;
use crate::media::{MediaItem, Progress};

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Notification(Notification),
    QueryResult(QueryResult),
    /// Answer to our liveness probe, or a server keep-alive.
    HealthCheck,
    /// Well-formed but irrelevant.
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// `player_id` is absent when the server does not say which player.
    PlaybackStarted { player_id: Option<i64>, item_id: Option<String> },
    PlaybackStopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    ActivePlayers(Vec<i64>),
    Item(MediaItem),
    Progress(Progress),
    Sessions(Vec<SessionInfo>),
}

/// One entry of a sessions listing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionInfo {
    pub session_id: Option<String>,
    pub item: Option<MediaItem>,
    pub position_ticks: i64,
    pub runtime_ticks: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    /// Server-formatted remaining time label.
    TimeLabel,
    /// Structured elapsed/total clock records.
    Clock,
    /// Full sessions listing.
    Sessions,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    ActivePlayers,
    ItemDetails { player_id: i64 },
    Refresh { player_id: Option<i64>, kind: RefreshKind },
}

/// How a request reaches the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Socket(String),
    SessionsPoll,
}

pub enum Protocol {
    Kodi(KodiCodec),
    Jellyfin(JellyfinCodec),
}

/// Jellyfin session poll rate while nothing is playing.
pub const JELLYFIN_IDLE_POLL: Duration = Duration::from_millis(2000);

impl Protocol {
    pub fn from_config(config: &Config) -> Option<Self> {
        match config.media {
            MediaSource::Kodi => Some(Protocol::Kodi(KodiCodec::new(
                config.kodi_socket_url(),
                config.kodi_web_url(),
            ))),
            MediaSource::Jellyfin => Some(Protocol::Jellyfin(JellyfinCodec::new(
                config.jellyfin_socket_url(),
            ))),
            MediaSource::None => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Kodi(_) => "kodi",
            Protocol::Jellyfin(_) => "jellyfin",
        }
    }

    /// Socket endpoint. Fails when the configuration cannot produce one.
    pub fn endpoint(&self) -> Result<String, MonitorError> {
        match self {
            Protocol::Kodi(codec) => Ok(codec.endpoint().to_string()),
            Protocol::Jellyfin(codec) => codec
                .endpoint()
                .map(str::to_string)
                .ok_or(MonitorError::MissingApiKey),
        }
    }

    pub fn decode(&self, raw: &str) -> Result<Inbound, MonitorError> {
        match self {
            Protocol::Kodi(_) => crate::media::kodi::decode(raw),
            Protocol::Jellyfin(_) => crate::media::jellyfin::decode(raw),
        }
    }

    pub fn encode(&self, request: &Request) -> Outbound {
        match self {
            Protocol::Kodi(_) => Outbound::Socket(crate::media::kodi::encode(request)),
            Protocol::Jellyfin(_) => Outbound::SessionsPoll,
        }
    }

    pub fn health_probe(&self) -> String {
        match self {
            Protocol::Kodi(_) => crate::media::kodi::ping(),
            Protocol::Jellyfin(_) => crate::media::jellyfin::keep_alive(),
        }
    }

    /// Safety-net poll while nothing is playing.
    pub fn idle_poll(&self, configured: Option<Duration>) -> Option<Duration> {
        match self {
            Protocol::Kodi(_) => configured,
            Protocol::Jellyfin(_) => Some(JELLYFIN_IDLE_POLL),
        }
    }
}

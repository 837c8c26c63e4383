//! Jellyfin: the `/Sessions` listing over HTTP, plus the server's event
//! socket for keep-alives and playback notifications.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::Config;
use crate::error::MonitorError;
use crate::media::protocol::{Inbound, Notification, QueryResult, SessionInfo};
use crate::media::{ItemKind, MediaItem};

const SESSIONS_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct JellyfinCodec {
    endpoint: Option<String>,
}

impl JellyfinCodec {
    pub fn new(endpoint: Option<String>) -> Self {
        Self { endpoint }
    }

    /// `None` when no API key was configured.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SocketMessage {
    message_type: String,
    #[serde(default)]
    data: Value,
}

pub fn keep_alive() -> String {
    json!({ "MessageType": "KeepAlive" }).to_string()
}

pub fn decode(raw: &str) -> Result<Inbound, MonitorError> {
    let message: SocketMessage = serde_json::from_str(raw)?;
    let inbound = match message.message_type.as_str() {
        "KeepAlive" | "ForceKeepAlive" => Inbound::HealthCheck,
        "PlaybackStart" => Inbound::Notification(Notification::PlaybackStarted {
            player_id: None,
            item_id: message
                .data
                .get("ItemId")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        "PlaybackStopped" => Inbound::Notification(Notification::PlaybackStopped),
        "Sessions" => {
            let sessions: Vec<RawSession> = serde_json::from_value(message.data)?;
            Inbound::QueryResult(QueryResult::Sessions(
                sessions.into_iter().map(RawSession::into_info).collect(),
            ))
        }
        other => {
            debug!(message_type = other, "ignoring socket message");
            Inbound::Ignored
        }
    };
    Ok(inbound)
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawSession {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    now_playing_item: Option<RawItem>,
    #[serde(default)]
    play_state: Option<RawPlayState>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct RawItem {
    id: Option<String>,
    name: Option<String>,
    #[serde(rename = "Type")]
    kind: Option<String>,
    series_name: Option<String>,
    series_id: Option<String>,
    parent_index_number: Option<u32>,
    index_number: Option<u32>,
    run_time_ticks: Option<i64>,
    album_id: Option<String>,
    parent_id: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct RawPlayState {
    position_ticks: Option<i64>,
}

impl RawSession {
    fn into_info(self) -> SessionInfo {
        let runtime_ticks = self
            .now_playing_item
            .as_ref()
            .and_then(|item| item.run_time_ticks)
            .unwrap_or(0);
        SessionInfo {
            session_id: self.id,
            item: self.now_playing_item.map(RawItem::into_media_item),
            position_ticks: self.play_state.and_then(|p| p.position_ticks).unwrap_or(0),
            runtime_ticks,
        }
    }
}

impl RawItem {
    fn into_media_item(self) -> MediaItem {
        let kind = self.kind.as_deref().map(ItemKind::from_jellyfin).unwrap_or_default();
        let name = self.name.unwrap_or_default();
        let (title, season, episode) = if kind == ItemKind::Episode {
            (
                self.series_name.filter(|s| !s.is_empty()).unwrap_or(name),
                self.parent_index_number,
                self.index_number,
            )
        } else {
            (name, None, None)
        };
        MediaItem {
            id: self.id,
            kind,
            title,
            season,
            episode,
            art: None,
            series_id: self.series_id,
            album_id: self.album_id,
            parent_id: self.parent_id,
        }
    }
}

pub fn parse_sessions(body: &str) -> Result<Vec<SessionInfo>, MonitorError> {
    let sessions: Vec<RawSession> = serde_json::from_str(body)?;
    Ok(sessions.into_iter().map(RawSession::into_info).collect())
}

/// HTTP side of the Jellyfin backend.
#[derive(Clone)]
pub struct JellyfinClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl JellyfinClient {
    /// `None` when no API key was configured.
    pub fn from_config(config: &Config) -> Result<Option<Self>, MonitorError> {
        let Some(api_key) = config.jellyfin_api_key.clone() else {
            return Ok(None);
        };
        let http = Client::builder().build()?;
        Ok(Some(Self {
            http,
            base_url: config.jellyfin_base_url(),
            api_key,
        }))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Hides the API key in anything that is about to be logged.
    pub fn redact(&self, text: &str) -> String {
        redact(text, &self.api_key)
    }

    /// Raw `/Sessions` body.
    pub async fn fetch_sessions(&self) -> Result<String, MonitorError> {
        let url = format!("{}/Sessions", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .timeout(SESSIONS_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::Status { status: status.as_u16(), url });
        }
        Ok(response.text().await?)
    }

    /// True when a HEAD request for `url` succeeds in time.
    pub async fn probe(&self, url: &str) -> bool {
        match self.http.head(url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %self.redact(url), error = %e, "artwork probe failed");
                false
            }
        }
    }
}

pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        text.to_string()
    } else {
        text.replace(secret, "***")
    }
}

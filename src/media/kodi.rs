//! Kodi JSON-RPC over WebSocket.
//!
//! Requests carry the method name as their `id`, so a response is routed by
//! the method that produced it.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::MonitorError;
use crate::media::protocol::{Inbound, Notification, QueryResult, RefreshKind, Request};
use crate::media::{ItemKind, MediaItem, Progress, VIDEO_PLAYER};

pub const GET_ACTIVE_PLAYERS: &str = "Player.GetActivePlayers";
pub const GET_ITEM: &str = "Player.GetItem";
pub const GET_PROPERTIES: &str = "Player.GetProperties";
pub const GET_INFO_LABELS: &str = "XBMC.GetInfoLabels";
pub const PING: &str = "JSONRPC.Ping";

pub const ON_PLAY: &str = "Player.OnPlay";
pub const ON_AV_START: &str = "Player.OnAVStart";
pub const ON_STOP: &str = "Player.OnStop";

const ITEM_PROPERTIES: [&str; 5] = ["art", "title", "season", "episode", "endtime"];
const CLOCK_PROPERTIES: [&str; 3] = ["percentage", "time", "totaltime"];
/// Tried in order; the first non-empty label wins.
const REMAINING_LABELS: [&str; 2] = ["Player.TimeRemaining", "VideoPlayer.TimeRemaining"];

pub struct KodiCodec {
    endpoint: String,
    web_base: String,
}

impl KodiCodec {
    pub fn new(endpoint: String, web_base: String) -> Self {
        Self { endpoint, web_base }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Web server base that relative artwork paths are served from.
    pub fn web_base(&self) -> &str {
        &self.web_base
    }
}

fn envelope(method: &str, params: Option<Value>) -> String {
    let mut message = json!({
        "jsonrpc": "2.0",
        "method": method,
        "id": method,
    });
    if let Some(params) = params {
        message["params"] = params;
    }
    message.to_string()
}

pub fn encode(request: &Request) -> String {
    match request {
        Request::ActivePlayers => envelope(GET_ACTIVE_PLAYERS, Some(json!({}))),
        Request::ItemDetails { player_id } => envelope(
            GET_ITEM,
            Some(json!({ "properties": ITEM_PROPERTIES, "playerid": player_id })),
        ),
        Request::Refresh { player_id, kind: RefreshKind::Clock } => envelope(
            GET_PROPERTIES,
            Some(json!({
                "properties": CLOCK_PROPERTIES,
                "playerid": player_id.unwrap_or(VIDEO_PLAYER),
            })),
        ),
        Request::Refresh { .. } => {
            envelope(GET_INFO_LABELS, Some(json!({ "labels": REMAINING_LABELS })))
        }
    }
}

pub fn ping() -> String {
    envelope(PING, None)
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize, Default)]
struct NotificationParams {
    #[serde(default)]
    data: NotificationData,
}

#[derive(Deserialize, Default)]
struct NotificationData {
    #[serde(default)]
    player: Option<PlayerRef>,
    #[serde(default)]
    item: Option<ItemRef>,
}

#[derive(Deserialize)]
struct PlayerRef {
    playerid: i64,
}

#[derive(Deserialize)]
struct ItemRef {
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Deserialize)]
struct ActivePlayer {
    playerid: i64,
}

#[derive(Deserialize)]
struct ItemResult {
    item: KodiItem,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct KodiItem {
    id: Option<Value>,
    #[serde(rename = "type")]
    kind: Option<String>,
    title: Option<String>,
    label: Option<String>,
    season: Option<i64>,
    episode: Option<i64>,
    art: Option<HashMap<String, String>>,
}

#[derive(Deserialize, Default, Clone, Copy)]
#[serde(default)]
struct KodiTime {
    hours: u64,
    minutes: u64,
    seconds: u64,
    milliseconds: u64,
}

impl KodiTime {
    fn duration(self) -> Duration {
        Duration::from_secs(self.hours * 3600 + self.minutes * 60 + self.seconds)
            + Duration::from_millis(self.milliseconds)
    }
}

#[derive(Deserialize)]
struct ClockResult {
    #[serde(default)]
    time: KodiTime,
    #[serde(default)]
    totaltime: KodiTime,
}

/// Ids arrive as numbers, but a string id is not worth rejecting.
fn id_string(id: &Value) -> Option<String> {
    match id {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Kodi reports -1 for "not applicable".
fn positive(n: Option<i64>) -> Option<u32> {
    n.filter(|n| *n > 0).and_then(|n| u32::try_from(n).ok())
}

impl KodiItem {
    fn into_media_item(self) -> MediaItem {
        let title = self
            .title
            .filter(|t| !t.is_empty())
            .or(self.label)
            .unwrap_or_default();
        MediaItem {
            id: self.id.as_ref().and_then(id_string),
            kind: self.kind.as_deref().map(ItemKind::from_kodi).unwrap_or_default(),
            title,
            season: positive(self.season),
            episode: positive(self.episode),
            art: self.art,
            ..Default::default()
        }
    }
}

pub fn decode(raw: &str) -> Result<Inbound, MonitorError> {
    let message: RawMessage = serde_json::from_str(raw)?;

    if let Some(error) = message.error {
        warn!(id = ?message.id, %error, "Kodi returned an error");
        return Ok(Inbound::Ignored);
    }

    if let Some(method) = message.id.as_ref().and_then(Value::as_str) {
        return decode_result(method, message.result.unwrap_or(Value::Null));
    }

    match message.method {
        Some(method) => Ok(decode_notification(&method, message.params)),
        None => Ok(Inbound::Ignored),
    }
}

fn decode_result(method: &str, result: Value) -> Result<Inbound, MonitorError> {
    let inbound = match method {
        PING => Inbound::HealthCheck,
        GET_ACTIVE_PLAYERS => {
            let players: Vec<ActivePlayer> = serde_json::from_value(result)?;
            Inbound::QueryResult(QueryResult::ActivePlayers(
                players.into_iter().map(|p| p.playerid).collect(),
            ))
        }
        GET_ITEM => {
            let ItemResult { item } = serde_json::from_value(result)?;
            Inbound::QueryResult(QueryResult::Item(item.into_media_item()))
        }
        GET_INFO_LABELS => {
            let labels: HashMap<String, String> = serde_json::from_value(result)?;
            let remaining = REMAINING_LABELS
                .iter()
                .filter_map(|name| labels.get(*name))
                .find(|label| !label.is_empty())
                .cloned()
                .unwrap_or_default();
            Inbound::QueryResult(QueryResult::Progress(Progress::Remaining(remaining)))
        }
        GET_PROPERTIES => {
            let clock: ClockResult = serde_json::from_value(result)?;
            Inbound::QueryResult(QueryResult::Progress(Progress::Clock {
                elapsed: clock.time.duration(),
                total: clock.totaltime.duration(),
            }))
        }
        other => {
            debug!(method = other, "ignoring response");
            Inbound::Ignored
        }
    };
    Ok(inbound)
}

fn decode_notification(method: &str, params: Option<Value>) -> Inbound {
    match method {
        ON_PLAY | ON_AV_START => {
            // `data` is null for some notifications; an unreadable payload
            // still means playback started.
            let params: NotificationParams = params
                .and_then(|p| serde_json::from_value(p).ok())
                .unwrap_or_default();
            Inbound::Notification(Notification::PlaybackStarted {
                player_id: params.data.player.map(|p| p.playerid),
                item_id: params
                    .data
                    .item
                    .and_then(|item| item.id)
                    .as_ref()
                    .and_then(id_string),
            })
        }
        ON_STOP => Inbound::Notification(Notification::PlaybackStopped),
        _ => Inbound::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn requests_use_the_method_as_id() {
        let text = encode(&Request::ItemDetails { player_id: 1 });
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["id"], GET_ITEM);
        assert_eq!(value["method"], GET_ITEM);
        assert_eq!(value["params"]["playerid"], 1);
        assert_eq!(value["params"]["properties"][0], "art");
        assert_eq!(value["params"]["properties"][4], "endtime");

        let value: Value = serde_json::from_str(&ping()).unwrap();
        assert_eq!(value["id"], PING);
        assert!(value.get("params").is_none());
    }

    #[test]
    fn channel_refresh_asks_for_the_clock() {
        let text = encode(&Request::Refresh { player_id: None, kind: RefreshKind::Clock });
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["method"], GET_PROPERTIES);
        assert_eq!(value["params"]["playerid"], VIDEO_PLAYER);

        let text = encode(&Request::Refresh { player_id: Some(1), kind: RefreshKind::TimeLabel });
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["method"], GET_INFO_LABELS);
    }

    #[test]
    fn decodes_play_notifications() {
        let raw = r#"{"jsonrpc":"2.0","method":"Player.OnPlay","params":{"data":{"item":{"id":42,"type":"episode"},"player":{"playerid":1,"speed":1}},"sender":"xbmc"}}"#;
        assert_eq!(
            decode(raw).unwrap(),
            Inbound::Notification(Notification::PlaybackStarted {
                player_id: Some(1),
                item_id: Some("42".into()),
            })
        );

        let raw = r#"{"jsonrpc":"2.0","method":"Player.OnAVStart","params":{"data":null,"sender":"xbmc"}}"#;
        assert_eq!(
            decode(raw).unwrap(),
            Inbound::Notification(Notification::PlaybackStarted { player_id: None, item_id: None })
        );

        let raw = r#"{"jsonrpc":"2.0","method":"Player.OnStop","params":{"data":{"end":true},"sender":"xbmc"}}"#;
        assert_eq!(decode(raw).unwrap(), Inbound::Notification(Notification::PlaybackStopped));
    }

    #[test]
    fn decodes_item_details() {
        let raw = r#"{"id":"Player.GetItem","jsonrpc":"2.0","result":{"item":{"art":{"thumb":"image://a.jpg/"},"episode":3,"id":42,"label":"Pilot","season":1,"title":"Pilot","type":"episode"}}}"#;
        let item = assert_matches!(decode(raw).unwrap(), Inbound::QueryResult(QueryResult::Item(item)) => item);
        assert_eq!(item.id.as_deref(), Some("42"));
        assert_eq!(item.kind, ItemKind::Episode);
        assert_eq!(item.title, "Pilot");
        assert_eq!((item.season, item.episode), (Some(1), Some(3)));
        assert_eq!(item.art.unwrap().get("thumb").map(String::as_str), Some("image://a.jpg/"));
    }

    #[test]
    fn unknown_season_is_dropped() {
        let raw = r#"{"id":"Player.GetItem","jsonrpc":"2.0","result":{"item":{"label":"Live","season":-1,"episode":-1,"type":"channel"}}}"#;
        let item = assert_matches!(decode(raw).unwrap(), Inbound::QueryResult(QueryResult::Item(item)) => item);
        assert_eq!(item.title, "Live");
        assert_eq!(item.season, None);
        assert_eq!(item.kind, ItemKind::Channel);
    }

    #[test]
    fn remaining_label_falls_back_between_players() {
        let raw = r#"{"id":"XBMC.GetInfoLabels","jsonrpc":"2.0","result":{"Player.TimeRemaining":"","VideoPlayer.TimeRemaining":"03:10"}}"#;
        assert_eq!(
            decode(raw).unwrap(),
            Inbound::QueryResult(QueryResult::Progress(Progress::Remaining("03:10".into())))
        );
    }

    #[test]
    fn decodes_clock_records() {
        let raw = r#"{"id":"Player.GetProperties","jsonrpc":"2.0","result":{"percentage":50.8,"time":{"hours":1,"milliseconds":0,"minutes":1,"seconds":1},"totaltime":{"hours":2,"milliseconds":0,"minutes":0,"seconds":0}}}"#;
        assert_eq!(
            decode(raw).unwrap(),
            Inbound::QueryResult(QueryResult::Progress(Progress::Clock {
                elapsed: Duration::from_secs(3661),
                total: Duration::from_secs(7200),
            }))
        );
    }

    #[test]
    fn active_players_and_pings() {
        let raw = r#"{"id":"Player.GetActivePlayers","jsonrpc":"2.0","result":[{"playerid":-1,"playertype":"internal","type":"video"}]}"#;
        assert_eq!(decode(raw).unwrap(), Inbound::QueryResult(QueryResult::ActivePlayers(vec![-1])));
        assert_eq!(
            decode(r#"{"id":"JSONRPC.Ping","jsonrpc":"2.0","result":"pong"}"#).unwrap(),
            Inbound::HealthCheck
        );
    }

    #[test]
    fn errors_and_garbage() {
        let raw = r#"{"id":"Player.GetItem","jsonrpc":"2.0","error":{"code":-32100,"message":"Failed"}}"#;
        assert_eq!(decode(raw).unwrap(), Inbound::Ignored);
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"id":"Player.GetActivePlayers","result":"nope"}"#).is_err());
    }
}

//! Media session monitoring: keeps a best-effort view of what the media
//! server is playing and projects it into display fields.
//!
//! Data flows one way: [`connection`] owns the socket and feeds decoded
//! [`protocol::Inbound`] messages to the [`reconciler`], which keeps the one
//! [`PlaybackSession`]; [`projector`] turns that session into the
//! presentation-ready [`projector::DisplayState`].

pub mod artwork;
pub mod connection;
pub mod jellyfin;
pub mod kodi;
pub mod projector;
pub mod protocol;
pub mod reconciler;
pub mod transport;

use std::collections::HashMap;
use std::time::Duration;

/// Kodi's video player.
pub const VIDEO_PLAYER: i64 = 1;
/// Kodi's picture (slideshow) player. Never shown as playback.
pub const PICTURE_PLAYER: i64 = 2;
/// Reported for some streams; which player it really is cannot be known.
pub const STREAM_PLAYER: i64 = -1;

/// Maps a raw player id to the player whose item should be requested.
///
/// `None` means the player must be ignored and the display left alone.
pub fn resolve_player_id(raw: i64) -> Option<i64> {
    match raw {
        PICTURE_PLAYER => None,
        STREAM_PLAYER => Some(VIDEO_PLAYER),
        other => Some(other),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ItemKind {
    Episode,
    Movie,
    Audio,
    MusicAlbum,
    AudioBook,
    Book,
    /// Live TV
    Channel,
    Picture,
    #[default]
    Other,
}

impl ItemKind {
    pub fn from_kodi(kind: &str) -> Self {
        match kind {
            "episode" => ItemKind::Episode,
            "movie" => ItemKind::Movie,
            "song" => ItemKind::Audio,
            "album" => ItemKind::MusicAlbum,
            "channel" => ItemKind::Channel,
            "picture" => ItemKind::Picture,
            _ => ItemKind::Other,
        }
    }

    pub fn from_jellyfin(kind: &str) -> Self {
        match kind {
            "Episode" => ItemKind::Episode,
            "Movie" => ItemKind::Movie,
            "Audio" => ItemKind::Audio,
            "MusicAlbum" => ItemKind::MusicAlbum,
            "AudioBook" => ItemKind::AudioBook,
            "Book" => ItemKind::Book,
            "TvChannel" | "LiveTvChannel" => ItemKind::Channel,
            "Photo" => ItemKind::Picture,
            _ => ItemKind::Other,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            ItemKind::Audio | ItemKind::MusicAlbum | ItemKind::AudioBook | ItemKind::Book
        )
    }
}

/// The now-playing item as far as the server has described it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaItem {
    pub id: Option<String>,
    pub kind: ItemKind,
    pub title: String,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    /// Art map keyed by the server's art names, when the server sends one.
    pub art: Option<HashMap<String, String>>,
    pub series_id: Option<String>,
    pub album_id: Option<String>,
    pub parent_id: Option<String>,
}

impl MediaItem {
    /// Same content, compared by id when both sides have one.
    pub fn same_as(&self, other: &MediaItem) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.kind == other.kind && self.title == other.title,
        }
    }
}

/// Playback progress in whichever shape the server reports it.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// Server-formatted remaining time, e.g. `00:41:12`.
    Remaining(String),
    Clock { elapsed: Duration, total: Duration },
    /// 10,000,000 ticks per second.
    Ticks { position: i64, runtime: i64 },
}

/// What the media server says is playing right now.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSession {
    pub session_id: Option<String>,
    pub player_id: Option<i64>,
    pub item: MediaItem,
    pub progress: Option<Progress>,
    pub artwork: Option<String>,
}

impl PlaybackSession {
    pub fn item_id(&self) -> Option<&str> {
        self.item.id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_ids_map_per_server_quirks() {
        assert_eq!(resolve_player_id(PICTURE_PLAYER), None);
        assert_eq!(resolve_player_id(STREAM_PLAYER), resolve_player_id(VIDEO_PLAYER));
        assert_eq!(resolve_player_id(0), Some(0));
        assert_eq!(resolve_player_id(7), Some(7));
    }

    #[test]
    fn items_without_ids_compare_by_title() {
        let a = MediaItem { title: "News".into(), kind: ItemKind::Channel, ..Default::default() };
        let mut b = a.clone();
        assert!(a.same_as(&b));
        b.title = "Weather".into();
        assert!(!a.same_as(&b));

        let c = MediaItem { id: Some("1".into()), title: "X".into(), ..Default::default() };
        let d = MediaItem { id: Some("1".into()), title: "Y".into(), ..Default::default() };
        assert!(c.same_as(&d));
    }
}

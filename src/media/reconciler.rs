//! Keeps the current playback session. No I/O; callers act on [`Directive`]s.

use tracing::{debug, info};

use crate::media::protocol::{Inbound, Notification, QueryResult, RefreshKind, Request, SessionInfo};
use crate::media::{ItemKind, MediaItem, PlaybackSession, Progress, resolve_player_id};

#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Send(Request),
    /// Replace the refresh timer with one issuing this request.
    ArmRefresh(Request),
    EndSession,
    ResolveArtwork,
    Publish,
}

#[derive(Debug)]
struct Pending {
    player_id: i64,
    /// Item the start notification named, if any.
    item_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct SessionReconciler {
    session: Option<PlaybackSession>,
    pending: Option<Pending>,
}

impl SessionReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn clear(&mut self) {
        self.session = None;
        self.pending = None;
    }

    pub fn reconcile(&mut self, inbound: Inbound) -> Vec<Directive> {
        match inbound {
            Inbound::Notification(Notification::PlaybackStarted { player_id: Some(raw), item_id }) => {
                self.player_started(raw, item_id)
            }
            Inbound::Notification(Notification::PlaybackStarted { player_id: None, .. }) => {
                vec![Directive::Send(Request::ActivePlayers)]
            }
            Inbound::Notification(Notification::PlaybackStopped) => self.stopped("stop notification"),
            Inbound::QueryResult(QueryResult::ActivePlayers(players)) => match players.first() {
                Some(&raw) => self.player_started(raw, None),
                None => self.stopped("no active player"),
            },
            Inbound::QueryResult(QueryResult::Item(item)) => self.item_details(item),
            Inbound::QueryResult(QueryResult::Progress(progress)) => self.progress(progress),
            Inbound::QueryResult(QueryResult::Sessions(sessions)) => self.sessions(sessions),
            Inbound::HealthCheck | Inbound::Ignored => Vec::new(),
        }
    }

    fn player_started(&mut self, raw: i64, item_id: Option<String>) -> Vec<Directive> {
        let Some(player_id) = resolve_player_id(raw) else {
            debug!(player_id = raw, "picture player, leaving display alone");
            return Vec::new();
        };
        info!(player_id, "playback started");
        self.pending = Some(Pending { player_id, item_id });
        vec![Directive::Send(Request::ItemDetails { player_id })]
    }

    fn stopped(&mut self, reason: &str) -> Vec<Directive> {
        if self.session.is_none() && self.pending.is_none() {
            return Vec::new();
        }
        info!(reason, "playback stopped");
        self.clear();
        vec![Directive::EndSession]
    }

    fn item_details(&mut self, item: MediaItem) -> Vec<Directive> {
        let Some(pending) = self.pending.take() else {
            debug!(item_id = ?item.id, "dropping item details nobody is waiting for");
            return Vec::new();
        };
        if let (Some(expected), Some(actual)) = (&pending.item_id, &item.id) {
            if expected != actual {
                debug!(%expected, %actual, "dropping item details for a superseded item");
                self.pending = Some(pending);
                return Vec::new();
            }
        }
        if item.kind == ItemKind::Picture {
            return Vec::new();
        }

        let refresh_kind = if item.kind == ItemKind::Channel {
            RefreshKind::Clock
        } else {
            RefreshKind::TimeLabel
        };
        let previous = self.session.take();
        let changed = previous.as_ref().is_none_or(|p| !p.item.same_as(&item));
        let (progress, artwork) = match previous {
            Some(p) if !changed => (p.progress, p.artwork),
            _ => (None, None),
        };
        if changed {
            info!(title = %item.title, kind = ?item.kind, "now playing");
        }
        self.session = Some(PlaybackSession {
            session_id: None,
            player_id: Some(pending.player_id),
            item,
            progress,
            artwork,
        });

        let mut directives = Vec::new();
        if changed {
            directives.push(Directive::ResolveArtwork);
        }
        directives.push(Directive::ArmRefresh(Request::Refresh {
            player_id: Some(pending.player_id),
            kind: refresh_kind,
        }));
        directives.push(Directive::Publish);
        directives
    }

    fn progress(&mut self, progress: Progress) -> Vec<Directive> {
        // While new item details are outstanding, progress may still be
        // about the previous item.
        if self.pending.is_some() {
            return Vec::new();
        }
        match self.session.as_mut() {
            Some(session) if session.progress.as_ref() != Some(&progress) => {
                session.progress = Some(progress);
                vec![Directive::Publish]
            }
            _ => Vec::new(),
        }
    }

    fn sessions(&mut self, sessions: Vec<SessionInfo>) -> Vec<Directive> {
        let active = sessions.into_iter().find_map(|info| {
            let item = info.item.clone()?;
            (item.kind != ItemKind::Picture).then_some((info, item))
        });
        let Some((info, item)) = active else {
            return self.stopped("no active session");
        };

        let was_active = self.session.is_some();
        let changed = self.session.as_ref().is_none_or(|s| !s.item.same_as(&item));
        let artwork = if changed {
            info!(title = %item.title, kind = ?item.kind, "now playing");
            None
        } else {
            self.session.as_ref().and_then(|s| s.artwork.clone())
        };
        self.pending = None;
        self.session = Some(PlaybackSession {
            session_id: info.session_id,
            player_id: None,
            item,
            progress: Some(Progress::Ticks {
                position: info.position_ticks,
                runtime: info.runtime_ticks,
            }),
            artwork,
        });

        let mut directives = Vec::new();
        if changed {
            directives.push(Directive::ResolveArtwork);
        }
        if !was_active {
            directives.push(Directive::ArmRefresh(Request::Refresh {
                player_id: None,
                kind: RefreshKind::Sessions,
            }));
        }
        directives.push(Directive::Publish);
        directives
    }

    pub fn set_artwork(&mut self, url: Option<String>) {
        if let Some(session) = self.session.as_mut() {
            session.artwork = url;
        }
    }

    /// False when the item it was resolved for is no longer current.
    pub fn apply_artwork(&mut self, item_id: &str, url: String) -> bool {
        match self.session.as_mut() {
            Some(session) if session.item_id() == Some(item_id) => {
                session.artwork = Some(url);
                true
            }
            _ => {
                debug!(item_id, "dropping artwork for a superseded item");
                false
            }
        }
    }
}

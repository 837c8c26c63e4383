use std::time::Duration;

use chrono::Local;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::error::MonitorError;
use crate::event::{Event, EventSender, TimerKind, TransportEvent};
use crate::media::artwork;
use crate::media::jellyfin::{self, JellyfinClient};
use crate::media::projector::{self, DisplayState};
use crate::media::protocol::{Inbound, Outbound, Protocol, QueryResult, Request};
use crate::media::reconciler::{Directive, SessionReconciler};
use crate::media::transport::{CLOSE_ABNORMAL, CLOSE_GOING_AWAY, CLOSE_NORMAL, Transport, WsTransport};
use crate::timers::TimerSet;

const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug)]
pub struct Connection {
    pub endpoint: String,
    pub state: ConnectionState,
    /// Bumped on every connect; transport events carry it.
    pub id: u64,
    pub last_activity: Option<Instant>,
}

#[derive(Debug)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    grow: f64,
    current: Option<Duration>,
    attempts: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, grow: f64) -> Self {
        Self {
            min,
            max: max.max(min),
            grow: grow.max(1.0),
            current: None,
            attempts: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.min,
            Some(delay) => {
                let grown = (delay.as_millis() as f64 * self.grow).round() as u64;
                Duration::from_millis(grown).min(self.max)
            }
        };
        self.current = Some(next);
        self.attempts += 1;
        next
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn current(&self) -> Option<Duration> {
        self.current
    }
}

fn connect_timeout(failures: u32) -> Duration {
    Duration::from_secs(1 + u64::from(failures)).min(MAX_CONNECT_TIMEOUT)
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub startup_delay: Duration,
    pub health_interval: Duration,
    pub refresh_interval: Duration,
    pub idle_poll: Option<Duration>,
    pub placeholder: String,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            startup_delay: config.startup_delay(),
            health_interval: config.health_check_interval(),
            refresh_interval: config.refresh_interval(),
            idle_poll: config.kodi_poll_interval(),
            placeholder: config.placeholder.clone(),
        }
    }
}

pub struct ConnectionManager {
    protocol: Protocol,
    settings: Settings,
    transport: Box<dyn Transport>,
    http: Option<JellyfinClient>,
    events: EventSender,
    timers: TimerSet,
    connection: Connection,
    backoff: Backoff,
    reconciler: SessionReconciler,
    display: DisplayState,
    /// Request the refresh timer issues while a session is active.
    refresh: Option<Request>,
    running: bool,
    /// Last sessions poll sent, and the newest one applied.
    poll_seq: u64,
    applied_seq: u64,
}

impl ConnectionManager {
    /// `None` when the media panel is switched off.
    pub fn from_config(config: &Config, events: EventSender) -> Result<Option<Self>, MonitorError> {
        let Some(protocol) = Protocol::from_config(config) else {
            return Ok(None);
        };
        let http = match protocol {
            Protocol::Jellyfin(_) => JellyfinClient::from_config(config)?,
            Protocol::Kodi(_) => None,
        };
        let backoff = Backoff::new(
            Duration::from_millis(config.min_reconnect_ms),
            Duration::from_millis(config.max_reconnect_ms),
            config.reconnect_grow,
        );
        Ok(Some(Self::new(
            protocol,
            Settings::from_config(config),
            backoff,
            Box::new(WsTransport::new()),
            http,
            events,
        )))
    }

    pub fn new(
        protocol: Protocol,
        settings: Settings,
        backoff: Backoff,
        transport: Box<dyn Transport>,
        http: Option<JellyfinClient>,
        events: EventSender,
    ) -> Self {
        Self {
            protocol,
            settings,
            transport,
            http,
            timers: TimerSet::new(events.clone()),
            events,
            connection: Connection {
                endpoint: String::new(),
                state: ConnectionState::Idle,
                id: 0,
                last_activity: None,
            },
            backoff,
            reconciler: SessionReconciler::new(),
            display: DisplayState::default(),
            refresh: None,
            running: false,
            poll_seq: 0,
            applied_seq: 0,
        }
    }

    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn timers(&self) -> &TimerSet {
        &self.timers
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self) {
        if self.running {
            return;
        }
        let endpoint = match self.protocol.endpoint() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!(backend = self.protocol.name(), error = %e, "media panel disabled");
                self.display = DisplayState::default();
                return;
            }
        };
        info!(
            backend = self.protocol.name(),
            endpoint = %self.redact(&endpoint),
            delay = ?self.settings.startup_delay,
            "starting media monitor"
        );
        self.connection.endpoint = endpoint;
        self.running = true;
        self.timers.arm_once(TimerKind::Settle, self.settings.startup_delay);
        if let Some(period) = self.protocol.idle_poll(self.settings.idle_poll) {
            // Jellyfin playback is only visible through the poll, which
            // does not wait for the socket.
            if matches!(self.protocol, Protocol::Jellyfin(_)) {
                self.timers.arm_every(TimerKind::Poll, period);
                self.dispatch(Request::ActivePlayers);
            }
        }
    }

    pub fn connect(&mut self) {
        if !self.running {
            return;
        }
        self.teardown(CLOSE_GOING_AWAY, "reconnecting");
        self.connection.id += 1;
        self.connection.state = ConnectionState::Connecting;
        self.connection.last_activity = None;
        let timeout = connect_timeout(self.backoff.attempts());
        info!(
            connection = self.connection.id,
            attempt = self.backoff.attempts() + 1,
            ?timeout,
            "connecting to {}",
            self.protocol.name()
        );
        self.transport.open(
            &self.connection.endpoint,
            timeout,
            self.connection.id,
            self.events.clone(),
        );
    }

    pub fn send(&mut self, text: String) -> Result<(), MonitorError> {
        if self.connection.state != ConnectionState::Open {
            return Err(MonitorError::NotOpen);
        }
        self.transport.send(text)
    }

    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Timer { kind, generation } => {
                if self.timers.accept(kind, generation) {
                    self.on_timer(kind);
                } else {
                    trace!(?kind, "dropping superseded timer tick");
                }
            }
            Event::Transport { connection, event } => {
                if !self.running || connection != self.connection.id {
                    trace!(connection, "dropping event from an abandoned connection");
                    return;
                }
                match event {
                    TransportEvent::Opened => self.on_open(),
                    TransportEvent::Message(raw) => self.on_message(&raw),
                    TransportEvent::Closed { code, reason } => self.on_close(code, &reason),
                }
            }
            Event::Sessions { seq, result } => self.on_sessions(seq, result),
            Event::Artwork { item_id, url } => {
                if self.reconciler.apply_artwork(&item_id, url) {
                    self.publish();
                }
            }
            Event::Weather(_) => {}
        }
    }

    fn on_timer(&mut self, kind: TimerKind) {
        if !self.running {
            return;
        }
        match kind {
            TimerKind::Settle | TimerKind::Reconnect => self.connect(),
            TimerKind::HealthCheck => self.health_check(),
            TimerKind::Refresh => {
                if let Some(request) = self.refresh.clone() {
                    self.dispatch(request);
                }
            }
            TimerKind::Poll => self.dispatch(Request::ActivePlayers),
            TimerKind::WeatherRefresh | TimerKind::WeatherStaleness => {}
        }
    }

    fn on_open(&mut self) {
        if self.connection.state != ConnectionState::Connecting {
            return;
        }
        info!(connection = self.connection.id, "connected to {}", self.protocol.name());
        self.connection.state = ConnectionState::Open;
        self.connection.last_activity = Some(Instant::now());
        self.backoff.reset();
        self.timers.arm_every(TimerKind::HealthCheck, self.settings.health_interval);
        if !self.reconciler.is_active() {
            self.arm_idle_poll();
        }
        self.dispatch(Request::ActivePlayers);
    }

    fn on_message(&mut self, raw: &str) {
        self.connection.last_activity = Some(Instant::now());
        match self.protocol.decode(raw) {
            Ok(Inbound::HealthCheck) => trace!("liveness confirmed"),
            Ok(inbound) => self.reconcile(inbound),
            Err(e) => warn!(error = %e, "ignoring unreadable message"),
        }
    }

    fn on_close(&mut self, code: u16, reason: &str) {
        if !self.running
            || matches!(self.connection.state, ConnectionState::Idle | ConnectionState::Closed)
        {
            return;
        }
        if code == CLOSE_NORMAL {
            info!(code, reason, "media connection closed");
        } else {
            warn!(code, reason, "media connection lost");
        }
        self.teardown(CLOSE_GOING_AWAY, "closed");
        self.connection.state = ConnectionState::Closed;
        let delay = self.backoff.next_delay();
        info!(?delay, failures = self.backoff.attempts(), "reconnect scheduled");
        self.timers.arm_once(TimerKind::Reconnect, delay);
    }

    /// Closes the connection when the probe fails or nothing arrived for
    /// two intervals.
    pub fn health_check(&mut self) {
        if self.connection.state != ConnectionState::Open {
            return;
        }
        let idle = self
            .connection
            .last_activity
            .map(|at| at.elapsed())
            .unwrap_or_default();
        if idle > self.settings.health_interval * 2 {
            warn!(?idle, "no traffic from the media server");
            self.force_close("no traffic");
            return;
        }
        let probe = self.protocol.health_probe();
        if let Err(e) = self.send(probe) {
            warn!(error = %e, "health check failed");
            self.force_close("health check failed");
        }
    }

    fn force_close(&mut self, reason: &str) {
        self.connection.state = ConnectionState::Closing;
        self.transport.close(CLOSE_GOING_AWAY, reason);
        self.on_close(CLOSE_ABNORMAL, reason);
    }

    /// Returns to `Idle`. Safe from any state, any number of times.
    pub fn stop(&mut self) {
        let was_running = self.running;
        self.running = false;
        self.teardown(CLOSE_NORMAL, "dashboard stopped");
        self.end_session();
        self.timers.cancel_all();
        self.connection.state = ConnectionState::Idle;
        self.backoff.reset();
        if was_running {
            info!("media monitor stopped");
        }
    }

    /// Shared by stop, close, health failure and reconnect.
    fn teardown(&mut self, code: u16, reason: &str) {
        self.timers.cancel(TimerKind::Settle);
        self.timers.cancel(TimerKind::Reconnect);
        self.timers.cancel(TimerKind::HealthCheck);
        self.transport.close(code, reason);
        // Jellyfin playback comes from the HTTP poll, not the socket.
        if matches!(self.protocol, Protocol::Kodi(_)) {
            self.end_session();
        }
    }

    fn end_session(&mut self) {
        self.timers.cancel(TimerKind::Refresh);
        self.refresh = None;
        self.reconciler.clear();
        // polls still in flight describe the session that just ended
        self.applied_seq = self.applied_seq.max(self.poll_seq);
        self.publish();
        if self.running {
            self.arm_idle_poll();
        }
    }

    fn arm_idle_poll(&mut self) {
        if let Some(period) = self.protocol.idle_poll(self.settings.idle_poll) {
            if !self.timers.is_armed(TimerKind::Poll) {
                self.timers.arm_every(TimerKind::Poll, period);
            }
        }
    }

    fn reconcile(&mut self, inbound: Inbound) {
        for directive in self.reconciler.reconcile(inbound) {
            self.apply(directive);
        }
    }

    fn apply(&mut self, directive: Directive) {
        match directive {
            Directive::Send(request) => self.dispatch(request),
            Directive::ArmRefresh(request) => {
                self.timers.cancel(TimerKind::Poll);
                self.timers.arm_every(TimerKind::Refresh, self.settings.refresh_interval);
                self.refresh = Some(request.clone());
                self.dispatch(request);
            }
            Directive::EndSession => self.end_session(),
            Directive::ResolveArtwork => self.resolve_artwork(),
            Directive::Publish => self.publish(),
        }
    }

    fn dispatch(&mut self, request: Request) {
        match self.protocol.encode(&request) {
            Outbound::Socket(text) => {
                if let Err(e) = self.send(text) {
                    debug!(?request, error = %e, "request not sent");
                }
            }
            Outbound::SessionsPoll => self.poll_sessions(),
        }
    }

    fn poll_sessions(&mut self) {
        self.poll_seq += 1;
        let seq = self.poll_seq;
        let Some(http) = self.http.clone() else {
            return;
        };
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = http.fetch_sessions().await;
            let _ = events.send(Event::Sessions { seq, result });
        });
    }

    fn on_sessions(&mut self, seq: u64, result: Result<String, MonitorError>) {
        if !self.running {
            return;
        }
        if seq <= self.applied_seq {
            debug!(seq, applied = self.applied_seq, "dropping out-of-order sessions response");
            return;
        }
        self.applied_seq = seq;
        match result.and_then(|body| jellyfin::parse_sessions(&body)) {
            Ok(sessions) => self.reconcile(Inbound::QueryResult(QueryResult::Sessions(sessions))),
            // Polling carries on; the server may come back.
            Err(e) => warn!(error = %self.redact(&e.to_string()), "session poll failed"),
        }
    }

    fn resolve_artwork(&mut self) {
        let Some(session) = self.reconciler.session() else {
            return;
        };
        match &self.protocol {
            Protocol::Kodi(codec) => {
                let url = artwork::resolve_direct(&session.item, codec.web_base());
                debug!(artwork = ?url, "artwork resolved");
                self.reconciler.set_artwork(url);
            }
            Protocol::Jellyfin(_) => {
                let Some(http) = self.http.clone() else {
                    return;
                };
                let Some(item_id) = session.item.id.clone() else {
                    let placeholder = Some(self.settings.placeholder.clone());
                    self.reconciler.set_artwork(placeholder);
                    return;
                };
                let placeholder = self.settings.placeholder.clone();
                let candidates =
                    artwork::probe_candidates(&session.item, http.base_url(), http.api_key(), &placeholder);
                debug!(%item_id, candidates = candidates.len(), "probing artwork");
                let events = self.events.clone();
                tokio::spawn(async move {
                    let url = artwork::first_reachable(candidates, &placeholder, |url| {
                        let http = http.clone();
                        async move { http.probe(&url).await }
                    })
                    .await;
                    debug!(%item_id, artwork = %http.redact(&url), "artwork resolved");
                    let _ = events.send(Event::Artwork { item_id, url });
                });
            }
        }
    }

    fn publish(&mut self) {
        self.display = projector::project(self.reconciler.session(), &Local::now());
    }

    pub fn tick(&mut self) {
        self.publish();
    }

    fn redact(&self, text: &str) -> String {
        match &self.http {
            Some(http) => http.redact(text),
            None => text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{self, EventReceiver};
    use crate::media::jellyfin::JellyfinCodec;
    use crate::media::kodi::{self, KodiCodec};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Wire {
        opened: Vec<(String, Duration, u64)>,
        sent: Vec<String>,
        closed: Vec<u16>,
        fail_sends: bool,
    }

    struct MockTransport(Rc<RefCell<Wire>>);

    impl Transport for MockTransport {
        fn open(&mut self, url: &str, timeout: Duration, connection: u64, _events: EventSender) {
            self.0.borrow_mut().opened.push((url.to_string(), timeout, connection));
        }

        fn send(&mut self, text: String) -> Result<(), MonitorError> {
            let mut wire = self.0.borrow_mut();
            if wire.fail_sends {
                return Err(MonitorError::NotOpen);
            }
            wire.sent.push(text);
            Ok(())
        }

        fn close(&mut self, code: u16, _reason: &str) {
            self.0.borrow_mut().closed.push(code);
        }
    }

    fn settings() -> Settings {
        Settings {
            startup_delay: Duration::from_secs(2),
            health_interval: Duration::from_secs(30),
            refresh_interval: Duration::from_millis(500),
            idle_poll: None,
            placeholder: "/images/jellyfin-logo.png".into(),
        }
    }

    fn kodi_manager() -> (ConnectionManager, Rc<RefCell<Wire>>, EventReceiver) {
        let (tx, rx) = event::channel();
        let wire = Rc::new(RefCell::new(Wire::default()));
        let protocol = Protocol::Kodi(KodiCodec::new(
            "ws://kodi:9090/jsonrpc".into(),
            "http://kodi:8080".into(),
        ));
        let backoff = Backoff::new(Duration::from_millis(500), Duration::from_millis(1000), 1.3);
        let manager = ConnectionManager::new(
            protocol,
            settings(),
            backoff,
            Box::new(MockTransport(wire.clone())),
            None,
            tx,
        );
        (manager, wire, rx)
    }

    fn transport(manager: &mut ConnectionManager, event: TransportEvent) {
        let connection = manager.connection().id;
        manager.handle(Event::Transport { connection, event });
    }

    fn open(manager: &mut ConnectionManager) {
        manager.connect();
        transport(manager, TransportEvent::Opened);
    }

    fn message(manager: &mut ConnectionManager, raw: &str) {
        transport(manager, TransportEvent::Message(raw.to_string()));
    }

    fn lost(manager: &mut ConnectionManager) {
        transport(manager, TransportEvent::Closed { code: CLOSE_ABNORMAL, reason: "reset".into() });
    }

    const ON_PLAY: &str = r#"{"jsonrpc":"2.0","method":"Player.OnPlay","params":{"data":{"item":{"id":42,"type":"episode"},"player":{"playerid":1}}}}"#;
    const ITEM: &str = r#"{"id":"Player.GetItem","jsonrpc":"2.0","result":{"item":{"art":{"thumb":"http://art/ep.jpg"},"episode":3,"id":42,"season":1,"title":"Pilot","type":"episode"}}}"#;

    fn play(manager: &mut ConnectionManager) {
        message(manager, ON_PLAY);
        message(manager, ITEM);
    }

    fn last_method(wire: &Rc<RefCell<Wire>>) -> String {
        let wire = wire.borrow();
        let value: serde_json::Value = serde_json::from_str(wire.sent.last().unwrap()).unwrap();
        value["method"].as_str().unwrap().to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn start_settles_then_connects() {
        let (mut manager, wire, _rx) = kodi_manager();
        manager.start();
        assert!(manager.timers().is_armed(TimerKind::Settle));
        assert!(wire.borrow().opened.is_empty());

        manager.start();
        assert_eq!(manager.timers().armed_count(), 1);

        open(&mut manager);
        assert_eq!(manager.connection().state, ConnectionState::Open);
        assert!(!manager.timers().is_armed(TimerKind::Settle));
        assert!(manager.timers().is_armed(TimerKind::HealthCheck));
        assert_eq!(last_method(&wire), kodi::GET_ACTIVE_PLAYERS);
        let (url, timeout, _) = wire.borrow().opened[0].clone();
        assert_eq!(url, "ws://kodi:9090/jsonrpc");
        assert_eq!(timeout, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn playback_fills_the_display() {
        let (mut manager, wire, _rx) = kodi_manager();
        manager.start();
        open(&mut manager);

        message(&mut manager, ON_PLAY);
        assert_eq!(last_method(&wire), kodi::GET_ITEM);
        message(&mut manager, ITEM);
        assert!(manager.timers().is_armed(TimerKind::Refresh));
        assert_eq!(last_method(&wire), kodi::GET_INFO_LABELS);

        message(
            &mut manager,
            r#"{"id":"XBMC.GetInfoLabels","jsonrpc":"2.0","result":{"VideoPlayer.TimeRemaining":"00:59:59"}}"#,
        );
        let display = manager.display();
        assert!(display.available);
        assert_eq!(display.title, "Pilot");
        assert_eq!(display.time_remaining, "-59:59");
        assert_eq!(display.artwork.as_deref(), Some("http://art/ep.jpg"));

        message(&mut manager, r#"{"jsonrpc":"2.0","method":"Player.OnStop","params":{"data":{}}}"#);
        assert!(!manager.display().available);
        assert!(!manager.timers().is_armed(TimerKind::Refresh));
    }

    #[tokio::test(start_paused = true)]
    async fn close_tears_down_and_schedules_reconnect() {
        let (mut manager, _wire, _rx) = kodi_manager();
        manager.start();
        open(&mut manager);
        play(&mut manager);
        assert!(manager.display().available);

        lost(&mut manager);
        assert_eq!(manager.connection().state, ConnectionState::Closed);
        assert!(!manager.display().available);
        assert!(!manager.timers().is_armed(TimerKind::Refresh));
        assert!(!manager.timers().is_armed(TimerKind::HealthCheck));
        assert!(manager.timers().is_armed(TimerKind::Reconnect));

        // a second close for the same connection changes nothing
        let delay = manager.backoff().current();
        lost(&mut manager);
        assert_eq!(manager.backoff().current(), delay);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_storm_backs_off_to_the_ceiling() {
        let (mut manager, wire, _rx) = kodi_manager();
        manager.start();

        let mut delays = Vec::new();
        for _ in 0..6 {
            manager.connect();
            lost(&mut manager);
            delays.push(manager.backoff().current().unwrap());
            assert_eq!(manager.timers().armed_count(), 1);
        }
        let millis: Vec<u128> = delays.iter().map(Duration::as_millis).collect();
        assert_eq!(millis, vec![500, 650, 845, 1000, 1000, 1000]);

        let timeouts: Vec<u64> = wire.borrow().opened.iter().map(|(_, t, _)| t.as_secs()).collect();
        assert_eq!(timeouts, vec![1, 2, 3, 4, 5, 5]);

        open(&mut manager);
        lost(&mut manager);
        assert_eq!(manager.backoff().current(), Some(Duration::from_millis(500)));
    }

    #[tokio::test(start_paused = true)]
    async fn timers_never_duplicate() {
        let (mut manager, _wire, _rx) = kodi_manager();
        for _ in 0..3 {
            manager.start();
            open(&mut manager);
            play(&mut manager);
            play(&mut manager);
            assert_eq!(manager.timers().armed_count(), 2);
            assert!(manager.timers().is_armed(TimerKind::Refresh));
            assert!(manager.timers().is_armed(TimerKind::HealthCheck));

            open(&mut manager);
            play(&mut manager);
            assert_eq!(manager.timers().armed_count(), 2);

            lost(&mut manager);
            assert_eq!(manager.timers().armed_count(), 1);
            manager.stop();
            assert_eq!(manager.timers().armed_count(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_from_any_state() {
        let (mut manager, wire, _rx) = kodi_manager();
        manager.stop();
        assert_eq!(manager.connection().state, ConnectionState::Idle);

        manager.start();
        open(&mut manager);
        play(&mut manager);
        manager.stop();
        manager.stop();
        assert_eq!(manager.timers().armed_count(), 0);
        assert!(!manager.display().available);
        assert_eq!(manager.connection().state, ConnectionState::Idle);
        assert!(wire.borrow().closed.contains(&CLOSE_NORMAL));

        // events that were already queued do nothing once stopped
        lost(&mut manager);
        message(&mut manager, ON_PLAY);
        assert_eq!(manager.timers().armed_count(), 0);
        assert!(!manager.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_health_probe_forces_a_reconnect() {
        let (mut manager, wire, _rx) = kodi_manager();
        manager.start();
        open(&mut manager);
        manager.health_check();
        assert_eq!(last_method(&wire), kodi::PING);

        wire.borrow_mut().fail_sends = true;
        manager.health_check();
        assert_eq!(manager.connection().state, ConnectionState::Closed);
        assert!(manager.timers().is_armed(TimerKind::Reconnect));
        assert!(!manager.timers().is_armed(TimerKind::HealthCheck));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_is_closed() {
        let (mut manager, _wire, _rx) = kodi_manager();
        manager.start();
        open(&mut manager);
        tokio::time::advance(Duration::from_secs(61)).await;
        manager.health_check();
        assert_eq!(manager.connection().state, ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_connections_are_ignored() {
        let (mut manager, _wire, _rx) = kodi_manager();
        manager.start();
        manager.connect();
        let stale = manager.connection().id;
        manager.connect();
        manager.handle(Event::Transport { connection: stale, event: TransportEvent::Opened });
        assert_eq!(manager.connection().state, ConnectionState::Connecting);
        manager.handle(Event::Transport {
            connection: stale,
            event: TransportEvent::Closed { code: CLOSE_ABNORMAL, reason: String::new() },
        });
        assert_eq!(manager.connection().state, ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn sends_while_closed_fail_quietly() {
        let (mut manager, wire, _rx) = kodi_manager();
        assert!(manager.send("x".into()).is_err());
        manager.start();
        manager.connect();
        assert!(manager.send("x".into()).is_err());
        assert!(wire.borrow().sent.is_empty());
    }

    fn jellyfin_manager(api_key: Option<&str>) -> (ConnectionManager, EventReceiver) {
        let (tx, rx) = event::channel();
        let endpoint = api_key.map(|key| format!("ws://jf:8096/socket?api_key={key}"));
        let manager = ConnectionManager::new(
            Protocol::Jellyfin(JellyfinCodec::new(endpoint)),
            settings(),
            Backoff::new(Duration::from_millis(500), Duration::from_secs(5), 1.3),
            Box::new(MockTransport(Rc::default())),
            None,
            tx,
        );
        (manager, rx)
    }

    fn sessions_body(item_id: &str, title: &str) -> String {
        format!(
            r#"[{{"Id":"s1","PlayState":{{"PositionTicks":0}},"NowPlayingItem":{{"Id":"{item_id}","Name":"{title}","Type":"Movie","RunTimeTicks":600000000}}}}]"#
        )
    }

    #[tokio::test(start_paused = true)]
    async fn missing_api_key_disables_media() {
        let (mut manager, _rx) = jellyfin_manager(None);
        manager.start();
        assert!(!manager.is_running());
        assert_eq!(manager.timers().armed_count(), 0);
        assert_eq!(manager.display(), &DisplayState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_order_session_polls_are_dropped() {
        let (mut manager, _rx) = jellyfin_manager(Some("k"));
        manager.start();
        assert!(manager.timers().is_armed(TimerKind::Poll));

        manager.handle(Event::Sessions { seq: 2, result: Ok(sessions_body("b", "Newer")) });
        manager.handle(Event::Sessions { seq: 1, result: Ok(sessions_body("a", "Older")) });
        assert_eq!(manager.display().title, "Newer");
        assert_eq!(manager.display().time_remaining, "-1:00");
        assert!(manager.timers().is_armed(TimerKind::Refresh));
        assert!(!manager.timers().is_armed(TimerKind::Poll));

        manager.handle(Event::Sessions { seq: 3, result: Ok("[]".into()) });
        assert!(!manager.display().available);
        assert!(manager.timers().is_armed(TimerKind::Poll));
        assert!(!manager.timers().is_armed(TimerKind::Refresh));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_poll_keeps_the_session() {
        let (mut manager, _rx) = jellyfin_manager(Some("k"));
        manager.start();
        manager.handle(Event::Sessions { seq: 1, result: Ok(sessions_body("b", "Film")) });
        manager.handle(Event::Sessions { seq: 2, result: Err(MonitorError::protocol("timeout")) });
        assert!(manager.display().available);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_sent_before_a_stop_are_dropped() {
        let (mut manager, _rx) = jellyfin_manager(Some("k"));
        manager.start();
        manager.connect();
        transport(&mut manager, TransportEvent::Opened);
        manager.handle(Event::Sessions { seq: 1, result: Ok(sessions_body("b", "Film")) });
        assert!(manager.display().available);
        let in_flight = manager.poll_seq;

        message(&mut manager, r#"{"MessageType":"PlaybackStopped","Data":{}}"#);
        assert!(!manager.display().available);

        manager.handle(Event::Sessions { seq: in_flight, result: Ok(sessions_body("b", "Film")) });
        assert!(!manager.display().available);
        assert!(!manager.timers().is_armed(TimerKind::Refresh));

        // the next poll is sent after the stop and counts again
        manager.on_timer(TimerKind::Poll);
        let fresh = manager.poll_seq;
        manager.handle(Event::Sessions { seq: fresh, result: Ok(sessions_body("c", "Next")) });
        assert_eq!(manager.display().title, "Next");
    }

    #[tokio::test(start_paused = true)]
    async fn socket_trouble_keeps_jellyfin_playback() {
        let (mut manager, _rx) = jellyfin_manager(Some("k"));
        manager.start();
        manager.handle(Event::Sessions { seq: 1, result: Ok(sessions_body("b", "Film")) });
        assert!(manager.display().available);

        manager.connect();
        assert!(manager.display().available);
        lost(&mut manager);
        assert_eq!(manager.connection().state, ConnectionState::Closed);
        assert!(manager.display().available);
        assert!(manager.timers().is_armed(TimerKind::Refresh));
        assert!(manager.timers().is_armed(TimerKind::Reconnect));

        manager.stop();
        assert!(!manager.display().available);
        assert_eq!(manager.timers().armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn artwork_for_a_previous_item_is_ignored() {
        let (mut manager, _rx) = jellyfin_manager(Some("k"));
        manager.start();
        manager.handle(Event::Sessions { seq: 1, result: Ok(sessions_body("b", "Film")) });
        manager.handle(Event::Artwork { item_id: "a".into(), url: "http://old".into() });
        assert_eq!(manager.display().artwork, None);
        manager.handle(Event::Artwork { item_id: "b".into(), url: "http://new".into() });
        assert_eq!(manager.display().artwork.as_deref(), Some("http://new"));
    }
}

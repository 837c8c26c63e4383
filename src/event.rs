//! The single event type the dashboard loop consumes.
//!
//! Everything asynchronous (socket reads, HTTP fetches, artwork probes and
//! timers) runs in its own task and reports back here, so state is only ever
//! touched from the loop, one event at a time, in arrival order.

use tokio::sync::mpsc;

use crate::error::MonitorError;
use crate::weather::WeatherReport;

pub type EventSender = mpsc::UnboundedSender<Event>;
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Every timer in the process. At most one timer per kind exists at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Delay between start and the first connection attempt.
    Settle,
    /// Backoff delay before the next connection attempt.
    Reconnect,
    /// Liveness probe while the connection is open.
    HealthCheck,
    /// Time-remaining refresh while a session is active.
    Refresh,
    /// Active-player safety net while nothing is playing.
    Poll,
    WeatherRefresh,
    WeatherStaleness,
}

impl TimerKind {
    pub fn is_weather(self) -> bool {
        matches!(self, TimerKind::WeatherRefresh | TimerKind::WeatherStaleness)
    }
}

/// What a transport task reports about its socket.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed { code: u16, reason: String },
}

#[derive(Debug)]
pub enum Event {
    Timer { kind: TimerKind, generation: u64 },
    /// Tagged with the connection generation that produced it.
    Transport { connection: u64, event: TransportEvent },
    /// Raw `/Sessions` body, tagged with the request sequence number.
    Sessions { seq: u64, result: Result<String, MonitorError> },
    /// First reachable artwork candidate for an item.
    Artwork { item_id: String, url: String },
    Weather(Result<WeatherReport, MonitorError>),
}

//! The socket under a media connection.
//!
//! A [`Transport`] only moves text frames. It reports back through the event
//! channel, tagging everything with the connection generation it was opened
//! for, so events from an abandoned socket can be told apart.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, trace};

use crate::error::MonitorError;
use crate::event::{Event, EventSender, TransportEvent};

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_NO_STATUS: u16 = 1005;
pub const CLOSE_ABNORMAL: u16 = 1006;

pub trait Transport {
    /// Starts connecting to `url`. Completion or failure arrives later as a
    /// [`TransportEvent`] tagged with `connection`.
    fn open(&mut self, url: &str, timeout: Duration, connection: u64, events: EventSender);

    fn send(&mut self, text: String) -> Result<(), MonitorError>;

    /// Closes the socket if there is one. Safe to call repeatedly.
    fn close(&mut self, code: u16, reason: &str);
}

/// WebSocket transport, one background task per connection.
#[derive(Default)]
pub struct WsTransport {
    outbound: Option<mpsc::UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn abandon(&mut self) {
        self.outbound = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self, url: &str, timeout: Duration, connection: u64, events: EventSender) {
        self.abandon();
        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);
        self.task = Some(tokio::spawn(run_socket(
            url.to_string(),
            timeout,
            connection,
            events,
            rx,
        )));
    }

    fn send(&mut self, text: String) -> Result<(), MonitorError> {
        let outbound = self.outbound.as_ref().ok_or(MonitorError::NotOpen)?;
        outbound
            .send(Message::Text(text.into()))
            .map_err(|_| MonitorError::NotOpen)
    }

    fn close(&mut self, code: u16, reason: &str) {
        if let Some(outbound) = self.outbound.take() {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            };
            // The task exits after flushing the close frame; it is left to
            // finish on its own.
            let _ = outbound.send(Message::Close(Some(frame)));
            self.task = None;
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.abandon();
    }
}

async fn run_socket(
    url: String,
    timeout: Duration,
    connection: u64,
    events: EventSender,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    let report = |event: TransportEvent| {
        let _ = events.send(Event::Transport { connection, event });
    };
    let closed = |code: u16, reason: String| TransportEvent::Closed { code, reason };

    let stream = match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            report(closed(CLOSE_ABNORMAL, MonitorError::from(e).to_string()));
            return;
        }
        Err(_) => {
            report(closed(CLOSE_ABNORMAL, MonitorError::ConnectTimeout(timeout).to_string()));
            return;
        }
    };
    report(TransportEvent::Opened);

    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(Message::Close(frame)) => {
                    let _ = sink.send(Message::Close(frame)).await;
                    return;
                }
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        report(closed(CLOSE_ABNORMAL, e.to_string()));
                        return;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    trace!(connection, len = text.len(), "received");
                    report(TransportEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                        .unwrap_or((CLOSE_NO_STATUS, String::new()));
                    debug!(connection, code, %reason, "server closed the socket");
                    report(closed(code, reason));
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    report(closed(CLOSE_ABNORMAL, e.to_string()));
                    return;
                }
                None => {
                    report(closed(CLOSE_ABNORMAL, "stream ended".to_string()));
                    return;
                }
            },
        }
    }
}

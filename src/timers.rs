use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::event::{Event, EventSender, TimerKind};

struct Armed {
    generation: u64,
    repeating: bool,
    handle: JoinHandle<()>,
}

/// At most one timer per kind; arming a kind replaces the old one.
pub struct TimerSet {
    events: EventSender,
    next_generation: u64,
    armed: HashMap<TimerKind, Armed>,
}

impl TimerSet {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            next_generation: 0,
            armed: HashMap::new(),
        }
    }

    pub fn arm_once(&mut self, kind: TimerKind, delay: Duration) {
        self.arm(kind, delay, None);
    }

    /// Fire every `period`, first tick one period from now.
    pub fn arm_every(&mut self, kind: TimerKind, period: Duration) {
        self.arm(kind, period, Some(period));
    }

    fn arm(&mut self, kind: TimerKind, delay: Duration, period: Option<Duration>) {
        self.cancel(kind);
        self.next_generation += 1;
        let generation = self.next_generation;
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if events.send(Event::Timer { kind, generation }).is_err() {
                return;
            }
            let Some(period) = period else {
                return;
            };
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if events.send(Event::Timer { kind, generation }).is_err() {
                    return;
                }
            }
        });
        self.armed.insert(
            kind,
            Armed {
                generation,
                repeating: period.is_some(),
                handle,
            },
        );
    }

    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        match self.armed.remove(&kind) {
            Some(armed) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.handle.abort();
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.armed.contains_key(&kind)
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    /// Rejects ticks from a cancelled or re-armed timer.
    pub fn accept(&mut self, kind: TimerKind, generation: u64) -> bool {
        let (current, repeating) = match self.armed.get(&kind) {
            Some(armed) => (armed.generation == generation, armed.repeating),
            None => return false,
        };
        if current && !repeating {
            self.armed.remove(&kind);
        }
        current
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event;
    use assert_matches::assert_matches;

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_once_and_disarms() {
        let (tx, mut rx) = event::channel();
        let mut timers = TimerSet::new(tx);
        timers.arm_once(TimerKind::Reconnect, Duration::from_millis(500));

        let event = rx.recv().await.unwrap();
        let generation = assert_matches!(event, Event::Timer { kind: TimerKind::Reconnect, generation } => generation);
        assert!(timers.accept(TimerKind::Reconnect, generation));
        assert!(!timers.is_armed(TimerKind::Reconnect));
        assert!(!timers.accept(TimerKind::Reconnect, generation));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_supersedes_queued_ticks() {
        let (tx, mut rx) = event::channel();
        let mut timers = TimerSet::new(tx);
        timers.arm_every(TimerKind::Refresh, Duration::from_millis(100));

        let stale = assert_matches!(rx.recv().await.unwrap(), Event::Timer { generation, .. } => generation);
        timers.arm_every(TimerKind::Refresh, Duration::from_millis(100));
        assert_eq!(timers.armed_count(), 1);
        assert!(!timers.accept(TimerKind::Refresh, stale));

        let fresh = assert_matches!(rx.recv().await.unwrap(), Event::Timer { generation, .. } => generation);
        assert!(timers.accept(TimerKind::Refresh, fresh));
        // repeating timers stay armed after a tick
        assert!(timers.is_armed(TimerKind::Refresh));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_is_idempotent() {
        let (tx, mut rx) = event::channel();
        let mut timers = TimerSet::new(tx);
        timers.arm_every(TimerKind::HealthCheck, Duration::from_secs(30));
        timers.arm_once(TimerKind::Settle, Duration::from_secs(2));
        timers.cancel_all();
        timers.cancel_all();
        assert_eq!(timers.armed_count(), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }
}

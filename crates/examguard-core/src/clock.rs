//! The session countdown.
//!
//! A single monotonic, 1-second-resolution countdown drives expiry of an
//! attempt. The countdown task only emits [`ClockSignal`]s; the owning
//! [`SessionClock`] accepts them and turns them into [`ClockEvent`]s. Every
//! arm bumps a generation so signals left over from a cancelled timer are
//! discarded, and the live timer handle is replaced, never duplicated.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::timer::TimerHandle;

const TICK: Duration = Duration::from_secs(1);

/// Raw output of a countdown task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSignal {
    generation: u64,
    kind: SignalKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalKind {
    Tick { remaining: u64 },
    Expired,
}

/// A clock event that the session should react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    /// One second elapsed.
    Tick { remaining: u64 },
    /// The countdown reached zero. Fires once per arm.
    Expired,
}

/// Countdown owned by a session.
#[derive(Debug)]
pub struct SessionClock {
    tx: mpsc::UnboundedSender<ClockSignal>,
    generation: u64,
    remaining: u64,
    armed: bool,
    expired: bool,
    timer: Option<TimerHandle>,
}

impl SessionClock {
    /// Create an unarmed clock and the receiver its signals arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClockSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let clock = Self {
            tx,
            generation: 0,
            remaining: 0,
            armed: false,
            expired: false,
            timer: None,
        };
        (clock, rx)
    }

    /// Start counting down from `duration_secs`.
    ///
    /// Any live countdown is cancelled first. Arming with zero expires on the
    /// next scheduler turn.
    pub fn arm(&mut self, duration_secs: u64) {
        self.cancel();
        self.generation += 1;
        self.remaining = duration_secs;
        self.armed = true;
        self.expired = false;

        let generation = self.generation;
        let tx = self.tx.clone();
        self.timer = Some(TimerHandle::spawn("session-clock", async move {
            let mut ticker = interval_at(Instant::now() + TICK, TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
            let mut remaining = duration_secs;
            while remaining > 0 {
                ticker.tick().await;
                remaining -= 1;
                let signal = ClockSignal {
                    generation,
                    kind: SignalKind::Tick { remaining },
                };
                if tx.send(signal).is_err() {
                    return;
                }
            }
            let _ = tx.send(ClockSignal {
                generation,
                kind: SignalKind::Expired,
            });
        }));
        tracing::debug!(duration_secs, generation, "clock armed");
    }

    /// Stop ticking and suppress any pending expiry.
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.armed = false;
    }

    /// Accept a signal from the countdown task.
    ///
    /// Returns `None` for signals from a cancelled or superseded timer.
    pub fn accept(&mut self, signal: ClockSignal) -> Option<ClockEvent> {
        if !self.armed || signal.generation != self.generation {
            return None;
        }
        match signal.kind {
            SignalKind::Tick { remaining } => {
                self.remaining = remaining;
                Some(ClockEvent::Tick { remaining })
            }
            SignalKind::Expired => {
                self.remaining = 0;
                self.armed = false;
                self.expired = true;
                self.timer = None;
                Some(ClockEvent::Expired)
            }
        }
    }

    /// Seconds left on the countdown.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }
}

/// Render seconds as `HH:MM:SS`.
pub fn format_remaining(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

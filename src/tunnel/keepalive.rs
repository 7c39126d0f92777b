//! WebSocket keepalive
//!
//! Every interval the session either sends a ping or, when the previous ping
//! was never answered, gives up on the connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// What the session should do on a keepalive tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Send a ping and wait for the pong
    Ping,
    /// The last ping went unanswered; drop the connection
    Terminate,
}

/// Liveness flag driven by ping ticks and pong frames.
///
/// Shared by both directions of a session: the upload side ticks and the
/// download side records pongs.
#[derive(Debug)]
pub struct Heartbeat {
    alive: AtomicBool,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Heartbeat {
            alive: AtomicBool::new(true),
        }
    }
}

impl Heartbeat {
    /// Create a heartbeat that considers the connection alive
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance one interval
    pub fn tick(&self) -> Beat {
        if self.alive.swap(false, Ordering::AcqRel) {
            Beat::Ping
        } else {
            Beat::Terminate
        }
    }

    /// Record a pong from the remote
    pub fn pong(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Whether the last ping has been answered
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// Interval whose first tick fires one full `period` from now
pub fn ping_timer(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

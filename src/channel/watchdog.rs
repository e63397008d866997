// Feedback watchdog
// Note: the channel starts Stale and only turns Active once a valid frame arrives.
// A periodic check flips it back to Stale once the deadline has passed.

use std::time::Duration;

use crate::messages::{ChannelHealth, Stamp};

/// Edge reported by the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Stale -> Active
    Recovered,
    /// Active -> Stale
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct Watchdog {
    timeout: Duration,
    last_feed: Option<Stamp>,
    health: ChannelHealth,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_feed: None,
            health: ChannelHealth::Stale, // Start stale until first feedback
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn health(&self) -> ChannelHealth {
        self.health
    }

    pub fn last_feed(&self) -> Option<Stamp> {
        self.last_feed
    }

    pub fn deadline(&self) -> Option<Stamp> {
        self.last_feed.map(|stamp| stamp + self.timeout)
    }

    /// Record a valid feedback frame received at `now`
    ///
    /// An out-of-order stamp never moves the deadline backwards.
    pub fn feed(&mut self, now: Stamp) -> Option<Transition> {
        self.last_feed = Some(self.last_feed.map_or(now, |last| last.max(now)));
        match self.health {
            ChannelHealth::Stale => {
                self.health = ChannelHealth::Active;
                Some(Transition::Recovered)
            }
            ChannelHealth::Active => None,
        }
    }

    /// Periodic check; the channel stays Active up to and including the deadline
    pub fn check(&mut self, now: Stamp) -> Option<Transition> {
        if self.health != ChannelHealth::Active {
            return None;
        }
        match self.deadline() {
            Some(deadline) if now <= deadline => None,
            _ => {
                self.health = ChannelHealth::Stale;
                Some(Transition::TimedOut)
            }
        }
    }
}

use std::time::{Duration, Instant};

use crate::timing::Timing;
use crate::upstream::Upstream;

/// Whether protocol traffic may be sent this tick
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Gate {
    /// no session, a connection attempt may have been started
    Disconnected,
    /// session exists but the grace period has not elapsed
    Grace,
    /// requests may be sent
    Open,
}

impl Gate {
    pub(crate) fn is_open(self) -> bool {
        self == Gate::Open
    }
}

/// Tracks the upstream session, paces reconnects and enforces the post-connect grace period
#[derive(Clone, Debug)]
pub(crate) struct ConnectionManager {
    reconnect_delay: Duration,
    grace_period: Duration,
    was_connected: bool,
    grace_deadline: Option<Instant>,
    last_attempt: Option<Instant>,
}

impl ConnectionManager {
    pub(crate) fn new(timing: &Timing) -> Self {
        Self {
            reconnect_delay: timing.reconnect_delay,
            grace_period: timing.grace_period,
            was_connected: false,
            grace_deadline: None,
            last_attempt: None,
        }
    }

    /// Drive reconnect attempts and report whether it is safe to send a request now
    pub(crate) fn poll<U: Upstream + ?Sized>(&mut self, now: Instant, upstream: &mut U) -> Gate {
        if !upstream.is_connected() {
            if self.was_connected {
                tracing::warn!("upstream session lost");
                self.was_connected = false;
                self.grace_deadline = None;
            }
            if self.attempt_due(now) {
                self.last_attempt = Some(now);
                tracing::info!("connecting to upstream device");
                upstream.connect();
            }
            return Gate::Disconnected;
        }

        if !self.was_connected {
            self.was_connected = true;
            self.grace_deadline = Some(now + self.grace_period);
            tracing::info!(
                "upstream session established, waiting {:?} before sending requests",
                self.grace_period
            );
        }

        match self.grace_deadline {
            Some(deadline) if now < deadline => Gate::Grace,
            Some(_) => {
                self.grace_deadline = None;
                tracing::info!("grace period elapsed, starting requests");
                Gate::Open
            }
            None => Gate::Open,
        }
    }

    /// Tear down the session and hold off the next attempt for a full reconnect delay
    pub(crate) fn force_disconnect<U: Upstream + ?Sized>(&mut self, now: Instant, upstream: &mut U) {
        tracing::warn!(
            "disconnecting from upstream device, reconnecting in {:?}",
            self.reconnect_delay
        );
        upstream.disconnect();
        self.last_attempt = Some(now);
    }

    fn attempt_due(&self, now: Instant) -> bool {
        match self.last_attempt {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.reconnect_delay,
        }
    }
}

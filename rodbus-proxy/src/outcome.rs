use std::time::Duration;

use crate::timing::Timing;

/// Identifies one upstream transaction
///
/// The upstream echoes the id back in its [`TransactionResult`] so that late answers to an
/// abandoned transaction can be told apart from the one currently in flight.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Wrap a raw id
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Underlying raw value
    pub const fn value(self) -> u64 {
        self.0
    }

    pub(crate) fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Transport-independent classification of a completed transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The device answered the request
    Success,
    /// The device asked the caller to slow down
    DeviceBusy,
    /// No response arrived within the transport's response timeout
    ResponseTimeout,
    /// Any other failure, with a description for the log
    Failed(String),
}

impl Outcome {
    /// True for [`Outcome::Success`]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Hold applied to the next dispatch after this outcome
    pub(crate) fn hold(&self, direction: Direction, timing: &Timing) -> Duration {
        match (self, direction) {
            (Outcome::Success, Direction::Read) => Duration::ZERO,
            (Outcome::Success, Direction::Write) => timing.write_settle,
            (Outcome::DeviceBusy, _) => timing.busy_cooldown,
            (Outcome::ResponseTimeout, _) => timing.timeout_cooldown,
            (Outcome::Failed(_), Direction::Read) => timing.error_cooldown,
            (Outcome::Failed(_), Direction::Write) => timing.reconnect_delay,
        }
    }

    /// Only an unclassified write failure puts the session in doubt
    pub(crate) fn forces_disconnect(&self, direction: Direction) -> bool {
        matches!((self, direction), (Outcome::Failed(_), Direction::Write))
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::DeviceBusy => f.write_str("device busy"),
            Outcome::ResponseTimeout => f.write_str("response timeout"),
            Outcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Result of an upstream transaction as reported by the [`Upstream`](crate::Upstream)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionResult {
    /// Id the transaction was started with
    pub id: TransactionId,
    /// Classified outcome
    pub outcome: Outcome,
    /// Register values of a successful read, empty otherwise
    pub values: Vec<u16>,
}

impl TransactionResult {
    /// Successful read carrying the device's register values
    pub fn read(id: TransactionId, values: Vec<u16>) -> Self {
        Self {
            id,
            outcome: Outcome::Success,
            values,
        }
    }

    /// Successful write
    pub fn written(id: TransactionId) -> Self {
        Self {
            id,
            outcome: Outcome::Success,
            values: Vec::new(),
        }
    }

    /// Transaction that did not succeed
    pub fn failed(id: TransactionId, outcome: Outcome) -> Self {
        Self {
            id,
            outcome,
            values: Vec::new(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

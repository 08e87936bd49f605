use std::time::{Duration, Instant};

use crate::block::{BlockTable, MAX_READ_COUNT};
use crate::outcome::{Direction, TransactionId, TransactionResult};
use crate::queue::{WriteJob, WriteQueue};
use crate::store::RegisterStore;
use crate::timing::Timing;
use crate::upstream::Upstream;

const TX_BUFFER_SIZE: usize = MAX_READ_COUNT as usize;

/// What an in-flight transaction is doing
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Operation {
    /// read of the block at this index of the table
    Read(usize),
    Write(WriteJob),
}

impl Operation {
    pub(crate) fn direction(&self) -> Direction {
        match self {
            Operation::Read(_) => Direction::Read,
            Operation::Write(_) => Direction::Write,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct InFlight {
    pub(crate) id: TransactionId,
    pub(crate) started_at: Instant,
    pub(crate) operation: Operation,
}

/// Result of one scheduler step
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// a transaction is outstanding
    Waiting,
    /// the outstanding transaction timed out and was abandoned
    Abandoned(InFlight),
    /// the pacing interval has not elapsed
    Pacing,
    Dispatched(InFlight),
}

/// Dispatches at most one upstream transaction at a time, writes before reads
#[derive(Clone, Debug)]
pub(crate) struct Scheduler {
    poll_gap: Duration,
    request_timeout: Duration,
    soft_recovery_cooldown: Duration,
    in_flight: Option<InFlight>,
    poll_index: usize,
    /// dispatch is allowed once `poll_gap` has passed since this instant
    anchor: Option<Instant>,
    last_id: TransactionId,
    tx_buffer: [u16; TX_BUFFER_SIZE],
}

impl Scheduler {
    pub(crate) fn new(timing: &Timing) -> Self {
        Self {
            poll_gap: timing.poll_gap,
            request_timeout: timing.request_timeout,
            soft_recovery_cooldown: timing.soft_recovery_cooldown,
            in_flight: None,
            poll_index: 0,
            anchor: None,
            last_id: TransactionId::new(0),
            tx_buffer: [0; TX_BUFFER_SIZE],
        }
    }

    pub(crate) fn in_flight(&self) -> Option<&InFlight> {
        self.in_flight.as_ref()
    }

    pub(crate) fn poll_index(&self) -> usize {
        self.poll_index
    }

    /// Run one step, only called while the connection gate is open
    pub(crate) fn step<S, U>(
        &mut self,
        now: Instant,
        blocks: &BlockTable,
        queue: &mut WriteQueue,
        store: &S,
        upstream: &mut U,
    ) -> Step
    where
        S: RegisterStore + ?Sized,
        U: Upstream + ?Sized,
    {
        if let Some(current) = self.in_flight {
            if now.saturating_duration_since(current.started_at) > self.request_timeout {
                self.in_flight = None;
                self.hold(now, self.soft_recovery_cooldown);
                return Step::Abandoned(current);
            }
            return Step::Waiting;
        }

        if !self.gap_elapsed(now) {
            return Step::Pacing;
        }

        let id = self.last_id.next();
        let operation = match queue.pop() {
            Some(job) => {
                let count = usize::from(job.count).min(TX_BUFFER_SIZE);
                let values = &mut self.tx_buffer[..count];
                for (value, address) in values.iter_mut().zip(job.block().proxy_addresses()) {
                    *value = store.get(address).unwrap_or(0);
                }
                upstream.start_write(id, job.device_start, values);
                Operation::Write(job)
            }
            None => {
                let index = self.poll_index;
                let Some(block) = blocks.get(index) else {
                    // a validated table is never empty
                    self.poll_index = 0;
                    return Step::Pacing;
                };
                upstream.start_read(id, block.device_start, block.count);
                self.poll_index = (index + 1) % blocks.len();
                Operation::Read(index)
            }
        };

        let current = InFlight {
            id,
            started_at: now,
            operation,
        };
        self.last_id = id;
        self.in_flight = Some(current);
        self.anchor = Some(now);
        Step::Dispatched(current)
    }

    /// Claim the in-flight transaction `result` belongs to
    ///
    /// Returns `None` for results of transactions that were already abandoned.
    pub(crate) fn complete(&mut self, result: &TransactionResult) -> Option<InFlight> {
        match self.in_flight {
            Some(current) if current.id == result.id => self.in_flight.take(),
            _ => None,
        }
    }

    /// Postpone the next dispatch until `delay` plus the poll gap have passed
    pub(crate) fn hold(&mut self, now: Instant, delay: Duration) {
        self.anchor = Some(now + delay);
    }

    fn gap_elapsed(&self, now: Instant) -> bool {
        match self.anchor {
            None => true,
            Some(anchor) => match now.checked_duration_since(anchor) {
                Some(elapsed) => elapsed >= self.poll_gap,
                None => false,
            },
        }
    }
}

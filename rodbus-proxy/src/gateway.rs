use std::time::Instant;

use crate::block::{BlockTable, RegisterBlock};
use crate::connection::ConnectionManager;
use crate::outcome::{Outcome, TransactionResult};
use crate::queue::{WriteJob, WriteQueue};
use crate::scheduler::{InFlight, Operation, Scheduler, Step};
use crate::shadow::ShadowRegisters;
use crate::store::RegisterStore;
use crate::timing::Timing;
use crate::upstream::Upstream;

/// Counters describing the gateway's activity since startup
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    /// successful block reads
    pub reads: u64,
    /// successful block writes
    pub writes: u64,
    /// transactions answered with "device busy"
    pub busy: u64,
    /// transactions that ended in a response timeout
    pub timeouts: u64,
    /// transactions that failed for any other reason
    pub failures: u64,
    /// transactions abandoned after the request timeout
    pub soft_recoveries: u64,
    /// results that arrived after their transaction was abandoned
    pub late_results: u64,
    /// sessions torn down after a failed write
    pub forced_disconnects: u64,
    /// write jobs queued by the write-detection scan
    pub queued_writes: u64,
    /// local edits that found the write queue full, counted once per edit however many
    /// ticks it waits for a free slot
    pub queue_full: u64,
}

impl std::fmt::Display for Statistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "reads: {} writes: {} busy: {} timeouts: {} failures: {} soft recoveries: {} late: {} disconnects: {} queued: {} queue full: {}",
            self.reads,
            self.writes,
            self.busy,
            self.timeouts,
            self.failures,
            self.soft_recoveries,
            self.late_results,
            self.forced_disconnects,
            self.queued_writes,
            self.queue_full
        )
    }
}

/// Owned state of the proxy's poll / write-back loop
///
/// The gateway never blocks. Call [`Gateway::tick`] periodically with the current time and
/// the proxy-facing register store. Each tick:
///
/// 1. consumes completed transactions from the upstream
/// 2. drives the connection (reconnects, grace period)
/// 3. if traffic is allowed, dispatches one write job or the next block read
/// 4. scans writable blocks for local edits and queues write jobs
pub struct Gateway<U> {
    upstream: U,
    blocks: BlockTable,
    timing: Timing,
    connection: ConnectionManager,
    scheduler: Scheduler,
    queue: WriteQueue,
    shadow: ShadowRegisters,
    /// blocks whose pending edit was already counted as `queue_full`
    waiting: Vec<u16>,
    stats: Statistics,
}

impl<U: Upstream> Gateway<U> {
    /// Create a gateway, seeding the shadow registers from the current store content
    ///
    /// Seeding avoids forwarding whatever the store holds at startup as if it were a local edit.
    pub fn new<S: RegisterStore + ?Sized>(
        upstream: U,
        blocks: BlockTable,
        timing: Timing,
        store: &S,
    ) -> Self {
        Self {
            upstream,
            connection: ConnectionManager::new(&timing),
            scheduler: Scheduler::new(&timing),
            queue: WriteQueue::new(),
            shadow: ShadowRegisters::seeded(store),
            waiting: Vec::new(),
            stats: Statistics::default(),
            blocks,
            timing,
        }
    }

    /// Run one cooperative step at time `now`
    pub fn tick<S: RegisterStore + ?Sized>(&mut self, now: Instant, store: &mut S) {
        while let Some(result) = self.upstream.poll_result() {
            self.complete(now, result, store);
        }

        if self.connection.poll(now, &mut self.upstream).is_open() {
            let step = self.scheduler.step(
                now,
                &self.blocks,
                &mut self.queue,
                &*store,
                &mut self.upstream,
            );
            self.on_step(step, &*store);
        }

        self.detect_writes(&*store);
    }

    /// Activity counters
    pub fn statistics(&self) -> Statistics {
        self.stats
    }

    /// The configured block table
    pub fn blocks(&self) -> &BlockTable {
        &self.blocks
    }

    /// The upstream collaborator
    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    /// Mutable access to the upstream collaborator
    pub fn upstream_mut(&mut self) -> &mut U {
        &mut self.upstream
    }

    /// True while a transaction is outstanding
    pub fn is_busy(&self) -> bool {
        self.scheduler.in_flight().is_some()
    }

    /// Number of write jobs waiting for dispatch
    pub fn pending_writes(&self) -> usize {
        self.queue.len()
    }

    /// Index of the block that will be read next
    pub fn poll_index(&self) -> usize {
        self.scheduler.poll_index()
    }

    fn on_step<S: RegisterStore + ?Sized>(&mut self, step: Step, store: &S) {
        match step {
            Step::Waiting | Step::Pacing => {}
            Step::Abandoned(current) => {
                self.stats.soft_recoveries += 1;
                tracing::warn!(
                    "{} {} got no answer within {:?}, skipping it without disconnecting",
                    current.operation.direction(),
                    current.id,
                    self.timing.request_timeout
                );
            }
            Step::Dispatched(InFlight {
                id,
                operation: Operation::Read(index),
                ..
            }) => {
                if let Some(block) = self.blocks.get(index) {
                    tracing::debug!(
                        "read {} started: {} registers at device address {}",
                        id,
                        block.count,
                        block.device_start
                    );
                }
            }
            Step::Dispatched(InFlight {
                id,
                operation: Operation::Write(job),
                ..
            }) => {
                // the values being sent are now the baseline for further edits
                self.shadow.adopt(store, &job.block());
                tracing::info!(
                    "write {} started: {} registers at device address {}",
                    id,
                    job.count,
                    job.device_start
                );
            }
        }
    }

    fn complete<S: RegisterStore + ?Sized>(
        &mut self,
        now: Instant,
        result: TransactionResult,
        store: &mut S,
    ) {
        let Some(current) = self.scheduler.complete(&result) else {
            self.stats.late_results += 1;
            tracing::debug!(
                "discarding result of abandoned transaction {}: {}",
                result.id,
                result.outcome
            );
            return;
        };

        let direction = current.operation.direction();
        match (&result.outcome, current.operation) {
            (Outcome::Success, Operation::Read(index)) => {
                self.stats.reads += 1;
                if let Some(block) = self.blocks.get(index).copied() {
                    tracing::debug!("read {} ok: device address {}", result.id, block.device_start);
                    self.mirror(&block, &result.values, store);
                }
            }
            (Outcome::Success, Operation::Write(job)) => {
                self.stats.writes += 1;
                tracing::info!("write {} ok: device address {}", result.id, job.device_start);
            }
            (Outcome::DeviceBusy, operation) => {
                self.stats.busy += 1;
                tracing::info!(
                    "{} {} rejected, device busy at address {}",
                    direction,
                    result.id,
                    self.device_start(operation)
                );
            }
            (Outcome::ResponseTimeout, operation) => {
                self.stats.timeouts += 1;
                tracing::info!(
                    "{} {} timed out at device address {}, keeping the session",
                    direction,
                    result.id,
                    self.device_start(operation)
                );
            }
            (Outcome::Failed(reason), operation) => {
                self.stats.failures += 1;
                tracing::warn!(
                    "{} {} failed at device address {}: {}",
                    direction,
                    result.id,
                    self.device_start(operation),
                    reason
                );
            }
        }

        if result.outcome.forces_disconnect(direction) {
            self.stats.forced_disconnects += 1;
            self.connection.force_disconnect(now, &mut self.upstream);
        }

        self.scheduler
            .hold(now, result.outcome.hold(direction, &self.timing));
    }

    fn device_start(&self, operation: Operation) -> u16 {
        match operation {
            Operation::Read(index) => self.blocks.get(index).map_or(0, |b| b.device_start),
            Operation::Write(job) => job.device_start,
        }
    }

    /// Copy device values into the store and make them the new shadow baseline
    ///
    /// Writable blocks keep local edits that are queued or not yet detected.
    fn mirror<S: RegisterStore + ?Sized>(
        &mut self,
        block: &RegisterBlock,
        values: &[u16],
        store: &mut S,
    ) {
        if values.len() != usize::from(block.count) {
            tracing::warn!(
                "device returned {} registers for a block of {} at address {}",
                values.len(),
                block.count,
                block.device_start
            );
        }

        if block.writable && self.queue.contains(block.proxy_start) {
            tracing::debug!(
                "write to block {} pending, not mirroring device values",
                block.proxy_start
            );
            return;
        }

        for (address, value) in block.proxy_addresses().zip(values.iter().copied()) {
            if block.writable && self.shadow.differs(store, address) {
                continue;
            }
            if store.set(address, value) {
                self.shadow.set(address, value);
            }
        }
    }

    fn detect_writes<S: RegisterStore + ?Sized>(&mut self, store: &S) {
        for block in self.blocks.iter().filter(|b| b.writable) {
            if !self.shadow.is_dirty(store, block) {
                self.waiting.retain(|x| *x != block.proxy_start);
                continue;
            }

            if self.queue.enqueue(WriteJob::from(block)) {
                self.waiting.retain(|x| *x != block.proxy_start);
                self.shadow.adopt(store, block);
                self.stats.queued_writes += 1;
                tracing::info!(
                    "local edit in block {} queued for device address {}",
                    block.proxy_start,
                    block.device_start
                );
            } else if !self.queue.contains(block.proxy_start)
                && !self.waiting.contains(&block.proxy_start)
            {
                self.waiting.push(block.proxy_start);
                self.stats.queue_full += 1;
                tracing::debug!(
                    "write queue full, edit in block {} retried next tick",
                    block.proxy_start
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mock::{MockUpstream, Request};
    use crate::outcome::TransactionId;
    use crate::store::HoldingRegisters;

    struct Harness {
        gateway: Gateway<MockUpstream>,
        store: HoldingRegisters,
        now: Instant,
    }

    impl Harness {
        fn new(blocks: Vec<RegisterBlock>) -> Self {
            let store = HoldingRegisters::new(220);
            let table = BlockTable::new(blocks, store.size()).unwrap();
            let gateway = Gateway::new(
                MockUpstream::reachable(),
                table,
                Timing::default(),
                &store,
            );
            Self {
                gateway,
                store,
                now: Instant::now(),
            }
        }

        fn two_blocks() -> Self {
            Self::new(vec![
                RegisterBlock::read_only(0, 32064, 2),
                RegisterBlock::writable(10, 47075, 1),
            ])
        }

        /// connect and wait out the grace period, the first read is dispatched on return
        fn connected(blocks: Vec<RegisterBlock>) -> Self {
            let mut harness = Self::new(blocks);
            harness.tick();
            harness.advance(1);
            harness.advance(5000);
            assert!(harness.gateway.is_busy());
            harness
        }

        fn tick(&mut self) {
            self.gateway.tick(self.now, &mut self.store);
        }

        fn advance(&mut self, millis: u64) {
            self.now += Duration::from_millis(millis);
            self.tick();
        }

        fn mock(&mut self) -> &mut MockUpstream {
            self.gateway.upstream_mut()
        }

        fn pending(&self) -> Option<Request> {
            self.gateway.upstream().pending().cloned()
        }

        fn requests(&self) -> usize {
            self.gateway.upstream().requests.len()
        }
    }

    #[test]
    fn waits_for_grace_period_before_first_request() {
        let mut harness = Harness::two_blocks();
        harness.tick();
        assert_eq!(harness.gateway.upstream().connects, 1);

        harness.advance(1);
        harness.advance(4999);
        assert_eq!(harness.requests(), 0);

        harness.advance(1);
        assert_eq!(
            harness.pending(),
            Some(Request::Read {
                id: TransactionId::new(1),
                device_start: 32064,
                count: 2,
            })
        );
    }

    #[test]
    fn read_success_mirrors_exactly_the_block() {
        let mut harness = Harness::connected(vec![
            RegisterBlock::read_only(4, 32064, 3),
            RegisterBlock::read_only(20, 32016, 1),
        ]);
        harness.store.set(3, 0xAAAA);
        harness.store.set(7, 0xBBBB);

        harness.mock().answer(&[1, 2, 3]);
        harness.advance(1);

        assert_eq!(&harness.store.as_slice()[3..8], &[0xAAAA, 1, 2, 3, 0xBBBB]);
        assert_eq!(harness.gateway.statistics().reads, 1);
        assert!(!harness.gateway.is_busy());
    }

    #[test]
    fn polls_blocks_in_table_order_and_wraps() {
        let blocks = vec![
            RegisterBlock::read_only(0, 32064, 2),
            RegisterBlock::read_only(30, 32016, 6),
            RegisterBlock::read_only(40, 37119, 6),
        ];
        let mut harness = Harness::connected(blocks);

        let mut starts = Vec::new();
        for _ in 0..4 {
            match harness.pending() {
                Some(Request::Read {
                    device_start,
                    count,
                    ..
                }) => {
                    starts.push(device_start);
                    harness.mock().answer(&vec![0; usize::from(count)]);
                }
                other => panic!("expected a read, got {other:?}"),
            }
            harness.advance(1);
            harness.advance(2000);
        }

        assert_eq!(starts, vec![32064, 32016, 37119, 32064]);
    }

    #[test]
    fn local_edit_is_queued_once_and_shadowed() {
        let mut harness = Harness::two_blocks();
        harness.store.set(10, 1234);
        harness.tick();

        assert_eq!(harness.gateway.pending_writes(), 1);
        assert_eq!(harness.gateway.shadow.get(10), Some(1234));
        assert!(harness.gateway.queue.contains(10));

        // a second edit before dispatch does not create another job
        harness.store.set(10, 4321);
        harness.advance(1);
        assert_eq!(harness.gateway.pending_writes(), 1);
        assert_eq!(harness.gateway.statistics().queued_writes, 1);
    }

    #[test]
    fn write_sends_latest_values_at_dispatch() {
        let mut harness = Harness::new(vec![
            RegisterBlock::read_only(0, 32064, 2),
            RegisterBlock::writable(170, 47247, 2),
        ]);
        harness.store.set(170, 1);
        harness.tick();
        harness.store.set(171, 2);
        harness.store.set(170, 3);
        harness.advance(1);
        assert_eq!(harness.gateway.pending_writes(), 1);

        harness.advance(5000);
        match harness.pending() {
            Some(Request::Write {
                device_start,
                values,
                ..
            }) => {
                assert_eq!(device_start, 47247);
                assert_eq!(values, vec![3, 2]);
            }
            other => panic!("expected a write, got {other:?}"),
        }
        assert_eq!(harness.gateway.pending_writes(), 0);
        // the read cursor is untouched by writes
        assert_eq!(harness.gateway.poll_index(), 0);

        // the values sent are the baseline, nothing is queued again
        harness.mock().answer(&[]);
        harness.advance(1);
        assert_eq!(harness.gateway.pending_writes(), 0);
        assert_eq!(harness.gateway.statistics().writes, 1);
    }

    #[test]
    fn device_busy_holds_next_dispatch() {
        let mut harness = Harness::connected(vec![RegisterBlock::read_only(0, 32064, 2)]);
        harness.mock().fail(Outcome::DeviceBusy);
        harness.advance(1);

        harness.advance(3999);
        harness.advance(1000);
        assert_eq!(harness.requests(), 1);

        harness.advance(1001);
        assert_eq!(harness.requests(), 2);
        assert_eq!(harness.gateway.statistics().busy, 1);
    }

    #[test]
    fn response_timeout_holds_next_dispatch_without_disconnect() {
        let mut harness = Harness::connected(vec![RegisterBlock::read_only(0, 32064, 2)]);
        harness.mock().fail(Outcome::ResponseTimeout);
        harness.advance(1);

        harness.advance(2999);
        assert_eq!(harness.requests(), 1);

        harness.advance(2001);
        assert_eq!(harness.requests(), 2);
        assert_eq!(harness.gateway.upstream().disconnects, 0);
    }

    #[test]
    fn failed_write_forces_one_disconnect() {
        let mut harness = Harness::new(vec![
            RegisterBlock::read_only(0, 32064, 2),
            RegisterBlock::read_only(2, 32016, 2),
            RegisterBlock::writable(10, 47075, 1),
        ]);
        harness.tick();
        harness.advance(1);
        harness.advance(5000);
        harness.mock().answer(&[5, 6]);
        harness.advance(1);
        assert_eq!(harness.gateway.poll_index(), 1);

        harness.store.set(10, 99);
        harness.tick();
        assert_eq!(harness.gateway.pending_writes(), 1);
        harness.advance(2000);
        assert!(matches!(harness.pending(), Some(Request::Write { .. })));

        harness
            .mock()
            .fail(Outcome::Failed("illegal data address".to_string()));
        harness.advance(1);
        assert_eq!(harness.gateway.upstream().disconnects, 1);
        assert_eq!(harness.gateway.statistics().forced_disconnects, 1);
        assert_eq!(harness.gateway.poll_index(), 1);

        // no reconnect before the full reconnect delay
        harness.advance(9000);
        assert_eq!(harness.gateway.upstream().connects, 1);
        harness.advance(1000);
        assert_eq!(harness.gateway.upstream().connects, 2);
        assert_eq!(harness.gateway.upstream().disconnects, 1);
    }

    #[test]
    fn failed_read_keeps_session() {
        let mut harness = Harness::connected(vec![RegisterBlock::read_only(0, 32064, 2)]);
        harness.mock().fail(Outcome::Failed("bad frame".to_string()));
        harness.advance(1);
        assert_eq!(harness.gateway.upstream().disconnects, 0);

        harness.advance(6998);
        assert_eq!(harness.requests(), 1);
        harness.advance(2);
        assert_eq!(harness.requests(), 2);
    }

    #[test]
    fn stuck_request_is_abandoned_and_late_answer_ignored() {
        let mut harness = Harness::connected(vec![RegisterBlock::read_only(0, 32064, 2)]);
        let stuck = harness.mock().abandon().unwrap();

        harness.advance(10_000);
        assert!(harness.gateway.is_busy());
        harness.advance(1);
        assert!(!harness.gateway.is_busy());
        assert_eq!(harness.gateway.upstream().disconnects, 0);
        assert_eq!(harness.gateway.statistics().soft_recoveries, 1);

        // cooldown of 5 s plus the gap
        harness.advance(6999);
        assert_eq!(harness.requests(), 1);
        harness.advance(1);
        assert_eq!(harness.requests(), 2);

        // the answer to the first read shows up while the second is in flight
        harness
            .mock()
            .push_result(TransactionResult::read(stuck.id(), vec![7, 7]));
        harness.advance(1);
        assert!(harness.gateway.is_busy());
        assert_eq!(&harness.store.as_slice()[0..2], &[0, 0]);
        assert_eq!(harness.gateway.statistics().late_results, 1);
    }

    #[test]
    fn mirrored_values_are_not_written_back() {
        let mut harness = Harness::connected(vec![RegisterBlock::writable(10, 47075, 2)]);
        harness.mock().answer(&[50, 60]);
        harness.advance(1);

        assert_eq!(&harness.store.as_slice()[10..12], &[50, 60]);
        assert_eq!(harness.gateway.pending_writes(), 0);
    }

    #[test]
    fn read_does_not_overwrite_pending_local_edit() {
        let mut harness = Harness::connected(vec![
            RegisterBlock::writable(10, 47075, 2),
            RegisterBlock::read_only(0, 32064, 2),
        ]);
        // a local client writes while the read of the same block is in flight
        harness.store.set(10, 1);
        harness.mock().answer(&[50, 60]);
        harness.advance(1);

        // only the edited address keeps its local value
        assert_eq!(&harness.store.as_slice()[10..12], &[1, 60]);
        assert_eq!(harness.gateway.pending_writes(), 1);

        harness.advance(2000);
        match harness.pending() {
            Some(Request::Write { values, .. }) => assert_eq!(values, vec![1, 60]),
            other => panic!("expected a write, got {other:?}"),
        }
    }

    #[test]
    fn edits_are_detected_while_disconnected() {
        let mut harness = Harness::two_blocks();
        harness.mock().reachable = false;
        harness.tick();
        harness.store.set(10, 7);
        harness.advance(1);

        assert!(!harness.gateway.upstream().connected);
        assert_eq!(harness.gateway.pending_writes(), 1);
    }

    #[test]
    fn full_queue_retries_edit_on_a_later_tick() {
        let blocks = (0..9u16)
            .map(|i| RegisterBlock::writable(i * 10, 47000 + i * 10, 1))
            .collect();
        let mut harness = Harness::new(blocks);
        harness.mock().reachable = false;
        for i in 0..9u16 {
            harness.store.set(i * 10, 1);
        }
        harness.tick();
        assert_eq!(harness.gateway.pending_writes(), 8);
        assert_eq!(harness.gateway.statistics().queue_full, 1);
        // the ninth edit was not adopted
        assert_eq!(harness.gateway.shadow.get(80), Some(0));

        // waiting for a slot does not count the same edit again
        for _ in 0..5 {
            harness.advance(1);
        }
        assert_eq!(harness.gateway.statistics().queue_full, 1);

        // once a slot frees up the edit is picked up
        harness.gateway.queue.pop();
        harness.advance(1);
        assert!(harness.gateway.queue.contains(80));
        assert_eq!(harness.gateway.shadow.get(80), Some(1));
        assert_eq!(harness.gateway.statistics().queue_full, 1);

        // a new edit in the block that was popped finds the queue full again
        harness.store.set(0, 2);
        harness.advance(1);
        assert_eq!(harness.gateway.statistics().queue_full, 2);
    }

    #[test]
    fn at_most_one_transaction_in_flight_under_load() {
        let mut harness = Harness::connected(vec![
            RegisterBlock::read_only(0, 32064, 2),
            RegisterBlock::writable(10, 47075, 1),
            RegisterBlock::writable(20, 47087, 1),
        ]);

        // the mock panics on a second concurrent dispatch
        for i in 0..200u16 {
            harness.store.set(10, i);
            harness.store.set(20, i / 2);
            match i % 4 {
                0 => {
                    if let Some(Request::Read { count, .. }) = harness.pending() {
                        harness.mock().answer(&vec![i; usize::from(count)]);
                    } else if harness.pending().is_some() {
                        harness.mock().answer(&[]);
                    }
                }
                1 => {
                    if harness.pending().is_some() {
                        harness.mock().fail(Outcome::DeviceBusy);
                    }
                }
                _ => {}
            }
            harness.advance(700);
        }

        assert!(harness.requests() > 10);
    }
}

use std::collections::VecDeque;

use crate::outcome::{Outcome, TransactionId, TransactionResult};
use crate::upstream::Upstream;

/// Request observed by the mock upstream
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Request {
    Read {
        id: TransactionId,
        device_start: u16,
        count: u16,
    },
    Write {
        id: TransactionId,
        device_start: u16,
        values: Vec<u16>,
    },
}

impl Request {
    pub(crate) fn id(&self) -> TransactionId {
        match self {
            Request::Read { id, .. } => *id,
            Request::Write { id, .. } => *id,
        }
    }
}

/// Upstream that records requests and lets the test decide when and how they complete
///
/// Panics if a transaction is started while another one is still pending.
#[derive(Debug, Default)]
pub(crate) struct MockUpstream {
    /// accept connection attempts immediately
    pub(crate) reachable: bool,
    pub(crate) connected: bool,
    pub(crate) connects: usize,
    pub(crate) disconnects: usize,
    pub(crate) requests: Vec<Request>,
    pending: Option<Request>,
    results: VecDeque<TransactionResult>,
}

impl MockUpstream {
    pub(crate) fn reachable() -> Self {
        Self {
            reachable: true,
            ..Self::default()
        }
    }

    pub(crate) fn pending(&self) -> Option<&Request> {
        self.pending.as_ref()
    }

    /// Forget the pending request without answering it, as a device that never responds
    pub(crate) fn abandon(&mut self) -> Option<Request> {
        self.pending.take()
    }

    /// Answer the pending read with `values`
    pub(crate) fn answer(&mut self, values: &[u16]) {
        let request = self.pending.take().expect("no pending request");
        let result = match request {
            Request::Read { id, .. } => TransactionResult::read(id, values.to_vec()),
            Request::Write { id, .. } => TransactionResult::written(id),
        };
        self.results.push_back(result);
    }

    /// Complete the pending request with a failure
    pub(crate) fn fail(&mut self, outcome: Outcome) {
        let request = self.pending.take().expect("no pending request");
        self.results
            .push_back(TransactionResult::failed(request.id(), outcome));
    }

    /// Queue an arbitrary result, e.g. a late answer to an abandoned request
    pub(crate) fn push_result(&mut self, result: TransactionResult) {
        self.results.push_back(result);
    }

    pub(crate) fn drop_session(&mut self) {
        self.connected = false;
    }

    fn begin(&mut self, request: Request) {
        assert!(
            self.pending.is_none(),
            "{request:?} started while {:?} is in flight",
            self.pending
        );
        self.requests.push(request.clone());
        self.pending = Some(request);
    }
}

impl Upstream for MockUpstream {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connect(&mut self) {
        self.connects += 1;
        if self.reachable {
            self.connected = true;
        }
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
        self.connected = false;
    }

    fn start_read(&mut self, id: TransactionId, device_start: u16, count: u16) {
        self.begin(Request::Read {
            id,
            device_start,
            count,
        });
    }

    fn start_write(&mut self, id: TransactionId, device_start: u16, values: &[u16]) {
        self.begin(Request::Write {
            id,
            device_start,
            values: values.to_vec(),
        });
    }

    fn poll_result(&mut self) -> Option<TransactionResult> {
        self.results.pop_front()
    }
}

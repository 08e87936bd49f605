use crate::block::RegisterBlock;

/// Number of write jobs that can be pending at once
pub(crate) const WRITE_QUEUE_CAPACITY: usize = 8;

/// A dirty writable block waiting to be written to the device
///
/// The job only identifies the block. Values are read from the register store when the
/// job is dispatched, so edits made while it waits are part of the same write.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct WriteJob {
    pub(crate) proxy_start: u16,
    pub(crate) device_start: u16,
    pub(crate) count: u16,
}

impl From<&RegisterBlock> for WriteJob {
    fn from(block: &RegisterBlock) -> Self {
        Self {
            proxy_start: block.proxy_start,
            device_start: block.device_start,
            count: block.count,
        }
    }
}

impl WriteJob {
    pub(crate) fn block(&self) -> RegisterBlock {
        RegisterBlock::writable(self.proxy_start, self.device_start, self.count)
    }
}

/// Fixed pool of write job slots with at most one job per block
#[derive(Clone, Debug, Default)]
pub(crate) struct WriteQueue {
    slots: [Option<WriteJob>; WRITE_QUEUE_CAPACITY],
}

impl WriteQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a job unless one for the same block is already queued or every slot is taken
    pub(crate) fn enqueue(&mut self, job: WriteJob) -> bool {
        if self.contains(job.proxy_start) {
            return false;
        }

        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(job);
                true
            }
            None => false,
        }
    }

    /// Remove the job in the first occupied slot
    pub(crate) fn pop(&mut self) -> Option<WriteJob> {
        self.slots.iter_mut().find_map(Option::take)
    }

    pub(crate) fn contains(&self, proxy_start: u16) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|job| job.proxy_start == proxy_start)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

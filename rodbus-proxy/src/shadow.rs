use crate::block::RegisterBlock;
use crate::store::RegisterStore;

/// Last value the gateway acted upon for every proxy address
///
/// A value is "acted upon" when it was mirrored from the device or when the block it belongs
/// to was queued for, or dispatched as, an upstream write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ShadowRegisters {
    values: Vec<u16>,
}

impl ShadowRegisters {
    /// Snapshot the current content of `store`
    pub(crate) fn seeded<S: RegisterStore + ?Sized>(store: &S) -> Self {
        let values = (0..store.size())
            .map(|i| {
                u16::try_from(i)
                    .ok()
                    .and_then(|address| store.get(address))
                    .unwrap_or(0)
            })
            .collect();
        Self { values }
    }

    pub(crate) fn get(&self, address: u16) -> Option<u16> {
        self.values.get(usize::from(address)).copied()
    }

    pub(crate) fn set(&mut self, address: u16, value: u16) {
        if let Some(x) = self.values.get_mut(usize::from(address)) {
            *x = value;
        }
    }

    /// True if the store holds a value at `address` the gateway has not acted upon yet
    pub(crate) fn differs<S: RegisterStore + ?Sized>(&self, store: &S, address: u16) -> bool {
        match (store.get(address), self.get(address)) {
            (Some(current), Some(shadow)) => current != shadow,
            _ => false,
        }
    }

    /// True if any address of the block differs from its shadow value
    pub(crate) fn is_dirty<S: RegisterStore + ?Sized>(
        &self,
        store: &S,
        block: &RegisterBlock,
    ) -> bool {
        block
            .proxy_addresses()
            .any(|address| self.differs(store, address))
    }

    /// Copy the block's current store values into the shadow
    pub(crate) fn adopt<S: RegisterStore + ?Sized>(&mut self, store: &S, block: &RegisterBlock) {
        for address in block.proxy_addresses() {
            if let Some(value) = store.get(address) {
                self.set(address, value);
            }
        }
    }
}

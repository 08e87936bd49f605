/// Proxy-facing register map read and written by local clients
///
/// The gateway mirrors device data into the store and detects local edits by comparing it
/// against its shadow copy. Local clients may change any value between two ticks.
pub trait RegisterStore {
    /// Value of the register at `address`, `None` if the address is outside the store
    fn get(&self, address: u16) -> Option<u16>;

    /// Set the register at `address`, returns false if the address is outside the store
    fn set(&mut self, address: u16, value: u16) -> bool;

    /// Number of registers, addresses `0..size()` are valid
    fn size(&self) -> usize;
}

/// Fixed-size in-memory table of holding registers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HoldingRegisters {
    values: Vec<u16>,
}

impl HoldingRegisters {
    /// Create `size` registers initialized to zero
    pub fn new(size: usize) -> Self {
        Self {
            values: vec![0; size],
        }
    }

    /// All register values in address order
    pub fn as_slice(&self) -> &[u16] {
        self.values.as_slice()
    }

    /// Mutable view of all register values
    pub fn as_mut_slice(&mut self) -> &mut [u16] {
        self.values.as_mut_slice()
    }
}

impl RegisterStore for HoldingRegisters {
    fn get(&self, address: u16) -> Option<u16> {
        self.values.get(usize::from(address)).copied()
    }

    fn set(&mut self, address: u16, value: u16) -> bool {
        match self.values.get_mut(usize::from(address)) {
            Some(x) => {
                *x = value;
                true
            }
            None => false,
        }
    }

    fn size(&self) -> usize {
        self.values.len()
    }
}

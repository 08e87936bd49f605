use serde::{Deserialize, Serialize};

/// Maximum count allowed in a read holding registers request
pub const MAX_READ_COUNT: u16 = 0x007D;
/// Maximum count allowed in a write multiple registers request
pub const MAX_WRITE_COUNT: u16 = 0x007B;

/// A contiguous range of proxy registers mirrored from a contiguous range of device registers
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterBlock {
    /// First register of the block in the proxy's address space
    pub proxy_start: u16,
    /// First register of the block on the upstream device
    pub device_start: u16,
    /// Number of registers in the block
    pub count: u16,
    /// Local edits to writable blocks are forwarded to the device
    #[serde(default)]
    pub writable: bool,
}

/// Errors detected while validating a block table
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    /// The table does not contain any block
    #[error("the block table is empty")]
    Empty,
    /// A block has a count of zero
    #[error("block at proxy address {0} has a count of zero")]
    ZeroCount(u16),
    /// A block is larger than a single request allows
    #[error("block at proxy address {proxy_start} has {count} registers, at most {max} allowed")]
    TooLarge {
        /// proxy address of the block
        proxy_start: u16,
        /// configured count
        count: u16,
        /// maximum count for this kind of block
        max: u16,
    },
    /// The device range runs past the end of the address space
    #[error("block at device address {device_start} with count {count} exceeds the address space")]
    DeviceOverflow {
        /// device address of the block
        device_start: u16,
        /// configured count
        count: u16,
    },
    /// The proxy range does not fit into the register store
    #[error("block at proxy address {proxy_start} with count {count} does not fit into {size} registers")]
    OutOfStore {
        /// proxy address of the block
        proxy_start: u16,
        /// configured count
        count: u16,
        /// size of the register store
        size: usize,
    },
    /// Two blocks share proxy addresses
    #[error("blocks at proxy addresses {0} and {1} overlap")]
    Overlap(u16, u16),
}

impl RegisterBlock {
    /// Create a read-only block
    pub const fn read_only(proxy_start: u16, device_start: u16, count: u16) -> Self {
        Self {
            proxy_start,
            device_start,
            count,
            writable: false,
        }
    }

    /// Create a block whose local edits are written back to the device
    pub const fn writable(proxy_start: u16, device_start: u16, count: u16) -> Self {
        Self {
            proxy_start,
            device_start,
            count,
            writable: true,
        }
    }

    /// One past the last proxy address of the block
    pub fn proxy_end(&self) -> usize {
        usize::from(self.proxy_start) + usize::from(self.count)
    }

    /// Iterate over the proxy addresses covered by the block
    pub fn proxy_addresses(&self) -> impl Iterator<Item = u16> {
        let start = self.proxy_start;
        (0..self.count).map(move |offset| start.wrapping_add(offset))
    }

    /// True if `address` is part of the block's proxy range
    pub fn contains(&self, address: u16) -> bool {
        address >= self.proxy_start && usize::from(address) < self.proxy_end()
    }

    fn overlaps(&self, other: &RegisterBlock) -> bool {
        usize::from(self.proxy_start) < other.proxy_end()
            && usize::from(other.proxy_start) < self.proxy_end()
    }

    fn validate(&self, store_size: usize) -> Result<(), BlockError> {
        if self.count == 0 {
            return Err(BlockError::ZeroCount(self.proxy_start));
        }

        let max = if self.writable {
            MAX_WRITE_COUNT
        } else {
            MAX_READ_COUNT
        };
        if self.count > max {
            return Err(BlockError::TooLarge {
                proxy_start: self.proxy_start,
                count: self.count,
                max,
            });
        }

        if usize::from(self.device_start) + usize::from(self.count) > usize::from(u16::MAX) + 1 {
            return Err(BlockError::DeviceOverflow {
                device_start: self.device_start,
                count: self.count,
            });
        }

        if self.proxy_end() > store_size {
            return Err(BlockError::OutOfStore {
                proxy_start: self.proxy_start,
                count: self.count,
                size: store_size,
            });
        }

        Ok(())
    }
}

/// Validated, immutable table of register blocks
///
/// Blocks are polled in table order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockTable {
    blocks: Vec<RegisterBlock>,
}

impl BlockTable {
    /// Validate `blocks` against a register store of `store_size` registers
    pub fn new(blocks: Vec<RegisterBlock>, store_size: usize) -> Result<Self, BlockError> {
        if blocks.is_empty() {
            return Err(BlockError::Empty);
        }

        for (i, block) in blocks.iter().enumerate() {
            block.validate(store_size)?;
            if let Some(other) = blocks[..i].iter().find(|other| other.overlaps(block)) {
                return Err(BlockError::Overlap(other.proxy_start, block.proxy_start));
            }
        }

        Ok(Self { blocks })
    }

    /// Block at `index` in table order
    pub fn get(&self, index: usize) -> Option<&RegisterBlock> {
        self.blocks.get(index)
    }

    /// Number of blocks in the table
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// A validated table is never empty, provided for completeness
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Iterate over the blocks in table order
    pub fn iter(&self) -> std::slice::Iter<'_, RegisterBlock> {
        self.blocks.iter()
    }

    /// Find the block starting at `proxy_start`
    pub fn find(&self, proxy_start: u16) -> Option<&RegisterBlock> {
        self.blocks.iter().find(|b| b.proxy_start == proxy_start)
    }
}

impl<'a> IntoIterator for &'a BlockTable {
    type Item = &'a RegisterBlock;
    type IntoIter = std::slice::Iter<'a, RegisterBlock>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.iter()
    }
}

/// Block table of a Huawei SUN2000 inverter behind its SDongle
///
/// Used when the configuration does not list any blocks. The last two blocks hold the
/// battery charge settings and are writable.
pub fn sun2000_blocks() -> Vec<RegisterBlock> {
    vec![
        RegisterBlock::read_only(0, 32064, 22),
        RegisterBlock::read_only(30, 32016, 6),
        RegisterBlock::read_only(40, 37119, 6),
        RegisterBlock::read_only(60, 32114, 6),
        RegisterBlock::read_only(70, 32106, 2),
        RegisterBlock::read_only(80, 37001, 2),
        RegisterBlock::read_only(90, 37004, 2),
        RegisterBlock::read_only(100, 37066, 4),
        RegisterBlock::read_only(110, 37113, 2),
        RegisterBlock::read_only(120, 37015, 4),
        RegisterBlock::writable(170, 47247, 2),
        RegisterBlock::writable(180, 47075, 2),
    ]
}

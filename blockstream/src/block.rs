//! Block descriptors and transfer input.

use bytes::Bytes;

/// One remote-addressable unit of a larger file's content.
///
/// The `index` defines the block's position in the reassembled output;
/// indices start at 1, are unique, and may be sparse. The `locator` is
/// an opaque remote reference handed to the transport unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDescriptor {
    /// Position in the reassembled output (≥ 1, unique).
    pub index: u64,
    /// Opaque remote reference (typically a URL).
    pub locator: String,
}

impl BlockDescriptor {
    /// Creates a block descriptor.
    pub fn new(index: u64, locator: impl Into<String>) -> Self {
        Self {
            index,
            locator: locator.into(),
        }
    }
}

/// Input to a transfer session.
///
/// Either a set of blocks to fetch, reassemble and deliver in index
/// order, or buffers already in memory that are written to the sink
/// directly (no scheduler, transport or transform involvement).
#[derive(Debug, Clone)]
pub enum BlockSource {
    /// Blocks to fetch from the transport.
    Blocks(Vec<BlockDescriptor>),
    /// Preloaded buffers, written to the sink in the given order.
    Preloaded(Vec<Bytes>),
}

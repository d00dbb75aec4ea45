use crate::block::Block;
use crate::wantlist::WantEntry;

/// A bitswap-style protocol message: either a full want-list snapshot or an
/// incremental delta, plus zero or more blocks.
///
/// Serialization to and from the wire is out of scope here. This is the
/// in-memory contract the [`crate::network::Network`] trait carries
/// between orchestrators.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub full: bool,
    pub entries: Vec<WantEntry>,
    pub blocks: Vec<Block>,
}

impl Message {
    pub fn new_full(entries: Vec<WantEntry>) -> Self {
        Self {
            full: true,
            entries,
            blocks: Vec::new(),
        }
    }

    pub fn new_delta(entries: Vec<WantEntry>) -> Self {
        Self {
            full: false,
            entries,
            blocks: Vec::new(),
        }
    }

    pub fn with_blocks(blocks: Vec<Block>) -> Self {
        Self {
            full: false,
            entries: Vec::new(),
            blocks,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.blocks.is_empty()
    }
}

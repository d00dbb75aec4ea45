use async_trait::async_trait;

use crate::block::{Block, BlockKey};
use crate::error::BlockstoreError;

/// The local content-addressed byte store. Specified only as an interface
/// here. Persistence, validation of `key == hash(data)`, and on-disk format
/// are all the blockstore implementation's concern, not this crate's.
#[async_trait]
pub trait Blockstore: Send + Sync {
    async fn has(&self, key: &BlockKey) -> Result<bool, BlockstoreError>;
    async fn get(&self, key: &BlockKey) -> Result<Block, BlockstoreError>;
    /// Idempotent with respect to key: putting the same key twice leaves
    /// the store in the same state.
    async fn put(&self, block: Block) -> Result<(), BlockstoreError>;
}

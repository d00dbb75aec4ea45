use thiserror::Error;

use crate::block::BlockKey;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure modes surfaced by the blockstore collaborator.
#[derive(Debug, Error)]
pub enum BlockstoreError {
    #[error("block {0} not found")]
    NotFound(BlockKey),
    #[error("blockstore error: {0}")]
    Other(#[source] BoxError),
}

/// Failure modes surfaced by the network collaborator.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("peer is unknown to the network layer")]
    UnknownPeer,
    #[error("send failed: {0}")]
    SendFailed(#[source] BoxError),
}

/// Errors raised to callers of the orchestrator's public API.
#[derive(Debug, Error)]
pub enum BitswapError {
    #[error("manual unwant: {0}")]
    ManualUnwant(String),
    #[error("blockstore error: {0}")]
    Blockstore(#[from] BlockstoreError),
    #[error("orchestrator is shutting down")]
    Closing,
}

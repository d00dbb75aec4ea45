//! Transport-agnostic core of a content-addressed block exchange protocol:
//! a want manager, a decision engine, and the session orchestrator that
//! ties them together behind a `get`/`receiveMessage`/`hasBlock` surface.
//!
//! Wire encoding, peer discovery, and dialing are out of scope; see
//! [`Network`] and [`Blockstore`] for the two collaborator interfaces an
//! embedder implements.

pub mod block;
pub mod blockstore;
pub mod decision;
pub mod error;
pub mod ledger;
pub mod message;
pub mod network;
pub mod notify;
pub mod orchestrator;
pub mod peer;
pub mod retry;
pub mod stat;
pub mod want_manager;
pub mod wantlist;

pub use block::{Block, BlockKey};
pub use blockstore::Blockstore;
pub use decision::{DecisionEngine, Task};
pub use error::{BitswapError, BlockstoreError, NetworkError};
pub use ledger::Ledger;
pub use message::Message;
pub use network::Network;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use peer::PeerId;
pub use retry::RetryPolicy;
pub use stat::{PeerStat, Stat};
pub use want_manager::WantManager;
pub use wantlist::{WantEntry, WantList, DEFAULT_PRIORITY};

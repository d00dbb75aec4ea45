use std::fmt::Debug;
use std::hash::Hash;

/// Bound satisfied by whatever opaque peer identifier the embedding
/// transport uses. `bitswap-core` stays transport-agnostic and generic
/// over this; the demo binary and `bitswap-testutil` instantiate it with
/// `libp2p_identity::PeerId`.
pub trait PeerId: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> PeerId for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

use crate::peer::PeerId;
use crate::wantlist::WantEntry;

/// Per-peer byte accounting, broken out of the global totals in [`Stat`]
/// so a caller can still see which peer a debt is owed to or from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerStat {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

/// Snapshot of the orchestrator's observable state.
#[derive(Debug, Clone, Default)]
pub struct Stat<P: PeerId> {
    pub wantlist: Vec<WantEntry>,
    pub blocks_received: u64,
    pub dup_blocks_received: u64,
    pub dup_data_received: u64,
    pub peers: Vec<P>,
    pub peer_stats: Vec<(P, PeerStat)>,
}

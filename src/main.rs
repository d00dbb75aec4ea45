mod error;

use std::sync::Arc;

use bitswap_core::{Block, BlockKey, Orchestrator, OrchestratorConfig};
use bitswap_testutil::{spawn_inbound_pump, Hub, MemoryBlockstore, PeerId};
use bytes::Bytes;
use clap::Parser;
use multihash::Multihash;
use sha2::{Digest, Sha256};

use crate::error::Error;

/// Spins up two in-process nodes over [`bitswap_testutil::Hub`] and walks
/// through a single block exchange: one node seeds a block, the other asks
/// for it by key and waits for delivery.
#[derive(Debug, Parser)]
#[clap(name = "bitswap-exchange")]
struct Opt {
    /// Payload the seed node already holds; the fetcher asks for its key.
    #[clap(long, default_value = "hello from bitswap-exchange")]
    payload: String,
    #[clap(long)]
    stdout_log: bool,
}

fn block_key(data: &[u8]) -> BlockKey {
    let digest = Sha256::digest(data);
    BlockKey::new(Multihash::wrap(0x12, &digest).expect("sha2-256 digest fits the key's digest size"))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let opt = Opt::parse();
    if opt.stdout_log {
        tracing_subscriber::fmt::init();
    }

    let hub = Hub::new();
    let seed_id = PeerId::random();
    let fetcher_id = PeerId::random();

    let (seed_net, seed_rx) = hub.node(seed_id);
    let (fetcher_net, fetcher_rx) = hub.node(fetcher_id);

    let seed = Arc::new(Orchestrator::new(
        Arc::new(MemoryBlockstore::new()),
        seed_net,
        OrchestratorConfig::default(),
    ));
    let fetcher = Arc::new(Orchestrator::new(
        Arc::new(MemoryBlockstore::new()),
        fetcher_net,
        OrchestratorConfig::default(),
    ));

    seed.start().await;
    fetcher.start().await;
    spawn_inbound_pump(Arc::clone(&seed), seed_rx);
    spawn_inbound_pump(Arc::clone(&fetcher), fetcher_rx);

    seed.connected(fetcher_id).await;
    fetcher.connected(seed_id).await;

    let key = block_key(opt.payload.as_bytes());
    seed.has_block(Block::new(key, Bytes::from(opt.payload.clone().into_bytes()))).await?;

    println!("{fetcher_id} wants {key} from {seed_id}");
    let block = fetcher.get_block(key).await?;
    println!("{fetcher_id} received {} bytes: {}", block.len(), String::from_utf8_lossy(&block.data));

    let stat = fetcher.stat().await;
    println!(
        "{fetcher_id} stat: blocks_received={} dup_blocks_received={} peers={}",
        stat.blocks_received,
        stat.dup_blocks_received,
        stat.peers.len()
    );

    fetcher.stop().await;
    seed.stop().await;
    Ok(())
}

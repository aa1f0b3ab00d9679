use std::sync::{Arc, RwLock};

use itertools::Itertools as _;
use tracing::{info, warn};

use crate::{
    difficulty::DifficultyAdjuster,
    digest::{Digest, DigestBuilder},
};

pub const GENESIS_DATA: &str = "Genesis Block";
pub const GENESIS_MINER: &str = "0x0000000000000000000000000000000000000000";

/// Everything a block commits to, before it's sealed with its hash.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockHeader {
    pub index: u64,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
    pub previous_hash: Digest,
    pub data: String,
    pub nonce: u64,
    pub merkle_root: Digest,
    pub contour_hash: Digest,
    pub contour_complexity: f64,
    pub miner_address: String,
}

impl BlockHeader {
    pub fn hash(&self) -> Digest {
        DigestBuilder::new()
            .u64(self.index)
            .u64(self.timestamp)
            .digest(&self.previous_hash)
            .str(&self.data)
            .u64(self.nonce)
            .digest(&self.merkle_root)
            .digest(&self.contour_hash)
            .f64(self.contour_complexity)
            .str(&self.miner_address)
            .finish()
    }
}

/// An immutable, sealed block.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    header: BlockHeader,
    hash: Digest,
}

impl Block {
    /// Seal a header with its own hash.
    pub fn seal(header: BlockHeader) -> Self {
        Self {
            hash: header.hash(),
            header,
        }
    }

    /// A block as received from elsewhere, with a claimed hash that is not checked here.
    pub fn from_parts(header: BlockHeader, hash: Digest) -> Self {
        Self { header, hash }
    }

    /// The same on every node.
    pub fn genesis() -> Self {
        Self::seal(BlockHeader {
            index: 0,
            timestamp: 0,
            previous_hash: Digest::ZERO,
            data: GENESIS_DATA.into(),
            nonce: 0,
            merkle_root: Digest::ZERO,
            contour_hash: Digest::ZERO,
            contour_complexity: 0.0,
            miner_address: GENESIS_MINER.into(),
        })
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn hash(&self) -> Digest {
        self.hash
    }

    pub fn index(&self) -> u64 {
        self.header.index
    }

    pub fn previous_hash(&self) -> Digest {
        self.header.previous_hash
    }

    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.header.hash()
    }
}

/// Pairwise SHA-256 up to a single root, duplicating the last node of odd levels.
pub fn merkle_root(leaves: &[Digest]) -> Digest {
    if leaves.is_empty() {
        return Digest::ZERO;
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = level[level.len() - 1];
            level.push(last);
        }
        level = level
            .iter()
            .tuples()
            .map(|(left, right)| DigestBuilder::new().digest(left).digest(right).finish())
            .collect();
    }
    level[0]
}

/// The canonical chain, readable by many while one writer appends.
#[derive(Debug)]
pub struct ChainStore {
    blocks: RwLock<Vec<Block>>,
    difficulty: Arc<DifficultyAdjuster>,
}

impl ChainStore {
    /// A chain holding only the genesis block.
    pub fn new(difficulty: Arc<DifficultyAdjuster>) -> Self {
        let genesis = Block::genesis();
        info!(hash = %genesis.hash(), "created genesis block");
        Self {
            blocks: RwLock::new(vec![genesis]),
            difficulty,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Block>> {
        self.blocks.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn genesis(&self) -> Block {
        self.read()
            .first()
            .cloned()
            .unwrap_or_else(Block::genesis)
    }

    pub fn latest(&self) -> Block {
        self.read()
            .last()
            .cloned()
            .unwrap_or_else(Block::genesis)
    }

    /// A snapshot of the whole chain.
    pub fn all(&self) -> Vec<Block> {
        self.read().clone()
    }

    pub fn get(&self, index: u64) -> Option<Block> {
        self.read().get(usize::try_from(index).ok()?).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Append a block that extends the current tip and meets the current difficulty,
    /// then retarget.
    ///
    /// The checks, the push and the retarget happen under one write lock, so the
    /// next append is always judged against the difficulty this one left behind.
    pub fn append(&self, block: Block) -> Result<(), AppendBlockError> {
        let mut blocks = self.blocks.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let tip = blocks.last().cloned().unwrap_or_else(Block::genesis);
        if block.previous_hash() != tip.hash() || block.index() != tip.index() + 1 {
            warn!(index = block.index(), tip = tip.index(), "block does not extend the tip");
            return Err(AppendBlockError::ChainDiscontinuity {
                expected: tip.hash(),
                found: block.previous_hash(),
            });
        }
        if !block.has_valid_hash() {
            warn!(index = block.index(), "block hash does not match its contents");
            return Err(AppendBlockError::HashMismatch);
        }
        let required = self.difficulty.current();
        if !block.header.contour_hash.meets_difficulty(required) {
            warn!(index = block.index(), required, "block misses the difficulty target");
            return Err(AppendBlockError::DifficultyNotMet { required });
        }
        info!(index = block.index(), hash = %block.hash(), "appended block");
        let timestamp = block.header.timestamp;
        blocks.push(block);
        self.difficulty.record_block(timestamp);
        Ok(())
    }

    /// Recompute every hash and parent link. Stops at the first bad block.
    pub fn validate(&self) -> bool {
        let blocks = self.read();
        let genesis_ok = blocks
            .first()
            .map_or(false, |it| it.has_valid_hash() && it.previous_hash() == Digest::ZERO);
        genesis_ok
            && blocks.iter().tuple_windows().all(|(previous, current)| {
                let ok = current.has_valid_hash()
                    && current.previous_hash() == previous.hash()
                    && current.index() == previous.index() + 1;
                if !ok {
                    warn!(index = current.index(), "chain validation failed");
                }
                ok
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AppendBlockError {
    #[error("proof hash does not have {required} leading zero bytes")]
    DifficultyNotMet { required: u32 },
    #[error("block builds on {found}, but the tip is {expected}")]
    ChainDiscontinuity { expected: Digest, found: Digest },
    #[error("block hash does not match its contents")]
    HashMismatch,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const TARGET: Duration = Duration::from_secs(10);

    fn store(initial: u32) -> ChainStore {
        ChainStore::new(Arc::new(DifficultyAdjuster::new(initial, TARGET).unwrap()))
    }

    /// A timestamp exactly one target interval after the last retarget.
    fn on_time(store: &ChainStore) -> u64 {
        store.difficulty.last_adjustment() + TARGET.as_millis() as u64
    }

    /// Brute-force a contour hash with `zeros` leading zero bytes.
    fn proof(zeros: usize) -> Digest {
        (0u64..)
            .map(|i| Digest::of(i.to_be_bytes()))
            .find(|it| it.leading_zero_bytes() >= zeros)
            .unwrap()
    }

    fn child(parent: &Block, timestamp: u64, contour_hash: Digest) -> Block {
        Block::seal(BlockHeader {
            index: parent.index() + 1,
            timestamp,
            previous_hash: parent.hash(),
            data: format!("block {}", parent.index() + 1),
            nonce: 7,
            merkle_root: merkle_root(&[Digest::of("tx")]),
            contour_hash,
            contour_complexity: 42.0,
            miner_address: "miner-x".into(),
        })
    }

    fn append_on_time(store: &ChainStore, contour_hash: Digest) -> Block {
        let block = child(&store.latest(), on_time(store), contour_hash);
        store.append(block.clone()).unwrap();
        block
    }

    #[test]
    fn starts_with_deterministic_genesis() {
        let store = store(1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.genesis(), Block::genesis());
        assert_eq!(store.latest(), Block::genesis());
        assert_eq!(store.genesis().previous_hash(), Digest::ZERO);
        assert!(store.validate());
    }

    #[test]
    fn append_extends_the_chain() {
        let store = store(1);
        let block = append_on_time(&store, proof(1));
        assert_eq!(store.len(), 2);
        assert_eq!(store.latest(), block);
        assert_eq!(store.get(1), Some(block));
        assert_eq!(store.get(2), None);
        assert_eq!(store.difficulty.current(), 1);
        assert!(store.validate());
    }

    #[test]
    fn append_retargets() {
        let store = store(1);
        let fast = store.difficulty.last_adjustment() + 1_000;
        store.append(child(&store.latest(), fast, proof(1))).unwrap();
        assert_eq!(store.difficulty.current(), 2);

        let slow = store.difficulty.last_adjustment() + 60_000;
        store.append(child(&store.latest(), slow, proof(2))).unwrap();
        assert_eq!(store.difficulty.current(), 1);
    }

    #[test]
    fn rejects_weak_proof() {
        let store = store(2);
        let weak = (0u64..)
            .map(|i| Digest::of(i.to_be_bytes()))
            .find(|it| it.leading_zero_bytes() == 1)
            .unwrap();
        assert_eq!(
            store.append(child(&store.latest(), on_time(&store), weak)),
            Err(AppendBlockError::DifficultyNotMet { required: 2 })
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.difficulty.current(), 2);
    }

    #[test]
    fn rejects_stale_parent() {
        let store = store(1);
        let genesis = store.latest();
        append_on_time(&store, proof(1));
        let stale = child(&genesis, on_time(&store), proof(1));
        assert_eq!(
            store.append(stale),
            Err(AppendBlockError::ChainDiscontinuity {
                expected: store.latest().hash(),
                found: genesis.hash(),
            })
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn rejects_forged_hash() {
        let store = store(1);
        let honest = child(&store.latest(), on_time(&store), proof(1));
        let forged = Block::from_parts(honest.header().clone(), Digest::of("forged"));
        assert_eq!(store.append(forged), Err(AppendBlockError::HashMismatch));
        store.append(honest).unwrap();
    }

    #[test]
    fn validate_fails_closed_on_tampering() {
        let store = store(1);
        for _ in 0..3 {
            append_on_time(&store, proof(1));
        }
        assert!(store.validate());

        store.blocks.write().unwrap()[2].header.data = "rewritten".into();
        assert!(!store.validate());
    }

    #[test]
    fn validate_catches_broken_links() {
        let store = store(1);
        append_on_time(&store, proof(1));
        let orphan = Block::seal(BlockHeader {
            previous_hash: Digest::of("elsewhere"),
            ..child(&store.latest(), on_time(&store), proof(1)).header().clone()
        });
        store.blocks.write().unwrap().push(orphan);
        assert!(!store.validate());
    }

    #[test]
    fn readers_never_see_a_torn_append() {
        let store = store(1);
        let proof = proof(1);
        std::thread::scope(|scope| {
            let writer = scope.spawn(|| {
                for _ in 0..50 {
                    append_on_time(&store, proof);
                }
            });
            for _ in 0..4 {
                scope.spawn(|| {
                    let mut seen = 1;
                    while seen < 51 {
                        let snapshot = store.all();
                        assert!(snapshot.len() >= seen);
                        seen = snapshot.len();
                        assert!(snapshot.last().unwrap().has_valid_hash());
                        assert!(snapshot
                            .iter()
                            .tuple_windows()
                            .all(|(a, b)| b.previous_hash() == a.hash()));
                    }
                });
            }
            writer.join().unwrap();
        });
        assert_eq!(store.len(), 51);
        assert!(store.validate());
    }

    #[test]
    fn racing_appends_see_each_retarget() {
        let store = store(1);
        let weak = (0u64..)
            .map(|i| Digest::of(i.to_be_bytes()))
            .find(|it| it.leading_zero_bytes() == 1)
            .unwrap();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        let fast = store.difficulty.last_adjustment() + 1;
                        let _ = store.append(child(&store.latest(), fast, weak));
                    }
                });
            }
        });
        // the first fast block raises the bar past every later weak proof
        assert_eq!(store.len(), 2);
        assert_eq!(store.difficulty.current(), 2);
        assert!(store.validate());
    }

    #[test]
    fn merkle_roots() {
        assert_eq!(merkle_root(&[]), Digest::ZERO);
        let a = Digest::of("a");
        let b = Digest::of("b");
        let c = Digest::of("c");
        assert_eq!(merkle_root(&[a]), a);
        let ab = DigestBuilder::new().digest(&a).digest(&b).finish();
        assert_eq!(merkle_root(&[a, b]), ab);
        let cc = DigestBuilder::new().digest(&c).digest(&c).finish();
        let abcc = DigestBuilder::new().digest(&ab).digest(&cc).finish();
        assert_eq!(merkle_root(&[a, b, c]), abcc);
        assert_ne!(merkle_root(&[b, a]), ab);
    }
}

use std::sync::Arc;

use itertools::Itertools as _;
use tracing::{info, warn};

use crate::{
    blockchain::{merkle_root, AppendBlockError, Block, BlockHeader, ChainStore},
    config::{ConfigError, EngineConfig, VerificationAlgorithm},
    contour::{Contour, ContourPoint},
    difficulty::{DifficultyAdjuster, DifficultyError},
    digest::Digest,
    ledger::{LedgerEntry, LedgerError, Transaction, TransactionLedger, SYSTEM_ADDRESS},
    proof_of_work::{
        CancellationToken, CheckWorkError, MiningController, MiningError, MiningEvent, MiningResult,
        MiningStatus, VerificationResult,
    },
};

/// Complexity, hash and verdict for an arbitrary point set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContourReport {
    pub complexity: f64,
    pub hash: Digest,
    pub verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainStats {
    pub chain_length: usize,
    pub difficulty: u32,
    pub pending_transactions: usize,
    pub processed_transactions: u64,
    pub complexity_threshold: f64,
    pub block_reward: f64,
}

/// One node's consensus state: the chain, the pending transactions and the miner.
///
/// Every method takes `&self`, so share it behind an [Arc] between submitters,
/// readers and the single mining thread.
#[derive(Debug)]
pub struct ContourEngine {
    config: EngineConfig,
    difficulty: Arc<DifficultyAdjuster>,
    controller: MiningController,
    ledger: TransactionLedger,
    chain: ChainStore,
}

impl ContourEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let difficulty = Arc::new(DifficultyAdjuster::new(
            config.difficulty,
            config.target_block_time,
        )?);
        let controller = MiningController::new(&config, difficulty.clone())?;
        let ledger = TransactionLedger::new(controller.generator().clone(), &config);
        let chain = ChainStore::new(difficulty.clone());
        info!(?config, "engine ready");
        Ok(Self {
            config,
            difficulty,
            controller,
            ledger,
            chain,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn mine(
        &self,
        data: &str,
        previous_hash: &Digest,
        miner: &str,
        token: &CancellationToken,
    ) -> Result<MiningResult, MiningError> {
        self.controller.mine(data, previous_hash, miner, token)
    }

    /// Re-check a proof at the difficulty it claims to have been mined at.
    pub fn verify(
        &self,
        data: &str,
        previous_hash: &Digest,
        miner: &str,
        nonce: u64,
        contour: &Contour,
        difficulty: u32,
    ) -> VerificationResult {
        self.controller.verify(data, previous_hash, miner, nonce, contour, difficulty)
    }

    /// Score and hash a caller-supplied point set, and check it against the
    /// complexity threshold and `algorithm` (or the configured one).
    pub fn verify_contour(
        &self,
        points: Vec<ContourPoint>,
        algorithm: Option<VerificationAlgorithm>,
    ) -> ContourReport {
        let verified = self.controller.verifier().verify(&points, algorithm);
        let contour = Contour::new(points, self.controller.generator().scorer());
        ContourReport {
            complexity: contour.complexity,
            hash: contour.hash,
            verified: verified && contour.complexity >= self.config.complexity_threshold,
        }
    }

    pub fn subscribe(&self) -> std::sync::mpsc::Receiver<MiningEvent> {
        self.controller.subscribe()
    }

    pub fn mining_status(&self) -> MiningStatus {
        self.controller.status()
    }

    pub fn add_transaction(&self, transaction: Transaction) -> Result<Digest, LedgerError> {
        self.ledger.add(transaction)
    }

    pub fn verify_transaction(&self, hash: &Digest) -> Result<bool, LedgerError> {
        self.ledger.verify(hash)
    }

    pub fn get_transaction(&self, hash: &Digest) -> Option<LedgerEntry> {
        self.ledger.get(hash)
    }

    /// Extract a batch. The caller must [ContourEngine::commit_batch] or
    /// [ContourEngine::restore_batch] it.
    pub fn get_next_batch(&self, n: usize) -> Vec<Digest> {
        self.ledger.next_batch(n)
    }

    pub fn commit_batch(&self, batch: &[Digest]) {
        self.ledger.commit(batch)
    }

    pub fn restore_batch(&self, batch: &[Digest]) {
        self.ledger.restore(batch)
    }

    pub fn clear_pending(&self) {
        self.ledger.clear()
    }

    pub fn pending_count(&self) -> usize {
        self.ledger.pending_count()
    }

    /// The block payload for a batch: one line per transaction hash, then the miner's reward.
    pub fn block_data(&self, batch: &[Digest], miner: &str) -> String {
        batch
            .iter()
            .map(|hash| format!("tx:{hash}"))
            .chain([format!(
                "reward:{SYSTEM_ADDRESS}->{miner}:{}",
                self.config.block_reward
            )])
            .join("\n")
    }

    /// Check a block's proof from its public fields, then append it.
    pub fn append_block(&self, block: Block) -> Result<(), EngineError> {
        let header = block.header();
        let contour = self.controller.generator().generate_for(
            &header.data,
            &header.previous_hash,
            header.nonce,
            &header.miner_address,
        );
        if contour.hash != header.contour_hash
            || contour.complexity.to_bits() != header.contour_complexity.to_bits()
        {
            warn!(index = header.index, "block contour does not match its nonce");
            return Err(EngineError::InvalidProof { index: header.index });
        }
        match self.controller.check_work(&contour, self.difficulty.current()) {
            // the chain store reports the difficulty it checked against
            Ok(()) | Err(CheckWorkError::HashAboveTarget) => (),
            Err(reason) => {
                warn!(index = header.index, ?reason, "block contour rejected");
                return Err(EngineError::InvalidProof { index: header.index });
            }
        }
        Ok(self.chain.append(block)?)
    }

    /// Pull a batch, mine it on top of the current tip and append the result.
    ///
    /// The batch is committed on success and returned to the ledger on any failure.
    pub fn mine_next_block(
        &self,
        miner: &str,
        batch_size: usize,
        token: &CancellationToken,
    ) -> Result<Block, EngineError> {
        let batch = self.ledger.next_batch(batch_size);
        match self.mine_batch(&batch, miner, token) {
            Ok(block) => {
                self.ledger.commit(&batch);
                Ok(block)
            }
            Err(error) => {
                warn!(%error, "mining failed");
                self.ledger.restore(&batch);
                Err(error)
            }
        }
    }

    fn mine_batch(
        &self,
        batch: &[Digest],
        miner: &str,
        token: &CancellationToken,
    ) -> Result<Block, EngineError> {
        let tip = self.chain.latest();
        let data = self.block_data(batch, miner);
        let result = self.controller.mine(&data, &tip.hash(), miner, token)?;
        let block = Block::seal(BlockHeader {
            index: tip.index() + 1,
            timestamp: result.timestamp,
            previous_hash: tip.hash(),
            data,
            nonce: result.nonce,
            merkle_root: merkle_root(batch),
            contour_hash: result.contour.hash,
            contour_complexity: result.contour.complexity,
            miner_address: result.miner,
        });
        self.append_block(block.clone())?;
        Ok(block)
    }

    pub fn validate_chain(&self) -> bool {
        self.chain.validate()
    }

    pub fn latest_block(&self) -> Block {
        self.chain.latest()
    }

    pub fn get_block(&self, index: u64) -> Option<Block> {
        self.chain.get(index)
    }

    pub fn chain(&self) -> Vec<Block> {
        self.chain.all()
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty.current()
    }

    pub fn set_difficulty(&self, difficulty: u32) -> Result<(), DifficultyError> {
        self.difficulty.set(difficulty)
    }

    pub fn stats(&self) -> ChainStats {
        ChainStats {
            chain_length: self.chain.len(),
            difficulty: self.difficulty.current(),
            pending_transactions: self.ledger.pending_count(),
            processed_transactions: self.ledger.processed_count(),
            complexity_threshold: self.config.complexity_threshold,
            block_reward: self.config.block_reward,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Difficulty(#[from] DifficultyError),
    #[error(transparent)]
    Mining(#[from] MiningError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Append(#[from] AppendBlockError),
    #[error("block {index} does not carry the contour its nonce generates")]
    InvalidProof { index: u64 },
}

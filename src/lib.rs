// Proof of Contour: instead of grinding a header hash, a miner grinds a nonce
// until the point set it seeds is complex enough, passes a geometric check,
// and hashes under the difficulty target.
//
// Pipeline: seed material -> contour -> complexity score -> geometry check ->
// hash target -> block.

mod blockchain;
mod complexity;
mod config;
mod contour;
mod difficulty;
mod digest;
mod engine;
mod geometry;
mod ledger;
mod proof_of_work;

pub use blockchain::{
    merkle_root, AppendBlockError, Block, BlockHeader, ChainStore, GENESIS_DATA, GENESIS_MINER,
};
pub use complexity::ComplexityScorer;
pub use config::{ComplexityWeights, ConfigError, EngineConfig, VerificationAlgorithm};
pub use contour::{seed_material, Contour, ContourGenerator, ContourPoint};
pub use difficulty::{
    now_millis, retarget, DifficultyAdjuster, DifficultyError, MAX_DIFFICULTY, MIN_DIFFICULTY,
};
pub use digest::{Digest, DigestBuilder, DIGEST_LEN};
pub use engine::{ChainStats, ContourEngine, ContourReport, EngineError};
pub use geometry::{sample_bezier, sample_spline, GeometryVerifier};
pub use ledger::{
    EntryState, InvalidTransaction, LedgerEntry, LedgerError, Transaction, TransactionLedger,
    SYSTEM_ADDRESS,
};
pub use proof_of_work::{
    CancellationToken, CheckWorkError, MiningController, MiningError, MiningEvent, MiningResult,
    MiningStatus, VerificationResult,
};

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    sync::{
        atomic::{self, AtomicU64},
        Mutex, RwLock,
    },
};

use hashbrown::HashMap;
use tap::Tap as _;
use tracing::{debug, warn};

use crate::{
    config::{EngineConfig, VerificationAlgorithm},
    contour::ContourGenerator,
    digest::{Digest, DigestBuilder},
    geometry::GeometryVerifier,
};

/// Source of block rewards and other system transfers, which carry no signature.
pub const SYSTEM_ADDRESS: &str = "NETWORK";

const FEE_WEIGHT: f64 = 0.7;
const COMPLEXITY_WEIGHT: f64 = 0.3;

/// A transfer as submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub from_address: String,
    pub to_address: String,
    pub amount: f64,
    pub fee: f64,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
    pub signature: Vec<u8>,
}

impl Transaction {
    pub fn is_system(&self) -> bool {
        self.from_address == SYSTEM_ADDRESS
    }

    /// Stable over `(from, to, amount, timestamp, fee, signature)`.
    pub fn hash(&self) -> Digest {
        DigestBuilder::new()
            .str(&self.from_address)
            .str(&self.to_address)
            .f64(self.amount)
            .u64(self.timestamp)
            .f64(self.fee)
            .bytes(&self.signature)
            .finish()
    }

    fn check(&self) -> Result<(), InvalidTransaction> {
        if !self.amount.is_finite() || !self.fee.is_finite() {
            return Err(InvalidTransaction::NonFiniteValue);
        }
        if self.amount <= 0.0 {
            return Err(InvalidTransaction::NonPositiveAmount(self.amount));
        }
        if self.fee < 0.0 {
            return Err(InvalidTransaction::NegativeFee(self.fee));
        }
        if !self.is_system() && self.signature.is_empty() {
            return Err(InvalidTransaction::MissingSignature);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Queued for the next batch.
    Pending,
    /// Handed out by [TransactionLedger::next_batch], awaiting commit or restore.
    Extracted,
}

/// The ledger's canonical copy of a transaction, with everything derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub transaction: Transaction,
    pub hash: Digest,
    pub priority: f64,
    pub verified: bool,
    pub state: EntryState,
    /// Insertion order; breaks priority ties first-in first-out.
    sequence: u64,
}

#[derive(Debug, Clone, Copy)]
struct Queued {
    priority: f64,
    sequence: u64,
    hash: Digest,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    /// Highest priority first, then earliest insertion.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Pending transactions, served highest priority first.
///
/// Lock order is always `entries` then `queue`.
#[derive(Debug)]
pub struct TransactionLedger {
    generator: ContourGenerator,
    verifier: GeometryVerifier,
    algorithm: VerificationAlgorithm,
    entries: RwLock<HashMap<Digest, LedgerEntry>>,
    queue: Mutex<BinaryHeap<Queued>>,
    next_sequence: AtomicU64,
    processed: AtomicU64,
}

impl TransactionLedger {
    pub fn new(generator: ContourGenerator, config: &EngineConfig) -> Self {
        Self {
            generator,
            verifier: GeometryVerifier::new(config),
            algorithm: config.verification_algorithm,
            entries: RwLock::default(),
            queue: Mutex::default(),
            next_sequence: AtomicU64::new(0),
            processed: AtomicU64::new(0),
        }
    }

    /// Complexity of the contour seeded by a signature, in `[0, 1]`.
    pub fn signature_complexity(&self, signature: &[u8]) -> f64 {
        self.generator.generate(signature).complexity / 100.0
    }

    pub fn priority(&self, transaction: &Transaction) -> f64 {
        let fee_ratio = transaction.fee / transaction.amount;
        let complexity = self.signature_complexity(&transaction.signature);
        fee_ratio * FEE_WEIGHT + complexity * COMPLEXITY_WEIGHT
    }

    /// Queue a transaction, returning its hash.
    ///
    /// Submitting an identical payload again is a no-op that returns the same hash.
    pub fn add(&self, transaction: Transaction) -> Result<Digest, LedgerError> {
        transaction.check()?;
        let hash = transaction.hash();
        let priority = self.priority(&transaction);

        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.contains_key(&hash) {
            debug!(%hash, "duplicate transaction ignored");
            return Ok(hash);
        }
        let sequence = self.next_sequence.fetch_add(1, atomic::Ordering::Relaxed);
        entries.insert(
            hash,
            LedgerEntry {
                transaction,
                hash,
                priority,
                verified: false,
                state: EntryState::Pending,
                sequence,
            },
        );
        self.lock_queue().push(Queued {
            priority,
            sequence,
            hash,
        });
        debug!(%hash, priority, "transaction queued");
        Ok(hash)
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, BinaryHeap<Queued>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take up to `n` of the highest priority pending transactions.
    ///
    /// They stay retrievable by hash but won't be handed out again until
    /// [TransactionLedger::restore]d; [TransactionLedger::commit] drops them for good.
    pub fn next_batch(&self, n: usize) -> Vec<Digest> {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut queue = self.lock_queue();
        let mut batch = Vec::with_capacity(n.min(queue.len()));
        while batch.len() < n {
            let Some(queued) = queue.pop() else { break };
            match entries.get_mut(&queued.hash) {
                Some(entry) if entry.state == EntryState::Pending => {
                    entry.state = EntryState::Extracted;
                    batch.push(queued.hash);
                }
                // no longer pending, nothing to hand out
                _ => continue,
            }
        }
        debug!(size = batch.len(), remaining = queue.len(), "batch extracted");
        batch
    }

    /// Return an extracted batch to the queue, keeping each entry's original
    /// priority and insertion order.
    pub fn restore(&self, batch: &[Digest]) {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut queue = self.lock_queue();
        let mut restored = 0;
        for hash in batch {
            if let Some(entry) = entries.get_mut(hash) {
                if entry.state == EntryState::Extracted {
                    entry.state = EntryState::Pending;
                    queue.push(Queued {
                        priority: entry.priority,
                        sequence: entry.sequence,
                        hash: *hash,
                    });
                    restored += 1;
                }
            }
        }
        warn!(restored, "batch returned to the ledger");
    }

    /// Forget an extracted batch whose block made it onto the chain.
    pub fn commit(&self, batch: &[Digest]) {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = entries.len();
        for hash in batch {
            if let Some(entry) = entries.get(hash) {
                if entry.state == EntryState::Extracted {
                    entries.remove(hash);
                }
            }
        }
        debug!(confirmed = before - entries.len(), "batch committed");
    }

    /// Drop every pending transaction. Extracted batches are left alone.
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut queue = self.lock_queue();
        entries.retain(|_, entry| entry.state != EntryState::Pending);
        queue.clear();
    }

    /// Re-run the geometric check on a transaction's signature contour.
    pub fn verify(&self, hash: &Digest) -> Result<bool, LedgerError> {
        let transaction = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(hash)
            .map(|entry| entry.transaction.clone())
            .ok_or(LedgerError::NotFound(*hash))?;

        let valid = transaction.is_system() || {
            let contour = self.generator.generate(&transaction.signature);
            self.verifier.verify(&contour.points, Some(self.algorithm))
        };

        if let Some(entry) = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get_mut(hash)
        {
            entry.verified = valid;
        }
        self.processed.fetch_add(1, atomic::Ordering::Relaxed);
        debug!(%hash, valid, "transaction verified");
        Ok(valid)
    }

    pub fn get(&self, hash: &Digest) -> Option<LedgerEntry> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(hash)
            .cloned()
    }

    pub fn contains(&self, hash: &Digest) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(hash)
    }

    /// Transactions waiting for a batch.
    pub fn pending_count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|it| it.state == EntryState::Pending)
            .count()
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.load(atomic::Ordering::Relaxed)
    }

    /// Pending transactions in the order batches would take them.
    pub fn pending(&self) -> Vec<LedgerEntry> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|it| it.state == EntryState::Pending)
            .cloned()
            .collect::<Vec<_>>()
            .tap_mut(|it| {
                it.sort_by(|a, b| {
                    b.priority
                        .total_cmp(&a.priority)
                        .then_with(|| a.sequence.cmp(&b.sequence))
                })
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum InvalidTransaction {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(f64),
    #[error("fee must not be negative, got {0}")]
    NegativeFee(f64),
    #[error("amount and fee must be finite")]
    NonFiniteValue,
    #[error("only system transfers may omit a signature")]
    MissingSignature,
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid transaction: {0}")]
    InvalidTransaction(#[from] InvalidTransaction),
    #[error("no transaction with hash {0}")]
    NotFound(Digest),
}

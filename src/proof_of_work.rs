// Proof of Contour: a nonce is only good if the contour it seeds
// - hashes below the difficulty target,
// - is complex enough,
// - and passes the configured shape predicate.
// Anyone holding the block's public fields can regenerate the contour and check all three.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex,
    },
    time::{Duration, Instant},
};

use tracing::{debug, info};

use crate::{
    config::{ConfigError, EngineConfig},
    contour::{Contour, ContourGenerator},
    difficulty::{now_millis, DifficultyAdjuster},
    digest::Digest,
    geometry::GeometryVerifier,
};

/// A cooperative stop signal for one or more calls to [MiningController::mine].
///
/// Cancelling is advisory: the loop notices at its next progress boundary.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MiningResult {
    pub contour: Contour,
    pub nonce: u64,
    pub difficulty: u32,
    pub miner: String,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerificationResult {
    pub valid: bool,
    pub complexity: f64,
    pub execution_time: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, enum_as_inner::EnumAsInner)]
pub enum MiningStatus {
    #[default]
    Idle,
    Searching {
        nonce: u64,
    },
    Found {
        nonce: u64,
    },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, enum_as_inner::EnumAsInner)]
pub enum MiningEvent {
    Started { difficulty: u32 },
    Progress { attempts: u64, elapsed: Duration },
    Found { nonce: u64, attempts: u64, complexity: f64 },
    Cancelled { attempts: u64 },
}

/// Why a single nonce didn't make the cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckWorkError {
    HashAboveTarget,
    InsufficientComplexity,
    RejectedShape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MiningError {
    #[error("mining was stopped before a nonce was found")]
    Stopped,
    #[error("every nonce was tried without success")]
    NonceSpaceExhausted,
}

/// Searches nonces for a contour that satisfies the difficulty target,
/// complexity threshold and geometry predicate.
#[derive(Debug)]
pub struct MiningController {
    generator: ContourGenerator,
    verifier: GeometryVerifier,
    difficulty: Arc<DifficultyAdjuster>,
    complexity_threshold: f64,
    progress_interval: u64,
    status: Mutex<MiningStatus>,
    subscribers: Mutex<Vec<mpsc::Sender<MiningEvent>>>,
}

impl MiningController {
    pub fn new(
        config: &EngineConfig,
        difficulty: Arc<DifficultyAdjuster>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            generator: ContourGenerator::new(config)?,
            verifier: GeometryVerifier::new(config),
            difficulty,
            complexity_threshold: config.complexity_threshold,
            progress_interval: config.progress_interval,
            status: Mutex::default(),
            subscribers: Mutex::default(),
        })
    }

    pub fn generator(&self) -> &ContourGenerator {
        &self.generator
    }

    pub fn verifier(&self) -> &GeometryVerifier {
        &self.verifier
    }

    pub fn complexity_threshold(&self) -> f64 {
        self.complexity_threshold
    }

    pub fn status(&self) -> MiningStatus {
        *self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Receive every event emitted from now on. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> mpsc::Receiver<MiningEvent> {
        let (sender, receiver) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(sender);
        receiver
    }

    fn emit(&self, event: MiningEvent) {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn set_status(&self, status: MiningStatus) {
        *self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = status;
    }

    /// Whether the contour for `nonce` is acceptable at `difficulty`.
    ///
    /// Cheapest checks first: the hash, then complexity, then shape.
    pub fn check_work(&self, contour: &Contour, difficulty: u32) -> Result<(), CheckWorkError> {
        if !contour.hash.meets_difficulty(difficulty) {
            return Err(CheckWorkError::HashAboveTarget);
        }
        if contour.complexity < self.complexity_threshold {
            return Err(CheckWorkError::InsufficientComplexity);
        }
        match self.verifier.verify(&contour.points, None) {
            true => Ok(()),
            false => Err(CheckWorkError::RejectedShape),
        }
    }

    /// Search nonces from 0 until one works or `token` is cancelled.
    ///
    /// Every `progress_interval` attempts this emits [MiningEvent::Progress], yields
    /// the thread, and checks `token`.
    pub fn mine(
        &self,
        data: &str,
        previous_hash: &Digest,
        miner: &str,
        token: &CancellationToken,
    ) -> Result<MiningResult, MiningError> {
        let difficulty = self.difficulty.current();
        let started = Instant::now();
        self.set_status(MiningStatus::Searching { nonce: 0 });
        self.emit(MiningEvent::Started { difficulty });
        debug!(difficulty, %previous_hash, miner, "mining started");

        let mut nonce = 0u64;
        loop {
            if nonce % self.progress_interval == 0 {
                if nonce != 0 {
                    self.set_status(MiningStatus::Searching { nonce });
                    self.emit(MiningEvent::Progress {
                        attempts: nonce,
                        elapsed: started.elapsed(),
                    });
                    std::thread::yield_now();
                }
                if token.is_cancelled() {
                    self.set_status(MiningStatus::Cancelled);
                    self.emit(MiningEvent::Cancelled { attempts: nonce });
                    info!(attempts = nonce, "mining stopped");
                    return Err(MiningError::Stopped);
                }
            }

            let contour = self.generator.generate_for(data, previous_hash, nonce, miner);
            if self.check_work(&contour, difficulty).is_ok() {
                let attempts = nonce + 1;
                self.set_status(MiningStatus::Found { nonce });
                self.emit(MiningEvent::Found {
                    nonce,
                    attempts,
                    complexity: contour.complexity,
                });
                info!(
                    nonce,
                    attempts,
                    complexity = contour.complexity,
                    hash = %contour.hash,
                    elapsed = ?started.elapsed(),
                    "found contour"
                );
                return Ok(MiningResult {
                    contour,
                    nonce,
                    difficulty,
                    miner: miner.to_owned(),
                    timestamp: now_millis(),
                });
            }

            nonce = match nonce.checked_add(1) {
                Some(next) => next,
                None => {
                    self.set_status(MiningStatus::Idle);
                    return Err(MiningError::NonceSpaceExhausted);
                }
            };
        }
    }

    /// Check a claimed result using only its public fields, against the difficulty
    /// it was mined at ([MiningResult::difficulty]).
    ///
    /// Later retargets don't invalidate a proof that was good when it was found.
    pub fn verify(
        &self,
        data: &str,
        previous_hash: &Digest,
        miner: &str,
        nonce: u64,
        contour: &Contour,
        difficulty: u32,
    ) -> VerificationResult {
        let started = Instant::now();
        let expected = self.generator.generate_for(data, previous_hash, nonce, miner);
        let untampered = contour.points == expected.points
            && contour.hash == Contour::hash_points(&contour.points)
            && contour.hash == expected.hash;
        let valid = untampered && self.check_work(&expected, difficulty).is_ok();
        VerificationResult {
            valid,
            complexity: expected.complexity,
            execution_time: started.elapsed(),
        }
    }
}

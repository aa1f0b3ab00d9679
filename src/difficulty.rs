use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tracing::info;

use crate::digest::DIGEST_LEN;

pub const MIN_DIFFICULTY: u32 = 1;
/// Can't demand more zero bytes than a digest has.
pub const MAX_DIFFICULTY: u32 = DIGEST_LEN as u32;

/// Milliseconds since the unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |it| it.as_millis() as u64)
}

/// One proportional step: faster than half the target raises difficulty,
/// slower than twice the target lowers it, never below [MIN_DIFFICULTY].
pub fn retarget(difficulty: u32, elapsed: Duration, target: Duration) -> u32 {
    if elapsed < target / 2 {
        (difficulty + 1).min(MAX_DIFFICULTY)
    } else if elapsed > target * 2 {
        difficulty.saturating_sub(1).max(MIN_DIFFICULTY)
    } else {
        difficulty
    }
}

/// The shared difficulty, retargeted once per appended block.
#[derive(Debug)]
pub struct DifficultyAdjuster {
    current: AtomicU32,
    target_block_time: Duration,
    /// Timestamp (ms) of the last retarget.
    last_adjustment: Mutex<u64>,
}

impl DifficultyAdjuster {
    pub fn new(initial: u32, target_block_time: Duration) -> Result<Self, DifficultyError> {
        check(initial)?;
        Ok(Self {
            current: AtomicU32::new(initial),
            target_block_time,
            last_adjustment: Mutex::new(now_millis()),
        })
    }

    pub fn current(&self) -> u32 {
        self.current.load(Ordering::Acquire)
    }

    pub fn target_block_time(&self) -> Duration {
        self.target_block_time
    }

    /// Timestamp (ms) the next retarget measures from.
    pub fn last_adjustment(&self) -> u64 {
        *self
            .last_adjustment
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set(&self, difficulty: u32) -> Result<(), DifficultyError> {
        check(difficulty)?;
        self.current.store(difficulty, Ordering::Release);
        info!(difficulty, "difficulty set");
        Ok(())
    }

    /// Retarget from the time elapsed between the last adjustment and a block
    /// mined at `timestamp` (ms). Returns the new difficulty.
    pub fn record_block(&self, timestamp: u64) -> u32 {
        let mut last = self
            .last_adjustment
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let elapsed = Duration::from_millis(timestamp.saturating_sub(*last));
        *last = timestamp.max(*last);

        let before = self.current();
        let after = retarget(before, elapsed, self.target_block_time);
        self.current.store(after, Ordering::Release);
        if before != after {
            info!(before, after, ?elapsed, "retargeted difficulty");
        }
        after
    }
}

fn check(difficulty: u32) -> Result<(), DifficultyError> {
    match (MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&difficulty) {
        true => Ok(()),
        false => Err(DifficultyError::InvalidDifficulty(difficulty)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DifficultyError {
    #[error("difficulty {0} is outside [1, 32]")]
    InvalidDifficulty(u32),
}

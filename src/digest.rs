use std::fmt;

use sha2::{Digest as _, Sha256};

/// Width of every digest in the chain, in bytes.
pub const DIGEST_LEN: usize = 32;

/// A SHA-256 output.
///
/// Contours, transactions and blocks are all identified by one of these.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// The all-zero sentinel, used as the genesis block's parent.
    pub const ZERO: Self = Self([0; DIGEST_LEN]);

    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn of(bytes: impl AsRef<[u8]>) -> Self {
        Self(Sha256::digest(bytes.as_ref()).into())
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn leading_zero_bytes(&self) -> usize {
        self.0.iter().take_while(|it| **it == 0).count()
    }

    /// Difficulty is the number of leading zero bytes required.
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        self.leading_zero_bytes() >= difficulty as usize
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

/// Feeds typed fields into a SHA-256 state with a fixed encoding:
/// integers and floats big-endian, strings and byte blobs length-prefixed.
#[derive(Clone, Default)]
pub struct DigestBuilder {
    inner: Sha256,
}

impl DigestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.inner.update(value.to_be_bytes());
        self
    }

    pub fn f64(mut self, value: f64) -> Self {
        self.inner.update(value.to_be_bytes());
        self
    }

    pub fn digest(mut self, value: &Digest) -> Self {
        self.inner.update(value.as_bytes());
        self
    }

    pub fn bytes(mut self, value: impl AsRef<[u8]>) -> Self {
        let value = value.as_ref();
        self.inner.update((value.len() as u64).to_be_bytes());
        self.inner.update(value);
        self
    }

    pub fn str(self, value: &str) -> Self {
        self.bytes(value.as_bytes())
    }

    pub fn finish(self) -> Digest {
        Digest(self.inner.finalize().into())
    }
}

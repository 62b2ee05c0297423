//! Checksums protecting persisted pool configuration.

use std::error::Error;
use std::fmt;
use std::hash::Hasher;
use twox_hash::XxHash64;

/// This is the error that will be returned when a checksum does not match.
#[derive(Debug)]
pub struct ChecksumError;

impl fmt::Display for ChecksumError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Failed to verify the integrity")
    }
}

impl Error for ChecksumError {}

/// `XxHash` contains a digest of `xxHash`
/// which is an "extremely fast non-cryptographic hash algorithm"
/// (<https://github.com/Cyan4973/xxHash>)
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct XxHash(u64);

impl XxHash {
    /// Size of the serialized digest in bytes.
    pub const SIZE: usize = 8;

    /// Computes the digest of `data`.
    pub fn of(data: &[u8]) -> Self {
        let mut state = XxHashState::new();
        state.ingest(data);
        state.finish()
    }

    /// Verifies that `data` has this digest.
    pub fn verify(&self, data: &[u8]) -> Result<(), ChecksumError> {
        if *self == XxHash::of(data) {
            Ok(())
        } else {
            Err(ChecksumError)
        }
    }
}

/// The internal state of `XxHash`.
pub struct XxHashState(XxHash64);

impl XxHashState {
    /// Starts a new digest.
    pub fn new() -> Self {
        XxHashState(XxHash64::with_seed(0))
    }

    /// Ingests the given data into the state.
    pub fn ingest(&mut self, data: &[u8]) {
        self.0.write(data);
    }

    /// Builds the digest.
    pub fn finish(self) -> XxHash {
        XxHash(self.0.finish())
    }
}

impl Default for XxHashState {
    fn default() -> Self {
        XxHashState::new()
    }
}

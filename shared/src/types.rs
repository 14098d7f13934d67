use std::fmt::{Display, Formatter};

/// Hash identifying a round's content. Two observations carrying the same
/// fingerprint describe the same round.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Round metadata as observed on one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundState {
    pub index: u64,
    /// Required count of leading zero hex digits.
    pub difficulty: u32,
    pub fingerprint: Fingerprint,
    pub miner: String,
    pub halted: bool,
}

impl RoundState {
    /// The round a worker searches for when this one is the latest on chain.
    pub fn next_index(&self) -> u64 {
        self.index.saturating_add(1)
    }
}

/// A nonce/hash pair reported by a search worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Solution {
    pub nonce: u64,
    pub hash: [u8; 32],
}

impl Solution {
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    pub fn leading_zeros(&self) -> u32 {
        crate::utils::count_leading_hex_zeros(&self.hash)
    }

    pub fn meets(&self, difficulty: u32) -> bool {
        self.leading_zeros() >= difficulty
    }
}

impl Display for Solution {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, \"{}\"]", self.nonce, self.hash_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub succeeded: bool,
    pub error: Option<String>,
}

impl SubmissionOutcome {
    pub fn success() -> Self {
        Self { succeeded: true, error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { succeeded: false, error: Some(error.into()) }
    }
}

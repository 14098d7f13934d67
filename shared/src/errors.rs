use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FarmError {
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed ledger entry: {0}")]
    MalformedEntry(String),
    #[error("xdr: {0}")]
    Xdr(#[from] stellar_xdr::curr::Error),
    #[error("strkey: {0}")]
    StrKey(String),
    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),
    #[error("fail to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("submission failed for nonce {nonce}: {detail}")]
    Submission { nonce: u64, detail: String },
    #[error("config: {0}")]
    Config(String),
}

impl FarmError {
    /// Errors a control loop may log and retry on its next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FarmError::Rpc { .. }
                | FarmError::Transport(_)
                | FarmError::MalformedEntry(_)
                | FarmError::Xdr(_)
                | FarmError::StrKey(_)
                | FarmError::Timeout(..)
                | FarmError::Spawn(_)
        )
    }
}

pub type FarmResult<T> = Result<T, FarmError>;

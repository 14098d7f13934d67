use std::{future::Future, time::Duration};

use tokio::time::sleep;

use crate::errors::{FarmError, FarmResult};

pub const RETRY_TIMES: u32 = 3;
pub const RETRY_DELAY: u64 = 300;

/// Re-runs `retry_fn` until it succeeds or `max_retries` extra attempts are used.
pub async fn retry<T, E, F, Fut>(retry_fn: F, max_retries: u32, delay: u64) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    F: Fn() -> Fut,
    E: std::fmt::Debug, {
    let mut retries = 0;
    let d = Duration::from_millis(delay);
    loop {
        match retry_fn().await {
            Ok(value) => return Ok(value),
            Err(err) if retries < max_retries => {
                retries += 1;
                tracing::debug!("attempt {retries}/{max_retries} failed: {err:?}");
                sleep(d).await;
            }
            Err(err) => {
                return Err(err);
            }
        }
    }
}

/// Bounds `fut` by `limit`, mapping expiry to [`FarmError::Timeout`].
pub async fn with_deadline<T, Fut>(what: &'static str, limit: Duration, fut: Fut) -> FarmResult<T>
where
    Fut: Future<Output = FarmResult<T>>, {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(FarmError::Timeout(what, limit)),
    }
}

/// Number of leading `0` hex digits of `hash`.
pub fn count_leading_hex_zeros(hash: &[u8]) -> u32 {
    let mut count = 0;
    for byte in hash {
        if *byte == 0 {
            count += 2;
            continue;
        }
        if *byte < 0x10 {
            count += 1;
        }
        break;
    }
    count
}

use serde::Deserialize;
use shared::types::Solution;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Diagnostic(Vec<u8>),
    Found(Solution),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Solution(Solution),
    NotDecodable,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NonceField {
    Number(u64),
    Text(String),
}

/// Decodes one output chunk as a `[nonce, "hash"]` record.
pub fn try_decode(chunk: &[u8]) -> Decoded {
    let Ok((nonce, hash)) = serde_json::from_slice::<(NonceField, String)>(chunk.trim_ascii()) else {
        return Decoded::NotDecodable;
    };

    let nonce = match nonce {
        NonceField::Number(n) => n,
        NonceField::Text(text) => match text.trim().parse() {
            Ok(n) => n,
            Err(_) => return Decoded::NotDecodable,
        },
    };

    let mut bytes = [0u8; 32];
    match hex::decode_to_slice(hash.trim_start_matches("0x"), &mut bytes) {
        Ok(()) => Decoded::Solution(Solution { nonce, hash: bytes }),
        Err(_) => Decoded::NotDecodable,
    }
}

/// Pull-based view over one worker's stdout. A chunk is one line of output.
/// Every chunk is surfaced as a diagnostic; the first chunk that decodes as a
/// solution is followed by a single `Found` and then the sequence ends.
pub struct OutputParser<R> {
    reader: R,
    line: Vec<u8>,
    pending: Option<Solution>,
    done: bool,
}

impl<R: AsyncBufRead + Unpin> OutputParser<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, line: Vec::with_capacity(256), pending: None, done: false }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Cancel safe: a partially read line stays buffered for the next call.
    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        if let Some(solution) = self.pending.take() {
            self.done = true;
            return Some(WorkerEvent::Found(solution));
        }
        if self.done {
            return None;
        }

        match self.reader.read_until(b'\n', &mut self.line).await {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                let chunk = std::mem::take(&mut self.line);
                if let Decoded::Solution(solution) = try_decode(&chunk) {
                    self.pending = Some(solution);
                }
                Some(WorkerEvent::Diagnostic(chunk))
            }
            Err(err) => {
                warn!("worker output closed: {err}");
                self.done = true;
                None
            }
        }
    }
}

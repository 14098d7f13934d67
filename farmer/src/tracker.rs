use shared::types::RoundState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    NewRound,
    SameRound,
    Halted,
}

/// Only the fingerprint decides whether a round changed; index, difficulty
/// and miner are carried along but never compared.
pub fn classify(previous: Option<&RoundState>, current: &RoundState) -> Classification {
    if current.halted {
        return Classification::Halted;
    }
    match previous {
        Some(previous) if previous.fingerprint == current.fingerprint => Classification::SameRound,
        _ => Classification::NewRound,
    }
}

#[derive(Debug, Default)]
pub struct RoundTracker {
    last: Option<RoundState>,
}

impl RoundTracker {
    pub fn last(&self) -> Option<&RoundState> {
        self.last.as_ref()
    }

    /// Classifies `current` and adopts it as last-known on a new round.
    pub fn observe(&mut self, current: RoundState) -> Classification {
        let class = classify(self.last.as_ref(), &current);
        if class == Classification::NewRound {
            self.last = Some(current);
        }
        class
    }
}

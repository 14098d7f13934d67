use std::time::Duration;

use shared::{
    chain::ChainClient,
    errors::{FarmError, FarmResult},
    types::{Fingerprint, RoundState, Solution},
};
use tokio::{
    sync::broadcast,
    time::{self, MissedTickBehavior},
};
use tracing::*;

use crate::{
    parser::WorkerEvent,
    submitter::Submitter,
    supervisor::{WorkerHandle, WorkerSupervisor},
    tracker::{Classification, RoundTracker},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FarmStats {
    pub ticks: u64,
    pub read_failures: u64,
    pub rounds: u64,
    pub submissions: u64,
}

/// The control loop. Every piece of mutable state lives here and is touched
/// only from the loop's own continuation; the active worker's output parser
/// lives inside its handle, so replacing the handle drops the old output.
pub struct Farmer<C, S> {
    chain: C,
    submitter: S,
    supervisor: WorkerSupervisor,
    tracker: RoundTracker,
    worker: Option<WorkerHandle>,
    halted: bool,
    solved: Option<Fingerprint>,
    poll_interval: Duration,
    stats: FarmStats,
}

impl<C: ChainClient, S: Submitter> Farmer<C, S> {
    pub fn new(chain: C, submitter: S, supervisor: WorkerSupervisor, poll_interval: Duration) -> Self {
        Self {
            chain,
            submitter,
            supervisor,
            tracker: RoundTracker::default(),
            worker: None,
            halted: false,
            solved: None,
            poll_interval,
            stats: FarmStats::default(),
        }
    }

    pub fn stats(&self) -> FarmStats {
        self.stats
    }

    pub fn last_round(&self) -> Option<&RoundState> {
        self.tracker.last()
    }

    pub fn worker(&self) -> Option<&WorkerHandle> {
        self.worker.as_ref()
    }

    pub fn spawned(&self) -> u64 {
        self.supervisor.spawned()
    }

    /// Polls and reacts until shutdown is signalled or a submission fails.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> FarmResult<FarmStats> {
        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                Ok(()) = shutdown.recv() => {
                    info!("shutdown requested");
                    break Ok(self.stats);
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
                event = next_worker_event(&mut self.worker), if self.consuming() => {
                    if let Err(err) = self.handle_event(event).await {
                        break Err(err);
                    }
                }
            }
        };

        self.retire_worker();
        match &result {
            Ok(stats) => info!("farmer stopped: {stats:?}"),
            Err(err) => error!("farmer halted, no further rounds will be polled: {err}"),
        }
        result
    }

    /// One poll: read, classify, replace or recover the worker.
    /// Returns `None` when the round state could not be read.
    pub async fn tick(&mut self) -> Option<Classification> {
        self.stats.ticks += 1;

        let round = match self.chain.read_round_state().await {
            Ok(round) => round,
            Err(err) => {
                self.stats.read_failures += 1;
                if err.is_transient() {
                    warn!("fail to read round state, skipping tick: {err}");
                } else {
                    error!("round state unreadable, skipping tick: {err}");
                }
                return None;
            }
        };

        let was_halted = self.halted;
        self.halted = round.halted;
        let class = self.tracker.observe(round);

        match class {
            Classification::NewRound => {
                if let Some(round) = self.tracker.last().cloned() {
                    self.stats.rounds += 1;
                    info!("new round {} ({}), difficulty {}", round.index, round.fingerprint, round.difficulty);
                    self.start_worker(&round);
                }
            }
            Classification::Halted => {
                if !was_halted {
                    warn!("farm is paused, holding the current worker");
                }
            }
            Classification::SameRound => {
                if was_halted {
                    info!("farm resumed");
                }
                trace!("same round");
            }
        }

        if class != Classification::NewRound {
            self.recover();
        }
        Some(class)
    }

    /// Handles one event from the active worker; `Ok(false)` when nothing is left to read.
    pub async fn pump(&mut self) -> FarmResult<bool> {
        if !self.consuming() {
            return Ok(false);
        }
        let event = next_worker_event(&mut self.worker).await;
        let more = event.is_some();
        self.handle_event(event).await?;
        Ok(more)
    }

    fn consuming(&self) -> bool {
        self.worker.as_ref().map_or(false, |worker| !worker.output_done())
    }

    fn start_worker(&mut self, round: &RoundState) {
        let existing = self.worker.take();
        match self.supervisor.ensure_worker_for(round, existing) {
            Ok(handle) => self.worker = Some(handle),
            Err(err) => error!("worker for round {} not started: {err}", round.next_index()),
        }
    }

    /// Restarts a worker that died without a round change.
    fn recover(&mut self) {
        if self.halted {
            return;
        }
        let Some(round) = self.tracker.last().cloned() else {
            return;
        };
        if self.solved == Some(round.fingerprint) {
            return;
        }
        let alive = self.worker.as_mut().map_or(false, |worker| worker.is_alive());
        if !alive {
            info!("no live worker for round {}, starting one", round.next_index());
            self.start_worker(&round);
        }
    }

    fn retire_worker(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            let status = worker.terminate();
            let ran = shared::timestamp() - worker.started_at();
            debug!("worker for round {} retired after {ran}ms ({status:?})", worker.target_index());
        }
    }

    async fn handle_event(&mut self, event: Option<WorkerEvent>) -> FarmResult<()> {
        match event {
            None => {
                if let Some(worker) = self.worker.as_mut() {
                    let status = worker.refresh();
                    debug!("output of worker for round {} ended ({status:?})", worker.target_index());
                }
                Ok(())
            }
            Some(WorkerEvent::Diagnostic(chunk)) => {
                self.log_diagnostic(&chunk);
                Ok(())
            }
            Some(WorkerEvent::Found(solution)) => self.claim(solution).await,
        }
    }

    async fn claim(&mut self, solution: Solution) -> FarmResult<()> {
        self.retire_worker();

        let Some(round) = self.tracker.last().cloned() else {
            warn!("solution {solution} arrived without a known round");
            return Ok(());
        };
        self.solved = Some(round.fingerprint);

        if !solution.meets(round.difficulty) {
            warn!(
                "solution has {} leading zeros, round asks for {}",
                solution.leading_zeros(),
                round.difficulty
            );
        }

        let outcome = self.submitter.submit(&round, &solution).await;
        if outcome.succeeded {
            self.stats.submissions += 1;
            return Ok(());
        }

        let detail = outcome.error.unwrap_or_else(|| "unknown error".to_string());
        error!(
            "unsent solution for round {}: nonce={} hash={}",
            round.next_index(),
            solution.nonce,
            solution.hash_hex()
        );
        Err(FarmError::Submission { nonce: solution.nonce, detail })
    }

    fn log_diagnostic(&self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        let text = text.trim_end();
        if text.is_empty() {
            return;
        }
        let target = self.worker.as_ref().map(|w| w.target_index()).unwrap_or_default();
        if text.starts_with("Hashrate") {
            info!("[round {target}] {text}");
        } else {
            debug!("[round {target}] {text}");
        }
    }
}

async fn next_worker_event(worker: &mut Option<WorkerHandle>) -> Option<WorkerEvent> {
    match worker {
        Some(worker) => worker.next_event().await,
        None => std::future::pending().await,
    }
}

use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use colored::*;
use shared::{
    errors::FarmError,
    types::{RoundState, Solution, SubmissionOutcome},
    utils::with_deadline,
};
use tokio::process::Command;
use tracing::*;

use crate::config::{FarmerConfig, SubmitCommand};

/// Claims a round with a found solution. Called at most once per solution.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, round: &RoundState, solution: &Solution) -> SubmissionOutcome;
}

/// Submits through the ledger's command-line client (`contract invoke`).
pub struct CliSubmitter {
    command: SubmitCommand,
    contract: String,
    network: String,
    source: String,
    message: String,
    miner: String,
}

impl CliSubmitter {
    pub fn from_config(cfg: &FarmerConfig) -> Self {
        Self {
            command: cfg.submit.clone(),
            contract: cfg.contract.clone(),
            network: cfg.network.clone(),
            source: cfg.source.clone(),
            message: cfg.message.clone(),
            miner: cfg.miner.clone(),
        }
    }

    pub fn invocation_args(&self, solution: &Solution) -> Vec<String> {
        [
            "contract",
            "invoke",
            "--id",
            self.contract.as_str(),
            "--network",
            self.network.as_str(),
            "--source",
            self.source.as_str(),
            "--",
            self.command.function.as_str(),
            "--hash",
            solution.hash_hex().as_str(),
            "--message",
            self.message.as_str(),
            "--nonce",
            solution.nonce.to_string().as_str(),
            "--miner",
            self.miner.as_str(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.command.timeout_secs)
    }
}

#[async_trait]
impl Submitter for CliSubmitter {
    async fn submit(&self, round: &RoundState, solution: &Solution) -> SubmissionOutcome {
        info!("submitting {solution} for round {}", round.next_index());

        let invoke = async {
            Command::new(&self.command.program)
                .args(self.invocation_args(solution))
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|err| FarmError::Submission {
                    nonce: solution.nonce,
                    detail: format!("fail to run {}: {err}", self.command.program),
                })
        };

        let output = match with_deadline("submission", self.timeout(), invoke).await {
            Ok(output) => output,
            Err(err) => return SubmissionOutcome::failure(err.to_string()),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.success() {
            info!("{} round {} claimed: {}", "OK".bold().green(), round.next_index(), stdout.trim());
            SubmissionOutcome::success()
        } else {
            let detail = format!("{}: stderr: {} stdout: {}", output.status, stderr.trim(), stdout.trim());
            error!("submission failed, {detail}");
            SubmissionOutcome::failure(detail)
        }
    }
}

use std::{fs::File, path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

const DEFAULT_MESSAGE: &str = "KALE";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FarmerConfig {
    pub rpc: String,
    /// `C...` id of the farm contract.
    pub contract: String,
    /// Identity credited with found blocks.
    pub miner: String,
    #[serde(default = "default_message")]
    pub message: String,
    pub network: String,
    /// Signing identity name understood by the submission CLI.
    pub source: String,
    pub worker: WorkerCommand,
    #[serde(default)]
    pub submit: SubmitCommand,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
}

/// Search worker executable and any leading arguments; the round arguments are
/// appended per launch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SubmitCommand {
    pub program: String,
    pub function: String,
    pub timeout_secs: u64,
}

impl Default for SubmitCommand {
    fn default() -> Self {
        Self { program: "stellar".to_string(), function: "mine".to_string(), timeout_secs: 60 }
    }
}

fn default_message() -> String {
    DEFAULT_MESSAGE.to_string()
}

fn default_poll_interval() -> u64 {
    1_000
}

fn default_rpc_timeout() -> u64 {
    10
}

impl FarmerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be positive");
        }
        if self.worker.program.trim().is_empty() {
            anyhow::bail!("worker.program can not be empty");
        }
        if self.submit.timeout_secs == 0 {
            anyhow::bail!("submit.timeout_secs must be positive");
        }
        shared::xdr::decode_contract(&self.contract)
            .with_context(|| format!("invalid contract id `{}`", self.contract))?;
        Ok(())
    }
}

pub fn load_config_file<P>(config_file: P) -> anyhow::Result<FarmerConfig>
where
    P: AsRef<Path>, {
    let path = config_file.as_ref();
    let file = File::open(path).with_context(|| format!("{} config file not found", path.display()))?;
    let config = parse_config(file)?;
    Ok(config)
}

fn parse_config<R: std::io::Read>(reader: R) -> anyhow::Result<FarmerConfig> {
    let config: FarmerConfig = serde_json::from_reader(reader).context("fail to parse config")?;
    config.validate()?;
    Ok(config)
}

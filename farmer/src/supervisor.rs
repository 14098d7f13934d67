use std::process::Stdio;

use nix::{
    errno::Errno,
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use shared::{
    errors::{FarmError, FarmResult},
    types::{Fingerprint, RoundState},
};
use tokio::{
    io::BufReader,
    process::{Child, ChildStdout, Command},
};
use tracing::*;

use crate::{
    config::WorkerCommand,
    parser::{OutputParser, WorkerEvent},
};

pub type WorkerOutput = OutputParser<BufReader<ChildStdout>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Running,
    Exited,
    Killed,
}

/// One search process and the parser bound to its stdout. The process leads
/// its own process group; terminating the handle kills the whole group.
/// Dropping the handle kills the leader and discards any output it has not yielded.
pub struct WorkerHandle {
    target_index: u64,
    base: Fingerprint,
    difficulty: u32,
    child: Child,
    group: Option<Pid>,
    output: WorkerOutput,
    status: WorkerStatus,
    started_at: i64,
}

impl WorkerHandle {
    /// Round the worker is searching for.
    pub fn target_index(&self) -> u64 {
        self.target_index
    }

    /// Fingerprint of the round the search builds on.
    pub fn base(&self) -> Fingerprint {
        self.base
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    /// Non-blocking check for a process that ended on its own.
    pub fn refresh(&mut self) -> WorkerStatus {
        if self.status == WorkerStatus::Running {
            match self.child.try_wait() {
                Ok(Some(exit)) => {
                    debug!("worker for round {} exited: {exit}", self.target_index);
                    self.status = WorkerStatus::Exited;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!("fail to poll worker for round {}: {err}", self.target_index);
                    self.status = WorkerStatus::Exited;
                }
            }
        }
        self.status
    }

    pub fn is_alive(&mut self) -> bool {
        self.refresh() == WorkerStatus::Running
    }

    /// Requests termination without waiting for the process to exit.
    /// Anything the worker forked is killed along with it, even after the
    /// worker itself has exited.
    pub fn terminate(&mut self) -> WorkerStatus {
        let running = self.refresh() == WorkerStatus::Running;
        self.kill_group();
        if running {
            match self.child.start_kill() {
                Ok(()) => {
                    debug!("kill requested for worker {:?} (round {})", self.pid(), self.target_index);
                    self.status = WorkerStatus::Killed;
                }
                Err(err) => {
                    warn!("fail to kill worker for round {}: {err}", self.target_index);
                    self.refresh();
                }
            }
        }
        self.status
    }

    fn kill_group(&self) {
        let Some(group) = self.group else {
            return;
        };
        match killpg(group, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => warn!("fail to kill process group {group} of round {}: {err}", self.target_index),
        }
    }

    pub fn output_done(&self) -> bool {
        self.output.is_done()
    }

    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        self.output.next_event().await
    }
}

pub struct WorkerSupervisor {
    command: WorkerCommand,
    spawned: u64,
}

impl WorkerSupervisor {
    pub fn new(command: WorkerCommand) -> Self {
        Self { command, spawned: 0 }
    }

    /// Number of worker processes started so far.
    pub fn spawned(&self) -> u64 {
        self.spawned
    }

    pub fn launch_args(round: &RoundState) -> Vec<String> {
        vec![
            "--index".to_string(),
            round.next_index().to_string(),
            "--prev-hash".to_string(),
            round.fingerprint.to_hex(),
            "--target-zeros".to_string(),
            round.difficulty.to_string(),
        ]
    }

    /// Replaces `existing` (terminated unconditionally) with a fresh worker
    /// searching for the round after `round`. Spawn failures are returned,
    /// never retried here.
    pub fn ensure_worker_for(
        &mut self,
        round: &RoundState,
        existing: Option<WorkerHandle>,
    ) -> FarmResult<WorkerHandle> {
        if let Some(mut old) = existing {
            let status = old.terminate();
            info!("retired worker for round {} ({status:?})", old.target_index);
        }

        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .args(Self::launch_args(round))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(FarmError::Spawn)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            FarmError::Spawn(std::io::Error::new(std::io::ErrorKind::Other, "worker stdout not captured"))
        })?;

        self.spawned += 1;
        let group = child.id().and_then(|pid| i32::try_from(pid).ok()).map(Pid::from_raw);
        let handle = WorkerHandle {
            group,
            target_index: round.next_index(),
            base: round.fingerprint,
            difficulty: round.difficulty,
            output: OutputParser::new(BufReader::new(stdout)),
            status: WorkerStatus::Running,
            started_at: shared::timestamp(),
            child,
        };
        info!(
            "worker {:?} searching round {} from {} with {} zeros",
            handle.pid(),
            handle.target_index,
            handle.base,
            handle.difficulty
        );
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn round(index: u64, fp: u8) -> RoundState {
        RoundState {
            index,
            difficulty: 8,
            fingerprint: Fingerprint([fp; 32]),
            miner: "GMINER".to_string(),
            halted: false,
        }
    }

    fn script(body: &str) -> WorkerSupervisor {
        WorkerSupervisor::new(WorkerCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), body.to_string(), "worker".to_string()],
        })
    }

    #[tokio::test]
    async fn worker_receives_next_round_parameters() {
        let mut supervisor = script("echo \"$@\"");
        let mut handle = supervisor.ensure_worker_for(&round(5, 0xaa), None).unwrap();
        assert_eq!(handle.target_index(), 6);
        assert_eq!(handle.base(), Fingerprint([0xaa; 32]));

        let Some(WorkerEvent::Diagnostic(line)) = handle.next_event().await else {
            panic!("expected the echoed arguments");
        };
        let expected = format!("--index 6 --prev-hash {} --target-zeros 8\n", "aa".repeat(32));
        assert_eq!(String::from_utf8(line).unwrap(), expected);
        assert_eq!(handle.next_event().await, None);
    }

    #[tokio::test]
    async fn replacing_kills_the_previous_worker() {
        let mut supervisor = script("exec sleep 30");
        let mut first = supervisor.ensure_worker_for(&round(5, 1), None).unwrap();
        assert!(first.is_alive());

        assert_eq!(first.terminate(), WorkerStatus::Killed);
        let exit = tokio::time::timeout(Duration::from_secs(5), first.child.wait()).await.unwrap().unwrap();
        assert!(!exit.success());
        assert_eq!(first.terminate(), WorkerStatus::Killed);

        let second = supervisor.ensure_worker_for(&round(5, 2), Some(first)).unwrap();
        let mut third = supervisor.ensure_worker_for(&round(6, 3), Some(second)).unwrap();
        assert_eq!(third.status(), WorkerStatus::Running);
        assert!(third.is_alive());
        assert_eq!(third.target_index(), 7);
        assert_eq!(supervisor.spawned(), 3);
    }

    #[tokio::test]
    async fn self_exit_is_detected() {
        let mut supervisor = script("exit 0");
        let mut handle = supervisor.ensure_worker_for(&round(1, 1), None).unwrap();
        assert_eq!(handle.next_event().await, None);
        let _ = tokio::time::timeout(Duration::from_secs(5), handle.child.wait()).await;
        assert_eq!(handle.refresh(), WorkerStatus::Exited);
        assert_eq!(handle.status(), WorkerStatus::Exited);
        assert_eq!(handle.terminate(), WorkerStatus::Exited);
    }

    /// A process counts as gone once it is reaped or left as a zombie.
    fn running(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => !stat.rsplit(')').next().unwrap_or_default().trim_start().starts_with('Z'),
            Err(_) => false,
        }
    }

    async fn forked_pid(handle: &mut WorkerHandle) -> u32 {
        let Some(WorkerEvent::Diagnostic(line)) = handle.next_event().await else {
            panic!("expected the forked pid");
        };
        String::from_utf8(line).unwrap().trim().parse().unwrap()
    }

    async fn gone_within(pid: u32, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if !running(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        !running(pid)
    }

    #[tokio::test]
    async fn replacing_kills_processes_forked_by_the_worker() {
        let mut supervisor = script("sleep 300 & echo $!; wait");
        let mut first = supervisor.ensure_worker_for(&round(5, 1), None).unwrap();
        let forked = forked_pid(&mut first).await;
        assert!(running(forked));

        let mut second = supervisor.ensure_worker_for(&round(5, 2), Some(first)).unwrap();
        assert!(gone_within(forked, Duration::from_secs(2)).await, "pid {forked} outlived its worker");

        let forked_again = forked_pid(&mut second).await;
        assert!(running(forked_again), "the replacement is untouched");
        second.terminate();
        assert!(gone_within(forked_again, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn exited_worker_leaves_no_forked_processes() {
        // the leader exits on its own while its child keeps running
        let mut supervisor = script("sleep 300 & echo $!");
        let mut handle = supervisor.ensure_worker_for(&round(1, 1), None).unwrap();
        let forked = forked_pid(&mut handle).await;
        let _ = tokio::time::timeout(Duration::from_secs(5), handle.child.wait()).await;
        assert!(running(forked));

        assert_eq!(handle.terminate(), WorkerStatus::Exited);
        assert!(gone_within(forked, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn spawn_failure_is_surfaced() {
        let mut supervisor = WorkerSupervisor::new(WorkerCommand {
            program: "/nonexistent/kale-worker".to_string(),
            args: vec![],
        });
        assert!(matches!(supervisor.ensure_worker_for(&round(1, 1), None), Err(FarmError::Spawn(_))));
        assert_eq!(supervisor.spawned(), 0);
    }
}

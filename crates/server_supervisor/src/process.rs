//! Supervision of the dedicated server process.
//!
//! At most one server process is tracked. An exit-watcher task owns the
//! `Child`; it clears the slot when the process ends on its own, or kills
//! the process when asked to. Console output is pumped line by line into
//! the shared [`ServerLogBuffer`].

use crate::error::{Result, ServerError};
use crate::logs::{LogKind, ServerLogBuffer};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Identifies one spawned server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTicket {
    pub generation: u64,
    pub pid: Option<u32>,
}

struct RunningProcess {
    ticket: ProcessTicket,
    kill: Option<oneshot::Sender<()>>,
    exited: watch::Receiver<bool>,
}

pub struct ProcessSupervisor {
    slot: Arc<Mutex<Option<RunningProcess>>>,
    generation: AtomicU64,
    logs: Arc<ServerLogBuffer>,
}

impl ProcessSupervisor {
    pub fn new(logs: Arc<ServerLogBuffer>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
            logs,
        }
    }

    pub fn logs(&self) -> &Arc<ServerLogBuffer> {
        &self.logs
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<RunningProcess>> {
        lock(&self.slot)
    }

    pub fn is_alive(&self) -> bool {
        self.lock_slot().is_some()
    }

    pub fn current(&self) -> Option<ProcessTicket> {
        self.lock_slot().as_ref().map(|running| running.ticket)
    }

    /// Spawns `program` and starts tracking it. The caller is expected to
    /// have killed any previous process first.
    pub fn spawn(&self, program: &Path, args: &[String], cwd: &Path) -> Result<ProcessTicket> {
        let mut child = command(program, args, cwd)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ServerError::Spawn {
                program: program.to_path_buf(),
                source,
            })?;

        pump_output(&mut child, &self.logs);

        let ticket = ProcessTicket {
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            pid: child.id(),
        };
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = watch::channel(false);

        {
            let mut slot = self.lock_slot();
            if let Some(previous) = slot.take() {
                warn!(
                    "Dropping tracked server process {:?}; it will be killed",
                    previous.ticket.pid
                );
            }
            *slot = Some(RunningProcess {
                ticket,
                kill: Some(kill_tx),
                exited: exited_rx,
            });
        }

        info!("Server process started (pid {:?})", ticket.pid);

        let slot = Arc::clone(&self.slot);
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => info!("Server process {:?} exited with {}", ticket.pid, status),
                    Err(e) => warn!("Failed to wait for server process {:?}: {}", ticket.pid, e),
                },
                _ = kill_rx => {
                    debug!("Killing server process {:?}", ticket.pid);
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill server process {:?}: {}", ticket.pid, e);
                    }
                }
            }

            {
                let mut slot = lock(&slot);
                if slot
                    .as_ref()
                    .is_some_and(|running| running.ticket.generation == ticket.generation)
                {
                    *slot = None;
                }
            }
            let _ = exited_tx.send(true);
        });

        Ok(ticket)
    }

    /// Kills the tracked process and waits until it is gone. Returns
    /// `false` when nothing was running.
    pub async fn kill(&self) -> bool {
        let running = self.lock_slot().take();
        let Some(mut running) = running else {
            return false;
        };

        if let Some(kill) = running.kill.take() {
            let _ = kill.send(());
        }
        let _ = running.exited.wait_for(|exited| *exited).await;
        info!("Server process {:?} stopped", running.ticket.pid);
        true
    }

    /// Resolves once the tracked process, if any, has exited.
    pub async fn wait_for_exit(&self) {
        let exited = self.lock_slot().as_ref().map(|running| running.exited.clone());
        if let Some(mut exited) = exited {
            let _ = exited.wait_for(|exited| *exited).await;
        }
    }
}

/// Runs a helper program to completion, capturing its output into `logs`.
pub async fn run_to_completion(
    program: &Path,
    args: &[String],
    cwd: &Path,
    logs: &Arc<ServerLogBuffer>,
) -> Result<ExitStatus> {
    let mut child = command(program, args, cwd)
        .spawn()
        .map_err(|source| ServerError::Spawn {
            program: program.to_path_buf(),
            source,
        })?;

    let pumps = pump_output(&mut child, logs);
    let status = child
        .wait()
        .await
        .map_err(|e| ServerError::io(program, e))?;
    for pump in pumps {
        let _ = pump.await;
    }
    Ok(status)
}

fn command(program: &Path, args: &[String], cwd: &Path) -> Command {
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    command
}

fn pump_output(child: &mut Child, logs: &Arc<ServerLogBuffer>) -> Vec<JoinHandle<()>> {
    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(pump_lines(stdout, LogKind::Log, Arc::clone(logs)));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(pump_lines(stderr, LogKind::Error, Arc::clone(logs)));
    }
    pumps
}

fn pump_lines<R>(reader: R, kind: LogKind, logs: Arc<ServerLogBuffer>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match kind {
                LogKind::Log => info!(target: "cs2", "{}", line),
                LogKind::Error => warn!(target: "cs2", "{}", line),
            }
            logs.push(kind, line);
        }
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

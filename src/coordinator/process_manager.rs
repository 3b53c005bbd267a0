//! Resource host process management.
//!
//! Spawns the resource host as a child process (same binary with the hidden
//! `worker` subcommand), wires its pipes, and kills it on drop.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use async_trait::async_trait;
use crossbeam_channel::{Receiver, Sender};
use llama_relay_types::{decode_line, encode_line, HostCommand, HostEvent};
use tokio::sync::mpsc;

use super::lifecycle::HostManager;

/// Program and arguments used to start a resource host.
#[derive(Debug, Clone)]
pub struct HostCommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl HostCommandLine {
    /// The current executable in worker mode.
    pub fn current_exe(db_path: &str) -> Result<Self, String> {
        let program =
            std::env::current_exe().map_err(|e| format!("Cannot find own executable: {e}"))?;
        Ok(Self {
            program,
            args: vec!["worker".to_string(), "--db-path".to_string(), db_path.to_string()],
        })
    }
}

/// A live child plus the sender feeding its stdin writer thread.
struct HostProcess {
    child: Child,
    command_tx: Sender<String>,
}

/// Manages the resource host child process lifecycle.
pub struct ProcessManager {
    process: Mutex<Option<HostProcess>>,
    command_line: HostCommandLine,
    events: mpsc::UnboundedSender<HostEvent>,
    /// Bumped on every spawn; a reader only reports `Exited` for its own.
    generation: Arc<AtomicU64>,
    spawn_count: AtomicU32,
}

impl ProcessManager {
    /// Host events from every child this manager spawns are sent on `events`.
    pub fn new(command_line: HostCommandLine, events: mpsc::UnboundedSender<HostEvent>) -> Self {
        Self {
            process: Mutex::new(None),
            command_line,
            events,
            generation: Arc::new(AtomicU64::new(0)),
            spawn_count: AtomicU32::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<HostProcess>> {
        self.process.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of times a host was spawned, restarts included.
    pub fn spawn_count(&self) -> u32 {
        self.spawn_count.load(Ordering::Relaxed)
    }

    pub fn is_alive(&self) -> bool {
        let mut guard = self.lock();
        let Some(process) = guard.as_mut() else {
            return false;
        };
        match process.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                log::warn!("Resource host exited with {status}");
                *guard = None;
                false
            }
            Err(e) => {
                log::error!("Failed to poll resource host: {e}");
                false
            }
        }
    }

    /// Kill the host immediately. The OS reclaims everything it held.
    pub fn kill(&self) {
        let mut guard = self.lock();
        if let Some(mut process) = guard.take() {
            log::info!("Killing resource host (pid {})", process.child.id());
            let _ = process.child.kill();
            let _ = process.child.wait(); // Reap
        }
    }

    fn spawn(&self) -> Result<(), String> {
        let mut guard = self.lock();
        if let Some(mut old) = guard.take() {
            let _ = old.child.kill();
            let _ = old.child.wait();
        }

        let mut child = spawn_host(&self.command_line)?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err("Resource host pipes not available".to_string());
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (command_tx, command_rx) = crossbeam_channel::unbounded::<String>();
        thread::Builder::new()
            .name("host-stdin".to_string())
            .spawn(move || stdin_writer(command_rx, stdin))
            .map_err(|e| format!("Failed to start stdin writer: {e}"))?;

        let events = self.events.clone();
        let current = self.generation.clone();
        thread::Builder::new()
            .name("host-stdout".to_string())
            .spawn(move || stdout_reader(stdout, events, generation, current))
            .map_err(|e| format!("Failed to start stdout reader: {e}"))?;

        let count = self.spawn_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count > 1 {
            log::info!("Resource host restarted (restart #{})", count - 1);
        }
        *guard = Some(HostProcess { child, command_tx });
        Ok(())
    }
}

#[async_trait]
impl HostManager for ProcessManager {
    async fn exists(&self) -> bool {
        self.is_alive()
    }

    async fn create(&self) -> Result<(), String> {
        self.spawn()
    }

    fn dispatch(&self, command: HostCommand) -> Result<(), String> {
        let line = encode_line(&command).map_err(|e| format!("Serialize error: {e}"))?;
        let guard = self.lock();
        let process = guard
            .as_ref()
            .ok_or_else(|| "resource host not running".to_string())?;
        process
            .command_tx
            .send(line)
            .map_err(|_| "resource host stdin closed".to_string())
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        self.kill();
    }
}

fn spawn_host(command_line: &HostCommandLine) -> Result<Child, String> {
    log::info!(
        "Spawning resource host: {} {}",
        command_line.program.display(),
        command_line.args.join(" ")
    );

    Command::new(&command_line.program)
        .args(&command_line.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit()) // Host logs go to our stderr
        .spawn()
        .map_err(|e| format!("Failed to spawn resource host: {e}"))
}

/// Thread that writes command lines to the host's stdin.
fn stdin_writer(commands: Receiver<String>, mut stdin: ChildStdin) {
    for line in commands {
        if writeln!(stdin, "{line}").and_then(|_| stdin.flush()).is_err() {
            log::warn!("Failed to write to resource host stdin");
            break;
        }
    }
    log::debug!("Stdin writer thread exiting");
}

/// Thread that parses host event lines. Reports `Exited` when the pipe closes,
/// unless a newer host has been spawned since.
fn stdout_reader(
    stdout: ChildStdout,
    events: mpsc::UnboundedSender<HostEvent>,
    generation: u64,
    current: Arc<AtomicU64>,
) {
    let reader = BufReader::new(stdout);
    for line in reader.lines() {
        match line {
            Ok(l) if l.trim().is_empty() => {}
            Ok(l) => match decode_line::<HostEvent>(&l) {
                Ok(event) => {
                    if events.send(event).is_err() {
                        return;
                    }
                }
                Err(e) => log::warn!("Failed to parse resource host event: {e}"),
            },
            Err(e) => {
                log::error!("Resource host stdout read error: {e}");
                break;
            }
        }
    }
    if current.load(Ordering::SeqCst) == generation {
        let _ = events.send(HostEvent::Exited);
    } else {
        log::debug!("Stale resource host #{generation} closed its stdout");
    }
}

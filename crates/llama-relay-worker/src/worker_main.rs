//! Resource host process entry point.
//!
//! Runs as a child process spawned by the coordinator. Reads JSON commands
//! from stdin, drives the inference engine, and writes JSON events to stdout.
//! All log output goes to stderr (inherited by parent).
//!
//! Thread design:
//! - Thread 0 (stdin reader): reads lines → command channel
//! - Thread 1 (main loop): selects between commands and background results, writes to stdout
//! - Thread 2 (background, temporary): runs engine init or one job

use std::io::{self, BufRead, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{self, Receiver, Sender};
use llama_relay_db::Database;
use llama_relay_types::{decode_line, encode_line, HostCommand, HostEvent};

use crate::engine::{EchoEngine, InferenceEngine};
use crate::output_buffer::{chunk_text, BoundaryRule, OutputChunkBuffer};

/// Delay between simulated load steps of the bundled engine.
const ECHO_STEP_DELAY: Duration = Duration::from_millis(150);

type SharedEngine = Arc<Mutex<Box<dyn InferenceEngine>>>;

/// Results reported by the temporary background thread.
enum Background {
    Event(HostEvent),
    InitDone(Result<(), String>),
    JobDone(Result<String, String>),
}

enum Incoming {
    Command(Option<String>),
    Background(Option<Background>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Initializing,
    Ready,
}

/// Run the resource host against the process's stdin/stdout.
pub fn run_worker(db_path: &str) {
    log::info!("Starting resource host (pid={})", std::process::id());

    // The coordinator owns the database; the host only reads its config.
    let boundary = match Database::open_read_only(db_path) {
        Ok(db) => BoundaryRule::from_config(db.load_config().boundary_chars.as_deref()),
        Err(e) => {
            log::warn!("Could not read config from {db_path}, using default boundaries: {e}");
            BoundaryRule::Default
        }
    };

    let (command_tx, command_rx) = crossbeam_channel::unbounded::<String>();

    // Thread 0: stdin reader
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) if !l.trim().is_empty() => {
                    if command_tx.send(l).is_err() {
                        break; // Main loop exited
                    }
                }
                Ok(_) => {}
                Err(_) => break, // stdin closed (parent died)
            }
        }
        log::debug!("Stdin reader thread exiting");
    });

    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    serve(
        command_rx,
        &mut stdout,
        Box::new(EchoEngine::new(ECHO_STEP_DELAY)),
        boundary,
    );

    log::info!("Resource host exiting");
}

/// Main loop: one command or background result at a time, events written in
/// the order they are produced.
///
/// Returns on `Shutdown`, on a write failure, or once the command channel is
/// closed and no background work is left.
pub fn serve<W: Write>(
    commands: Receiver<String>,
    out: &mut W,
    engine: Box<dyn InferenceEngine>,
    boundary: BoundaryRule,
) {
    let engine: SharedEngine = Arc::new(Mutex::new(engine));
    let (bg_tx, bg_rx) = crossbeam_channel::unbounded::<Background>();

    let mut phase = Phase::Idle;
    let mut job_running = false;
    let mut commands_open = true;

    loop {
        let busy = phase == Phase::Initializing || job_running;
        if !commands_open && !busy {
            break;
        }

        let command_rx = if commands_open {
            commands.clone()
        } else {
            crossbeam_channel::never()
        };

        let incoming = crossbeam_channel::select! {
            recv(command_rx) -> msg => Incoming::Command(msg.ok()),
            recv(bg_rx) -> msg => Incoming::Background(msg.ok()),
        };

        let event = match incoming {
            Incoming::Command(None) => {
                log::info!("Command channel closed");
                commands_open = false;
                None
            }
            Incoming::Command(Some(line)) => {
                let command: HostCommand = match decode_line(&line) {
                    Ok(c) => c,
                    Err(e) => {
                        log::warn!("Failed to parse command: {e}");
                        continue;
                    }
                };

                match command {
                    HostCommand::Shutdown => {
                        log::info!("Shutdown requested");
                        break;
                    }
                    HostCommand::InitResource { resource_locator } => match phase {
                        Phase::Initializing => Some(HostEvent::AlreadyInitializing),
                        Phase::Ready => Some(HostEvent::ResourceReady),
                        Phase::Idle => {
                            log::info!("Loading resource: {resource_locator}");
                            phase = Phase::Initializing;
                            spawn_init(engine.clone(), resource_locator, bg_tx.clone());
                            None
                        }
                    },
                    HostCommand::RunJob { input } => {
                        if phase != Phase::Ready {
                            Some(HostEvent::RunError {
                                error: "resource not loaded".to_string(),
                            })
                        } else if job_running {
                            Some(HostEvent::RunError {
                                error: "a job is already running".to_string(),
                            })
                        } else {
                            log::info!("Starting job: input_len={}", input.len());
                            job_running = true;
                            spawn_job(engine.clone(), boundary.clone(), input, bg_tx.clone());
                            None
                        }
                    }
                }
            }
            // Unreachable while bg_tx is alive in this frame.
            Incoming::Background(None) => None,
            Incoming::Background(Some(background)) => Some(match background {
                Background::Event(event) => event,
                Background::InitDone(Ok(())) => {
                    log::info!("Resource loaded");
                    phase = Phase::Ready;
                    HostEvent::ResourceReady
                }
                Background::InitDone(Err(error)) => {
                    log::error!("Resource load failed: {error}");
                    phase = Phase::Idle;
                    HostEvent::InitError { error }
                }
                Background::JobDone(Ok(output)) => {
                    job_running = false;
                    HostEvent::JobResult { output }
                }
                Background::JobDone(Err(error)) => {
                    log::warn!("Job failed: {error}");
                    job_running = false;
                    HostEvent::RunError { error }
                }
            }),
        };

        if let Some(event) = event {
            if !write_event(out, &event) {
                break;
            }
        }
    }
}

fn spawn_init(engine: SharedEngine, resource_locator: String, tx: Sender<Background>) {
    thread::spawn(move || {
        let progress_tx = tx.clone();
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut engine = lock_engine(&engine)?;
            engine.init(&resource_locator, &mut |percent| {
                let _ = progress_tx.send(Background::Event(HostEvent::ResourceProgress {
                    percent: percent.min(100),
                }));
            })
        }));
        let done = result.unwrap_or_else(|panic| Err(format!("init panicked: {}", panic_message(panic.as_ref()))));
        let _ = tx.send(Background::InitDone(done));
    });
}

fn spawn_job(engine: SharedEngine, boundary: BoundaryRule, input: String, tx: Sender<Background>) {
    thread::spawn(move || {
        let result = catch_unwind(AssertUnwindSafe(|| run_job(&engine, boundary, &input, &tx)));
        let done = result.unwrap_or_else(|panic| Err(format!("job panicked: {}", panic_message(panic.as_ref()))));
        let _ = tx.send(Background::JobDone(done));
    });
}

/// Run one job, relaying buffered chunks as they flush. The buffer is
/// emptied at the end even when the engine fails part-way.
fn run_job(
    engine: &SharedEngine,
    boundary: BoundaryRule,
    input: &str,
    tx: &Sender<Background>,
) -> Result<String, String> {
    let mut engine = lock_engine(engine)?;
    let mut buffer = OutputChunkBuffer::new(boundary);
    let mut output: Vec<u8> = Vec::new();

    let send_chunk = |chunk: Vec<u8>| {
        let _ = tx.send(Background::Event(HostEvent::JobChunk {
            text: chunk_text(&chunk),
        }));
    };

    let result = engine.run(input, &mut |unit| {
        output.extend_from_slice(unit);
        if let Some(chunk) = buffer.push(unit) {
            send_chunk(chunk);
        }
    });

    if let Some(rest) = buffer.finish() {
        send_chunk(rest);
    }

    result.map(|()| chunk_text(&output))
}

fn lock_engine(
    engine: &SharedEngine,
) -> Result<std::sync::MutexGuard<'_, Box<dyn InferenceEngine>>, String> {
    engine
        .lock()
        .map_err(|_| "engine unavailable after an earlier panic".to_string())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Write a JSON event line, flushing immediately. `false` when the parent is gone.
fn write_event<W: Write>(out: &mut W, event: &HostEvent) -> bool {
    let json = match encode_line(event) {
        Ok(json) => json,
        Err(e) => {
            log::error!("Failed to serialize event: {e}");
            return true;
        }
    };
    if writeln!(out, "{json}").and_then(|()| out.flush()).is_err() {
        log::error!("Failed to write to stdout, parent gone");
        return false;
    }
    true
}

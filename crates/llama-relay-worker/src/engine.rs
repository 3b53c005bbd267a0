//! Inference engine interface.
//!
//! The engine is an external collaborator: the worker only needs "load this
//! resource, reporting progress" and "run this input, streaming units".

use std::path::Path;
use std::thread;
use std::time::Duration;

/// Locators with this scheme are served by [`EchoEngine`] without touching disk.
pub const ECHO_SCHEME: &str = "echo://";

pub trait InferenceEngine: Send {
    /// Load the resource. `progress` receives percentages in `0..=100`.
    fn init(&mut self, resource_locator: &str, progress: &mut dyn FnMut(u8)) -> Result<(), String>;

    /// Run one job, handing each output unit to `emit` as it is produced.
    fn run(&mut self, input: &str, emit: &mut dyn FnMut(&[u8])) -> Result<(), String>;
}

/// Stand-in engine that "loads" in ten progress steps and answers every
/// input by echoing it back one character at a time.
///
/// `echo://` locators always load; anything else must be an existing file.
#[derive(Debug, Default)]
pub struct EchoEngine {
    loaded: Option<String>,
    step_delay: Duration,
}

impl EchoEngine {
    pub fn new(step_delay: Duration) -> Self {
        Self {
            loaded: None,
            step_delay,
        }
    }

    pub fn loaded_resource(&self) -> Option<&str> {
        self.loaded.as_deref()
    }
}

impl InferenceEngine for EchoEngine {
    fn init(&mut self, resource_locator: &str, progress: &mut dyn FnMut(u8)) -> Result<(), String> {
        let locator = resource_locator.trim();
        if locator.is_empty() {
            return Err("empty resource locator".to_string());
        }
        if !locator.starts_with(ECHO_SCHEME) && !Path::new(locator).is_file() {
            return Err(format!("resource not found: {locator}"));
        }

        for step in 0..=10u8 {
            progress(step * 10);
            if step < 10 && !self.step_delay.is_zero() {
                thread::sleep(self.step_delay);
            }
        }

        self.loaded = Some(locator.to_string());
        Ok(())
    }

    fn run(&mut self, input: &str, emit: &mut dyn FnMut(&[u8])) -> Result<(), String> {
        if self.loaded.is_none() {
            return Err("no resource loaded".to_string());
        }
        if input.trim().is_empty() {
            return Err("empty input".to_string());
        }

        let reply = format!("Echo: {input}");
        let mut buf = [0u8; 4];
        for c in reply.chars() {
            emit(c.encode_utf8(&mut buf).as_bytes());
        }
        Ok(())
    }
}

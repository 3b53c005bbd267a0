//! log4rs setup for the three process roles.

use chrono::Local;
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} - {l} - {m}{n}";
const WORKER_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} - {l} - [host] {m}{n}";

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// Stderr plus a timestamped file under `logs/`.
    ConsoleAndFile,
    /// Stderr only. Stdout carries the resource host's IPC.
    StderrOnly,
}

/// Parse a `--log-level` value, falling back to `Info`.
pub fn parse_level(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::Info)
}

pub fn setup_logging(target: LogTarget, level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    let pattern = match target {
        LogTarget::ConsoleAndFile => LOG_PATTERN,
        LogTarget::StderrOnly => WORKER_PATTERN,
    };
    let console = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .build();

    let mut builder =
        Config::builder().appender(Appender::builder().build("console", Box::new(console)));
    let mut root = Root::builder().appender("console");

    if target == LogTarget::ConsoleAndFile {
        let log_dir = "logs";
        std::fs::create_dir_all(log_dir)?;
        let timestamp = Local::now().format("%Y-%m-%d-%H_%M").to_string();
        let log_path = format!("{log_dir}/{timestamp}.log");

        let file_appender = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
            .build(log_path)?;
        builder = builder.appender(Appender::builder().build("file", Box::new(file_appender)));
        root = root.appender("file");
    }

    let config = builder.build(root.build(level))?;
    log4rs::init_config(config)?;

    Ok(())
}

//! Logging setup — a console sink plus a single backend log file, mirroring
//! the level/console toggle exposed by `logging.*` in [`crate::config`].

use anyhow::{Context, Result};
use simplelog::{ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger, TerminalMode, WriteLogger};
use std::fs::File;

use crate::config::LoggingConfig;

fn parse_level(level: &str) -> LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

/// Initialize the global logger. `log_dir` holds `node.log`; pass the VFS
/// root's parent so logs survive next to (but outside) the replicated tree.
pub fn setup_logger(cfg: &LoggingConfig, log_dir: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(log_dir).context("failed to create log directory")?;

    let level = parse_level(&cfg.level);

    let term_config = ConfigBuilder::new()
        .set_time_offset_to_local()
        .unwrap()
        .build();
    let file_config = ConfigBuilder::new()
        .set_time_offset_to_local()
        .unwrap()
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();

    if cfg.console_output {
        loggers.push(TermLogger::new(
            level,
            term_config,
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ));
    }

    let log_file = File::create(log_dir.join("node.log")).context("failed to create log file")?;
    loggers.push(WriteLogger::new(level, file_config, log_file));

    CombinedLogger::init(loggers).ok();
    log::info!("logging initialized at level {:?}", level);
    Ok(())
}

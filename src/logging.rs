//! Logging setup, `log4rs`-rolling-file style, keyed by repository rather than by database
//! name.

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::Path;

const ENCODER_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
const ROLL_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const ROLL_WINDOW: u32 = 5;

/// Initialize console-only logging at `level`, for short-lived CLI invocations that don't want
/// a log file (e.g. `--help`-equivalent paths).
///
/// # Errors
/// Returns an error if a logger is already installed.
pub fn init_console(level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    let encoder = Box::new(PatternEncoder::new(ENCODER_PATTERN));
    let console = ConsoleAppender::builder().encoder(encoder).build();
    let config = Config::builder()
        .appender(Appender::builder().build("console", Box::new(console)))
        .build(Root::builder().appender("console").build(level))?;
    log4rs::init_config(config)?;
    Ok(())
}

/// Initialize rolling-file logging at `<repo_root>/logs/bkpcore.log`, rotating at
/// [`ROLL_SIZE_BYTES`] with [`ROLL_WINDOW`] retained archives.
///
/// # Errors
/// Returns an error if the log directory cannot be created or the logger fails to initialize.
pub fn init_for_repository(repo_root: &Path, level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = repo_root.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let encoder = || Box::new(PatternEncoder::new(ENCODER_PATTERN));
    let log_path = log_dir.join("bkpcore.log");
    let archive_pattern = log_dir.join("bkpcore.{}.log.gz").to_string_lossy().into_owned();
    let policy = CompoundPolicy::new(
        Box::new(SizeTrigger::new(ROLL_SIZE_BYTES)),
        Box::new(FixedWindowRoller::builder().build(&archive_pattern, ROLL_WINDOW)?),
    );
    let file_appender =
        RollingFileAppender::builder().encoder(encoder()).build(&log_path, Box::new(policy))?;

    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(file_appender)))
        .build(Root::builder().appender("file").build(level))?;
    log4rs::init_config(config)?;
    Ok(())
}

use std::fs::File;
use std::io::Write;
use std::path::Path;

use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Started-marker and INFO-level log of a unit.
pub const INFO_LOG_FILE: &str = "execution_info.log";
/// Full log of a unit.
pub const DEBUG_LOG_FILE: &str = "execution_debug.log";

/// Install the process-wide subscriber. `RUST_LOG` overrides `fallback`.
/// Calling it twice is harmless.
pub fn init(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Per-unit logger: mirrors every line to tracing and to the unit's
/// `execution_info.log` / `execution_debug.log`.
#[derive(Debug)]
pub struct UnitLog {
    test: String,
    info_file: Option<File>,
    debug_file: Option<File>,
}

impl UnitLog {
    /// Open the log files in `report_dir`. Files that cannot be created
    /// are skipped; logging then goes to tracing only.
    pub fn open(test: impl Into<String>, report_dir: Option<&Path>) -> Self {
        let test = test.into();
        let create = |name: &str| {
            let dir = report_dir?;
            match File::create(dir.join(name)) {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!(test = %test, error = %e, "could not create {name}");
                    None
                }
            }
        };
        let info_file = create(INFO_LOG_FILE);
        let debug_file = create(DEBUG_LOG_FILE);
        Self {
            test,
            info_file,
            debug_file,
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(Level::DEBUG, message);
    }

    pub fn info(&self, message: &str) {
        self.log(Level::INFO, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(Level::WARN, message);
    }

    pub fn error(&self, message: &str) {
        self.log(Level::ERROR, message);
    }

    fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => error!(test = %self.test, "{message}"),
            Level::WARN => warn!(test = %self.test, "{message}"),
            Level::INFO => info!(test = %self.test, "{message}"),
            _ => debug!(test = %self.test, "{message}"),
        }

        let line = format!(
            "{} {} {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            level,
            message
        );
        if let Some(file) = &self.debug_file {
            append(file, &line);
        }
        if level <= Level::INFO
            && let Some(file) = &self.info_file
        {
            append(file, &line);
        }
    }
}

fn append(mut file: &File, line: &str) {
    let _ = file.write_all(line.as_bytes());
}

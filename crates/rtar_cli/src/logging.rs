use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use miette::{IntoDiagnostic, Result};
use rustyline_async::SharedWriter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

use crate::prompt_writer::PromptWriter;

const DEBUG_FILTER: &str = "rtar_core=debug,rtar_cli=debug,warn";
const INFO_FILTER: &str = "rtar_core=info,rtar_cli=info,warn";

const LOG_PREFIX: &str = "rtar-debug";
const LOG_SUFFIX: &str = "log";

fn filter_for(debug: bool) -> EnvFilter {
    EnvFilter::new(if debug { DEBUG_FILTER } else { INFO_FILTER })
}

/// Default location of the debug log file
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rtar")
        .join("logs")
}

/// Runtime handle on the log level
pub struct LogControl {
    filter: reload::Handle<EnvFilter, Registry>,
    debug: AtomicBool,
    log_files: Option<PathBuf>,
    terminal: PromptWriter,
    _guard: Option<WorkerGuard>,
}

impl LogControl {
    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::SeqCst)
    }

    /// Switch between debug and info output, returning the new state
    pub fn toggle_debug(&self) -> Result<bool> {
        let debug = !self.is_debug();
        self.filter.reload(filter_for(debug)).into_diagnostic()?;
        self.debug.store(debug, Ordering::SeqCst);
        Ok(debug)
    }

    /// Print log lines above the console prompt
    pub fn attach_prompt(&self, prompt: SharedWriter) {
        self.terminal.attach(prompt);
    }

    pub fn detach_prompt(&self) {
        self.terminal.detach();
    }

    /// Naming pattern of the dated debug log files, when file logging is on
    pub fn log_files(&self) -> Option<&Path> {
        self.log_files.as_deref()
    }
}

/// Daily appender writing `rtar-debug.<date>.log` under `log_dir`
fn file_appender(log_dir: &Path) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix(LOG_SUFFIX)
        .build(log_dir)
        .into_diagnostic()
}

/// The files `file_appender` produces, with the date left as a placeholder
fn log_file_pattern(log_dir: &Path) -> PathBuf {
    log_dir.join(format!("{}.YYYY-MM-DD.{}", LOG_PREFIX, LOG_SUFFIX))
}

/// Install the global subscriber.
///
/// Terminal output goes through `terminal`. With `debug` on, everything is
/// also written to a daily rolling file under `log_dir` without colors.
pub fn init(debug: bool, terminal: PromptWriter, log_dir: &Path) -> Result<LogControl> {
    let (filter, handle) = reload::Layer::new(filter_for(debug));

    let terminal_layer = fmt::layer()
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_timer(fmt::time::LocalTime::rfc_3339())
        .with_writer(terminal.clone())
        .compact();

    let (file_layer, guard, log_files) = if debug {
        std::fs::create_dir_all(log_dir).into_diagnostic()?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender(log_dir)?);
        let layer = fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_timer(fmt::time::LocalTime::rfc_3339())
            .with_ansi(false)
            .with_writer(non_blocking);
        (Some(layer), Some(guard), Some(log_file_pattern(log_dir)))
    } else {
        (None, None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(terminal_layer)
        .with(file_layer)
        .try_init()
        .into_diagnostic()?;

    Ok(LogControl {
        filter: handle,
        debug: AtomicBool::new(debug),
        log_files,
        terminal,
        _guard: guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_log_files_are_dated() {
        let dir = tempfile::tempdir().unwrap();
        let mut appender = file_appender(dir.path()).unwrap();
        appender.write_all(b"line\n").unwrap();
        appender.flush().unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        let name = &names[0];
        assert!(name.starts_with("rtar-debug.") && name.ends_with(".log"));
        assert_eq!(name.len(), "rtar-debug.YYYY-MM-DD.log".len());

        let pattern = log_file_pattern(dir.path());
        assert_eq!(
            pattern.file_name().unwrap().to_string_lossy(),
            "rtar-debug.YYYY-MM-DD.log"
        );
    }
}

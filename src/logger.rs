//! Logging support.
//!
//! Call sites use the `tracing` macros; records are drained through the
//! `log` facade by `flexi_logger`. On a tty, records are colored and
//! timestamped; otherwise each record becomes one journald-compatible line
//! with a `<n>` syslog priority prefix.

use flexi_logger::{style, DeferredNow, Level, Logger, Record};
use libc::{isatty, STDOUT_FILENO};
use std::{io::Write, sync::OnceLock};

const DEFAULT_LOG_LEVEL: &str = "info";

/// Initializes the global logger.
///
/// # Panics
///
/// If the logger fails to initialize.
pub fn init() {
    static LOGGER: OnceLock<flexi_logger::LoggerHandle> = OnceLock::new();
    LOGGER.get_or_init(|| {
        Logger::try_with_env_or_str(DEFAULT_LOG_LEVEL)
            .expect("failed to initialize logger")
            .format(format)
            .start()
            .expect("failed to initialize the logger")
    });
}

fn format(
    w: &mut dyn Write,
    now: &mut DeferredNow,
    record: &Record<'_>,
) -> Result<(), std::io::Error> {
    if unsafe { isatty(STDOUT_FILENO) } == 0 {
        return journald_format(w, record);
    }
    let line = format!(
        "[{}] {:<5} {}:{} {}",
        now.now().format("%y-%m-%d %H:%M:%S%.3f"),
        record.level(),
        record.file().unwrap_or("?"),
        record.line().unwrap_or(0),
        record.args()
    );
    write!(w, "{}", style(record.level()).paint(line))
}

/// Renders a record as a single systemd new-style daemon line.
///
/// Journald treats every line of a daemon's output as one record and reads
/// a leading `<n>` as its syslog priority, so multi-line messages are
/// flattened before writing.
fn journald_format(w: &mut dyn Write, record: &Record<'_>) -> Result<(), std::io::Error> {
    let mut message = record.args().to_string();
    if message.contains(['\n', '\r']) {
        message = message.replace(['\n', '\r'], " ");
    }
    writeln!(
        w,
        "<{}>[{}:{}] {}",
        journald_priority(record.level()),
        record.file().unwrap_or("?"),
        record.line().unwrap_or(0),
        message.trim()
    )
}

fn journald_priority(level: Level) -> u8 {
    match level {
        Level::Error => 3,
        Level::Warn => 4,
        Level::Info => 5,
        Level::Debug => 6,
        Level::Trace => 7,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Arguments;

    fn render(level: Level, args: Arguments<'_>) -> String {
        let record = Record::builder()
            .args(args)
            .level(level)
            .file(Some("src/daemon.rs"))
            .line(Some(42))
            .build();
        let mut out = Vec::new();
        journald_format(&mut out, &record).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn journald_lines_carry_priority_and_location() {
        assert_eq!(
            render(Level::Error, format_args!("publish failed")),
            "<3>[src/daemon.rs:42] publish failed\n"
        );
        assert_eq!(render(Level::Trace, format_args!("tick")), "<7>[src/daemon.rs:42] tick\n");
    }

    #[test]
    fn multi_line_messages_are_flattened() {
        assert_eq!(
            render(Level::Info, format_args!("first\r\nsecond\n")),
            "<5>[src/daemon.rs:42] first  second\n"
        );
    }
}

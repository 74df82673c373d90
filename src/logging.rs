//! Stage diagnostics on stderr.
//!
//! ```text
//! 2024-05-02 10:15:03 (INFO) (add_id) reading file data/tasks.json
//! 2024-05-02 10:15:03 (ERROR) (add_id) unexpected failure: first line
//!   (==) second line
//! ```
//!
//! [`init_logging`] also routes panic reports, with their stack trace,
//! through the same format.

use env_logger::{Env, Target};
use log::{Level, error, warn};
use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt::{self, Write as _};
use std::io::Write;
use std::panic::{self, Location};

/// Initializes the logger by setting its filter and template.
/// By default, the logging level is set to `INFO`.
/// This can be overridden by setting the `RUST_LOG` environment variable.
pub fn init_logging() {
    if env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Stderr)
        .format(|buf, record| {
            let t = chrono::Local::now();
            let t = format!("{}", t.format("%Y-%m-%d %H:%M:%S"));
            let text = format_record(
                &t,
                record.level(),
                record.target(),
                &record.args().to_string(),
            );
            buf.write_all(text.as_bytes())
        })
        .try_init()
        .is_err()
    {
        warn!("Unable to initialize logging -- has it already been initialized?");
        return;
    }
    panic::set_hook(Box::new(|info| {
        let report = panic_report(
            panic_message(info.payload()),
            info.location(),
            &Backtrace::force_capture(),
        );
        error!(target: "panic", "{report}");
    }));
}

/// Text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "panic with a non-string payload"
    }
}

/// Multi-line panic report: message, location and stack trace.
#[must_use]
pub fn panic_report(
    message: &str,
    location: Option<&Location<'_>>,
    trace: &dyn fmt::Display,
) -> String {
    let mut out = format!("panicked: {message}");
    if let Some(location) = location {
        let _ = write!(out, " at {location}");
    }
    let _ = write!(out, "\nstack trace:\n{trace}");
    out.trim_end().to_string()
}

/// One log record: a header line, then `  (==) `-prefixed continuation
/// lines for multi-line messages.
#[must_use]
pub fn format_record(timestamp: &str, level: Level, target: &str, message: &str) -> String {
    let mut lines = message.lines();
    let first = lines.next().unwrap_or_default();
    let mut out = format!("{timestamp} ({level}) ({target}) {first}\n");
    for line in lines {
        let _ = writeln!(out, "  (==) {line}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line() {
        assert_eq!(
            format_record("2024-01-01 00:00:00", Level::Info, "stage", "started"),
            "2024-01-01 00:00:00 (INFO) (stage) started\n"
        );
    }

    #[test]
    fn panic_report_is_logged_as_one_record() {
        let location = Location::caller();
        let report = panic_report("boom", Some(location), &"0: main\n1: start");
        assert!(report.starts_with(&format!("panicked: boom at {location}\n")));

        let line = format_record("T", Level::Error, "panic", &report);
        let lines: Vec<&str> = line.lines().collect();
        assert!(lines[0].starts_with("T (ERROR) (panic) panicked: boom at "));
        assert_eq!(&lines[1..], ["  (==) stack trace:", "  (==) 0: main", "  (==) 1: start"]);
    }

    #[test]
    fn panic_payloads() {
        let text: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(text.as_ref()), "static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "panic with a non-string payload");
    }

    #[test]
    fn continuation_lines() {
        assert_eq!(
            format_record("T", Level::Error, "stage", "failed:\ncause one\ncause two"),
            "T (ERROR) (stage) failed:\n  (==) cause one\n  (==) cause two\n"
        );
    }
}

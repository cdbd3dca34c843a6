use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Structured terminal logger; the `log` facade is bridged onto it in the
/// binary via `slog-scope`/`slog-stdlog`.
pub fn setup_logging(level: &str) -> Result<slog::Logger, sloggers::Error> {
    let severity = match level.to_ascii_lowercase().as_str() {
        "trace" => Severity::Trace,
        "debug" => Severity::Debug,
        "warn" | "warning" => Severity::Warning,
        "error" => Severity::Error,
        _ => Severity::Info,
    };
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(severity);
    builder.destination(Destination::Stderr);
    builder.build()
}

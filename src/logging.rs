//! Default logger construction, grounded on `flux::logging::init()`
//! (`examples/SleepingPills-bushhammer/server/lib/flux/src/logging.rs`),
//! which builds its `slog::Logger` from a `sloggers` terminal-sink config
//! rather than hand-rolling a drain. `qmon` builds the same sink directly
//! through `sloggers`'s builder API instead of round-tripping through a TOML
//! string (the teacher parses its config with `serdeconv::from_toml_str`,
//! a dependency this crate has no other use for); nothing here needs a
//! config file in the first place (spec.md §6: no persisted state, no
//! environment variables consumed by the core).

use slog::Logger;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// `Monitor::new`'s default logger: a stderr terminal sink, matching the
/// teacher's `type = "terminal", destination = "stderr"` config. Falls back
/// to a discarding logger if the sink itself can't be built (e.g. stderr is
/// unavailable) rather than panicking out of a constructor — `Monitor::new`
/// has no error variant for a logging failure and shouldn't gain one.
pub(crate) fn default_logger() -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(Severity::Info);
    builder.destination(Destination::Stderr);

    builder.build().unwrap_or_else(|_| Logger::root(slog::Discard, slog::o!()))
}

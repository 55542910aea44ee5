//! Diagnostic logging handles.
//!
//! Nothing in watchrun installs a process-wide logger. Each component is
//! handed a [`Logger`] instead: a shared [`log::Log`] sink plus the target its
//! records are tagged with. The binary builds the sink with `env_logger`;
//! tests and embedders can pass any other implementation.

use std::{env, fmt, io::Write, sync::Arc};

use env_logger::{Builder, Target};
use log::{Level, LevelFilter, Log, Metadata, Record};

/// Environment variable holding `env_logger`-style filter directives.
///
/// Applied on top of the verbosity given on the command line, e.g.
/// `WATCHRUN_LOG=watchrun::controller=trace`.
pub const FILTER_ENV: &str = "WATCHRUN_LOG";

const ROOT_TARGET: &str = "watchrun";

/// Cloneable handle writing diagnostics to an injected sink.
#[derive(Clone)]
pub struct Logger {
    target: &'static str,
    sink: Arc<dyn Log>,
}

impl Logger {
    pub fn new(sink: Arc<dyn Log>) -> Self {
        Self {
            target: ROOT_TARGET,
            sink,
        }
    }

    /// Logger printing `*** message` lines to stderr.
    ///
    /// `verbosity` is the number of `-v` flags: warnings and errors are always
    /// shown, each flag adds one more level.
    pub fn stderr(verbosity: u64) -> Self {
        let level = match verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let mut builder = Builder::new();
        builder
            .format(|buf, record| writeln!(buf, "*** {}", record.args()))
            .filter_level(level)
            .target(Target::Stderr);

        if let Ok(filters) = env::var(FILTER_ENV) {
            builder.parse_filters(&filters);
        }

        Self::new(Arc::new(builder.build()))
    }

    /// Logger that drops everything.
    pub fn discard() -> Self {
        Self::new(Arc::new(Discard))
    }

    /// Same sink, different target.
    pub fn scoped(&self, target: &'static str) -> Self {
        Self {
            target,
            sink: Arc::clone(&self.sink),
        }
    }

    pub fn target(&self) -> &'static str {
        self.target
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let metadata = Metadata::builder()
            .level(level)
            .target(self.target)
            .build();

        if !self.sink.enabled(&metadata) {
            return;
        }

        self.sink.log(
            &Record::builder()
                .metadata(metadata)
                .args(args)
                .build(),
        );
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    pub fn trace(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Trace, args);
    }

    pub fn flush(&self) {
        self.sink.flush();
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("target", &self.target)
            .finish()
    }
}

struct Discard;

impl Log for Discard {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        false
    }

    fn log(&self, _: &Record<'_>) {}

    fn flush(&self) {}
}

//! Last-resort error reporting.
use std::io::{self, Write};
use tracing::error;

/// Sends a fatal message to every diagnostic sink, then ends the process.
///
/// The tracing error channel is always a sink; more can be added with
/// [`FatalErrorReporter::with_sink`]. Callers must release any storage they
/// hold before calling [`FatalErrorReporter::fatal`], since exiting skips
/// destructors.
pub struct FatalErrorReporter {
    sinks: Vec<Box<dyn Write>>,
}

impl Default for FatalErrorReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl FatalErrorReporter {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Adds standard error as a sink.
    pub fn with_stderr(self) -> Self {
        self.with_sink(io::stderr())
    }

    pub fn with_sink(mut self, sink: impl Write + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Writes `message` to every sink. A sink that cannot be written to is
    /// skipped.
    pub fn report(&mut self, message: &str) {
        error!("{message}");
        for sink in &mut self.sinks {
            let _ = writeln!(sink, "{message}");
            let _ = sink.flush();
        }
    }

    /// Reports `message` and exits with a failure status.
    pub fn fatal(mut self, message: &str) -> ! {
        self.report(message);
        std::process::exit(1)
    }
}

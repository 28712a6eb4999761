//! # sessionlens-logging
//!
//! Logging for sessionlens.
//!
//! Two separate concerns live here:
//!
//! - [`init_tracing`] installs the global `tracing` subscriber used by every
//!   crate for diagnostics, optionally mirrored to a daily log file.
//! - [`Logger`] renders live watch notifications ([`LogEvent`]) for people
//!   watching a terminal.
//!
//! ## Log Formats
//!
//! - `Pretty` - Human-readable colored output
//! - `JSON` - Structured JSON lines
//! - `Compact` - Minimal text output

mod events;

pub use events::{LogEvent, LogFormat, Logger};

use std::path::Path;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

/// File name prefix of the rolling diagnostics log.
pub const LOG_FILE_PREFIX: &str = "sessionlens.log";

/// Initialize tracing for the application.
///
/// Console output goes to stderr. When `log_dir` is set, JSON lines are also
/// written to a daily-rotated file there; keep the returned guard alive until
/// exit so buffered lines are flushed.
pub fn init_tracing(level: &str, format: LogFormat, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer(format, std::io::stderr, true))
        .init();

    guard
}

/// The console fmt layer for `format`, writing to `writer`.
fn console_layer<S, W>(format: LogFormat, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_target(false)
        .with_ansi(ansi)
        .with_writer(writer);
    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Buffer {
        type Writer = Buffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture(format: LogFormat) -> String {
        let buffer = Buffer::default();
        let subscriber = tracing_subscriber::registry().with(console_layer(format, buffer.clone(), false));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("scan", root = "projects");
            let _entered = span.enter();
            tracing::info!(sessions = 3, "scan finished");
        });

        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_console_layer_formats_differ() {
        let pretty = capture(LogFormat::Pretty);
        let compact = capture(LogFormat::Compact);
        let json = capture(LogFormat::Json);

        assert!(pretty.contains("scan{root=\"projects\"}"));
        assert!(compact.contains("scan finished"));
        assert!(!compact.contains("scan{"));
        assert!(json.contains("\"message\":\"scan finished\""));
        assert_ne!(pretty, compact);
    }
}

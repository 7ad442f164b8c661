//! Process-wide diagnostic warn sink.
//!
//! The core calls [`warn`] for diagnostic events only, never as a
//! control-flow mechanism. The backend is pluggable and injected through
//! [`set_sink`], with exactly one initialization point per process; when
//! nothing was configured, the first warning lazily installs the tracing
//! backend.

use once_cell::sync::OnceCell;

use crate::error::{InstrumentError, Result};

/// A diagnostic sink backend.
pub trait LogSink: Send + Sync {
    /// Emit one warning message.
    fn warn(&self, message: &str);
}

/// Routes warnings to the `tracing` subscriber. The default backend.
pub struct TracingSink;

impl LogSink for TracingSink {
    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
    }
}

/// Routes warnings straight to stderr.
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn warn(&self, message: &str) {
        eprintln!("{message}");
    }
}

static SINK: OnceCell<Box<dyn LogSink>> = OnceCell::new();

/// Install the process-wide sink.
///
/// Fails with [`InstrumentError::LoggerInitialized`] when a sink was
/// already installed (explicitly, or lazily by a previous [`warn`]).
pub fn set_sink(sink: Box<dyn LogSink>) -> Result<()> {
    SINK.set(sink)
        .map_err(|_| InstrumentError::LoggerInitialized)
}

/// Emit one warning through the process-wide sink.
pub fn warn(message: &str) {
    SINK.get_or_init(|| Box::new(TracingSink)).warn(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink(Arc<AtomicUsize>);

    impl LogSink for CountingSink {
        fn warn(&self, _message: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    // One test only: the sink is process-wide, so installation and the
    // double-init rejection have to be observed in a single sequence.
    #[test]
    fn test_sink_installs_once_and_receives_warnings() {
        let count = Arc::new(AtomicUsize::new(0));
        let first = set_sink(Box::new(CountingSink(Arc::clone(&count))));

        warn("probe skipped");
        warn("candidate unreachable");

        if first.is_ok() {
            assert_eq!(count.load(Ordering::SeqCst), 2);
        }
        let err = set_sink(Box::new(ConsoleSink)).unwrap_err();
        assert!(matches!(err, InstrumentError::LoggerInitialized));
    }
}

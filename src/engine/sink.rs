//! Output sink
//!
//! Where conditioned raw samples (hybrid mode) and scheduler predictions go.
//! Both paths emit while holding the engine lock, so implementations must
//! return quickly and must not call back into the engine.

use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::sample::Position;

/// Origin of an emitted position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmissionSource {
    /// Conditioned raw sample passed straight through
    Raw,
    /// Scheduler prediction
    Predicted,
}

/// One output position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Emission {
    /// Output position
    pub position: Position,
    /// Host time (ms) the position is for
    pub timestamp: f64,
    /// Producer or scheduler
    pub source: EmissionSource,
}

/// Receiver for engine output
#[cfg_attr(test, mockall::automock)]
pub trait OutputSink: Send + Sync {
    /// Deliver one emission
    fn emit(&self, emission: Emission);
}

impl<F> OutputSink for F
where
    F: Fn(Emission) + Send + Sync,
{
    fn emit(&self, emission: Emission) {
        self(emission)
    }
}

impl OutputSink for Sender<Emission> {
    fn emit(&self, emission: Emission) {
        match self.try_send(emission) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                trace!("Output channel full, dropping {:?} emission", dropped.source);
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!("Output channel disconnected");
            }
        }
    }
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn emit(&self, _emission: Emission) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn emission(x: f64) -> Emission {
        Emission {
            position: (x, 0.0),
            timestamp: x,
            source: EmissionSource::Raw,
        }
    }

    #[test]
    fn test_closure_sink() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let sink = move |_e: Emission| {
            counter.fetch_add(1, Ordering::Relaxed);
        };
        sink.emit(emission(1.0));
        sink.emit(emission(2.0));
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_channel_sink_never_blocks() {
        let (tx, rx) = bounded(1);
        tx.emit(emission(1.0));
        // Full: dropped instead of blocking
        tx.emit(emission(2.0));
        assert_eq!(rx.try_recv().unwrap(), emission(1.0));
        assert!(rx.try_recv().is_err());

        drop(rx);
        tx.emit(emission(3.0));
    }

    #[test]
    fn test_emission_json() {
        let json = serde_json::to_string(&Emission {
            position: (1.5, -2.0),
            timestamp: 10.0,
            source: EmissionSource::Predicted,
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"position":[1.5,-2.0],"timestamp":10.0,"source":"predicted"}"#
        );
    }
}

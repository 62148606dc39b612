//! Process-wide error reporting
//!
//! Failures that happen inside a connection (handler errors, room misuse,
//! transport trouble) never propagate across task boundaries. They are
//! handed to one [`ErrorSink`] per server instead.

use crate::connection::ConnectionId;
use crate::error::ServerError;
use std::fmt;
use std::sync::Arc;

/// Receives every error the server recovers from
pub trait ErrorSink: Send + Sync + 'static {
    /// Report an error, with the connection it happened on when there is one
    fn report(&self, error: &ServerError, connection: Option<ConnectionId>);
}

impl<F> ErrorSink for F
where
    F: Fn(&ServerError, Option<ConnectionId>) + Send + Sync + 'static,
{
    fn report(&self, error: &ServerError, connection: Option<ConnectionId>) {
        self(error, connection)
    }
}

/// Default sink: logs through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, error: &ServerError, connection: Option<ConnectionId>) {
        match (error, connection) {
            (ServerError::AdapterUnavailable { .. } | ServerError::InvalidRoomArgument(_), Some(id)) => {
                tracing::warn!(connection = %id, kind = error.kind(), "{}", error)
            }
            (ServerError::AdapterUnavailable { .. } | ServerError::InvalidRoomArgument(_), None) => {
                tracing::warn!(kind = error.kind(), "{}", error)
            }
            (_, Some(id)) => tracing::error!(connection = %id, kind = error.kind(), "{}", error),
            (_, None) => tracing::error!(kind = error.kind(), "{}", error),
        }
    }
}

/// Cloneable handle to the server's error sink
#[derive(Clone)]
pub struct ErrorReporter {
    sink: Arc<dyn ErrorSink>,
}

impl ErrorReporter {
    /// Wrap a sink
    pub fn new<S: ErrorSink>(sink: S) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Report an error
    pub fn report(&self, error: &ServerError, connection: Option<ConnectionId>) {
        self.sink.report(error, connection);
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(TracingSink)
    }
}

impl fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorReporter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closures_are_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let reporter = ErrorReporter::new(move |e: &ServerError, c: Option<ConnectionId>| {
            captured.lock().unwrap().push((e.kind(), c));
        });
        let id = ConnectionId::new();

        reporter.report(&ServerError::invalid_room("42"), Some(id));
        reporter.clone().report(&ServerError::AdapterUnavailable { operation: "leave" }, None);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("invalid_room_argument", Some(id)), ("adapter_unavailable", None)]
        );
    }

    #[test]
    fn test_default_reporter_logs_without_panicking() {
        ErrorReporter::default().report(&ServerError::ControllerNotFound("x.y".into()), None);
    }
}

use serde::{Deserialize, Serialize};

/// Decoded form of the native library's thread-local or connection-local
/// last-error record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeErrorRecord {
    /// Numeric error code reported by the native library.
    pub code: i32,
    /// Subsystem the error originated from.
    pub component: i32,
    /// Severity as reported by the native library.
    pub level: i32,
    /// Human-readable message, when the native library provided one.
    pub message: Option<String>,
}

/// Lookup seam for the native library's per-connection last-error state.
///
/// The marshaling layer consults this after a native call has reported
/// failure through its return value; it never owns or clears the
/// underlying record.
pub trait ErrorContext {
    /// The most recent error the native library recorded for this
    /// connection, if any.
    fn last_error(&self) -> Option<NativeErrorRecord>;
}

/// Error context for call sites that have no owning connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContext;

impl ErrorContext for NoContext {
    fn last_error(&self) -> Option<NativeErrorRecord> {
        None
    }
}

use std::collections::TryReserveError;
use std::ffi::NulError;
use std::fmt;
use std::str::Utf8Error;

use serde::Serialize;
use thiserror::Error;
use tracing::error;
use virtlink_common::error::{ErrorContext, NativeErrorRecord};

/// Payload carried by every native-failure variant of [`VirtlinkError`]:
/// which entry point failed, and what the native library had to say about
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallFailure {
    /// Name of the native entry point that reported the failure.
    pub function: &'static str,
    /// The connection's last-error record at the time of failure, when one
    /// was available.
    pub detail: Option<NativeErrorRecord>,
    /// Host-side explanation for failures detected before any native call.
    pub explanation: Option<String>,
}

impl CallFailure {
    /// Capture the failure payload for `function`, consulting the owning
    /// connection's last-error state.
    pub fn capture(function: &'static str, ctx: &dyn ErrorContext) -> Self {
        error!(function, "native call failed");
        CallFailure {
            function,
            detail: ctx.last_error(),
            explanation: None,
        }
    }

    /// Failure payload explained host-side, with no native record behind
    /// it.
    pub fn explained(function: &'static str, explanation: impl Into<String>) -> Self {
        let explanation = explanation.into();
        error!(function, %explanation, "native call rejected");
        CallFailure {
            function,
            detail: None,
            explanation: Some(explanation),
        }
    }

    fn text(&self) -> Option<&str> {
        self.detail
            .as_ref()
            .and_then(|d| d.message.as_deref())
            .or(self.explanation.as_deref())
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.text() {
            Some(msg) => write!(f, "call to {} failed: {}", self.function, msg),
            None => write!(f, "call to {} failed", self.function),
        }
    }
}

/// The error type for virtlink marshaling operations
#[derive(Error, Debug)]
pub enum VirtlinkError {
    /// A native call reported failure through its return value
    #[error("{0}")]
    Call(CallFailure),

    /// A getter or enumeration call failed
    #[error("{0}")]
    Retrieve(CallFailure),

    /// A define, assignment, or undefine path rejected its input or failed
    #[error("{0}")]
    Definition(CallFailure),

    /// The native build or connection does not support the requested
    /// feature
    #[error("{0}")]
    NoSupport(CallFailure),

    /// Use of a handle whose native object was already released
    #[error("{0} has been freed")]
    Freed(&'static str),

    /// Reserving host memory for converted results failed
    #[error("host allocation failed: {0}")]
    HostAlloc(#[from] TryReserveError),

    /// A typed parameter carried a type tag this layer does not know
    #[error("invalid typed parameter type {0}")]
    InvalidParamType(i32),

    /// A native string was not valid UTF-8
    #[error("invalid UTF-8 in native string")]
    Utf8(#[from] Utf8Error),

    /// A host string bound for the native side contained a NUL byte
    #[error("string contains an embedded NUL byte")]
    Nul(#[from] NulError),
}

impl VirtlinkError {
    /// Generic failure of a native call, with last-error detail from `ctx`.
    pub fn call(function: &'static str, ctx: &dyn ErrorContext) -> Self {
        VirtlinkError::Call(CallFailure::capture(function, ctx))
    }

    /// Failure of a getter or enumeration call.
    pub fn retrieve(function: &'static str, ctx: &dyn ErrorContext) -> Self {
        VirtlinkError::Retrieve(CallFailure::capture(function, ctx))
    }

    /// Failure on a define or assignment path.
    pub fn definition(function: &'static str, ctx: &dyn ErrorContext) -> Self {
        VirtlinkError::Definition(CallFailure::capture(function, ctx))
    }

    /// Definition failure detected host-side, before any native write.
    pub fn definition_explained(
        function: &'static str,
        explanation: impl Into<String>,
    ) -> Self {
        VirtlinkError::Definition(CallFailure::explained(function, explanation))
    }

    /// The feature behind `function` is not supported here.
    pub fn no_support(function: &'static str, ctx: &dyn ErrorContext) -> Self {
        VirtlinkError::NoSupport(CallFailure::capture(function, ctx))
    }
}

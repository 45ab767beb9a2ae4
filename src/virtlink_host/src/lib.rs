/// Generators for the native call shapes: string-returning, factory,
/// status, and destructor calls.
#[deny(dead_code, missing_docs, unused_mut)]
pub mod call;
/// Dealing with errors, including translation of native failure sentinels.
#[deny(dead_code, missing_docs, unused_mut)]
pub mod error;
/// The backing-pointer cell for host objects wrapping native handles.
#[deny(dead_code, missing_docs, unused_mut)]
pub mod handle;
/// Bulk-listing generators and the owned native list guard.
#[deny(dead_code, missing_docs, unused_mut)]
pub mod list;
/// The typed parameter codec: count-then-fill retrieval and assignment.
#[deny(dead_code, missing_docs, unused_mut)]
pub mod params;
/// Native string guards and conversions.
#[deny(dead_code, missing_docs, unused_mut)]
pub mod strings;
/// Utilities for testing, including a log-capturing logger.
#[cfg(test)]
pub(crate) mod testing;

/// The re-export for the `BufferOwnership` type
pub use call::BufferOwnership;
/// The re-export for the `NativeCall` type
pub use call::NativeCall;
/// The re-export for the `CallFailure` type
pub use error::CallFailure;
/// The re-export for the `VirtlinkError` type
pub use error::VirtlinkError;
/// The re-export for the `HandleCell` type
pub use handle::HandleCell;
/// The re-export for the `ParamKind` type
pub use params::ParamKind;
/// The re-export for the `ParamMap` type
pub use params::ParamMap;
/// The re-export for the `ParamValue` type
pub use params::ParamValue;

/// The result type for virtlink marshaling operations
pub type Result<T> = core::result::Result<T, VirtlinkError>;

//! Re-exports the shared kernel error type under the runtime crate's own
//! `Result` alias, so call sites inside this crate read naturally.

pub use vaultkeep_core::error::{BoxedError, Error, ErrorKind};

/// Result type alias used across the runtime kernel.
pub type Result<T, E = Error> = std::result::Result<T, E>;

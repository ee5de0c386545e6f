#![forbid(unsafe_code)]
//! Shared primitives for the vaultkeep runtime kernel: the structured error
//! type, named wall-clock markers, and the collected process-wide flags.
//!
//! Everything in this crate is deliberately small and dependency-light: it
//! is imported by every other crate in the workspace, including the ones
//! that must stay free of any particular storage engine or HTTP framework.

pub mod error;
pub mod flags;
pub mod timing;

pub use error::{BoxedError, Error, ErrorKind, Result};
pub use flags::RuntimeFlags;
pub use timing::Timestamps;

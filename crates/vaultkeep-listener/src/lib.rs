#![forbid(unsafe_code)]
//! Service listener manager (C8): per-service TLS/TCP listeners, bound and
//! torn down from a single reactor task so listener mutations never race
//! with an in-flight accept loop.

mod manager;

pub use manager::{ListenerManager, ServiceKey, ServiceSpec, TlsMaterial};

#![forbid(unsafe_code)]
//! Opaque Postgres-backed [`vaultkeep_runtime::DbEngine`] adapter (C4's
//! storage-engine side of the black box).
//!
//! The pipe in `vaultkeep-runtime` only knows how to serialize requests;
//! this crate supplies the thing on the other end of it. It deliberately
//! carries no application schema — handlers for individual read/write
//! actions are registered onto a [`PostgresEngine`] at construction time,
//! keeping the concrete database schema out of this workspace per the
//! controller's black-box boundary.

mod config;
mod engine;
mod hooks;

pub use config::PgConfig;
pub use engine::{ConnectionPool, PgPoolStatus, PostgresEngine, PostgresFactory};

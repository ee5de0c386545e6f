#![forbid(unsafe_code)]
//! The shared runtime kernel embedded by both the vaultkeep client and
//! server processes: an in-process pub/sub bus, two job schedulers, two
//! worker-thread pools, a serialising database request pipe, a
//! thread-slot governor, an idle/sleep detector, and the [`Controller`]
//! that composes all of them with two-phase init and shutdown.
//!
//! Concrete storage engines and role-specific daemons are injected at
//! construction time ([`db::DbFactory`], [`controller::RoleHooks`])
//! rather than obtained through subclassing, per the Design Note on
//! re-expressing the source's controller inheritance hierarchy.

pub mod controller;
pub mod db;
pub mod error;
pub mod idle;
pub mod pubsub;
pub mod run_marker;
pub mod scheduler;
pub mod slots;
pub mod workers;

pub use controller::{Controller, DaemonHandle, RoleHooks};
pub use db::{DbArgs, DbEngine, DbFactory, DbPipe, DbValue};
pub use error::{BoxedError, Error, ErrorKind, Result};
pub use idle::{ClientIdleConfig, ClientIdleDetector, IdleDetector, ServerIdleDetector};
pub use pubsub::PubSub;
pub use run_marker::{is_already_running, RunMarker};
pub use scheduler::{JobKind, ScheduledJob, ScheduledJobSnapshot, Scheduler};
pub use slots::ThreadSlots;
pub use workers::{BusyStatus, WorkerPool, WorkerSnapshot};

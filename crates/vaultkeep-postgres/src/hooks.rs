//! Connection lifecycle hooks wired into the deadpool manager.

use deadpool::managed::{HookResult, Metrics};
use diesel::ConnectionResult;
use diesel_async::pooled_connection::PoolError;
use diesel_async::{AsyncConnection, AsyncPgConnection};
use futures::FutureExt;
use futures::future::BoxFuture;

const TRACING_TARGET: &str = "vaultkeep_postgres::pool";

/// Establishes a new connection. Handed to [`diesel_async`]'s
/// `ManagerConfig::custom_setup` so every connection in the pool goes
/// through this single choke point, should TLS or statement-timeout setup
/// ever need to be added here later.
pub fn setup_callback(addr: &str) -> BoxFuture<'_, ConnectionResult<AsyncPgConnection>> {
    tracing::trace!(target: TRACING_TARGET, hook = "setup_callback");
    AsyncPgConnection::establish(addr).boxed()
}

pub fn post_create(conn: &mut AsyncPgConnection, _metrics: &Metrics) -> HookResult<PoolError> {
    tracing::trace!(target: TRACING_TARGET, hook = "post_create");
    let _ = conn;
    Ok(())
}

pub fn pre_recycle(conn: &mut AsyncPgConnection, _metrics: &Metrics) -> HookResult<PoolError> {
    tracing::trace!(target: TRACING_TARGET, hook = "pre_recycle");
    let _ = conn;
    Ok(())
}

pub fn post_recycle(conn: &mut AsyncPgConnection, _metrics: &Metrics) -> HookResult<PoolError> {
    tracing::trace!(target: TRACING_TARGET, hook = "post_recycle");
    let _ = conn;
    Ok(())
}

//! The Postgres [`DbEngine`] adapter.
//!
//! Concrete schema is out of scope here (the controller treats the
//! storage engine as an opaque request/response pipe), so this engine
//! does not hardcode any queries. Instead it holds a registry mapping an
//! action name to a handler closure over a pooled connection; callers
//! (the binary crate, or a storage-schema crate layered on top) register
//! the handlers it actually needs at construction time.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use deadpool::managed::{Hook, Pool};
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, ManagerConfig};
use diesel_async::AsyncPgConnection;
use futures::future::BoxFuture;

use vaultkeep_core::Error;
use vaultkeep_runtime::{DbArgs, DbEngine, DbFactory, DbValue, Result};

use crate::config::PgConfig;
use crate::hooks;

const TRACING_TARGET: &str = "vaultkeep_postgres::engine";

pub type ConnectionPool = Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

/// Snapshot of the pool's current utilization, mirroring deadpool's own
/// `Status` but decoupled from its type so callers outside this crate
/// don't need a deadpool dependency just to read it.
#[derive(Debug, Clone, Copy)]
pub struct PgPoolStatus {
    pub max_size: usize,
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}

impl PgPoolStatus {
    #[inline]
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            (self.size - self.available) as f64 / self.max_size as f64
        }
    }

    #[inline]
    pub fn is_under_pressure(&self) -> bool {
        self.waiting > 0 || self.utilization() > 0.8
    }
}

/// A registered action handler: given a connection and opaque arguments,
/// produces an opaque result. Boxed because the registry is a trait-object
/// map, not a generic dispatch table.
type ActionHandler = dyn for<'c> Fn(&'c mut AsyncPgConnection, DbArgs) -> BoxFuture<'c, Result<DbValue>> + Send + Sync;

fn pool_error(context: &'static str, err: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::external("postgres", context).with_source(err)
}

/// Opaque Postgres-backed [`DbEngine`]. Holds a connection pool and a
/// table of registered read/write actions; never touches application
/// schema directly.
pub struct PostgresEngine {
    pool: ConnectionPool,
    read_actions: RwLock<HashMap<String, Arc<ActionHandler>>>,
    write_actions: RwLock<HashMap<String, Arc<ActionHandler>>>,
}

impl PostgresEngine {
    pub fn connect(config: &PgConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!(target: TRACING_TARGET, url = %config.masked_url(), "connecting to postgres");

        let mut manager_config = ManagerConfig::default();
        manager_config.custom_setup = Box::new(hooks::setup_callback);
        let manager = AsyncDieselConnectionManager::new_with_config(&config.postgres_url, manager_config);

        let pool = Pool::builder(manager)
            .max_size(config.postgres_max_connections as usize)
            .wait_timeout(config.connection_timeout())
            .create_timeout(config.connection_timeout())
            .recycle_timeout(config.idle_timeout())
            .runtime(deadpool::Runtime::Tokio1)
            .post_create(Hook::sync_fn(hooks::post_create))
            .pre_recycle(Hook::sync_fn(hooks::pre_recycle))
            .post_recycle(Hook::sync_fn(hooks::post_recycle))
            .build()
            .map_err(|err| Error::config(format!("could not build postgres connection pool: {err}")))?;

        Ok(Self {
            pool,
            read_actions: RwLock::new(HashMap::new()),
            write_actions: RwLock::new(HashMap::new()),
        })
    }

    /// Registers a handler for a read action. Overwrites any prior
    /// registration under the same name.
    pub fn register_read<F>(&self, action: impl Into<String>, handler: F)
    where
        F: for<'c> Fn(&'c mut AsyncPgConnection, DbArgs) -> BoxFuture<'c, Result<DbValue>> + Send + Sync + 'static,
    {
        self.read_actions
            .write()
            .expect("read action registry poisoned")
            .insert(action.into(), Arc::new(handler));
    }

    /// Registers a handler for a write action.
    pub fn register_write<F>(&self, action: impl Into<String>, handler: F)
    where
        F: for<'c> Fn(&'c mut AsyncPgConnection, DbArgs) -> BoxFuture<'c, Result<DbValue>> + Send + Sync + 'static,
    {
        self.write_actions
            .write()
            .expect("write action registry poisoned")
            .insert(action.into(), Arc::new(handler));
    }

    pub fn pool_status(&self) -> PgPoolStatus {
        let status = self.pool.status();
        PgPoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }
}

impl DbEngine for PostgresEngine {
    async fn read(&self, action: &str, args: DbArgs) -> Result<DbValue> {
        let handler = self
            .read_actions
            .read()
            .expect("read action registry poisoned")
            .get(action)
            .cloned()
            .ok_or_else(|| Error::internal(format!("no read action registered: {action}")))?;

        let mut conn = self.pool.get().await.map_err(|err| pool_error("could not acquire a connection", err))?;
        handler(&mut conn, args).await
    }

    async fn write(&self, action: &str, args: DbArgs) -> Result<DbValue> {
        let handler = self
            .write_actions
            .read()
            .expect("write action registry poisoned")
            .get(action)
            .cloned()
            .ok_or_else(|| Error::internal(format!("no write action registered: {action}")))?;

        let mut conn = self.pool.get().await.map_err(|err| pool_error("could not acquire a connection", err))?;
        handler(&mut conn, args).await
    }
}

/// Builds a [`PostgresEngine`] from a [`PgConfig`], then hands it to
/// `register` so the caller can wire up its own action handlers before the
/// engine is placed behind the [`vaultkeep_runtime::DbPipe`]. `db_dir` is
/// unused: Postgres connects via URL rather than a local directory, but
/// the signature is shared with factories that do need it (e.g. an
/// embedded-database alternative).
pub struct PostgresFactory {
    config: PgConfig,
    register: Arc<dyn Fn(&PostgresEngine) + Send + Sync>,
}

impl PostgresFactory {
    pub fn new(config: PgConfig, register: impl Fn(&PostgresEngine) + Send + Sync + 'static) -> Self {
        Self { config, register: Arc::new(register) }
    }
}

impl DbFactory for PostgresFactory {
    type Engine = PostgresEngine;

    fn build(&self, _db_dir: &Path) -> Result<Self::Engine> {
        let engine = PostgresEngine::connect(&self.config)?;
        (self.register)(&engine);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_status_utilization_and_pressure() {
        let status = PgPoolStatus { max_size: 10, size: 9, available: 1, waiting: 0 };
        assert!((status.utilization() - 0.8).abs() < f64::EPSILON * 10.0);
        assert!(status.is_under_pressure());

        let idle = PgPoolStatus { max_size: 10, size: 2, available: 2, waiting: 0 };
        assert!(!idle.is_under_pressure());
    }

    #[test]
    fn pool_status_with_zero_capacity_does_not_divide_by_zero() {
        let status = PgPoolStatus { max_size: 0, size: 0, available: 0, waiting: 0 };
        assert_eq!(status.utilization(), 0.0);
    }
}

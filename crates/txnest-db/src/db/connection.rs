use std::future::Future;

use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::{AnsiTransactionManager, AsyncPgConnection, TransactionManager};
use futures::future::BoxFuture;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use txnest_core::context::Context;
use txnest_core::error::CoreError;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::transaction::{TransactionHandle, TransactionalConnection};

pub type DbPool = Pool<AsyncPgConnection>;
pub type DbConnection<'pool> = PooledConnection<'pool, AsyncPgConnection>;

type PgTransactionManager = AnsiTransactionManager;

/// ## Summary
/// Runs a driver call until it finishes or `ctx` is cancelled, whichever comes first.
///
/// ## Errors
/// Returns [`CoreError::Cancelled`] if the context is cancelled first, otherwise
/// the call's own result.
async fn until_cancelled<T>(
    ctx: &Context,
    call: impl Future<Output = DbResult<T>>,
) -> DbResult<T> {
    tokio::select! {
        biased;
        () = ctx.cancelled() => Err(CoreError::Cancelled.into()),
        result = call => result,
    }
}

/// ## Summary
/// Creates a new database connection pool.
///
/// ## Errors
/// Returns an error if the pool cannot be created with the provided database URL.
#[tracing::instrument(skip(database_url), fields(pool_size = size))]
pub async fn create_pool(database_url: &str, size: u32) -> anyhow::Result<DbPool> {
    tracing::debug!("Creating database connection pool");

    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);

    let pool = Pool::builder()
        .max_size(size)
        .test_on_check_out(false)
        .build(config)
        .await?;

    tracing::info!(
        pool_size = size,
        "Database connection pool created successfully"
    );

    Ok(pool)
}

/// ## Summary
/// Begins Postgres transactions on connections checked out of a [`DbPool`].
#[derive(Clone)]
pub struct PgTransactionalConnection {
    pool: DbPool,
}

impl PgTransactionalConnection {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn begin_on_pool(&self, ctx: &Context) -> DbResult<PgTransaction> {
        let mut conn = until_cancelled(ctx, async { Ok(self.pool.get_owned().await?) }).await?;
        until_cancelled(ctx, async {
            Ok(PgTransactionManager::begin_transaction(&mut *conn).await?)
        })
        .await?;

        let tx = PgTransaction::new(conn);
        tracing::debug!(tx_id = %tx.id(), "BEGIN issued");
        Ok(tx)
    }
}

impl TransactionalConnection for PgTransactionalConnection {
    type Handle = PgTransaction;

    fn begin<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, anyhow::Result<PgTransaction>> {
        Box::pin(async move { Ok(self.begin_on_pool(ctx).await?) })
    }
}

/// ## Summary
/// An open Postgres transaction pinned to one pooled connection.
///
/// The connection goes back to the pool once the transaction is committed or
/// rolled back. After that the handle refuses further use.
pub struct PgTransaction {
    id: Uuid,
    conn: Mutex<Option<DbConnection<'static>>>,
}

impl PgTransaction {
    fn new(conn: DbConnection<'static>) -> Self {
        Self {
            id: Uuid::now_v7(),
            conn: Mutex::new(Some(conn)),
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// ## Summary
    /// Locks the transaction's connection for running queries.
    ///
    /// ## Errors
    /// Returns [`DbError::TransactionFinished`] once the transaction has been
    /// committed or rolled back.
    pub async fn connection(&self) -> DbResult<MappedMutexGuard<'_, AsyncPgConnection>> {
        let guard = self.conn.lock().await;
        MutexGuard::try_map(guard, |slot| slot.as_deref_mut())
            .map_err(|_finished| DbError::TransactionFinished(self.id))
    }

    async fn take_connection(&self) -> DbResult<DbConnection<'static>> {
        self.conn
            .lock()
            .await
            .take()
            .ok_or(DbError::TransactionFinished(self.id))
    }

    async fn commit_inner(&self, ctx: &Context) -> DbResult<()> {
        let mut conn = self.take_connection().await?;

        if let Err(e) = ctx.ensure_active() {
            // A cancelled caller must not commit; release the connection clean.
            PgTransactionManager::rollback_transaction(&mut *conn).await?;
            return Err(e.into());
        }

        until_cancelled(ctx, async {
            Ok(PgTransactionManager::commit_transaction(&mut *conn).await?)
        })
        .await?;
        tracing::debug!(tx_id = %self.id, "COMMIT issued");
        Ok(())
    }

    async fn rollback_inner(&self) -> DbResult<()> {
        let mut conn = self.take_connection().await?;
        PgTransactionManager::rollback_transaction(&mut *conn).await?;
        tracing::debug!(tx_id = %self.id, "ROLLBACK issued");
        Ok(())
    }
}

/// ## Summary
/// `commit` honours cancellation of `ctx`: an already cancelled context rolls the
/// transaction back instead, and a cancellation arriving during `COMMIT`
/// abandons the connection. Either way the call fails with
/// [`CoreError::Cancelled`].
///
/// `rollback` ignores `ctx` entirely, so cleanup still runs for a cancelled
/// caller.
impl TransactionHandle for PgTransaction {
    fn commit<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move { Ok(self.commit_inner(ctx).await?) })
    }

    fn rollback<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move { Ok(self.rollback_inner().await?) })
    }
}

impl std::fmt::Debug for PgTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTransaction").field("id", &self.id).finish()
    }
}

//! Implicitly nested database transactions.
//!
//! [`run_in_transaction`] runs a unit of work inside a transaction. When the
//! context it is given already carries an active transaction (because an
//! outer call is running), the work joins that transaction instead of
//! starting a new one. Only the invocation that began a transaction commits or
//! rolls it back, so a call tree only ever holds one physical transaction.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txnest_db::transaction::{active_transaction, run_in_transaction};
//!
//! run_in_transaction(&ctx, &connection, |ctx| async move {
//!     create_account(&ctx, &connection).await?; // joins this transaction
//!     let tx = active_transaction::<PgTransaction>(&ctx);
//!     Ok(())
//! })
//! .await?;
//! ```


use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use txnest_core::context::{Context, ContextKey};

use crate::error::{TransactionError, TxResult};

/// Well-known slot holding the active transaction of a call chain.
pub static TRANSACTION_KEY: ContextKey = ContextKey::new("txnest-sql-transaction");

/// ## Summary
/// An open transaction.
///
/// Handles are shared through the context with nested invocations, which only
/// ever read them. `commit` and `rollback` are reserved for the invocation that
/// began the transaction.
pub trait TransactionHandle: Send + Sync + 'static {
    fn commit<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, anyhow::Result<()>>;

    fn rollback<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// ## Summary
/// Something that can open a transaction.
pub trait TransactionalConnection: Send + Sync {
    type Handle: TransactionHandle;

    fn begin<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, anyhow::Result<Self::Handle>>;
}

/// ## Summary
/// Returns the transaction bound to `ctx`, if there is one of type `H`.
#[must_use]
pub fn active_transaction<H: TransactionHandle>(ctx: &Context) -> Option<Arc<H>> {
    ctx.value::<H>(&TRANSACTION_KEY)
}

/// ## Summary
/// Runs `work` inside a transaction, joining the one already active in `ctx`
/// or beginning a new one through `connection`.
///
/// `work` receives a context carrying the transaction; anything it calls can
/// find the transaction with [`active_transaction`]. When this invocation began
/// the transaction it commits on success and rolls back on failure. A joined
/// transaction is left alone for its owner to finish.
///
/// ## Errors
/// - [`TransactionError::Begin`] if a new transaction cannot be started.
/// - [`TransactionError::Work`] with the error returned by `work`. A failed
///   rollback is logged and never replaces it.
/// - [`TransactionError::Commit`] if `work` succeeded but the commit failed.
#[tracing::instrument(skip_all, fields(joined = tracing::field::Empty))]
pub async fn run_in_transaction<C, T, F, Fut>(
    ctx: &Context,
    connection: &C,
    work: F,
) -> TxResult<T>
where
    C: TransactionalConnection + ?Sized,
    F: FnOnce(Context) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let (handle, has_external) = match active_transaction::<C::Handle>(ctx) {
        Some(handle) => (handle, true),
        None => {
            let handle = connection
                .begin(ctx)
                .await
                .map_err(TransactionError::Begin)?;
            (Arc::new(handle), false)
        }
    };
    tracing::Span::current().record("joined", has_external);

    let outcome = if has_external {
        tracing::debug!("Joining active transaction");
        work(ctx.clone()).await
    } else {
        tracing::debug!("Began transaction");
        work(ctx.with_value(&TRANSACTION_KEY, Arc::clone(&handle))).await
    };

    if has_external {
        return outcome.map_err(TransactionError::Work);
    }

    match outcome {
        Ok(value) => {
            handle.commit(ctx).await.map_err(TransactionError::Commit)?;
            tracing::debug!("Committed transaction");
            Ok(value)
        }
        Err(work_error) => {
            match handle.rollback(ctx).await {
                Ok(()) => tracing::debug!(error = %work_error, "Rolled back transaction"),
                Err(rollback_error) => tracing::warn!(
                    error = %rollback_error,
                    work_error = %work_error,
                    "Failed to roll back transaction"
                ),
            }
            Err(TransactionError::Work(work_error))
        }
    }
}

use diesel::sql_types::{BigInt, Text};
use diesel_async::RunQueryDsl;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt};
use txnest_core::config::load_config;
use txnest_core::context::Context;
use txnest_db::db::connection::{PgTransaction, PgTransactionalConnection, create_pool};
use txnest_db::transaction::{active_transaction, run_in_transaction};

#[derive(diesel::QueryableByName)]
struct BackendPid {
    #[diesel(sql_type = BigInt)]
    pid: i64,
}

/// ## Summary
/// Repository-level helper: wraps its own access in a transaction, which joins
/// the caller's transaction when there is one.
async fn current_backend_pid(ctx: &Context, db: &PgTransactionalConnection) -> anyhow::Result<i64> {
    Ok(run_in_transaction(ctx, db, |ctx| async move {
        let tx = active_transaction::<PgTransaction>(&ctx)
            .ok_or_else(|| anyhow::anyhow!("no active transaction in context"))?;
        let mut conn = tx.connection().await?;
        let row = diesel::sql_query("SELECT pg_backend_pid()::bigint AS pid")
            .get_result::<BackendPid>(&mut *conn)
            .await?;
        Ok(row.pid)
    })
    .await?)
}

async fn set_application_name(ctx: &Context, db: &PgTransactionalConnection) -> anyhow::Result<()> {
    Ok(run_in_transaction(ctx, db, |ctx| async move {
        let tx = active_transaction::<PgTransaction>(&ctx)
            .ok_or_else(|| anyhow::anyhow!("no active transaction in context"))?;
        let mut conn = tx.connection().await?;
        diesel::sql_query("SELECT set_config('application_name', $1, true)")
            .bind::<Text, _>("txnest")
            .execute(&mut *conn)
            .await?;
        Ok(())
    })
    .await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (filter_layer, filter_handle) = reload::Layer::new(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    let config = load_config()?;

    tracing::info!(config = ?config, "Configuration loaded");

    if let Ok(filter) = EnvFilter::try_new(config.logging.level.as_str()) {
        if let Err(e) = filter_handle.modify(|current| *current = filter) {
            tracing::warn!(error = %e, "Failed to update log filter from config");
        }
    } else {
        tracing::warn!(level = %config.logging.level, "Invalid log level in config, keeping debug");
    }

    let pool = create_pool(
        &config.database.url,
        u32::from(config.database.max_connections),
    )
    .await?;
    let db = PgTransactionalConnection::new(pool);
    let ctx = Context::background();

    // Both helpers open their own transaction when called alone; here they
    // share the outer one and therefore the same backend connection.
    let (outer_pid, inner_pid) = run_in_transaction(&ctx, &db, |ctx| {
        let db = &db;
        async move {
            set_application_name(&ctx, db).await?;
            let outer_pid = current_backend_pid(&ctx, db).await?;
            let inner_pid = current_backend_pid(&ctx, db).await?;
            Ok((outer_pid, inner_pid))
        }
    })
    .await?;

    tracing::info!(outer_pid, inner_pid, "Nested units of work shared one transaction");

    let standalone_pid = current_backend_pid(&ctx, &db).await?;
    tracing::info!(standalone_pid, "Standalone unit of work committed its own transaction");

    Ok(())
}

//! Transaction helper
//!
//! Wraps a unit of work in BEGIN/COMMIT/ROLLBACK around a single leased
//! connection. The connection travels inside a [`TxConnection`] handle so
//! that any number of repository views derived with
//! [`Repository::with_tx`](crate::repository::Repository::with_tx) share it
//! for the duration of the transaction; statements from concurrent views
//! serialize on the handle's lock.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgConnection, PgPool, Postgres};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Result, StoreError};

/// A leased connection with an open unit of work, shared between the
/// transaction scope and the repository views bound to it.
///
/// Cloning is cheap and hands out another reference to the same underlying
/// connection. The handle must not outlive the transaction scope that
/// produced it; a view kept around after commit would otherwise pin the
/// connection out of the pool.
#[derive(Clone)]
pub struct TxConnection {
    conn: Arc<Mutex<PoolConnection<Postgres>>>,
}

impl TxConnection {
    fn new(conn: PoolConnection<Postgres>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Lease a dedicated connection from the pool, e.g. to drive several
    /// consecutive transactions through [`with_tx_on`]. The caller owns
    /// release: the connection returns to the pool when the last clone of
    /// the handle is dropped.
    pub async fn acquire(pool: &PgPool) -> Result<Self> {
        Ok(Self::new(pool.acquire().await?))
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, PoolConnection<Postgres>> {
        self.conn.lock().await
    }

    async fn run(&self, sql: &'static str) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn: &mut PgConnection = &mut *guard;
        sqlx::query(sql).execute(conn).await?;
        Ok(())
    }

    /// Tear down a connection whose transaction protocol failed midway.
    /// Its server-side state is unknown, so it must not rejoin the pool.
    async fn close(self) {
        match Arc::try_unwrap(self.conn) {
            Ok(mutex) => {
                let conn = mutex.into_inner();
                if let Err(err) = conn.detach().close().await {
                    tracing::warn!(error = %err, "failed to close broken transactional connection");
                }
            }
            Err(_) => {
                tracing::warn!(
                    "broken transactional connection is still shared; release deferred to remaining holders"
                );
            }
        }
    }
}

impl fmt::Debug for TxConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxConnection").finish_non_exhaustive()
    }
}

/// Run `work` inside a transaction on a connection leased from `pool`.
///
/// The connection is leased for the duration and returned to the pool
/// whatever the outcome; a connection whose COMMIT or ROLLBACK failed is
/// closed instead, since its state can no longer be trusted.
pub async fn with_tx<T, E, F>(pool: &PgPool, work: F) -> std::result::Result<T, E>
where
    T: Send,
    E: From<StoreError> + Send,
    F: for<'t> FnOnce(&'t TxConnection) -> BoxFuture<'t, std::result::Result<T, E>> + Send,
{
    let tx = TxConnection::acquire(pool).await.map_err(E::from)?;

    let (result, broken) = run_transaction(&tx, work).await;
    if broken {
        tx.close().await;
    }
    result
}

/// Run `work` inside a transaction on a caller-supplied connection handle.
///
/// Only BEGIN/COMMIT/ROLLBACK are managed here; releasing the connection
/// remains the caller's responsibility. Do not nest: the helper issues a
/// literal BEGIN, so a second invocation on the same handle would need an
/// external savepoint mechanism.
pub async fn with_tx_on<T, E, F>(tx: &TxConnection, work: F) -> std::result::Result<T, E>
where
    T: Send,
    E: From<StoreError> + Send,
    F: for<'t> FnOnce(&'t TxConnection) -> BoxFuture<'t, std::result::Result<T, E>> + Send,
{
    run_transaction(tx, work).await.0
}

/// Drive the BEGIN/work/COMMIT-or-ROLLBACK protocol. The boolean reports
/// whether the connection was left in an unknown transactional state.
async fn run_transaction<T, E, F>(
    tx: &TxConnection,
    work: F,
) -> (std::result::Result<T, E>, bool)
where
    T: Send,
    E: From<StoreError> + Send,
    F: for<'t> FnOnce(&'t TxConnection) -> BoxFuture<'t, std::result::Result<T, E>> + Send,
{
    if let Err(err) = tx.run("BEGIN").await {
        return (Err(E::from(err)), false);
    }
    tracing::debug!("transaction started");

    match work(tx).await {
        Ok(value) => match tx.run("COMMIT").await {
            Ok(()) => {
                tracing::debug!("transaction committed");
                (Ok(value), false)
            }
            Err(err) => (Err(E::from(err)), true),
        },
        Err(err) => match tx.run("ROLLBACK").await {
            Ok(()) => {
                tracing::debug!("transaction rolled back");
                (Err(err), false)
            }
            Err(rb) => {
                // The unit of work's own failure stays the primary error.
                tracing::warn!(error = %rb, "rollback failed after aborted unit of work");
                (Err(err), true)
            }
        },
    }
}

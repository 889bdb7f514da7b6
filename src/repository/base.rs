//! Repository base: the connection/transaction/tenant execution protocol
//!
//! Every statement issued by this crate funnels through
//! [`RepositoryBase::execute`]. The method decides where the connection
//! comes from (the bound transaction, or a fresh pool lease), brackets the
//! unit of work with the tenant session setting, and guarantees the setting
//! is cleared again before the connection can return to the pool.

use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::postgres::{PgArguments, PgQueryResult};
use sqlx::query::Query;
use sqlx::{Connection, PgConnection, Postgres};

use crate::domain::TenantId;
use crate::error::{Result, StoreError};
use crate::repository::context::ExecutionContext;
use crate::repository::DbPool;
use crate::tx::TxConnection;

/// Row-level-security policies read this setting through
/// `NULLIF(current_setting('app.current_tenant', true), '')`; the empty
/// string is the "no tenant" sentinel, so clearing never depends on the
/// parameter having been defined before.
const SET_TENANT: &str = "SELECT set_config('app.current_tenant', $1, false)";
const CLEAR_TENANT: &str = "SELECT set_config('app.current_tenant', '', false)";

/// Shared plumbing owned by every repository instance: the pool and the
/// instance's execution context.
#[derive(Clone)]
pub struct RepositoryBase {
    pool: DbPool,
    context: ExecutionContext,
}

impl RepositoryBase {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            context: ExecutionContext::default(),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub(crate) fn scoped_tenant(&self, tenant: TenantId) -> Self {
        Self {
            pool: self.pool.clone(),
            context: self.context.scoped_tenant(tenant),
        }
    }

    pub(crate) fn scoped_tx(&self, tx: TxConnection) -> Self {
        Self {
            pool: self.pool.clone(),
            context: self.context.scoped_tx(tx),
        }
    }

    /// Run a unit of work under this instance's connection and tenant
    /// bindings.
    ///
    /// With a bound transaction the shared connection is reused and release
    /// stays with the transaction scope; otherwise a connection is leased
    /// from the pool for the duration. Either way the tenant setting is
    /// installed first (or cleared, when no tenant is bound: a pooled
    /// connection may still carry the previous borrower's tenant) and
    /// cleared again after the work, before the connection can go back to
    /// the pool. The work's own failure always takes precedence over
    /// cleanup failures.
    pub async fn execute<R, F>(&self, work: F) -> Result<R>
    where
        R: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<R>> + Send,
    {
        match self.context.tx() {
            Some(tx) => {
                let mut guard = tx.lock().await;
                let conn: &mut PgConnection = &mut *guard;
                let (outcome, cleanup) = scoped(conn, self.context.tenant(), work).await;
                if let Err(err) = &cleanup {
                    tracing::warn!(error = %err, "failed to clear tenant setting on transactional connection");
                }
                settle(outcome, cleanup)
            }
            None => {
                let mut leased = self.pool.acquire().await?;
                tracing::trace!("leased connection from pool");
                let (outcome, cleanup) = scoped(&mut leased, self.context.tenant(), work).await;
                if cleanup.is_err() {
                    // A connection with unknown session state must not rejoin
                    // the pool.
                    tracing::warn!("clearing tenant setting failed; closing leased connection");
                    if let Err(err) = leased.detach().close().await {
                        tracing::warn!(error = %err, "failed to close connection with stale tenant setting");
                    }
                }
                settle(outcome, cleanup)
            }
        }
    }

    /// Run a prebuilt parametrized statement through [`execute`].
    ///
    /// A bound `sqlx::query` value carries the statement text together with
    /// its positional values, so this is the entry point for ad-hoc
    /// statements that do not need row mapping.
    ///
    /// [`execute`]: RepositoryBase::execute
    pub async fn execute_with(
        &self,
        query: Query<'static, Postgres, PgArguments>,
    ) -> Result<PgQueryResult> {
        self.execute(move |conn| {
            Box::pin(async move { query.execute(&mut *conn).await.map_err(StoreError::from) })
        })
        .await
    }
}

/// Bracket `work` with tenant-setting installation and cleanup on one
/// connection. Returns the work outcome and the cleanup outcome separately
/// so the caller can decide the connection's fate before settling.
async fn scoped<R, F>(
    conn: &mut PgConnection,
    tenant: Option<&TenantId>,
    work: F,
) -> (Result<R>, Result<()>)
where
    R: Send,
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<R>> + Send,
{
    let outcome = match install_tenant(conn, tenant).await {
        Ok(()) => work(&mut *conn).await,
        Err(err) => Err(err),
    };
    let cleanup = clear_tenant(conn).await;
    (outcome, cleanup)
}

async fn install_tenant(conn: &mut PgConnection, tenant: Option<&TenantId>) -> Result<()> {
    match tenant {
        Some(tenant) => {
            tracing::trace!(%tenant, "installing tenant setting");
            sqlx::query(SET_TENANT)
                .bind(tenant.as_str())
                .execute(&mut *conn)
                .await?;
        }
        None => {
            sqlx::query(CLEAR_TENANT).execute(&mut *conn).await?;
        }
    }
    Ok(())
}

async fn clear_tenant(conn: &mut PgConnection) -> Result<()> {
    sqlx::query(CLEAR_TENANT).execute(&mut *conn).await?;
    Ok(())
}

fn settle<R>(outcome: Result<R>, cleanup: Result<()>) -> Result<R> {
    match (outcome, cleanup) {
        // The unit of work's failure is the one the caller must see.
        (Err(err), _) => Err(err),
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
    }
}

/// Capability every concrete repository provides so the scoping combinators
/// can derive sibling instances without mutating the source.
#[async_trait]
pub trait Repository: Send + Sync + Sized {
    /// Shared plumbing of this instance.
    fn base(&self) -> &RepositoryBase;

    /// Produce a sibling of the same concrete type around `base`. The
    /// context copy itself is performed by the base; implementations only
    /// rebuild their own configuration (statement templates etc.) around it.
    fn rebind(&self, base: RepositoryBase) -> Self;

    /// A view of this repository scoped to `tenant`. Any bound transaction
    /// carries over; the source instance is untouched.
    fn with_tenant(&self, tenant: impl Into<TenantId>) -> Self {
        self.rebind(self.base().scoped_tenant(tenant.into()))
    }

    /// A view of this repository bound to the transaction behind `tx`. Any
    /// tenant scope carries over; the source instance is untouched.
    fn with_tx(&self, tx: &TxConnection) -> Self {
        self.rebind(self.base().scoped_tx(tx.clone()))
    }

    /// Run a prebuilt parametrized statement under this instance's
    /// connection and tenant bindings.
    async fn execute_with(
        &self,
        query: Query<'static, Postgres, PgArguments>,
    ) -> Result<PgQueryResult> {
        self.base().execute_with(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn not_found() -> StoreError {
        StoreError::NotFound {
            table: "documents".to_string(),
            id: "doc-1".to_string(),
        }
    }

    #[test]
    fn test_settle_prefers_work_failure_over_cleanup_failure() {
        let outcome: Result<()> = Err(not_found());
        let cleanup: Result<()> = Err(StoreError::Database(sqlx::Error::PoolClosed));

        let err = settle(outcome, cleanup).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_settle_surfaces_cleanup_failure_after_success() {
        let outcome: Result<u64> = Ok(7);
        let cleanup: Result<()> = Err(StoreError::Database(sqlx::Error::PoolClosed));

        let err = settle(outcome, cleanup).unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn test_settle_passes_value_through() {
        let value = settle(Ok(7u64), Ok(())).unwrap();
        assert_eq!(value, 7);
    }
}

//! Per-instance execution context

use std::fmt;

use crate::domain::TenantId;
use crate::tx::TxConnection;

/// The connection and tenant bindings of one repository instance.
///
/// A context is immutable once the owning repository is built: scoping to a
/// tenant or a transaction always copies, carrying the other axis over, so a
/// cached repository can serve many concurrent tenants and transactions
/// without cross-talk.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    tx: Option<TxConnection>,
    tenant: Option<TenantId>,
}

impl ExecutionContext {
    pub fn tenant(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }

    pub fn tx(&self) -> Option<&TxConnection> {
        self.tx.as_ref()
    }

    pub fn is_transactional(&self) -> bool {
        self.tx.is_some()
    }

    pub(crate) fn scoped_tenant(&self, tenant: TenantId) -> Self {
        Self {
            tx: self.tx.clone(),
            tenant: Some(tenant),
        }
    }

    pub(crate) fn scoped_tx(&self, tx: TxConnection) -> Self {
        Self {
            tx: Some(tx),
            tenant: self.tenant.clone(),
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("tenant", &self.tenant)
            .field("transactional", &self.tx.is_some())
            .finish()
    }
}

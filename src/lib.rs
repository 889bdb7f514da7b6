//! Docstore - Multi-tenant JSON document repository over PostgreSQL
//!
//! This crate persists document-like entities as JSON payloads inside
//! relational rows and takes care of the part that is easy to get wrong:
//! connection handling, transaction composition, and per-statement tenant
//! scoping. A [`JsonRepository`] can be cached once and scoped on demand:
//! `repo.with_tenant("acme")` or `repo.with_tx(&tx)` return independent
//! views, and the source instance is never touched.

pub mod config;
pub mod domain;
pub mod error;
pub mod repository;
pub mod telemetry;
pub mod tx;

// Re-export commonly used types
pub use config::Config;
pub use domain::{Entity, EntityId, PagedResult, Saved, TenantId};
pub use error::{Result, StoreError};
pub use repository::{
    DbPool, ExecutionContext, JsonRepository, Repository, RepositoryBase, TableStatements,
};
pub use tx::{with_tx, with_tx_on, TxConnection};

//! Data access layer (Repository pattern)

pub mod base;
pub mod context;
pub mod json;
pub mod statements;

pub use base::{Repository, RepositoryBase};
pub use context::ExecutionContext;
pub use json::JsonRepository;
pub use statements::TableStatements;

use sqlx::PgPool;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    pool: PgPool,
}

impl DbPool {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn inner(&self) -> &PgPool {
        &self.pool
    }
}

impl std::ops::Deref for DbPool {
    type Target = PgPool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

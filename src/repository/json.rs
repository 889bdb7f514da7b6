//! Typed JSON document repository
//!
//! One [`JsonRepository`] serves one logical table of the canonical shape
//! `id / created / updated / tenant_id / data`, where `data` is a jsonb
//! payload holding every domain field except the id. The repository maps
//! rows to [`Saved<T>`] values and routes every statement through the
//! execution protocol of [`RepositoryBase`].

use std::marker::PhantomData;

use chrono::{DateTime, Utc};

use crate::domain::{Entity, PagedResult, Saved};
use crate::error::{Result, StoreError};
use crate::repository::base::{Repository, RepositoryBase};
use crate::repository::statements::TableStatements;
use crate::repository::DbPool;

/// Wire shape of one stored document row.
#[derive(Debug, sqlx::FromRow)]
struct JsonRow {
    id: String,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    data: serde_json::Value,
}

/// Generic repository for entities stored as JSON documents.
pub struct JsonRepository<T: Entity> {
    base: RepositoryBase,
    statements: TableStatements,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for JsonRepository<T> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            statements: self.statements.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Repository for JsonRepository<T> {
    fn base(&self) -> &RepositoryBase {
        &self.base
    }

    fn rebind(&self, base: RepositoryBase) -> Self {
        Self {
            base,
            statements: self.statements.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> JsonRepository<T> {
    pub fn new(table: &str, pool: DbPool) -> Self {
        Self::with_statements(TableStatements::new(table), pool)
    }

    /// Construct around a pre-built statement set, e.g. for a view-backed
    /// table whose statements deviate from the canonical templates.
    pub fn with_statements(statements: TableStatements, pool: DbPool) -> Self {
        Self {
            base: RepositoryBase::new(pool),
            statements,
            _entity: PhantomData,
        }
    }

    pub fn table(&self) -> &str {
        &self.statements.table
    }

    /// Fetch one entity by id. Absence is a regular outcome, not a failure.
    pub async fn fetch(&self, id: &str) -> Result<Option<Saved<T>>> {
        let sql = self.statements.fetch_by_id.clone();
        let id = id.to_owned();
        let row = self
            .base
            .execute(move |conn| {
                Box::pin(async move {
                    sqlx::query_as::<_, JsonRow>(&sql)
                        .bind(&id)
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(StoreError::from)
                })
            })
            .await?;
        row.map(|row| self.deserialize(row)).transpose()
    }

    /// Persist a transient entity. The row's timestamps are assigned by the
    /// storage engine; the tenant column is stamped from this instance's
    /// context.
    pub async fn insert(&self, entity: &T) -> Result<Saved<T>> {
        let row = self.write_returning(&self.statements.insert, entity).await?;
        match row {
            Some(row) => self.deserialize(row),
            None => Err(StoreError::InsertFailed {
                table: self.table().to_string(),
                id: entity.id().to_string(),
            }),
        }
    }

    /// Replace the payload of a managed entity and refresh its `updated`
    /// timestamp. Fails fast on a detached value.
    pub async fn update(&self, entity: &Saved<T>) -> Result<Saved<T>> {
        if !entity.is_managed() {
            return Err(StoreError::Detached {
                id: entity.entity().id().to_string(),
            });
        }

        let payload = self.serialize(entity.entity())?;
        let sql = self.statements.update.clone();
        let id = entity.entity().id().to_owned();
        let row = self
            .base
            .execute(move |conn| {
                Box::pin(async move {
                    sqlx::query_as::<_, JsonRow>(&sql)
                        .bind(&id)
                        .bind(&payload)
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(StoreError::from)
                })
            })
            .await?;
        match row {
            Some(row) => self.deserialize(row),
            None => Err(StoreError::UpdateFailed {
                table: self.table().to_string(),
                id: entity.entity().id().to_string(),
            }),
        }
    }

    /// Insert or update depending on the managed marker, the one place the
    /// marker drives control flow. A detached value (e.g. the result of a
    /// [`delete`](Self::delete)) is re-inserted.
    pub async fn save(&self, entity: &Saved<T>) -> Result<Saved<T>> {
        if entity.is_managed() {
            self.update(entity).await
        } else {
            self.insert(entity.entity()).await
        }
    }

    /// Insert the entity, or replace the payload if the id already exists.
    pub async fn upsert(&self, entity: &T) -> Result<Saved<T>> {
        let row = self.write_returning(&self.statements.upsert, entity).await?;
        match row {
            Some(row) => self.deserialize(row),
            None => Err(StoreError::InsertFailed {
                table: self.table().to_string(),
                id: entity.id().to_string(),
            }),
        }
    }

    /// Delete by id, returning the affected-row count (0 when absent).
    pub async fn delete_by_id(&self, id: &str) -> Result<u64> {
        let sql = self.statements.delete_by_id.clone();
        let id = id.to_owned();
        let result = self
            .base
            .execute(move |conn| {
                Box::pin(async move {
                    sqlx::query(&sql)
                        .bind(&id)
                        .execute(&mut *conn)
                        .await
                        .map_err(StoreError::from)
                })
            })
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete a managed entity's row. Exactly one row must go away; on
    /// success the value is handed back with its managed marker cleared and
    /// every other field untouched.
    pub async fn delete(&self, entity: Saved<T>) -> Result<Saved<T>> {
        let id = entity.entity().id().to_string();
        let affected = self.delete_by_id(&id).await?;
        match affected {
            0 => Err(StoreError::NotFound {
                table: self.table().to_string(),
                id,
            }),
            1 => Ok(entity.detach()),
            affected => Err(StoreError::AmbiguousDelete {
                table: self.table().to_string(),
                id,
                affected,
            }),
        }
    }

    /// One page of entities in ascending id order. A full page carries the
    /// last id as the cursor for the next call.
    pub async fn list(&self, limit: i64, cursor: Option<&str>) -> Result<PagedResult<Saved<T>>> {
        let sql = self.statements.page.clone();
        let cursor = cursor.map(str::to_owned);
        let rows = self
            .base
            .execute(move |conn| {
                Box::pin(async move {
                    sqlx::query_as::<_, JsonRow>(&sql)
                        .bind(cursor.as_deref())
                        .bind(limit)
                        .fetch_all(&mut *conn)
                        .await
                        .map_err(StoreError::from)
                })
            })
            .await?;

        let next_cursor = if limit > 0 && rows.len() as i64 == limit {
            rows.last().map(|row| row.id.clone())
        } else {
            None
        };
        let items = rows
            .into_iter()
            .map(|row| self.deserialize(row))
            .collect::<Result<Vec<_>>>()?;
        Ok(PagedResult { items, next_cursor })
    }

    /// Total rows visible under the current tenant context.
    pub async fn count(&self) -> Result<i64> {
        let sql = self.statements.count.clone();
        let row: (i64,) = self
            .base
            .execute(move |conn| {
                Box::pin(async move {
                    sqlx::query_as::<_, (i64,)>(&sql)
                        .fetch_one(&mut *conn)
                        .await
                        .map_err(StoreError::from)
                })
            })
            .await?;
        Ok(row.0)
    }

    /// Shared body of insert and upsert: bind id, tenant and payload, return
    /// the written row.
    async fn write_returning(&self, sql: &str, entity: &T) -> Result<Option<JsonRow>> {
        let payload = self.serialize(entity)?;
        let sql = sql.to_owned();
        let id = entity.id().to_owned();
        let tenant = self.base.context().tenant().cloned();
        self.base
            .execute(move |conn| {
                Box::pin(async move {
                    sqlx::query_as::<_, JsonRow>(&sql)
                        .bind(&id)
                        .bind(tenant.as_deref())
                        .bind(&payload)
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(StoreError::from)
                })
            })
            .await
    }

    /// Encode the payload column: every domain field except the id, which
    /// lives in its own column. Timestamps and the managed marker cannot
    /// appear here; the transient entity type does not carry them.
    fn serialize(&self, entity: &T) -> Result<serde_json::Value> {
        let mut value = serde_json::to_value(entity)?;
        match value.as_object_mut() {
            Some(payload) => {
                payload.remove("id");
            }
            None => {
                return Err(StoreError::InvalidPayload {
                    table: self.table().to_string(),
                    id: entity.id().to_string(),
                })
            }
        }
        Ok(value)
    }

    /// Decode a row back into the managed form: reattach the id from the key
    /// column, then wrap with the row's timestamps and the marker set.
    fn deserialize(&self, row: JsonRow) -> Result<Saved<T>> {
        let JsonRow {
            id,
            created,
            updated,
            mut data,
        } = row;
        match data.as_object_mut() {
            Some(payload) => {
                payload.insert("id".to_string(), serde_json::Value::String(id));
            }
            None => {
                return Err(StoreError::InvalidPayload {
                    table: self.table().to_string(),
                    id,
                })
            }
        }
        let entity: T = serde_json::from_value(data)?;
        Ok(Saved::managed(entity, created, updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        title: String,
        tags: Vec<String>,
    }

    impl Entity for Note {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn repo() -> JsonRepository<Note> {
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/docstore_test")
            .expect("lazy pool");
        JsonRepository::new("documents", DbPool::new(pool))
    }

    fn note() -> Note {
        Note {
            id: "n-1".to_string(),
            title: "groceries".to_string(),
            tags: vec!["errand".to_string()],
        }
    }

    #[tokio::test]
    async fn test_serialize_strips_id_from_payload() {
        let payload = repo().serialize(&note()).unwrap();
        assert_eq!(payload, json!({ "title": "groceries", "tags": ["errand"] }));
    }

    #[tokio::test]
    async fn test_deserialize_reattaches_id_and_marks_managed() {
        let now = Utc::now();
        let row = JsonRow {
            id: "n-1".to_string(),
            created: now,
            updated: now,
            data: json!({ "title": "groceries", "tags": ["errand"] }),
        };

        let saved = repo().deserialize(row).unwrap();
        assert!(saved.is_managed());
        assert_eq!(saved.entity(), &note());
        assert_eq!(saved.created(), now);
    }

    #[tokio::test]
    async fn test_payload_round_trip() {
        let repo = repo();
        let original = note();
        let now = Utc::now();

        let payload = repo.serialize(&original).unwrap();
        let row = JsonRow {
            id: original.id.clone(),
            created: now,
            updated: now,
            data: payload,
        };
        let restored = repo.deserialize(row).unwrap();

        assert_eq!(restored.entity(), &original);
    }

    #[tokio::test]
    async fn test_deserialize_rejects_non_object_payload() {
        let now = Utc::now();
        let row = JsonRow {
            id: "n-1".to_string(),
            created: now,
            updated: now,
            data: json!("not an object"),
        };

        let err = repo().deserialize(row).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn test_tenant_scoping_leaves_source_unbound() {
        let repo = repo();
        let scoped = repo.with_tenant("acme");

        assert_eq!(
            scoped.base().context().tenant().map(String::as_str),
            Some("acme")
        );
        assert!(repo.base().context().tenant().is_none());
        assert_eq!(scoped.table(), "documents");
    }
}

//! Entity and managed-state types
//!
//! A domain value enters the store as a bare `T` and comes back wrapped in
//! [`Saved<T>`], which carries the row timestamps and the managed marker.
//! The marker records whether the in-memory value still corresponds to a
//! persisted row; it lives only on the wrapper and never reaches any
//! serialized form.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Unique identifier of an entity within its logical table.
pub type EntityId = String;

/// Identifier of the tenant a statement is scoped to.
pub type TenantId = String;

/// A domain value that can be persisted as a JSON document.
///
/// The serialized form must expose the identifier under an `id` field; the
/// store strips it from the payload column and reattaches it from the key
/// column on the way back.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    fn id(&self) -> &str;
}

/// The managed form of an entity: the domain value plus row metadata.
///
/// Produced by the repository on every successful insert, update, upsert or
/// fetch. `delete` hands back a detached copy (marker cleared, all other
/// fields untouched).
#[derive(Debug, Clone, PartialEq)]
pub struct Saved<T> {
    entity: T,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    managed: bool,
}

impl<T> Saved<T> {
    pub(crate) fn managed(entity: T, created: DateTime<Utc>, updated: DateTime<Utc>) -> Self {
        Self {
            entity,
            created,
            updated,
            managed: true,
        }
    }

    pub fn entity(&self) -> &T {
        &self.entity
    }

    pub fn into_entity(self) -> T {
        self.entity
    }

    /// Server-assigned creation time of the backing row.
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Time of the last write to the backing row.
    pub fn updated(&self) -> DateTime<Utc> {
        self.updated
    }

    /// Whether this value is still believed to correspond to an existing row.
    pub fn is_managed(&self) -> bool {
        self.managed
    }

    pub(crate) fn detach(mut self) -> Self {
        self.managed = false;
        self
    }
}

impl<T> std::ops::Deref for Saved<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.entity
    }
}

impl<T> std::ops::DerefMut for Saved<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entity
    }
}

/// One page of results from a keyset-paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; absent on the final page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        title: String,
    }

    impl Entity for Note {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn note() -> Saved<Note> {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Saved::managed(
            Note {
                id: "n-1".to_string(),
                title: "hello".to_string(),
            },
            t,
            t,
        )
    }

    #[test]
    fn test_managed_wrapper_accessors() {
        let saved = note();
        assert!(saved.is_managed());
        assert_eq!(saved.entity().id, "n-1");
        assert_eq!(saved.created(), saved.updated());
    }

    #[test]
    fn test_detach_clears_marker_only() {
        let saved = note();
        let created = saved.created();
        let detached = saved.detach();

        assert!(!detached.is_managed());
        assert_eq!(detached.entity().title, "hello");
        assert_eq!(detached.created(), created);
    }

    #[test]
    fn test_deref_exposes_entity_fields() {
        let saved = note();
        assert_eq!(saved.id(), "n-1");
        assert_eq!(saved.title, "hello");
    }
}

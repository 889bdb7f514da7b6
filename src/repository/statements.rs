//! Per-table statement templates

/// The parametrized statement set for one logical table, built once at
/// repository construction.
///
/// All value positions are `$n` placeholders bound at call time; only the
/// table name is interpolated, and table names are code-supplied
/// identifiers, not user input. View-backed or otherwise irregular tables
/// can bypass [`TableStatements::new`] and supply the fields directly.
#[derive(Debug, Clone)]
pub struct TableStatements {
    pub table: String,
    pub fetch_by_id: String,
    pub delete_by_id: String,
    pub insert: String,
    pub update: String,
    pub upsert: String,
    pub page: String,
    pub count: String,
}

const COLUMNS: &str = "id, created, updated, data";

impl TableStatements {
    pub fn new(table: &str) -> Self {
        debug_assert!(
            is_identifier(table),
            "table name {table:?} is not a plain SQL identifier"
        );
        Self {
            table: table.to_string(),
            fetch_by_id: format!("SELECT {COLUMNS} FROM {table} WHERE id = $1"),
            delete_by_id: format!("DELETE FROM {table} WHERE id = $1"),
            insert: format!(
                "INSERT INTO {table} (id, tenant_id, data) VALUES ($1, $2, $3) \
                 RETURNING {COLUMNS}"
            ),
            update: format!(
                "UPDATE {table} SET updated = now(), data = $2 WHERE id = $1 \
                 RETURNING {COLUMNS}"
            ),
            upsert: format!(
                "INSERT INTO {table} (id, tenant_id, data) VALUES ($1, $2, $3) \
                 ON CONFLICT (id) DO UPDATE SET updated = now(), data = EXCLUDED.data \
                 RETURNING {COLUMNS}"
            ),
            page: format!(
                "SELECT {COLUMNS} FROM {table} WHERE $1::text IS NULL OR id > $1 \
                 ORDER BY id LIMIT $2"
            ),
            count: format!("SELECT count(*) FROM {table}"),
        }
    }
}

/// Accepts optionally schema-qualified names of unquoted identifiers.
fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
                _ => return false,
            }
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

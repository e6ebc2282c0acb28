//! Schema-agnostic table operations over any [`Store`].
//!
//! Table and column names are interpolated into SQL and must pass
//! [`validate_identifier`]; every value is bound through `?` placeholders.
//! Each operation either commits or rolls back before returning, so a failed
//! call leaves the store exactly as it was.

use crate::storage::store::{Store, StoreError, StoreResult};
use crate::storage::value::{Row, SqlValue};
use once_cell::sync::Lazy;
use regex::Regex;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());
static TYPE_SPEC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_ (),]*$").unwrap());

/// Reject anything that is not a plain SQL identifier.
pub fn validate_identifier(name: &str) -> StoreResult<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

fn validate_type_spec(spec: &str) -> StoreResult<()> {
    if TYPE_SPEC.is_match(spec) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(spec.to_string()))
    }
}

/// Table name plus ordered column definitions (`name -> type/constraint`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<(String, String)>,
}

impl TableSchema {
    pub fn new<N, T>(name: impl Into<String>, columns: impl IntoIterator<Item = (N, T)>) -> Self
    where
        N: Into<String>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns
                .into_iter()
                .map(|(n, t)| (n.into(), t.into()))
                .collect(),
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Eq,
    Ge,
}

impl Cmp {
    fn as_sql(self) -> &'static str {
        match self {
            Cmp::Eq => "=",
            Cmp::Ge => ">=",
        }
    }
}

/// One `column <op> ?` term of a WHERE clause. Terms are ANDed.
#[derive(Debug, Clone)]
pub struct Filter<'a> {
    pub column: &'a str,
    pub cmp: Cmp,
    pub value: SqlValue,
}

impl<'a> Filter<'a> {
    pub fn eq(column: &'a str, value: impl Into<SqlValue>) -> Self {
        Self {
            column,
            cmp: Cmp::Eq,
            value: value.into(),
        }
    }

    pub fn ge(column: &'a str, value: impl Into<SqlValue>) -> Self {
        Self {
            column,
            cmp: Cmp::Ge,
            value: value.into(),
        }
    }
}

pub struct TableHelper<'s> {
    store: &'s mut dyn Store,
}

impl<'s> TableHelper<'s> {
    pub fn new(store: &'s mut dyn Store) -> Self {
        Self { store }
    }

    /// `CREATE TABLE IF NOT EXISTS` from an ordered `column -> type` mapping.
    pub fn create_table<N, T>(&mut self, name: &str, columns: &[(N, T)]) -> StoreResult<()>
    where
        N: AsRef<str>,
        T: AsRef<str>,
    {
        self.run("creating", name, |store| {
            validate_identifier(name)?;
            let mut defs = Vec::with_capacity(columns.len());
            for (column, spec) in columns {
                validate_identifier(column.as_ref())?;
                validate_type_spec(spec.as_ref())?;
                defs.push(format!("{} {}", column.as_ref(), spec.as_ref()));
            }
            let sql = format!("CREATE TABLE IF NOT EXISTS {name} ({})", defs.join(", "));
            store.execute_ddl(&sql)
        })?;
        tracing::debug!(table = name, "table ready");
        Ok(())
    }

    /// Create the table described by `schema` if it is absent.
    pub fn ensure_schema(&mut self, schema: &TableSchema) -> StoreResult<()> {
        self.create_table(&schema.name, &schema.columns)
    }

    /// Insert one row from an ordered `column -> value` mapping. An empty
    /// mapping yields `INSERT INTO t () VALUES ()`, which the engine rejects.
    pub fn insert_to_table(&mut self, name: &str, columns: &[(&str, SqlValue)]) -> StoreResult<()> {
        self.run("inserting data into", name, |store| {
            validate_identifier(name)?;
            for (column, _) in columns {
                validate_identifier(column)?;
            }
            let names: Vec<&str> = columns.iter().map(|(c, _)| *c).collect();
            let placeholders = vec!["?"; columns.len()].join(", ");
            let sql = format!(
                "INSERT INTO {name} ({}) VALUES ({placeholders})",
                names.join(", ")
            );
            let values: Vec<SqlValue> = columns.iter().map(|(_, v)| v.clone()).collect();
            store.execute(&sql, &values)?;
            Ok(())
        })?;
        tracing::debug!(table = name, "row inserted");
        Ok(())
    }

    /// Select `columns` from every row matching all `filters`. No ORDER BY:
    /// row order is whatever the engine returns.
    pub fn select_from_table(
        &mut self,
        name: &str,
        columns: &[&str],
        filters: &[Filter<'_>],
    ) -> StoreResult<Vec<Row>> {
        self.run("reading from", name, |store| {
            validate_identifier(name)?;
            for column in columns {
                validate_identifier(column)?;
            }
            let (clause, values) = where_clause(filters)?;
            let sql = format!("SELECT {} FROM {name}{clause}", columns.join(", "));
            store.query(&sql, &values)
        })
    }

    pub fn count_rows(&mut self, name: &str, filters: &[Filter<'_>]) -> StoreResult<i64> {
        self.run("counting rows in", name, |store| {
            validate_identifier(name)?;
            let (clause, values) = where_clause(filters)?;
            let sql = format!("SELECT COUNT(*) FROM {name}{clause}");
            let rows = store.query(&sql, &values)?;
            Ok(rows
                .first()
                .and_then(|r| r.first())
                .and_then(SqlValue::as_i64)
                .unwrap_or(0))
        })
    }

    /// Run `op`, then commit. On any failure roll back before returning.
    fn run<T>(
        &mut self,
        action: &'static str,
        table: &str,
        op: impl FnOnce(&mut dyn Store) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let result = op(&mut *self.store).and_then(|value| {
            self.store.commit()?;
            Ok(value)
        });

        result.map_err(|e| {
            tracing::error!(table = table, error = %e, "error {action} table");
            if let Err(rb) = self.store.rollback() {
                tracing::error!(table = table, error = %rb, "rollback failed");
            }
            StoreError::Table {
                action,
                table: table.to_string(),
                source: Box::new(e),
            }
        })
    }
}

fn where_clause(filters: &[Filter<'_>]) -> StoreResult<(String, Vec<SqlValue>)> {
    if filters.is_empty() {
        return Ok((String::new(), Vec::new()));
    }
    let mut terms = Vec::with_capacity(filters.len());
    let mut values = Vec::with_capacity(filters.len());
    for filter in filters {
        validate_identifier(filter.column)?;
        terms.push(format!("{} {} ?", filter.column, filter.cmp.as_sql()));
        values.push(filter.value.clone());
    }
    Ok((format!(" WHERE {}", terms.join(" AND ")), values))
}

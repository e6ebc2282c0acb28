pub mod sqlite;
pub mod store;
pub mod table;
pub mod value;

use store::{Connector, StoreResult};
use table::{TableHelper, TableSchema};

/// Open a fresh connection, make sure `schema` exists, run `op`, then close.
/// The connection is closed whether or not `op` succeeds.
pub fn with_table<T>(
    connector: &dyn Connector,
    schema: &TableSchema,
    op: impl FnOnce(&mut TableHelper<'_>) -> StoreResult<T>,
) -> StoreResult<T> {
    let mut store = connector.connect()?;
    let result = {
        let mut table = TableHelper::new(store.as_mut());
        table.ensure_schema(schema).and_then(|()| op(&mut table))
    };
    if let Err(e) = store.close() {
        tracing::warn!(error = %e, db = %connector.location(), "failed to close store");
    }
    result
}

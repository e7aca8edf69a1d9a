use std::future::Future;

use crate::conversions::Cell;
use crate::error::SyncResult;

/// Column set given to tables created for record sets without rows.
pub const MINIMAL_COLUMNS: [&str; 2] = ["_id", "_creationTime"];

/// A relational store that synced tables are written to.
///
/// Table names are unqualified; implementations place them in their configured namespace.
pub trait Destination {
    fn table_exists(&self, table_name: &str) -> impl Future<Output = SyncResult<bool>> + Send;

    /// Creates `table_name` with one large-text column per entry of `columns`.
    fn create_table(
        &self,
        table_name: &str,
        columns: &[String],
    ) -> impl Future<Output = SyncResult<()>> + Send;

    fn truncate_table(&self, table_name: &str) -> impl Future<Output = SyncResult<()>> + Send;

    /// Inserts `rows` in batches of at most `batch_size` rows within a single transaction.
    ///
    /// Either every row is stored or, on failure, none is.
    fn insert_rows(
        &self,
        table_name: &str,
        columns: &[String],
        rows: Vec<Vec<Cell>>,
        batch_size: usize,
    ) -> impl Future<Output = SyncResult<u64>> + Send;
}

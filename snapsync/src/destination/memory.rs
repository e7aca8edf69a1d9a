use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::conversions::Cell;
use crate::destination::Destination;
use crate::error::{ErrorKind, SyncResult};

/// A table held by [`MemoryDestination`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// Calls received by [`MemoryDestination`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationOp {
    Create(String),
    Truncate(String),
    Insert(String, usize),
}

#[derive(Debug, Default)]
struct Inner {
    tables: Vec<MemoryTable>,
    operations: Vec<DestinationOp>,
}

impl Inner {
    fn table_mut(&mut self, table_name: &str) -> Option<&mut MemoryTable> {
        self.tables.iter_mut().find(|t| t.name == table_name)
    }
}

/// In-memory destination for tests and dry runs.
///
/// Inserts naming a column the table does not have fail without storing any row.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an existing table, as if created by an earlier run.
    pub async fn with_table(self, table_name: &str, columns: &[&str]) -> Self {
        {
            let mut inner = self.inner.lock().await;
            inner.tables.push(MemoryTable {
                name: table_name.to_owned(),
                columns: columns.iter().map(|c| (*c).to_owned()).collect(),
                rows: Vec::new(),
            });
        }
        self
    }

    pub async fn table(&self, table_name: &str) -> Option<MemoryTable> {
        let inner = self.inner.lock().await;
        inner.tables.iter().find(|t| t.name == table_name).cloned()
    }

    pub async fn tables(&self) -> Vec<MemoryTable> {
        self.inner.lock().await.tables.clone()
    }

    pub async fn operations(&self) -> Vec<DestinationOp> {
        self.inner.lock().await.operations.clone()
    }
}

impl Destination for MemoryDestination {
    async fn table_exists(&self, table_name: &str) -> SyncResult<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.tables.iter().any(|t| t.name == table_name))
    }

    async fn create_table(&self, table_name: &str, columns: &[String]) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.table_mut(table_name).is_some() {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Table already exists",
                table_name
            );
        }

        info!(table = table_name, columns = ?columns, "creating table");
        inner.tables.push(MemoryTable {
            name: table_name.to_owned(),
            columns: columns.to_vec(),
            rows: Vec::new(),
        });
        inner
            .operations
            .push(DestinationOp::Create(table_name.to_owned()));

        Ok(())
    }

    async fn truncate_table(&self, table_name: &str) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        let Some(table) = inner.table_mut(table_name) else {
            bail!(ErrorKind::TableMissing, "Table does not exist", table_name);
        };

        info!(table = table_name, rows = table.rows.len(), "truncating table");
        table.rows.clear();
        inner
            .operations
            .push(DestinationOp::Truncate(table_name.to_owned()));

        Ok(())
    }

    async fn insert_rows(
        &self,
        table_name: &str,
        columns: &[String],
        rows: Vec<Vec<Cell>>,
        batch_size: usize,
    ) -> SyncResult<u64> {
        let mut inner = self.inner.lock().await;
        let Some(table) = inner.table_mut(table_name) else {
            bail!(ErrorKind::TableMissing, "Table does not exist", table_name);
        };

        let mut positions = Vec::with_capacity(columns.len());
        for column in columns {
            match table.columns.iter().position(|c| c == column) {
                Some(position) => positions.push(position),
                None => bail!(
                    ErrorKind::DestinationQueryFailed,
                    "Column does not exist",
                    format!("column `{column}` of table `{table_name}`")
                ),
            }
        }

        info!(
            table = table_name,
            rows = rows.len(),
            batches = rows.len().div_ceil(batch_size.max(1)),
            "writing rows"
        );

        let row_count = rows.len();
        let width = table.columns.len();
        for row in rows {
            let mut stored = vec![Cell::Null; width];
            for (cell, &position) in row.into_iter().zip(&positions) {
                stored[position] = cell;
            }
            table.rows.push(stored);
        }

        inner
            .operations
            .push(DestinationOp::Insert(table_name.to_owned(), row_count));

        Ok(row_count as u64)
    }
}

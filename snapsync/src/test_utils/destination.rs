use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::bail;
use crate::conversions::Cell;
use crate::destination::Destination;
use crate::error::{ErrorKind, SyncResult};

/// Wraps a destination and fails the bulk insert of selected tables.
#[derive(Debug, Clone)]
pub struct FailingDestination<D> {
    wrapped: D,
    failing_inserts: Arc<Mutex<HashSet<String>>>,
}

impl<D> FailingDestination<D> {
    pub fn wrap(destination: D) -> Self {
        Self {
            wrapped: destination,
            failing_inserts: Arc::default(),
        }
    }

    pub fn fail_inserts_into(self, table_name: &str) -> Self {
        self.failing_inserts
            .lock()
            .unwrap()
            .insert(table_name.to_owned());
        self
    }

    pub fn wrapped(&self) -> &D {
        &self.wrapped
    }
}

impl<D> Destination for FailingDestination<D>
where
    D: Destination + Sync,
{
    async fn table_exists(&self, table_name: &str) -> SyncResult<bool> {
        self.wrapped.table_exists(table_name).await
    }

    async fn create_table(&self, table_name: &str, columns: &[String]) -> SyncResult<()> {
        self.wrapped.create_table(table_name, columns).await
    }

    async fn truncate_table(&self, table_name: &str) -> SyncResult<()> {
        self.wrapped.truncate_table(table_name).await
    }

    async fn insert_rows(
        &self,
        table_name: &str,
        columns: &[String],
        rows: Vec<Vec<Cell>>,
        batch_size: usize,
    ) -> SyncResult<u64> {
        let fail = self.failing_inserts.lock().unwrap().contains(table_name);
        if fail {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Injected insert failure",
                table_name
            );
        }

        self.wrapped
            .insert_rows(table_name, columns, rows, batch_size)
            .await
    }
}

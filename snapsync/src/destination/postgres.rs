use bytes::Bytes;
use futures::SinkExt;
use pg_escape::quote_identifier;
use rustls::ClientConfig;
use snapsync_config::shared::{DestinationConfig, IntoConnectOptions};
use std::io::BufReader;
use std::pin::pin;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{Client, Config, Connection, NoTls, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{Instrument, debug, error, info};

use crate::conversions::Cell;
use crate::destination::Destination;
use crate::error::SyncResult;

/// Spawns the task driving a Postgres connection.
fn spawn_postgres_connection<T>(connection: Connection<Socket, T::Stream>)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        if let Err(e) = connection.await {
            error!("an error occurred during the Postgres connection: {}", e);
            return;
        }

        info!("postgres connection terminated successfully")
    }
    .instrument(span);

    tokio::spawn(task);
}

/// Postgres destination writing into one schema.
///
/// All created columns are `text`. Rows are streamed with `COPY ... FROM STDIN` inside a
/// transaction, so a failed table load leaves no partial rows behind.
#[derive(Debug, Clone)]
pub struct PostgresDestination {
    client: Arc<Mutex<Client>>,
    schema: String,
}

impl PostgresDestination {
    pub async fn connect(config: &DestinationConfig) -> SyncResult<Self> {
        let client = match config.connection.tls.enabled {
            true => Self::connect_tls(config).await?,
            false => Self::connect_no_tls(config).await?,
        };

        Ok(Self {
            client: Arc::new(Mutex::new(client)),
            schema: config.schema.clone(),
        })
    }

    async fn connect_no_tls(config: &DestinationConfig) -> SyncResult<Client> {
        let pg_config: Config = config.connection.with_db();
        let (client, connection) = pg_config.connect(NoTls).await?;
        spawn_postgres_connection::<NoTls>(connection);

        info!("successfully connected to postgres without tls");

        Ok(client)
    }

    async fn connect_tls(config: &DestinationConfig) -> SyncResult<Client> {
        let pg_config: Config = config.connection.with_db();

        let mut root_store = rustls::RootCertStore::empty();
        let mut root_certs_reader =
            BufReader::new(config.connection.tls.trusted_root_certs.as_bytes());
        for cert in rustls_pemfile::certs(&mut root_certs_reader) {
            root_store.add(cert?)?;
        }

        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let (client, connection) = pg_config.connect(MakeRustlsConnect::new(tls_config)).await?;
        spawn_postgres_connection::<MakeRustlsConnect>(connection);

        info!("successfully connected to postgres with tls");

        Ok(client)
    }

    fn qualified_name(&self, table_name: &str) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(table_name)
        )
    }
}

impl Destination for PostgresDestination {
    async fn table_exists(&self, table_name: &str) -> SyncResult<bool> {
        let client = self.client.lock().await;
        let row = client
            .query_one(
                "select exists (select 1 from information_schema.tables \
                 where table_schema = $1 and table_name = $2)",
                &[&self.schema, &table_name],
            )
            .await?;

        Ok(row.try_get::<_, bool>(0)?)
    }

    async fn create_table(&self, table_name: &str, columns: &[String]) -> SyncResult<()> {
        let column_definitions = columns
            .iter()
            .map(|column| format!("{} text", quote_identifier(column)))
            .collect::<Vec<_>>()
            .join(", ");

        let statement = format!(
            "create schema if not exists {schema}; create table {table} ({column_definitions});",
            schema = quote_identifier(&self.schema),
            table = self.qualified_name(table_name),
        );

        debug!(table = table_name, "creating table");
        self.client.lock().await.batch_execute(&statement).await?;

        Ok(())
    }

    async fn truncate_table(&self, table_name: &str) -> SyncResult<()> {
        let statement = format!("truncate table {}", self.qualified_name(table_name));

        debug!(table = table_name, "truncating table");
        self.client.lock().await.batch_execute(&statement).await?;

        Ok(())
    }

    async fn insert_rows(
        &self,
        table_name: &str,
        columns: &[String],
        rows: Vec<Vec<Cell>>,
        batch_size: usize,
    ) -> SyncResult<u64> {
        if columns.is_empty() || rows.is_empty() {
            debug!(table = table_name, "nothing to copy");
            return Ok(0);
        }

        let column_list = columns
            .iter()
            .map(|column| quote_identifier(column).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        let statement = format!(
            "copy {} ({column_list}) from stdin",
            self.qualified_name(table_name)
        );

        let mut client = self.client.lock().await;
        // Dropping the transaction without commit rolls it back.
        let transaction = client.transaction().await?;

        let mut inserted = 0;
        for batch in rows.chunks(batch_size.max(1)) {
            let sink = transaction.copy_in::<_, Bytes>(statement.as_str()).await?;
            let mut sink = pin!(sink);
            sink.send(encode_copy_rows(batch)).await?;
            inserted += sink.as_mut().finish().await?;

            debug!(table = table_name, rows = batch.len(), "copied batch");
        }

        transaction.commit().await?;

        Ok(inserted)
    }
}

/// Encodes rows in the text `COPY` format.
fn encode_copy_rows(rows: &[Vec<Cell>]) -> Bytes {
    let mut buffer = String::new();
    for row in rows {
        for (index, cell) in row.iter().enumerate() {
            if index > 0 {
                buffer.push('\t');
            }
            match cell.to_text() {
                Some(text) => escape_copy_text(&text, &mut buffer),
                None => buffer.push_str("\\N"),
            }
        }
        buffer.push('\n');
    }

    Bytes::from(buffer)
}

fn escape_copy_text(text: &str, buffer: &mut String) {
    for c in text.chars() {
        match c {
            '\\' => buffer.push_str("\\\\"),
            '\n' => buffer.push_str("\\n"),
            '\r' => buffer.push_str("\\r"),
            '\t' => buffer.push_str("\\t"),
            c => buffer.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_rows_escape_special_characters() {
        let rows = vec![
            vec![
                Cell::String("u1".to_owned()),
                Cell::String("line\nbreak\ttab\\slash".to_owned()),
                Cell::Null,
            ],
            vec![Cell::F64(42.0), Cell::Bool(true), Cell::String(String::new())],
        ];

        let encoded = encode_copy_rows(&rows);

        assert_eq!(
            std::str::from_utf8(&encoded).unwrap(),
            "u1\tline\\nbreak\\ttab\\\\slash\t\\N\n42\ttrue\t\n"
        );
    }
}

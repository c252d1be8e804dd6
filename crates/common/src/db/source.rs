use super::{ColumnInfo, DbPool, StructuredDataSource};
use crate::errors::Result;
use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbBackend, FromQueryResult, JsonValue, Statement,
    TransactionTrait, Value,
};

#[derive(Debug, FromQueryResult)]
struct TableRow {
    name: String,
}

#[derive(Debug, FromQueryResult)]
struct ColumnRow {
    name: String,
    data_type: String,
}

/// Structured data source over a sea-orm connection
///
/// Schema discovery reads `information_schema` on PostgreSQL and MySQL and
/// `sqlite_master` on SQLite. Statements run inside a transaction that is
/// always rolled back.
#[derive(Clone)]
pub struct SeaOrmDataSource {
    conn: DatabaseConnection,
}

impl SeaOrmDataSource {
    /// Use the pool's read connection
    pub fn new(pool: &DbPool) -> Self {
        Self {
            conn: pool.read().clone(),
        }
    }

    pub fn from_connection(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    fn backend(&self) -> DbBackend {
        self.conn.get_database_backend()
    }
}

#[async_trait]
impl StructuredDataSource for SeaOrmDataSource {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let backend = self.backend();
        let sql = match backend {
            DbBackend::MySql => {
                "SELECT CAST(table_name AS CHAR) AS name \
                 FROM information_schema.tables \
                 WHERE table_schema = DATABASE() \
                 ORDER BY table_name"
            }
            DbBackend::Sqlite => {
                "SELECT name FROM sqlite_master \
                 WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name"
            }
            _ => {
                "SELECT table_name::text AS name \
                 FROM information_schema.tables \
                 WHERE table_schema NOT IN ('pg_catalog', 'information_schema') \
                 ORDER BY table_name"
            }
        };

        let rows = TableRow::find_by_statement(Statement::from_string(backend, sql))
            .all(&self.conn)
            .await?;

        Ok(rows.into_iter().map(|row| row.name).collect())
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let backend = self.backend();
        let sql = match backend {
            DbBackend::MySql => {
                "SELECT CAST(column_name AS CHAR) AS name, CAST(column_type AS CHAR) AS data_type \
                 FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? \
                 ORDER BY ordinal_position"
            }
            DbBackend::Sqlite => {
                "SELECT name, type AS data_type FROM pragma_table_info(?) ORDER BY cid"
            }
            _ => {
                "SELECT column_name::text AS name, data_type::text AS data_type \
                 FROM information_schema.columns \
                 WHERE table_name = $1 \
                   AND table_schema NOT IN ('pg_catalog', 'information_schema') \
                 ORDER BY ordinal_position"
            }
        };

        let stmt = Statement::from_sql_and_values(backend, sql, [Value::from(table)]);
        let rows = ColumnRow::find_by_statement(stmt).all(&self.conn).await?;

        Ok(rows
            .into_iter()
            .map(|row| ColumnInfo::new(row.name, row.data_type))
            .collect())
    }

    fn adapter_name(&self) -> String {
        format!("{:?}", self.backend()).to_lowercase()
    }

    async fn execute(&self, statement: &str) -> Result<Vec<serde_json::Value>> {
        let backend = self.backend();
        let txn = self.conn.begin().await?;

        if backend == DbBackend::Postgres {
            txn.execute_unprepared("SET TRANSACTION READ ONLY").await?;
        }

        let rows = JsonValue::find_by_statement(Statement::from_string(backend, statement))
            .all(&txn)
            .await;

        // Nothing issued through this connection is ever committed
        txn.rollback().await?;

        Ok(rows?)
    }
}

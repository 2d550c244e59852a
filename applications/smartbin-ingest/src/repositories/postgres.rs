use super::BinStore;
use crate::db::DbPool;
use crate::error::AppError;
use crate::model::{BinPatch, BinRecord, FieldValue};
use async_trait::async_trait;
use tracing::debug;

/// Output columns; numeric casts let the table use NUMERIC or DOUBLE PRECISION.
const RECORD_COLUMNS: &str = "bin_id, \
    latitude::float8 AS latitude, \
    longitude::float8 AS longitude, \
    collection_frequency_per_month::int4 AS collection_frequency_per_month, \
    average_collection_time_days::int4 AS average_collection_time_days, \
    tilt_status, \
    fill_level_percentage::float8 AS fill_level_percentage, \
    temperature_celsius::float8 AS temperature_celsius, \
    displacement, \
    days_since_last_emptied::int4 AS days_since_last_emptied, \
    communication_status, \
    battery_level_percentage::float8 AS battery_level_percentage";

pub struct PgBinStore {
    pool: DbPool,
    table: String,
}

impl PgBinStore {
    /// `table` must already be a checked identifier (see `Config::load`).
    pub fn new(pool: DbPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// `INSERT .. ON CONFLICT DO UPDATE` touching only the patch's columns.
    /// Postgres holds the row lock for the statement, which is what keeps
    /// concurrent partial updates from overwriting each other.
    pub fn upsert_sql(&self, patch: &BinPatch) -> String {
        let mut columns = vec!["bin_id".to_string()];
        let mut placeholders = vec!["$1".to_string()];
        let mut updates = Vec::with_capacity(patch.fields.len());

        for (i, (prop, value)) in patch.fields.iter().enumerate() {
            let cast = match value {
                FieldValue::Decimal(_) => "::float8",
                FieldValue::Integer(_) => "::int4",
                FieldValue::Text(_) => "",
            };
            columns.push(prop.name().to_string());
            placeholders.push(format!("${}{}", i + 2, cast));
            updates.push(format!("{0} = EXCLUDED.{0}", prop.name()));
        }

        // A bin_id-only reading still has to create (or return) the row.
        if updates.is_empty() {
            updates.push("bin_id = EXCLUDED.bin_id".to_string());
        }

        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT (bin_id) DO UPDATE SET {} RETURNING {}",
            self.table,
            columns.join(", "),
            placeholders.join(", "),
            updates.join(", "),
            RECORD_COLUMNS
        )
    }
}

#[async_trait]
impl BinStore for PgBinStore {
    async fn upsert(&self, patch: &BinPatch) -> Result<BinRecord, AppError> {
        let sql = self.upsert_sql(patch);
        let mut q = sqlx::query_as::<_, BinRecord>(&sql).bind(&patch.bin_id);
        for value in patch.fields.values() {
            q = match value {
                FieldValue::Decimal(v) => q.bind(*v),
                FieldValue::Integer(v) => q.bind(*v),
                FieldValue::Text(v) => q.bind(v.clone()),
            };
        }

        // Dropping the transaction on error rolls it back.
        let mut tx = self.pool.begin().await?;
        let record = q.fetch_one(&mut *tx).await?;
        tx.commit().await?;

        debug!(bin_id = %record.bin_id, columns = patch.fields.len(), "bin upserted");
        Ok(record)
    }

    async fn get(&self, bin_id: &str) -> Result<Option<BinRecord>, AppError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE bin_id = $1",
            RECORD_COLUMNS, self.table
        );
        let record = sqlx::query_as::<_, BinRecord>(&sql)
            .bind(bin_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list_all(&self) -> Result<Vec<BinRecord>, AppError> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY bin_id",
            RECORD_COLUMNS, self.table
        );
        let records = sqlx::query_as::<_, BinRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use costscout_core::error::AppError;
use costscout_core::models::Record;
use costscout_core::traits::RecordStore;
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

const COLUMNS: &str = "id, category, subcategory, item_name, price, price_min, price_max, \
     price_median, sample_size, currency, location, source, source_url, confidence, unit, \
     tags, attributes, recorded_at, valid_from, valid_to, created_at";

/// A persisted cost data point.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StoredRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: Record,
}

/// Repository for cost data points in PostgreSQL. Rows are insert-only.
#[derive(Clone)]
pub struct CostDataRepository {
    pool: Pool<Postgres>,
}

impl CostDataRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert one record. Returns the generated UUID.
    pub async fn create(&self, record: &Record) -> Result<Uuid, AppError> {
        let sample_size = record
            .sample_size
            .map(i32::try_from)
            .transpose()
            .map_err(|_| AppError::DatabaseError("sample_size out of range".into()))?;

        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO cost_data_points (
                category, subcategory, item_name, price, price_min, price_max, price_median,
                sample_size, currency, location, source, source_url, confidence, unit,
                tags, attributes, recorded_at, valid_from, valid_to
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            RETURNING id
            "#,
        )
        .bind(&record.category)
        .bind(&record.subcategory)
        .bind(&record.item_name)
        .bind(record.price)
        .bind(record.price_min)
        .bind(record.price_max)
        .bind(record.price_median)
        .bind(sample_size)
        .bind(&record.currency)
        .bind(&record.location)
        .bind(&record.source)
        .bind(&record.source_url)
        .bind(record.confidence)
        .bind(&record.unit)
        .bind(&record.tags)
        .bind(Json(&record.attributes))
        .bind(record.recorded_at)
        .bind(record.valid_from)
        .bind(record.valid_to)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.0)
    }

    /// Most recent records, newest first, optionally for one source.
    pub async fn recent(
        &self,
        source: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, AppError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM cost_data_points \
             WHERE ($1::VARCHAR IS NULL OR source = $1) \
             ORDER BY recorded_at DESC, created_at DESC \
             LIMIT $2"
        );
        let rows = sqlx::query_as::<_, CostDataRow>(&sql)
            .bind(source)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Number of stored records per source.
    pub async fn count_by_source(&self) -> Result<BTreeMap<String, i64>, AppError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT source, COUNT(*) FROM cost_data_points GROUP BY source",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().collect())
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct CostDataRow {
    id: Uuid,
    category: String,
    subcategory: Option<String>,
    item_name: String,
    price: f64,
    price_min: Option<f64>,
    price_max: Option<f64>,
    price_median: Option<f64>,
    sample_size: Option<i32>,
    currency: String,
    location: String,
    source: String,
    source_url: String,
    confidence: f64,
    unit: String,
    tags: Vec<String>,
    attributes: Json<BTreeMap<String, String>>,
    recorded_at: DateTime<Utc>,
    valid_from: DateTime<Utc>,
    valid_to: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<CostDataRow> for StoredRecord {
    fn from(row: CostDataRow) -> Self {
        StoredRecord {
            id: row.id,
            created_at: row.created_at,
            record: Record {
                category: row.category,
                subcategory: row.subcategory,
                item_name: row.item_name,
                price: row.price,
                price_min: row.price_min,
                price_max: row.price_max,
                price_median: row.price_median,
                sample_size: row.sample_size.and_then(|n| u32::try_from(n).ok()),
                currency: row.currency,
                location: row.location,
                source: row.source,
                source_url: row.source_url,
                confidence: row.confidence,
                unit: row.unit,
                tags: row.tags,
                attributes: row.attributes.0,
                recorded_at: row.recorded_at,
                valid_from: row.valid_from,
                valid_to: row.valid_to,
            },
        }
    }
}

// -- Trait implementation --

impl RecordStore for CostDataRepository {
    async fn create(&self, record: &Record) -> Result<Uuid, AppError> {
        CostDataRepository::create(self, record).await
    }
}

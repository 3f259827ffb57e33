use std::path::Path;
use std::sync::Arc;

use tracing::info;
use turso::{Builder, Connection, Database, Row};

use crate::error::QuotaError;

/// Shared handle to the embedded database
#[derive(Clone)]
pub struct Db {
    database: Arc<Database>,
}

impl Db {
    /// Open (or create) the database file and ensure the schema exists.
    pub async fn open(path: &Path) -> Result<Self, QuotaError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| QuotaError::DatabaseError("Database path is not UTF-8".into()))?;
        let database = Builder::new_local(path_str)
            .build()
            .await
            .map_err(|e| QuotaError::DatabaseError(format!("Failed to open database: {e}")))?;

        let db = Self {
            database: Arc::new(database),
        };
        db.create_tables().await?;

        info!("Database initialized at {}", path_str);
        Ok(db)
    }

    /// Get a database connection
    pub fn connect(&self) -> Result<Connection, QuotaError> {
        self.database
            .connect()
            .map_err(|e| QuotaError::DatabaseError(format!("Failed to get connection: {e}")))
    }

    async fn create_tables(&self) -> Result<(), QuotaError> {
        let conn = self.connect()?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS credit_accounts (
                user_id TEXT PRIMARY KEY,
                plan_tier TEXT NOT NULL DEFAULT 'free',
                credits_remaining INTEGER NOT NULL,
                credits_total INTEGER NOT NULL,
                last_reset_at INTEGER NOT NULL,
                next_reset_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            (),
        )
        .await
        .map_err(|e| {
            QuotaError::DatabaseError(format!("Failed to create credit_accounts table: {e}"))
        })?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS generation_records (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                generation_type TEXT NOT NULL,
                input_data TEXT NOT NULL,
                result_reference TEXT,
                credits_charged INTEGER NOT NULL DEFAULT 0,
                processing_time_ms INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
            (),
        )
        .await
        .map_err(|e| {
            QuotaError::DatabaseError(format!("Failed to create generation_records table: {e}"))
        })?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS credit_deductions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                generation_type TEXT NOT NULL,
                credits_charged INTEGER NOT NULL,
                refunded INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                refunded_at INTEGER
            )
            "#,
            (),
        )
        .await
        .map_err(|e| {
            QuotaError::DatabaseError(format!("Failed to create credit_deductions table: {e}"))
        })?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_generation_records_user_created ON generation_records (user_id, created_at)",
            (),
        )
        .await
        .map_err(|e| {
            QuotaError::DatabaseError(format!("Failed to create generation_records index: {e}"))
        })?;

        Ok(())
    }
}

/// Read an integer column as u64, treating NULL or errors as 0
pub fn get_u64(row: &Row, idx: usize) -> u64 {
    row.get::<i64>(idx).unwrap_or(0).max(0) as u64
}

/// Read an integer column that must fit a u32 (credit counts)
pub fn get_u32(row: &Row, idx: usize) -> Result<u32, QuotaError> {
    let value = row
        .get::<i64>(idx)
        .map_err(|e| QuotaError::DatabaseError(format!("Failed to read column {idx}: {e}")))?;
    u32::try_from(value).map_err(|_| {
        QuotaError::DatabaseError(format!("Column {idx} value {value} is out of range"))
    })
}

/// Read a nullable text column
pub fn opt_string(row: &Row, idx: usize) -> Option<String> {
    row.get::<String>(idx).ok()
}

use super::{StoredRecord, TableStore, UpsertOutcome};
use crate::constants::{SOURCE_DATE_FORMAT, TRANSACTIONS_TABLE};
use crate::error::{EtlError, Result};
use crate::types::CanonicalRecord;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// SQLite-backed table store. The table is created once when the store is
/// opened; upserts rely on the `dedup_key` primary key.
pub struct SqliteTableStore {
    conn: Mutex<Connection>,
}

impl SqliteTableStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path).map_err(|e| {
            EtlError::StorageUnavailable(format!("failed to open {}: {e}", db_path.display()))
        })?;
        info!("Opened table store at {}", db_path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EtlError::StorageUnavailable(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(&format!(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS {TRANSACTIONS_TABLE} (
                dedup_key               TEXT PRIMARY KEY,
                district_code           TEXT NOT NULL,
                district_name           TEXT NOT NULL,
                dong_name               TEXT NOT NULL,
                apartment_name          TEXT NOT NULL,
                transaction_amount_won  INTEGER NOT NULL,
                area_sqm                REAL NOT NULL,
                area_pyeong             REAL NOT NULL,
                price_per_sqm           INTEGER NOT NULL,
                construction_year       INTEGER,
                floor                   INTEGER,
                transaction_date        TEXT,
                registration_date       TEXT NOT NULL,
                data_quality_score      INTEGER NOT NULL,
                created_at              TEXT NOT NULL,
                updated_at              TEXT
            );
            "#
        ))
        .map_err(EtlError::database)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EtlError::StorageUnavailable("connection lock poisoned".to_string()))
    }
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_stored(row: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    let transaction_date: Option<String> = row.get(11)?;
    let created_at: String = row.get(14)?;
    let updated_at: Option<String> = row.get(15)?;
    let quality: i64 = row.get(13)?;

    let record = CanonicalRecord {
        dedup_key: row.get(0)?,
        district_code: row.get(1)?,
        district_name: row.get(2)?,
        dong_name: row.get(3)?,
        apartment_name: row.get(4)?,
        amount_minor_unit: row.get(5)?,
        area_sqm: row.get(6)?,
        area_alt_unit: row.get(7)?,
        price_per_area: row.get(8)?,
        construction_year: row.get(9)?,
        floor: row.get(10)?,
        transaction_date: transaction_date
            .and_then(|d| NaiveDate::parse_from_str(&d, SOURCE_DATE_FORMAT).ok()),
        registration_date: row.get(12)?,
        quality_score: quality.clamp(0, 100) as u8,
        created_at: parse_timestamp(&created_at)?,
    };
    let updated_at = match updated_at {
        Some(raw) => Some(parse_timestamp(&raw)?),
        None => None,
    };
    Ok(StoredRecord { record, updated_at })
}

#[async_trait]
impl TableStore for SqliteTableStore {
    async fn check_connection(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| EtlError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn upsert(&self, record: &CanonicalRecord) -> Result<UpsertOutcome> {
        let conn = self.lock()?;

        let exists = conn
            .query_row(
                &format!("SELECT 1 FROM {TRANSACTIONS_TABLE} WHERE dedup_key = ?1"),
                params![record.dedup_key],
                |_| Ok(()),
            )
            .optional()
            .map_err(EtlError::database)?
            .is_some();

        let transaction_date = record
            .transaction_date
            .map(|d| d.format(SOURCE_DATE_FORMAT).to_string());
        let now = Utc::now().to_rfc3339();

        conn.execute(
            &format!(
                "INSERT INTO {TRANSACTIONS_TABLE} (
                    dedup_key, district_code, district_name, dong_name, apartment_name,
                    transaction_amount_won, area_sqm, area_pyeong, price_per_sqm,
                    construction_year, floor, transaction_date, registration_date,
                    data_quality_score, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, NULL)
                 ON CONFLICT(dedup_key) DO UPDATE SET
                    district_code=excluded.district_code,
                    district_name=excluded.district_name,
                    dong_name=excluded.dong_name,
                    apartment_name=excluded.apartment_name,
                    transaction_amount_won=excluded.transaction_amount_won,
                    area_sqm=excluded.area_sqm,
                    area_pyeong=excluded.area_pyeong,
                    price_per_sqm=excluded.price_per_sqm,
                    construction_year=excluded.construction_year,
                    floor=excluded.floor,
                    transaction_date=excluded.transaction_date,
                    registration_date=excluded.registration_date,
                    data_quality_score=excluded.data_quality_score,
                    updated_at=?16"
            ),
            params![
                record.dedup_key,
                record.district_code,
                record.district_name,
                record.dong_name,
                record.apartment_name,
                record.amount_minor_unit,
                record.area_sqm,
                record.area_alt_unit,
                record.price_per_area,
                record.construction_year,
                record.floor,
                transaction_date,
                record.registration_date,
                record.quality_score as i64,
                record.created_at.to_rfc3339(),
                now,
            ],
        )
        .map_err(EtlError::database)?;

        debug!(
            "{} record {}",
            if exists { "Updated" } else { "Inserted" },
            record.dedup_key
        );
        Ok(if exists {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    async fn get(&self, dedup_key: &str) -> Result<Option<StoredRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT dedup_key, district_code, district_name, dong_name, apartment_name,
                        transaction_amount_won, area_sqm, area_pyeong, price_per_sqm,
                        construction_year, floor, transaction_date, registration_date,
                        data_quality_score, created_at, updated_at
                 FROM {TRANSACTIONS_TABLE} WHERE dedup_key = ?1"
            ),
            params![dedup_key],
            row_to_stored,
        )
        .optional()
        .map_err(EtlError::database)
    }

    async fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {TRANSACTIONS_TABLE}"), [], |row| row.get(0))
            .map_err(EtlError::database)?;
        Ok(n as usize)
    }
}

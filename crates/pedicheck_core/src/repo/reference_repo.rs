//! Growth reference repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Seed the reference rows exactly once and seal them.
//! - Load the sealed rows into an in-memory `ReferenceTable`.
//!
//! # Invariants
//! - Seeding validates the full row set before any SQL write.
//! - Seeding identical data again is a no-op; differing data after the seal
//!   fails with `ReferenceTableLocked`.
//! - Loading requires the seal and re-checks the stored fingerprint.
//!
//! # See also
//! - db/migrations/0001_growth_reference.sql

use crate::db::{is_trigger_abort, DbError, REFERENCE_LOCKED_MESSAGE};
use crate::growth::reference_table::{fingerprint_rows, ReferenceError, ReferenceTable};
use crate::model::growth::{Gender, GrowthReferenceRow, Indicator, SdCutoffs};
use crate::repo::{ensure_connection_ready, SchemaError, TableShape};
use log::{error, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

const REFERENCE_SELECT_SQL: &str = "SELECT
    indicator,
    gender,
    age_days,
    length_height_cm,
    l,
    m,
    s,
    sd3neg,
    sd2neg,
    sd1neg,
    sd0,
    sd1,
    sd2,
    sd3
FROM growth_reference";

const REQUIRED_TABLES: &[TableShape] = &[
    (
        "growth_reference",
        &[
            "indicator",
            "gender",
            "age_days",
            "length_height_cm",
            "l",
            "m",
            "s",
            "sd3neg",
            "sd2neg",
            "sd1neg",
            "sd0",
            "sd1",
            "sd2",
            "sd3",
        ],
    ),
    (
        "reference_seal",
        &["id", "dataset_version", "row_count", "fingerprint", "sealed_at"],
    ),
];

pub type ReferenceRepoResult<T> = Result<T, ReferenceRepoError>;

#[derive(Debug)]
pub enum ReferenceRepoError {
    Db(DbError),
    Schema(SchemaError),
    /// Seed rows failed validation.
    Reference(ReferenceError),
    /// A write touched sealed reference data.
    ReferenceTableLocked,
    /// Rows were requested before a seal exists.
    ReferenceNotSealed,
    /// Stored rows no longer hash to the sealed fingerprint.
    FingerprintMismatch { expected: String, actual: String },
    InvalidData(String),
}

impl Display for ReferenceRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Schema(err) => write!(f, "{err}"),
            Self::Reference(err) => write!(f, "{err}"),
            Self::ReferenceTableLocked => write!(f, "reference table is sealed and read-only"),
            Self::ReferenceNotSealed => write!(f, "reference table has not been sealed"),
            Self::FingerprintMismatch { expected, actual } => write!(
                f,
                "reference fingerprint mismatch: sealed {expected}, stored rows {actual}"
            ),
            Self::InvalidData(message) => write!(f, "invalid reference data: {message}"),
        }
    }
}

impl Error for ReferenceRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Schema(err) => Some(err),
            Self::Reference(err) => Some(err),
            Self::ReferenceTableLocked
            | Self::ReferenceNotSealed
            | Self::FingerprintMismatch { .. }
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for ReferenceRepoError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => err.into(),
            other => Self::Db(other),
        }
    }
}

impl From<rusqlite::Error> for ReferenceRepoError {
    fn from(value: rusqlite::Error) -> Self {
        if is_trigger_abort(&value, REFERENCE_LOCKED_MESSAGE) {
            return Self::ReferenceTableLocked;
        }
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<SchemaError> for ReferenceRepoError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl From<ReferenceError> for ReferenceRepoError {
    fn from(value: ReferenceError) -> Self {
        Self::Reference(value)
    }
}

/// Metadata of the sealed dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealStatus {
    pub dataset_version: String,
    pub row_count: usize,
    pub fingerprint: String,
    /// Epoch ms.
    pub sealed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOutcome {
    /// Rows were written and the table sealed by this call.
    Sealed(SealStatus),
    /// The same data was already sealed; nothing was written.
    AlreadySealed(SealStatus),
}

impl SeedOutcome {
    pub fn status(&self) -> &SealStatus {
        match self {
            Self::Sealed(status) | Self::AlreadySealed(status) => status,
        }
    }
}

/// Repository interface for growth reference data.
pub trait ReferenceRepository {
    /// Writes and seals `rows`, or confirms identical data is already sealed.
    fn seed(
        &self,
        dataset_version: &str,
        rows: &[GrowthReferenceRow],
    ) -> ReferenceRepoResult<SeedOutcome>;
    fn seal_status(&self) -> ReferenceRepoResult<Option<SealStatus>>;
    /// Loads stored rows in key order, sealed or not.
    fn load_rows(&self) -> ReferenceRepoResult<Vec<GrowthReferenceRow>>;
    /// Loads the sealed rows into an immutable table.
    fn load_table(&self) -> ReferenceRepoResult<ReferenceTable>;
}

/// SQLite-backed growth reference repository.
pub struct SqliteReferenceRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteReferenceRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> ReferenceRepoResult<Self> {
        ensure_connection_ready::<ReferenceRepoError>(conn, REQUIRED_TABLES)?;
        Ok(Self { conn })
    }
}

impl ReferenceRepository for SqliteReferenceRepository<'_> {
    fn seed(
        &self,
        dataset_version: &str,
        rows: &[GrowthReferenceRow],
    ) -> ReferenceRepoResult<SeedOutcome> {
        let dataset_version = dataset_version.trim();
        if dataset_version.is_empty() {
            return Err(ReferenceRepoError::InvalidData(
                "dataset_version must not be blank".to_string(),
            ));
        }
        let candidate = ReferenceTable::from_rows(rows.iter().cloned())?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if let Some(existing) = read_seal(&tx)? {
            if existing.fingerprint == candidate.fingerprint() {
                info!(
                    "event=reference_seed module=repo status=ok outcome=already_sealed dataset_version={} rows={}",
                    existing.dataset_version, existing.row_count
                );
                return Ok(SeedOutcome::AlreadySealed(existing));
            }
            warn!(
                "event=reference_seed module=repo status=error error_code=reference_table_locked dataset_version={}",
                dataset_version
            );
            return Err(ReferenceRepoError::ReferenceTableLocked);
        }

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO growth_reference (
                    indicator,
                    gender,
                    age_days,
                    length_height_cm,
                    l,
                    m,
                    s,
                    sd3neg,
                    sd2neg,
                    sd1neg,
                    sd0,
                    sd1,
                    sd2,
                    sd3
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14);",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.indicator.as_str(),
                    row.gender.as_str(),
                    row.age_days,
                    row.length_height_cm,
                    row.l,
                    row.m,
                    row.s,
                    row.sd.sd3neg,
                    row.sd.sd2neg,
                    row.sd.sd1neg,
                    row.sd.sd0,
                    row.sd.sd1,
                    row.sd.sd2,
                    row.sd.sd3,
                ])?;
            }
        }

        // Rows inserted before this call (without a seal) would change the set.
        let stored = read_rows(&tx)?;
        let actual = fingerprint_rows(&stored);
        if actual != candidate.fingerprint() {
            error!(
                "event=reference_seed module=repo status=error error_code=fingerprint_mismatch dataset_version={}",
                dataset_version
            );
            return Err(ReferenceRepoError::FingerprintMismatch {
                expected: candidate.fingerprint().to_string(),
                actual,
            });
        }

        tx.execute(
            "INSERT INTO reference_seal (id, dataset_version, row_count, fingerprint)
             VALUES (1, ?1, ?2, ?3);",
            params![
                dataset_version,
                i64::try_from(candidate.len()).map_err(|_| {
                    ReferenceRepoError::InvalidData("row count overflows i64".to_string())
                })?,
                candidate.fingerprint(),
            ],
        )?;
        let status = read_seal(&tx)?.ok_or_else(|| {
            ReferenceRepoError::InvalidData("seal row missing after insert".to_string())
        })?;
        tx.commit()?;

        info!(
            "event=reference_seed module=repo status=ok outcome=sealed dataset_version={} rows={}",
            status.dataset_version, status.row_count
        );
        Ok(SeedOutcome::Sealed(status))
    }

    fn seal_status(&self) -> ReferenceRepoResult<Option<SealStatus>> {
        read_seal(self.conn)
    }

    fn load_rows(&self) -> ReferenceRepoResult<Vec<GrowthReferenceRow>> {
        read_rows(self.conn)
    }

    fn load_table(&self) -> ReferenceRepoResult<ReferenceTable> {
        let seal = self
            .seal_status()?
            .ok_or(ReferenceRepoError::ReferenceNotSealed)?;
        let table = ReferenceTable::from_rows(read_rows(self.conn)?)?;

        if table.fingerprint() != seal.fingerprint || table.len() != seal.row_count {
            error!(
                "event=reference_load module=repo status=error error_code=fingerprint_mismatch dataset_version={} sealed_rows={} stored_rows={}",
                seal.dataset_version,
                seal.row_count,
                table.len()
            );
            return Err(ReferenceRepoError::FingerprintMismatch {
                expected: seal.fingerprint,
                actual: table.fingerprint().to_string(),
            });
        }

        info!(
            "event=reference_load module=repo status=ok dataset_version={} rows={}",
            seal.dataset_version,
            table.len()
        );
        Ok(table)
    }
}

fn read_seal(conn: &Connection) -> ReferenceRepoResult<Option<SealStatus>> {
    let raw = conn
        .query_row(
            "SELECT dataset_version, row_count, fingerprint, sealed_at
             FROM reference_seal
             WHERE id = 1;",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    raw.map(|(dataset_version, row_count, fingerprint, sealed_at)| {
        let row_count = usize::try_from(row_count).map_err(|_| {
            ReferenceRepoError::InvalidData(format!("invalid sealed row_count {row_count}"))
        })?;
        Ok(SealStatus {
            dataset_version,
            row_count,
            fingerprint,
            sealed_at,
        })
    })
    .transpose()
}

fn read_rows(conn: &Connection) -> ReferenceRepoResult<Vec<GrowthReferenceRow>> {
    let mut stmt = conn.prepare(&format!(
        "{REFERENCE_SELECT_SQL}
         ORDER BY indicator ASC, gender ASC, age_days ASC, length_height_cm ASC;"
    ))?;
    let mut rows = stmt.query([])?;

    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(parse_reference_row(row)?);
    }
    Ok(items)
}

fn parse_reference_row(row: &Row<'_>) -> ReferenceRepoResult<GrowthReferenceRow> {
    let indicator_raw: String = row.get(0)?;
    let gender_raw: String = row.get(1)?;
    let indicator = Indicator::parse(&indicator_raw).ok_or_else(|| {
        ReferenceRepoError::InvalidData(format!("unknown indicator `{indicator_raw}`"))
    })?;
    let gender = Gender::parse(&gender_raw)
        .ok_or_else(|| ReferenceRepoError::InvalidData(format!("unknown gender `{gender_raw}`")))?;

    Ok(GrowthReferenceRow {
        indicator,
        gender,
        age_days: row.get(2)?,
        length_height_cm: row.get(3)?,
        l: row.get(4)?,
        m: row.get(5)?,
        s: row.get(6)?,
        sd: SdCutoffs {
            sd3neg: row.get(7)?,
            sd2neg: row.get(8)?,
            sd1neg: row.get(9)?,
            sd0: row.get(10)?,
            sd1: row.get(11)?,
            sd2: row.get(12)?,
            sd3: row.get(13)?,
        },
    })
}

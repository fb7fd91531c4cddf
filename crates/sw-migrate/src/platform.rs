//! Per-database behaviour: lock strategy, history DDL and the rule for
//! statements that cannot run inside a transaction.

use crate::error::{MigrationError, MigrationResult};
use crate::history::row::{HistoryRow, COLUMNS, INIT_COMMENT, STATUS_SUCCESS};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;
use sw_core::{MigrationConfig, MigrationVersion, VersionKind};
use sw_db::{Connection, SqlValue};

/// Pause between lock attempts.
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Every this many failed attempts the wait is logged at info.
const LOCK_LOG_EVERY: u32 = 100;

/// Seconds MySQL waits inside one `get_lock` call.
const NAMED_LOCK_TIMEOUT_SECS: i64 = 10;

const LOCKED_COMMENT: &str = "locked";

const LOGICAL_LOCK_SUFFIX: &str = "-logicallock";

static CONCURRENT_INDEX_RE: OnceLock<Regex> = OnceLock::new();

fn concurrent_index_re() -> &'static Regex {
    CONCURRENT_INDEX_RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(create|drop)\s+(unique\s+)?index\s+concurrently\b")
            .expect("valid regex")
    })
}

/// Database products with distinct migration behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformName {
    Postgres,
    Cockroach,
    MySql,
    MariaDb,
    SqlServer,
    Oracle,
    Db2,
    H2,
    Hsql,
    Sqlite,
    DuckDb,
    Generic,
}

impl PlatformName {
    pub fn as_str(self) -> &'static str {
        match self {
            PlatformName::Postgres => "postgres",
            PlatformName::Cockroach => "cockroach",
            PlatformName::MySql => "mysql",
            PlatformName::MariaDb => "mariadb",
            PlatformName::SqlServer => "sqlserver",
            PlatformName::Oracle => "oracle",
            PlatformName::Db2 => "db2",
            PlatformName::H2 => "h2",
            PlatformName::Hsql => "hsql",
            PlatformName::Sqlite => "sqlite",
            PlatformName::DuckDb => "duckdb",
            PlatformName::Generic => "generic",
        }
    }

    /// Parse a configured platform name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Some(match name.as_str() {
            "postgres" | "postgresql" => PlatformName::Postgres,
            "cockroach" | "cockroachdb" => PlatformName::Cockroach,
            "mysql" => PlatformName::MySql,
            "mariadb" => PlatformName::MariaDb,
            "sqlserver" | "sql server" | "mssql" => PlatformName::SqlServer,
            "oracle" => PlatformName::Oracle,
            "db2" => PlatformName::Db2,
            "h2" => PlatformName::H2,
            "hsql" | "hsqldb" => PlatformName::Hsql,
            "sqlite" => PlatformName::Sqlite,
            "duckdb" => PlatformName::DuckDb,
            "generic" => PlatformName::Generic,
            _ => return None,
        })
    }

    /// Map a driver product name. Postgres-compatible products still need a
    /// version probe to tell Cockroach apart.
    fn from_product(product: &str) -> Self {
        let product = product.to_lowercase();
        if product.contains("cockroach") {
            PlatformName::Cockroach
        } else if product.contains("postgres") {
            PlatformName::Postgres
        } else if product.contains("mariadb") {
            PlatformName::MariaDb
        } else if product.contains("mysql") {
            PlatformName::MySql
        } else if product.contains("sql server") || product.contains("sqlserver") {
            PlatformName::SqlServer
        } else if product.contains("oracle") {
            PlatformName::Oracle
        } else if product.contains("db2") {
            PlatformName::Db2
        } else if product.starts_with("h2") {
            PlatformName::H2
        } else if product.contains("hsql") {
            PlatformName::Hsql
        } else if product.contains("sqlite") {
            PlatformName::Sqlite
        } else if product.contains("duckdb") {
            PlatformName::DuckDb
        } else {
            PlatformName::Generic
        }
    }

    /// Lock strategy used when none is configured.
    pub fn default_lock(self) -> LockStrategy {
        match self {
            PlatformName::Postgres => LockStrategy::TableLock,
            PlatformName::MySql | PlatformName::MariaDb => LockStrategy::NamedLock,
            PlatformName::Sqlite | PlatformName::DuckDb => LockStrategy::NoLock,
            PlatformName::Cockroach
            | PlatformName::SqlServer
            | PlatformName::Oracle
            | PlatformName::Db2
            | PlatformName::H2
            | PlatformName::Hsql
            | PlatformName::Generic => LockStrategy::RowLock,
        }
    }
}

impl fmt::Display for PlatformName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How concurrent runners are kept out of the history table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrategy {
    /// `select ... for update` on the history rows
    RowLock,
    /// Flag on the reserved id-0 row, committed on acquire
    LogicalLock,
    /// `lock table`, released at transaction end
    TableLock,
    /// Server-side named lock (`get_lock`)
    NamedLock,
    /// No locking (single-writer databases)
    NoLock,
}

/// Checksum projection of a history row used by the fast path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumEntry {
    pub kind: VersionKind,
    pub key: String,
    pub checksum: i32,
}

/// The selected platform for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    name: PlatformName,
    lock: LockStrategy,
}

impl Platform {
    pub fn new(name: PlatformName, lock: LockStrategy) -> Self {
        Self { name, lock }
    }

    /// Platform with its default lock strategy.
    pub fn for_name(name: PlatformName) -> Self {
        Self::new(name, name.default_lock())
    }

    pub fn name(&self) -> PlatformName {
        self.name
    }

    pub fn lock(&self) -> LockStrategy {
        self.lock
    }

    /// Build from a configured name such as `postgres` or
    /// `mysql-logicallock`; `base_platform` replaces the name used for DDL.
    pub fn from_config(platform: &str, base_platform: Option<&str>) -> MigrationResult<Self> {
        let lowered = platform.trim().to_lowercase();
        let (base, logical) = match lowered.strip_suffix(LOGICAL_LOCK_SUFFIX) {
            Some(base) => (base, true),
            None => (lowered.as_str(), false),
        };
        let base = match base_platform {
            Some(name) => name,
            None => base,
        };
        let name = PlatformName::from_name(base)
            .ok_or_else(|| MigrationError::Config(format!("unknown platform '{platform}'")))?;
        let lock = if logical {
            LockStrategy::LogicalLock
        } else {
            name.default_lock()
        };
        Ok(Self::new(name, lock))
    }

    /// Detect the platform from the connection's product name.
    pub fn detect(conn: &mut dyn Connection) -> MigrationResult<Self> {
        let mut name = PlatformName::from_product(conn.product_name());
        if name == PlatformName::Postgres {
            name = probe_postgres(conn);
        }
        log::debug!("Detected platform {} from '{}'", name, conn.product_name());
        Ok(Self::for_name(name))
    }

    /// Configured override, falling back to detection.
    pub fn resolve(config: &MigrationConfig, conn: &mut dyn Connection) -> MigrationResult<Self> {
        match &config.platform {
            Some(platform) if !platform.trim().is_empty() => {
                Self::from_config(platform, config.base_platform.as_deref())
            }
            _ => Self::detect(conn),
        }
    }

    /// Whether `statement` may run inside the migration transaction.
    pub fn transactional(&self, statement: &str) -> bool {
        match self.name {
            PlatformName::Cockroach => false,
            PlatformName::Postgres => !concurrent_index_re().is_match(statement),
            _ => true,
        }
    }

    // ===== History DDL =====

    /// DDL creating the history table.
    pub fn create_table_sql(&self, table: &str) -> String {
        let (int, varchar, timestamp) = match self.name {
            PlatformName::Oracle => ("number(10)", "varchar2", "timestamp"),
            PlatformName::SqlServer => ("integer", "nvarchar", "datetime2"),
            PlatformName::MySql | PlatformName::MariaDb => ("integer", "varchar", "datetime(6)"),
            _ => ("integer", "varchar", "timestamp"),
        };
        let pk_name = table.rsplit('.').next().unwrap_or(table);
        format!(
            "create table {table} (\n  \
             id {int} not null,\n  \
             mtype {varchar}(1) not null,\n  \
             mstatus {varchar}(10) not null,\n  \
             mversion {varchar}(150) not null,\n  \
             mcomment {varchar}(150) not null,\n  \
             mchecksum {int} not null,\n  \
             run_on {timestamp} not null,\n  \
             run_by {varchar}(30) not null,\n  \
             run_time {int} not null,\n  \
             constraint pk_{pk_name} primary key (id)\n)"
        )
    }

    /// Insert for the reserved id-0 row.
    pub fn seed_sql(&self, table: &str, run_by: &str) -> (String, Vec<SqlValue>) {
        let params = vec![
            SqlValue::Int(0),
            SqlValue::Text(VersionKind::Version.code().to_string()),
            SqlValue::Text(STATUS_SUCCESS.to_string()),
            SqlValue::Text("0".to_string()),
            SqlValue::Text(INIT_COMMENT.to_string()),
            SqlValue::Int(0),
            SqlValue::Timestamp(crate::history::row::now()),
            SqlValue::Text(run_by.to_string()),
            SqlValue::Int(0),
        ];
        (insert_sql(table), params)
    }

    // ===== Locking =====

    /// Take the history lock, retrying up to `max_attempts` times.
    pub fn acquire_lock(
        &self,
        table: &str,
        conn: &mut dyn Connection,
        max_attempts: u32,
    ) -> MigrationResult<()> {
        match self.lock {
            LockStrategy::NoLock => Ok(()),
            LockStrategy::TableLock => {
                conn.execute(&format!("lock table {table}"), &[])?;
                log::info!("Acquired table lock on {table}");
                Ok(())
            }
            LockStrategy::RowLock => {
                let sql = self.row_lock_sql(table);
                retry_lock(table, max_attempts, || {
                    Ok(!conn.query(&sql, &[])?.is_empty())
                })
            }
            LockStrategy::LogicalLock => retry_lock(table, max_attempts, || {
                logical_lock_attempt(table, conn)
            }),
            LockStrategy::NamedLock => {
                let name = named_lock_name(conn.url(), table);
                retry_lock(table, max_attempts, || {
                    let rows = conn.query(
                        "select get_lock(?, ?)",
                        &[SqlValue::Text(name.clone()), SqlValue::Int(NAMED_LOCK_TIMEOUT_SECS)],
                    )?;
                    Ok(matches!(rows.first().map(|r| r.get_i64(0)), Some(Ok(1))))
                })
            }
        }
    }

    /// Release the history lock. Row and table locks end with the
    /// transaction, so only the logical and named locks need work here.
    pub fn release_lock(&self, table: &str, conn: &mut dyn Connection) -> MigrationResult<()> {
        match self.lock {
            LockStrategy::LogicalLock => {
                conn.execute(
                    &format!("update {table} set mcomment = ? where id = 0"),
                    &[SqlValue::Text(INIT_COMMENT.to_string())],
                )?;
                conn.commit()?;
                log::debug!("Released logical lock on {table}");
            }
            LockStrategy::NamedLock => {
                let name = named_lock_name(conn.url(), table);
                conn.query("select release_lock(?)", &[SqlValue::Text(name)])?;
                log::debug!("Released named lock on {table}");
            }
            LockStrategy::RowLock | LockStrategy::TableLock | LockStrategy::NoLock => {}
        }
        Ok(())
    }

    fn row_lock_sql(&self, table: &str) -> String {
        match self.name {
            PlatformName::SqlServer => format!("select id from {table} with (updlock) order by id"),
            _ => format!("select id from {table} order by id for update"),
        }
    }

    // ===== Reads =====

    /// Every applied row in id order, excluding the reserved row.
    pub fn read_existing(
        &self,
        table: &str,
        conn: &mut dyn Connection,
    ) -> MigrationResult<Vec<HistoryRow>> {
        let rows = conn.query(&format!("select {COLUMNS} from {table} order by id"), &[])?;
        let mut result = Vec::with_capacity(rows.len());
        for row in &rows {
            if row.get_i64(0)? == 0 {
                continue;
            }
            result.push(HistoryRow::from_row(row)?);
        }
        Ok(result)
    }

    /// Narrow checksum read for the fast path, taken without the lock.
    pub fn fast_read(
        &self,
        table: &str,
        conn: &mut dyn Connection,
    ) -> MigrationResult<Vec<ChecksumEntry>> {
        let rows = conn.query(
            &format!("select mtype, mversion, mcomment, mchecksum from {table} where id > 0"),
            &[],
        )?;
        if !conn.autocommit() {
            conn.rollback()?;
        }
        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let code = row.get_string(0)?;
            let kind = VersionKind::from_code(&code).ok_or_else(|| MigrationError::InvalidHistory {
                id: -1,
                message: format!("unknown migration type '{code}'"),
            })?;
            let version = MigrationVersion::from_history(kind, &row.get_string(1)?, &row.get_string(2)?)?;
            let checksum = i32::try_from(row.get_i64(3)?).map_err(|_| MigrationError::InvalidHistory {
                id: -1,
                message: "checksum out of range".to_string(),
            })?;
            entries.push(ChecksumEntry {
                kind,
                key: version.key(),
                checksum,
            });
        }
        Ok(entries)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lock {
            LockStrategy::LogicalLock => write!(f, "{}{}", self.name, LOGICAL_LOCK_SUFFIX),
            _ => write!(f, "{}", self.name),
        }
    }
}

/// Insert statement for a full history row.
pub fn insert_sql(table: &str) -> String {
    format!("insert into {table} ({COLUMNS}) values (?, ?, ?, ?, ?, ?, ?, ?, ?)")
}

/// Update statement after a re-run.
pub fn update_sql(table: &str) -> String {
    format!("update {table} set mchecksum = ?, run_on = ?, run_by = ?, run_time = ? where id = ?")
}

/// Update statement replacing the checksum only.
pub fn update_checksum_sql(table: &str) -> String {
    format!("update {table} set mchecksum = ? where id = ?")
}

fn probe_postgres(conn: &mut dyn Connection) -> PlatformName {
    match conn.query("select version()", &[]) {
        Ok(rows) => {
            let version = rows
                .first()
                .and_then(|r| r.get_opt_string(0).ok().flatten())
                .unwrap_or_default();
            if version.to_lowercase().contains("cockroach") {
                PlatformName::Cockroach
            } else {
                PlatformName::Postgres
            }
        }
        Err(e) => {
            log::warn!("Could not read server version, assuming Postgres: {e}");
            PlatformName::Postgres
        }
    }
}

fn named_lock_name(url: &str, table: &str) -> String {
    let hash = crc32fast::hash(format!("{url}:{table}").as_bytes());
    format!("sw_migration_{hash:08x}")
}

fn logical_lock_attempt(table: &str, conn: &mut dyn Connection) -> MigrationResult<bool> {
    let outcome = conn.execute(
        &format!("update {table} set mcomment = ? where id = 0 and mcomment = ?"),
        &[
            SqlValue::Text(LOCKED_COMMENT.to_string()),
            SqlValue::Text(INIT_COMMENT.to_string()),
        ],
    );
    let claimed = match outcome {
        Ok(1) => conn.commit(),
        Ok(_) => {
            conn.rollback()?;
            return Ok(false);
        }
        Err(e) => Err(e),
    };
    match claimed {
        Ok(()) => Ok(true),
        // Another runner wrote the lock row first
        Err(e) if e.is_conflict() => {
            log::debug!("Logical lock on {table} lost a write conflict: {e}");
            conn.rollback()?;
            Ok(false)
        }
        Err(e) => {
            conn.rollback()?;
            Err(e.into())
        }
    }
}

fn retry_lock<F>(table: &str, max_attempts: u32, mut attempt: F) -> MigrationResult<()>
where
    F: FnMut() -> MigrationResult<bool>,
{
    for n in 1..=max_attempts {
        if attempt()? {
            log::info!("Acquired migration lock on {table}");
            return Ok(());
        }
        if n % LOCK_LOG_EVERY == 0 {
            log::info!("Waiting for migration lock on {table} (attempt {n})");
        } else {
            log::trace!("Migration lock on {table} busy (attempt {n})");
        }
        if n < max_attempts {
            thread::sleep(LOCK_RETRY_INTERVAL);
        }
    }
    log::error!("Gave up waiting for migration lock on {table} after {max_attempts} attempts");
    Err(MigrationError::LockTimeout {
        table: table.to_string(),
        attempts: max_attempts,
    })
}

#[cfg(test)]
#[path = "platform_test.rs"]
mod tests;

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, Row, params};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::models::{ActionId, CoreError, CoreErrorKind, ProjectId, RunId, RunRecord, RunStatus};
use crate::persistence::{MigrationStore, PersistenceResult, RunFilter, RunStore};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration, migrations};

const MIGRATIONS_TABLE: &str = "opsgate_schema_migrations";

const SELECT_RUN_COLUMNS: &str = "
SELECT run_id, project_id, action, started_at, finished_at, status, exit_code, duration_ms, error_summary
FROM run_records
";

pub struct SqliteRunStore {
    database_path: PathBuf,
}

impl SqliteRunStore {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn planned_migrations(&self, from_version: i64) -> Vec<&'static SqliteMigration> {
        migrations()
            .iter()
            .filter(|entry| entry.version > from_version)
            .collect()
    }

    pub fn migrate_to_latest(&self) -> PersistenceResult<()> {
        self.apply_migration(current_schema_version())
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = open_connection(&self.database_path)
            .map_err(|error| storage_error(operation_name, error))?;
        operation(&mut connection).map_err(|error| storage_error(operation_name, error))
    }
}

impl MigrationStore for SqliteRunStore {
    fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error_text(
                "apply_migration",
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        self.with_connection("apply_migration", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version > current_version {
                for version in (current_version + 1)..=target_version {
                    apply_up_migration(connection, defined_migration(version)?)?;
                }
            } else if target_version < current_version {
                for version in ((target_version + 1)..=current_version).rev() {
                    apply_down_migration(connection, defined_migration(version)?)?;
                }
            }

            Ok(())
        })
    }
}

impl RunStore for SqliteRunStore {
    fn append(&self, record: &RunRecord) -> PersistenceResult<()> {
        self.with_connection("append", |connection| {
            ensure_schema_ready(connection)?;
            let transaction = connection.transaction()?;
            // Plain INSERT: a duplicate run id violates the primary key and is
            // never turned into an update.
            transaction.execute(
                "
INSERT INTO run_records (
    run_id, project_id, action, started_at, finished_at, status, exit_code, duration_ms, error_summary
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
",
                params![
                    record.run_id.as_str(),
                    record.project_id.as_str(),
                    record.action.as_str(),
                    format_timestamp(record.started_at)?,
                    format_timestamp(record.finished_at)?,
                    record.status.as_str(),
                    record.exit_code,
                    to_i64(record.duration_ms)?,
                    record.error_summary.as_deref(),
                ],
            )?;
            {
                let mut statement = transaction.prepare(
                    "INSERT INTO run_artifact_paths (run_id, position, path) VALUES (?1, ?2, ?3)",
                )?;
                for (position, path) in record.artifact_paths.iter().enumerate() {
                    statement.execute(params![
                        record.run_id.as_str(),
                        to_i64(position as u64)?,
                        path.to_string_lossy().as_ref(),
                    ])?;
                }
            }
            transaction.commit()?;
            Ok(())
        })
        .map_err(|error| error.for_run(&record.run_id))
    }

    fn get(&self, run_id: &RunId) -> PersistenceResult<Option<RunRecord>> {
        self.with_connection("get", |connection| {
            ensure_schema_ready(connection)?;
            let record = connection
                .query_row(
                    &format!("{SELECT_RUN_COLUMNS} WHERE run_id = ?1"),
                    [run_id.as_str()],
                    run_record_from_row,
                )
                .optional()?;

            match record {
                Some(mut record) => {
                    record.artifact_paths = load_artifact_paths(connection, &record.run_id)?;
                    Ok(Some(record))
                }
                None => Ok(None),
            }
        })
    }

    fn list_recent(&self, filter: &RunFilter, limit: usize) -> PersistenceResult<Vec<RunRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.with_connection("list_recent", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(&format!(
                "{SELECT_RUN_COLUMNS} WHERE (?1 IS NULL OR project_id = ?1) ORDER BY run_id DESC"
            ))?;
            let project = filter.project.as_ref().map(ProjectId::as_str);
            let mut rows = statement.query([project])?;

            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                let record = run_record_from_row(row)?;
                if filter.matches(&record) {
                    records.push(record);
                    if records.len() >= limit {
                        break;
                    }
                }
            }
            drop(rows);

            for record in &mut records {
                record.artifact_paths = load_artifact_paths(connection, &record.run_id)?;
            }
            Ok(records)
        })
    }
}

fn run_record_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let run_id_raw: String = row.get(0)?;
    let project_raw: String = row.get(1)?;
    let action_raw: String = row.get(2)?;
    let started_raw: String = row.get(3)?;
    let finished_raw: String = row.get(4)?;
    let status_raw: String = row.get(5)?;
    let exit_code: Option<i32> = row.get(6)?;
    let duration_ms: i64 = row.get(7)?;
    let error_summary: Option<String> = row.get(8)?;

    let run_id = RunId::parse(&run_id_raw).ok_or_else(|| {
        storage_error_sqlite(&format!("invalid run id '{run_id_raw}' in sqlite record"))
    })?;
    let status = status_raw.parse::<RunStatus>().map_err(|_| {
        storage_error_sqlite(&format!("unknown run status '{status_raw}' in sqlite record"))
    })?;

    Ok(RunRecord {
        run_id,
        project_id: ProjectId::new(project_raw),
        action: ActionId::new(action_raw),
        started_at: parse_timestamp(&started_raw)?,
        finished_at: parse_timestamp(&finished_raw)?,
        status,
        exit_code,
        duration_ms: u64::try_from(duration_ms)
            .map_err(|_| storage_error_sqlite("negative duration in sqlite record"))?,
        error_summary,
        artifact_paths: Vec::new(),
    })
}

fn load_artifact_paths(connection: &Connection, run_id: &RunId) -> rusqlite::Result<Vec<PathBuf>> {
    let mut statement = connection.prepare(
        "SELECT path FROM run_artifact_paths WHERE run_id = ?1 ORDER BY position",
    )?;
    let rows = statement.query_map([run_id.as_str()], |row| {
        let path: String = row.get(0)?;
        Ok(PathBuf::from(path))
    })?;
    rows.collect()
}

fn open_connection(database_path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    Connection::open(database_path)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
"
    ))?;
    Ok(())
}

fn ensure_schema_ready(connection: &Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(connection)?;
    let version = read_current_version(connection)?;
    if version < current_schema_version() {
        return Err(storage_error_sqlite(
            "run ledger schema is not up to date; apply migrations before ledger operations",
        ));
    }
    Ok(())
}

fn read_current_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn defined_migration(version: i64) -> rusqlite::Result<&'static SqliteMigration> {
    migration(version).ok_or_else(|| {
        storage_error_sqlite(&format!("migration version '{version}' is not defined"))
    })
}

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.up_sql)?;
    transaction.execute(
        &format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
             VALUES (?1, ?2, strftime('%s', 'now'))"
        ),
        (migration.version, migration.name),
    )?;
    transaction.commit()?;
    Ok(())
}

fn apply_down_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()?;
    Ok(())
}

fn format_timestamp(value: OffsetDateTime) -> rusqlite::Result<String> {
    value
        .format(&Rfc3339)
        .map_err(|error| storage_error_sqlite(&format!("failed to format timestamp: {error}")))
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|error| {
        storage_error_sqlite(&format!("invalid timestamp '{raw}' in sqlite record: {error}"))
    })
}

fn to_i64(value: u64) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|_| storage_error_sqlite("value exceeds i64 range"))
}

fn storage_error(operation: &str, error: rusqlite::Error) -> CoreError {
    storage_error_text(operation, error.to_string())
}

fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

fn storage_error_text(operation: &str, message: impl AsRef<str>) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("sqlite run store '{operation}' failed: {}", message.as_ref()),
    )
}

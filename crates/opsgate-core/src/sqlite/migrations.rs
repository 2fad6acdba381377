#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "initial_run_ledger",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS run_records (
    run_id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    action TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    status TEXT NOT NULL,
    exit_code INTEGER,
    duration_ms INTEGER NOT NULL,
    error_summary TEXT
);

CREATE INDEX IF NOT EXISTS idx_run_records_action
    ON run_records (action, run_id DESC);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_run_records_action;
DROP TABLE IF EXISTS run_records;
"#,
};

const MIGRATION_0002: SqliteMigration = SqliteMigration {
    version: 2,
    name: "add_run_artifact_paths",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS run_artifact_paths (
    run_id TEXT NOT NULL REFERENCES run_records (run_id),
    position INTEGER NOT NULL,
    path TEXT NOT NULL,
    PRIMARY KEY (run_id, position)
);

CREATE INDEX IF NOT EXISTS idx_run_records_project
    ON run_records (project_id, run_id DESC);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_run_records_project;
DROP TABLE IF EXISTS run_artifact_paths;
"#,
};

const MIGRATIONS: [SqliteMigration; 2] = [MIGRATION_0001, MIGRATION_0002];

pub fn migrations() -> &'static [SqliteMigration] {
    &MIGRATIONS
}

pub fn migration(version: i64) -> Option<&'static SqliteMigration> {
    MIGRATIONS.iter().find(|entry| entry.version == version)
}

pub fn current_schema_version() -> i64 {
    MIGRATIONS.last().map(|entry| entry.version).unwrap_or(0)
}

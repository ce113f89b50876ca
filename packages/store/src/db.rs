//! SQLite-backed storage for check runs.
//!
//! Runs are append-only: each check inserts one `runs` row plus its failure
//! and finding rows in a single transaction, and never touches prior runs.
//! Deltas are computed by set difference over `stable_id` between the latest
//! run and its immediate predecessor for the same workspace/scope pair.

use std::path::Path;

use color_eyre::{Result, eyre::Context};
use derive_more::Debug;
use protocol::{WorkspaceId, rpc::v1::DeltaSummary};
use rusqlite::{Connection, params};
use tracing::{debug, instrument};
use uuid::Uuid;

/// A forward-only schema migration.
///
/// Migrations are additive (table/column/index creation only) and applied in
/// ascending version order inside a transaction; already-applied versions are
/// skipped.
struct Migration {
    version: i64,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                started_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS test_failures (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL REFERENCES runs(run_id),
                stable_id TEXT NOT NULL,
                test_id TEXT NOT NULL,
                file TEXT NOT NULL,
                message TEXT NOT NULL,
                package TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_test_failures_run_stable
            ON test_failures(run_id, stable_id);
            CREATE INDEX IF NOT EXISTS idx_test_failures_run_package
            ON test_failures(run_id, package);

            CREATE TABLE IF NOT EXISTS findings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL REFERENCES runs(run_id),
                stable_id TEXT NOT NULL,
                tool TEXT NOT NULL,
                rule TEXT NOT NULL,
                file TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                start_column INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                end_column INTEGER NOT NULL,
                message TEXT NOT NULL,
                package TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_findings_run_stable
            ON findings(run_id, stable_id);
            CREATE INDEX IF NOT EXISTS idx_findings_run_package
            ON findings(run_id, package);

            CREATE TABLE IF NOT EXISTS dirty_files (
                workspace_id TEXT NOT NULL,
                path TEXT NOT NULL,
                observed_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_dirty_files_workspace
            ON dirty_files(workspace_id);
        "#,
    },
    Migration {
        version: 2,
        sql: r#"
            ALTER TABLE runs ADD COLUMN workspace_id TEXT NOT NULL DEFAULT '';
            ALTER TABLE runs ADD COLUMN package_scope TEXT NOT NULL DEFAULT '';
            CREATE INDEX IF NOT EXISTS idx_runs_workspace_started
            ON runs(workspace_id, started_at DESC);
        "#,
    },
];

/// One `runs` row to be inserted.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub workspace_id: WorkspaceId,
    /// Empty string when the check was not scoped to a package.
    pub package_scope: String,
    /// Unix milliseconds.
    pub started_at: i64,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TestFailureRow {
    pub stable_id: String,
    pub test_id: String,
    pub file: String,
    pub message: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FindingRow {
    pub stable_id: String,
    pub tool: String,
    pub rule: String,
    pub file: String,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub message: String,
}

/// SQLite-backed store for run artifacts and dirty-file observations.
#[derive(Debug)]
pub struct Store {
    #[debug("<connection>")]
    conn: Connection,
}

impl Store {
    /// Open or create the database at the given path and bring the schema
    /// up to date.
    #[instrument(name = "Store::open", skip(path))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("open database at {:?}", path))?;
        let mut db = Self { conn };
        db.configure()?;
        db.migrate()?;
        Ok(db)
    }

    /// Create an in-memory database for testing.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        let mut db = Self { conn };
        db.configure()?;
        db.migrate()?;
        Ok(db)
    }

    fn configure(&self) -> Result<()> {
        let _mode: String = self
            .conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .context("set journal mode")?;
        self.conn
            .execute_batch("PRAGMA synchronous = NORMAL;")
            .context("set synchronous mode")?;
        Ok(())
    }

    /// Apply all pending migrations in ascending version order.
    #[instrument(name = "Store::migrate", skip(self))]
    fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at INTEGER NOT NULL
                );
                "#,
            )
            .context("create migrations table")?;

        let applied: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .context("read applied migration version")?;

        for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
            let tx = self.conn.transaction().context("begin migration")?;
            tx.execute_batch(migration.sql)
                .with_context(|| format!("apply migration v{}", migration.version))?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                params![migration.version, jiff::Timestamp::now().as_millisecond()],
            )
            .with_context(|| format!("record migration v{}", migration.version))?;
            tx.commit()
                .with_context(|| format!("commit migration v{}", migration.version))?;
            debug!(version = migration.version, "applied migration");
        }

        Ok(())
    }

    /// Insert one run with all of its failure and finding rows atomically.
    ///
    /// The `package` column of every row inherits the run's scope so that
    /// scoped delta queries can restrict both sides uniformly.
    #[instrument(name = "Store::ingest", skip(self, failures, findings))]
    pub fn ingest(
        &mut self,
        run: &RunRecord,
        failures: &[TestFailureRow],
        findings: &[FindingRow],
    ) -> Result<()> {
        let tx = self.conn.transaction().context("begin ingest")?;

        tx.execute(
            r#"
            INSERT INTO runs (run_id, started_at, workspace_id, package_scope)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                run.run_id.to_string(),
                run.started_at,
                run.workspace_id.as_str(),
                run.package_scope,
            ],
        )
        .context("insert run")?;

        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO test_failures
                    (run_id, stable_id, test_id, file, message, package)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                )
                .context("prepare failure insert")?;
            for failure in failures {
                stmt.execute(params![
                    run.run_id.to_string(),
                    failure.stable_id,
                    failure.test_id,
                    failure.file,
                    failure.message,
                    run.package_scope,
                ])
                .context("insert test failure")?;
            }

            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO findings
                    (run_id, stable_id, tool, rule, file,
                     start_line, start_column, end_line, end_column,
                     message, package)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    "#,
                )
                .context("prepare finding insert")?;
            for finding in findings {
                stmt.execute(params![
                    run.run_id.to_string(),
                    finding.stable_id,
                    finding.tool,
                    finding.rule,
                    finding.file,
                    finding.start_line,
                    finding.start_column,
                    finding.end_line,
                    finding.end_column,
                    finding.message,
                    run.package_scope,
                ])
                .context("insert finding")?;
            }
        }

        tx.commit().context("commit ingest")?;
        debug!(
            run_id = %run.run_id,
            failures = failures.len(),
            findings = findings.len(),
            "ingested run"
        );
        Ok(())
    }

    /// Compute the delta between the latest run for the given pair and its
    /// immediate predecessor.
    ///
    /// With no predecessor the run is a baseline: `fixed = 0` and `new` is
    /// the size of the latest run's sets.
    #[instrument(name = "Store::delta", skip(self))]
    pub fn delta(
        &self,
        workspace_id: &WorkspaceId,
        package_scope: Option<&str>,
    ) -> Result<DeltaSummary> {
        let scope = package_scope.unwrap_or_default();
        let (latest, previous) = self.latest_runs(workspace_id, scope)?;

        let Some(latest) = latest else {
            return Ok(DeltaSummary::default());
        };

        Ok(DeltaSummary {
            new_test_failures: self.count_difference(
                "test_failures",
                &latest,
                previous.as_deref(),
                scope,
            )?,
            fixed_test_failures: match previous.as_deref() {
                Some(previous) => {
                    self.count_difference("test_failures", previous, Some(&latest), scope)?
                }
                None => 0,
            },
            new_findings: self.count_difference(
                "findings",
                &latest,
                previous.as_deref(),
                scope,
            )?,
            fixed_findings: match previous.as_deref() {
                Some(previous) => {
                    self.count_difference("findings", previous, Some(&latest), scope)?
                }
                None => 0,
            },
        })
    }

    /// The latest and immediately previous run ids for a workspace/scope pair.
    fn latest_runs(
        &self,
        workspace_id: &WorkspaceId,
        scope: &str,
    ) -> Result<(Option<String>, Option<String>)> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT run_id FROM runs
                WHERE workspace_id = ?1 AND package_scope = ?2
                ORDER BY started_at DESC, rowid DESC
                LIMIT 2
                "#,
            )
            .context("prepare latest runs query")?;

        let mut rows = stmt
            .query_map(params![workspace_id.as_str(), scope], |row| {
                row.get::<_, String>(0)
            })
            .context("query latest runs")?;

        let latest = rows.next().transpose().context("read latest run")?;
        let previous = rows.next().transpose().context("read previous run")?;
        Ok((latest, previous))
    }

    /// Count stable ids present in run `a` but absent from run `b`.
    ///
    /// With `b` absent this is simply the distinct count for `a`. A non-empty
    /// scope restricts both sides via the `package` column.
    fn count_difference(
        &self,
        table: &str,
        a: &str,
        b: Option<&str>,
        scope: &str,
    ) -> Result<u64> {
        let query = match b {
            Some(_) => format!(
                r#"
                SELECT COUNT(*) FROM (
                    SELECT DISTINCT stable_id FROM {table}
                    WHERE run_id = ?1 AND (?3 = '' OR package = ?3)
                    EXCEPT
                    SELECT stable_id FROM {table}
                    WHERE run_id = ?2 AND (?3 = '' OR package = ?3)
                )
                "#
            ),
            None => format!(
                r#"
                SELECT COUNT(DISTINCT stable_id) FROM {table}
                WHERE run_id = ?1 AND (?3 = '' OR package = ?3)
                "#
            ),
        };

        let count: i64 = self
            .conn
            .query_row(
                &query,
                params![a, b.unwrap_or_default(), scope],
                |row| row.get(0),
            )
            .with_context(|| format!("count stable id difference in {table}"))?;
        Ok(count as u64)
    }

    /// Replace the recorded dirty-file set for a workspace.
    #[instrument(name = "Store::record_dirty", skip(self, paths))]
    pub fn record_dirty(
        &mut self,
        workspace_id: &WorkspaceId,
        paths: &[String],
        observed_at: i64,
    ) -> Result<()> {
        let tx = self.conn.transaction().context("begin dirty update")?;
        tx.execute(
            "DELETE FROM dirty_files WHERE workspace_id = ?1",
            params![workspace_id.as_str()],
        )
        .context("clear dirty files")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO dirty_files (workspace_id, path, observed_at) VALUES (?1, ?2, ?3)",
                )
                .context("prepare dirty insert")?;
            for path in paths {
                stmt.execute(params![workspace_id.as_str(), path, observed_at])
                    .context("insert dirty file")?;
            }
        }
        tx.commit().context("commit dirty update")?;
        Ok(())
    }

    /// Number of runs recorded for a workspace, across all scopes.
    pub fn run_count(&self, workspace_id: &WorkspaceId) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM runs WHERE workspace_id = ?1",
                params![workspace_id.as_str()],
                |row| row.get(0),
            )
            .context("count runs")?;
        Ok(count as u64)
    }
}

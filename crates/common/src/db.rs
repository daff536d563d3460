//! SQLite persistence for run records.

use crate::types::{Run, RunStats, RunStatus, Step};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Database wrapper shared by the run and artifact stores
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Expose the underlying connection for stores sharing this database.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Run records
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                module TEXT,
                scenario TEXT,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                steps TEXT NOT NULL DEFAULT '[]',
                stats TEXT,
                success INTEGER,
                execution_time REAL,
                artifact_id TEXT,
                video_id TEXT,
                filename TEXT,
                error TEXT,
                created_at INTEGER NOT NULL,
                completed_at INTEGER,
                last_update_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_runs_scenario ON runs(module, scenario);
            CREATE INDEX IF NOT EXISTS idx_runs_created ON runs(created_at);

            -- Binary artifacts (PDF reports, videos, screenshots)
            CREATE TABLE IF NOT EXISTS artifacts (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                content_type TEXT NOT NULL,
                sha256 TEXT NOT NULL,
                size INTEGER NOT NULL,
                payload BLOB NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_artifacts_filename ON artifacts(filename);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }
}

/// Terminal fields written exactly once when a run finishes
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub success: bool,
    pub execution_time_seconds: f64,
    pub progress: u8,
    pub steps: Vec<Step>,
    pub stats: Option<RunStats>,
    pub artifact_id: Option<String>,
    pub filename: Option<String>,
    pub video_id: Option<String>,
    pub error: Option<String>,
}

/// Persistent collection of run documents keyed by run id
#[derive(Clone)]
pub struct RunStore {
    db: Database,
}

impl RunStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert the initial record for an admitted run.
    ///
    /// A primary-key collision maps to `DuplicateRun`; admission control
    /// checks first, this is the backstop.
    pub fn insert_new(&self, run: &Run) -> Result<()> {
        let conn = self.db.conn.lock();
        let res = conn.execute(
            "INSERT INTO runs (run_id, module, scenario, status, progress, steps,
                               created_at, last_update_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.run_id,
                run.module,
                run.scenario,
                run.status.as_str(),
                run.progress as i64,
                serde_json::to_string(&run.steps)?,
                run.created_at.timestamp(),
                run.last_update_at.timestamp(),
            ],
        );
        match res {
            Ok(_) => {
                debug!("Inserted run {}", run.run_id);
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::DuplicateRun {
                    run_id: run.run_id.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Point lookup by run id
    pub fn get(&self, run_id: &str) -> Result<Option<Run>> {
        let conn = self.db.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE run_id = ?1", RUN_COLUMNS),
                params![run_id],
                RawRun::from_row,
            )
            .optional()?;
        row.map(RawRun::parse).transpose()
    }

    /// All runs, newest first
    pub fn list(&self) -> Result<Vec<Run>> {
        let conn = self.db.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM runs ORDER BY created_at DESC, run_id DESC",
            RUN_COLUMNS
        ))?;
        let rows = stmt.query_map([], RawRun::from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.parse()?);
        }
        Ok(out)
    }

    /// Move a pending run to `running`, filling in its parsed context.
    pub fn mark_running(
        &self,
        run_id: &str,
        module: Option<&str>,
        scenario: Option<&str>,
    ) -> Result<()> {
        let conn = self.db.conn.lock();
        conn.execute(
            "UPDATE runs SET status = 'running', module = ?2, scenario = ?3,
                             last_update_at = ?4
             WHERE run_id = ?1 AND status = 'pending'",
            params![run_id, module, scenario, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    /// Checkpoint the step list and progress of a live run.
    ///
    /// Progress never moves backwards, and terminal records are never
    /// touched.
    pub fn update_steps(&self, run_id: &str, steps: &[Step], progress: u8) -> Result<()> {
        let conn = self.db.conn.lock();
        conn.execute(
            "UPDATE runs SET steps = ?2, progress = MAX(progress, ?3), last_update_at = ?4
             WHERE run_id = ?1 AND status IN ('pending', 'running')",
            params![
                run_id,
                serde_json::to_string(steps)?,
                progress as i64,
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Write the terminal state exactly once.
    ///
    /// Returns false when the run was already terminal (the write is
    /// dropped, terminal status is immutable).
    pub fn finalize(&self, run_id: &str, outcome: &RunOutcome) -> Result<bool> {
        let conn = self.db.conn.lock();
        let now = Utc::now().timestamp();
        let changed = conn.execute(
            "UPDATE runs SET status = ?2, success = ?3, execution_time = ?4,
                             progress = MAX(progress, ?5), steps = ?6, stats = ?7,
                             artifact_id = ?8, filename = ?9, video_id = ?10,
                             error = ?11, completed_at = ?12, last_update_at = ?12
             WHERE run_id = ?1 AND status IN ('pending', 'running')",
            params![
                run_id,
                outcome.status.as_str(),
                outcome.success,
                outcome.execution_time_seconds,
                outcome.progress as i64,
                serde_json::to_string(&outcome.steps)?,
                outcome
                    .stats
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                outcome.artifact_id,
                outcome.filename,
                outcome.video_id,
                outcome.error,
                now,
            ],
        )?;
        if changed == 0 {
            warn!("Dropped terminal write for {}: record already terminal", run_id);
        }
        Ok(changed > 0)
    }

    /// Delete a record, returns whether a row was removed
    pub fn delete(&self, run_id: &str) -> Result<bool> {
        let conn = self.db.conn.lock();
        let rows = conn.execute("DELETE FROM runs WHERE run_id = ?1", params![run_id])?;
        Ok(rows > 0)
    }

    /// Remove records with no scenario (malformed or partial admission).
    /// Running records are left alone.
    pub fn sweep_orphans(&self) -> Result<usize> {
        let conn = self.db.conn.lock();
        let rows = conn.execute(
            "DELETE FROM runs WHERE scenario IS NULL AND status != 'running'",
            [],
        )?;
        Ok(rows)
    }

    /// Collapse duplicate groups sharing `(module, scenario, execution_time)`,
    /// keeping only the most recently created record of each group.
    pub fn sweep_duplicates(&self) -> Result<usize> {
        let conn = self.db.conn.lock();

        let groups: Vec<(String, String, f64)> = {
            let mut stmt = conn.prepare(
                "SELECT module, scenario, execution_time FROM runs
                 WHERE module IS NOT NULL AND scenario IS NOT NULL
                   AND execution_time IS NOT NULL
                 GROUP BY module, scenario, execution_time
                 HAVING COUNT(*) > 1",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        let mut removed = 0;
        for (module, scenario, exec_time) in groups {
            removed += conn.execute(
                "DELETE FROM runs
                 WHERE module = ?1 AND scenario = ?2 AND execution_time = ?3
                   AND status != 'running'
                   AND run_id != (
                       SELECT run_id FROM runs
                       WHERE module = ?1 AND scenario = ?2 AND execution_time = ?3
                       ORDER BY created_at DESC, run_id DESC LIMIT 1
                   )",
                params![module, scenario, exec_time],
            )?;
        }
        Ok(removed)
    }
}

const RUN_COLUMNS: &str = "run_id, module, scenario, status, progress, steps, stats, \
                           success, execution_time, artifact_id, video_id, filename, \
                           error, created_at, completed_at, last_update_at";

/// Raw database row before parsing
struct RawRun {
    run_id: String,
    module: Option<String>,
    scenario: Option<String>,
    status: String,
    progress: i64,
    steps: String,
    stats: Option<String>,
    success: Option<bool>,
    execution_time: Option<f64>,
    artifact_id: Option<String>,
    video_id: Option<String>,
    filename: Option<String>,
    error: Option<String>,
    created_at: i64,
    completed_at: Option<i64>,
    last_update_at: i64,
}

impl RawRun {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            module: row.get(1)?,
            scenario: row.get(2)?,
            status: row.get(3)?,
            progress: row.get(4)?,
            steps: row.get(5)?,
            stats: row.get(6)?,
            success: row.get(7)?,
            execution_time: row.get(8)?,
            artifact_id: row.get(9)?,
            video_id: row.get(10)?,
            filename: row.get(11)?,
            error: row.get(12)?,
            created_at: row.get(13)?,
            completed_at: row.get(14)?,
            last_update_at: row.get(15)?,
        })
    }

    fn parse(self) -> Result<Run> {
        let status = RunStatus::parse(&self.status)
            .ok_or_else(|| Error::Internal(format!("unknown run status '{}'", self.status)))?;
        Ok(Run {
            run_id: self.run_id,
            module: self.module,
            scenario: self.scenario,
            status,
            progress: self.progress.clamp(0, 100) as u8,
            steps: serde_json::from_str(&self.steps)?,
            stats: self.stats.as_deref().map(serde_json::from_str).transpose()?,
            success: self.success,
            execution_time_seconds: self.execution_time,
            artifact_id: self.artifact_id,
            video_id: self.video_id,
            filename: self.filename,
            error: self.error,
            created_at: ts(self.created_at),
            completed_at: self.completed_at.map(ts),
            last_update_at: ts(self.last_update_at),
        })
    }
}

fn ts(epoch: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(epoch, 0).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StepStatus;

    fn store() -> RunStore {
        RunStore::new(Database::open_memory().unwrap())
    }

    fn completed_outcome(steps: Vec<Step>) -> RunOutcome {
        RunOutcome {
            status: RunStatus::Completed,
            success: Run::compute_success(&steps),
            execution_time_seconds: 12.5,
            progress: 100,
            steps,
            stats: None,
            artifact_id: Some("pdf-1".into()),
            filename: Some("report.pdf".into()),
            video_id: None,
            error: None,
        }
    }

    #[test]
    fn insert_and_get_round_trip() {
        let store = store();
        let mut run = Run::new("CTC110M_demo_1714000000", Some("CTC110M".into()), Some("demo".into()));
        run.steps.push(Step::pending("login"));
        store.insert_new(&run).unwrap();

        let loaded = store.get("CTC110M_demo_1714000000").unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Pending);
        assert_eq!(loaded.steps.len(), 1);
        assert_eq!(loaded.module.as_deref(), Some("CTC110M"));
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn duplicate_insert_rejected() {
        let store = store();
        let run = Run::new("A_b_1", Some("A".into()), Some("b".into()));
        store.insert_new(&run).unwrap();
        match store.insert_new(&run) {
            Err(Error::DuplicateRun { run_id }) => assert_eq!(run_id, "A_b_1"),
            other => panic!("expected DuplicateRun, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn progress_never_regresses_in_store() {
        let store = store();
        let run = Run::new("A_b_1", Some("A".into()), Some("b".into()));
        store.insert_new(&run).unwrap();
        store.mark_running("A_b_1", Some("A"), Some("b")).unwrap();

        let steps = vec![Step::pending("x")];
        store.update_steps("A_b_1", &steps, 60).unwrap();
        store.update_steps("A_b_1", &steps, 40).unwrap();
        assert_eq!(store.get("A_b_1").unwrap().unwrap().progress, 60);
    }

    #[test]
    fn terminal_state_is_immutable() {
        let store = store();
        let run = Run::new("A_b_1", Some("A".into()), Some("b".into()));
        store.insert_new(&run).unwrap();
        store.mark_running("A_b_1", Some("A"), Some("b")).unwrap();

        let mut step = Step::pending("login");
        step.status = StepStatus::Completed;
        assert!(store.finalize("A_b_1", &completed_outcome(vec![step.clone()])).unwrap());

        // Second terminal write is dropped
        let mut failed = completed_outcome(vec![step.clone()]);
        failed.status = RunStatus::Error;
        assert!(!store.finalize("A_b_1", &failed).unwrap());

        // Step checkpoints no longer apply either
        store.update_steps("A_b_1", &[Step::pending("late")], 10).unwrap();
        let loaded = store.get("A_b_1").unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert_eq!(loaded.steps.len(), 1);
        assert_eq!(loaded.steps[0].description, "login");
        assert!(loaded.completed_at.is_some());
    }

    #[test]
    fn orphan_sweep_spares_running_rows() {
        let store = store();
        store.insert_new(&Run::new("orphan_x_1", Some("orphan".into()), None)).unwrap();
        let mut live = Run::new("live_x_1", Some("live".into()), None);
        live.status = RunStatus::Running;
        {
            // insert then promote so the row exists in running state
            live.status = RunStatus::Pending;
            store.insert_new(&live).unwrap();
            store.mark_running("live_x_1", Some("live"), None).unwrap();
        }

        assert_eq!(store.sweep_orphans().unwrap(), 1);
        assert!(store.get("orphan_x_1").unwrap().is_none());
        assert!(store.get("live_x_1").unwrap().is_some());
    }

    #[test]
    fn duplicate_sweep_keeps_latest() {
        let store = store();
        for (id, created) in [("A_s_1", 100), ("A_s_2", 200), ("A_s_3", 300)] {
            let mut run = Run::new(id, Some("A".into()), Some("s".into()));
            run.created_at = ts(created);
            run.last_update_at = run.created_at;
            store.insert_new(&run).unwrap();
            store.mark_running(id, Some("A"), Some("s")).unwrap();
            let mut step = Step::pending("x");
            step.status = StepStatus::Completed;
            store.finalize(id, &completed_outcome(vec![step])).unwrap();
        }

        assert_eq!(store.sweep_duplicates().unwrap(), 2);
        let rest = store.list().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].run_id, "A_s_3");
    }
}

//! Database retention maintenance.
//!
//! Two independent passes run after every finished run and on demand
//! through the API: orphan records with no scenario, and duplicate
//! records for the same (module, scenario, execution time) triple.

use tracing::{info, warn};
use uiproof_common::db::RunStore;

/// Outcome of one sweep invocation
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct SweepReport {
    pub orphans_removed: usize,
    pub duplicates_removed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.orphans_removed + self.duplicates_removed
    }
}

pub struct RetentionSweeper {
    store: RunStore,
}

impl RetentionSweeper {
    pub fn new(store: RunStore) -> Self {
        Self { store }
    }

    /// Run both passes. A failure in one pass never blocks the other;
    /// failed passes report zero removals and log the error.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.store.sweep_orphans() {
            Ok(n) => report.orphans_removed = n,
            Err(e) => warn!(error = %e, "orphan sweep failed"),
        }

        match self.store.sweep_duplicates() {
            Ok(n) => report.duplicates_removed = n,
            Err(e) => warn!(error = %e, "duplicate sweep failed"),
        }

        if report.total() > 0 {
            info!(
                orphans = report.orphans_removed,
                duplicates = report.duplicates_removed,
                "retention sweep removed records"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uiproof_common::db::{Database, RunOutcome};
    use uiproof_common::{Run, RunStatus};

    fn finished(store: &RunStore, run_id: &str, created_at: i64) {
        let mut run = Run::new(run_id, Some("MOD".into()), Some("scn".into()));
        run.created_at = chrono::DateTime::from_timestamp(created_at, 0).unwrap();
        run.last_update_at = run.created_at;
        store.insert_new(&run).unwrap();
        store.mark_running(run_id, Some("MOD"), Some("scn")).unwrap();
        store
            .finalize(
                run_id,
                &RunOutcome {
                    status: RunStatus::Completed,
                    success: true,
                    execution_time_seconds: 10.0,
                    progress: 100,
                    steps: vec![],
                    stats: None,
                    artifact_id: None,
                    filename: None,
                    video_id: None,
                    error: None,
                },
            )
            .unwrap();
    }

    #[test]
    fn both_passes_report_removals() {
        let db = Database::open_memory().unwrap();
        let store = RunStore::new(db.clone());

        // stray record the way legacy writers left them: no scenario
        db.connection()
            .lock()
            .execute(
                "INSERT INTO runs (run_id, module, scenario, status, progress, steps, created_at, last_update_at)
                 VALUES ('stray', 'MOD', NULL, 'completed', 0, '[]', 1, 1)",
                [],
            )
            .unwrap();
        // same module/scenario/execution_time pair: one must go
        finished(&store, "MOD_scn_10", 100);
        finished(&store, "MOD_scn_11", 200);

        let report = RetentionSweeper::new(store.clone()).sweep();
        assert_eq!(report.orphans_removed, 1);
        assert_eq!(report.duplicates_removed, 1);
        assert_eq!(report.total(), 2);

        let rest = store.list().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].run_id, "MOD_scn_11");
    }

    #[test]
    fn clean_database_sweeps_to_zero() {
        let store = RunStore::new(Database::open_memory().unwrap());
        let report = RetentionSweeper::new(store).sweep();
        assert_eq!(report.total(), 0);
    }
}

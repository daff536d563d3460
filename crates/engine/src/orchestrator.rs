//! Run orchestration.
//!
//! Owns the whole lifecycle of a run: admission (one run at a time,
//! platform-wide), step sequencing against the UI actuator with an
//! error-detection checkpoint after every step, screen recording, report
//! rendering, the single terminal write, and the retention sweep that
//! follows it.

use crate::actuator::{Actuator, ActuatorFactory};
use crate::config::EngineConfig;
use crate::events::{EventBus, RunEvent};
use crate::recorder::{has_usable_video, RecorderHandle};
use crate::report::{compute_stats, report_filename, ReportMeta, ReportRenderer};
use crate::scenario::{Action, Scenario, ScenarioSet, StepDef};
use crate::sweeper::{RetentionSweeper, SweepReport};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uiproof_common::db::{RunOutcome, RunStore};
use uiproof_common::{
    make_run_id, parse_run_id, progress_for, ArtifactStore, Database, Error, Result, Run,
    RunStatus, Step, StepStatus,
};

/// Platform-wide admission lock: at most one run executes at a time.
pub struct AdmissionLock {
    held: AtomicBool,
}

impl AdmissionLock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            held: AtomicBool::new(false),
        })
    }

    /// Take the lock, or None when a run is already in flight.
    pub fn try_acquire(self: &Arc<Self>) -> Option<AdmissionGuard> {
        self.held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
            .then(|| AdmissionGuard {
                lock: Arc::clone(self),
            })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

/// Releases the admission lock on drop, whatever path the run took.
pub struct AdmissionGuard {
    lock: Arc<AdmissionLock>,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::SeqCst);
    }
}

/// Synchronous answer to a start request; execution continues in the
/// background.
#[derive(Debug, Clone, Serialize)]
pub struct StartReceipt {
    pub run_id: String,
    pub status: RunStatus,
    pub message: String,
}

/// Read-only progress view of a run
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub run_id: String,
    pub status: RunStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A failed step: the cause plus the screenshot captured at the point of
/// failure, when one could be taken.
struct StepFailure {
    error: Error,
    screenshot: Option<String>,
}

#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<EngineConfig>,
    store: RunStore,
    artifacts: ArtifactStore,
    scenarios: ScenarioSet,
    actuators: Arc<dyn ActuatorFactory>,
    renderer: Arc<dyn ReportRenderer>,
    events: EventBus,
    admission: Arc<AdmissionLock>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        db: Database,
        actuators: Arc<dyn ActuatorFactory>,
        renderer: Arc<dyn ReportRenderer>,
    ) -> Self {
        let scenarios = match ScenarioSet::load(config.scenarios_dir()) {
            Ok(set) => set,
            Err(e) => {
                warn!("Failed to load scenario overrides: {}", e);
                ScenarioSet::default()
            }
        };
        Self {
            config: Arc::new(config),
            store: RunStore::new(db.clone()),
            artifacts: ArtifactStore::new(db),
            scenarios,
            actuators,
            renderer,
            events: EventBus::default(),
            admission: AdmissionLock::new(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn is_busy(&self) -> bool {
        self.admission.is_held()
    }

    /// Admit a run for `{module}/{scenario}`, minting a fresh run id.
    pub fn start_run(&self, module: &str, scenario: &str) -> Result<StartReceipt> {
        let run_id = make_run_id(module, scenario);
        self.admit(run_id, module.to_string(), scenario.to_string())
    }

    /// Admit a run under a caller-chosen id of the form
    /// `{module}_{scenario}_{epoch}`.
    pub fn start_run_with_id(&self, run_id: &str) -> Result<StartReceipt> {
        let (module, scenario) = parse_run_id(run_id)?;
        self.admit(run_id.to_string(), module, scenario)
    }

    /// Admission: take the platform lock, reject duplicates, persist the
    /// pending record, then hand execution to a background task. The lock
    /// travels with the task and is released when it finishes.
    fn admit(&self, run_id: String, module: String, scenario: String) -> Result<StartReceipt> {
        let guard = self
            .admission
            .try_acquire()
            .ok_or(Error::AlreadyRunning)?;

        if let Some(existing) = self.store.get(&run_id)? {
            if !existing.status.is_terminal() {
                // guard drops here, nothing was mutated
                return Err(Error::DuplicateRun { run_id });
            }
        }

        let run = Run::new(&run_id, Some(module.clone()), Some(scenario.clone()));
        self.store.insert_new(&run)?;

        info!("Admitted run {} ({}/{})", run_id, module, scenario);
        let orch = self.clone();
        let id = run_id.clone();
        tokio::spawn(async move {
            orch.execute(id, module, scenario, guard).await;
        });

        Ok(StartReceipt {
            run_id,
            status: RunStatus::Pending,
            message: "Run admitted, execution started".to_string(),
        })
    }

    /// Strictly read-only status lookup. Unknown runs are an error, never
    /// an implicit start.
    pub fn get_status(&self, run_id: &str) -> Result<StatusSnapshot> {
        let run = self
            .store
            .get(run_id)?
            .ok_or_else(|| Error::not_found("run", run_id))?;
        Ok(StatusSnapshot {
            run_id: run.run_id,
            status: run.status,
            progress: run.progress,
            error: run.error,
        })
    }

    /// Full run record
    pub fn get_run(&self, run_id: &str) -> Result<Run> {
        self.store
            .get(run_id)?
            .ok_or_else(|| Error::not_found("run", run_id))
    }

    /// All run records, newest first
    pub fn list_runs(&self) -> Result<Vec<Run>> {
        self.store.list()
    }

    /// On-demand retention sweep
    pub fn sweep(&self) -> SweepReport {
        RetentionSweeper::new(self.store.clone()).sweep()
    }

    /// Background body of a run. Never returns an error: every outcome,
    /// including infrastructure failures, ends in exactly one terminal
    /// write.
    async fn execute(
        &self,
        run_id: String,
        module: String,
        scenario: String,
        _guard: AdmissionGuard,
    ) {
        let started = Instant::now();
        if let Err(e) = self
            .store
            .mark_running(&run_id, Some(&module), Some(&scenario))
        {
            error!("Failed to mark {} running: {}", run_id, e);
        }

        let recorder = if self.config.recording.enabled {
            let output = self.config.video_dir().join(format!("{run_id}.mp4"));
            match RecorderHandle::start(&self.config.recording, output) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("Recording unavailable for {}: {}", run_id, e);
                    None
                }
            }
        } else {
            None
        };

        let script = self.scenarios.resolve(&module, &scenario, &self.config);
        let mut steps: Vec<Step> = script
            .steps
            .iter()
            .map(|d| Step::pending(&d.description))
            .collect();

        // the actuator lives outside the timed future so the session can
        // still be closed after a deadline abandons the steps mid-flight
        let mut actuator: Option<Box<dyn Actuator>> = None;
        let deadline = Duration::from_secs(self.config.run_deadline_secs);
        let outcome = match tokio::time::timeout(
            deadline,
            self.drive(&run_id, &script, &mut steps, &mut actuator),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExceeded {
                seconds: self.config.run_deadline_secs,
            }),
        };

        if matches!(outcome, Err(Error::DeadlineExceeded { .. })) {
            for step in steps.iter_mut().filter(|s| !s.status.is_terminal()) {
                let _ = step.advance(StepStatus::Error, "Run deadline exceeded");
            }
        }

        if let Some(mut driver) = actuator {
            if let Err(e) = driver.close().await {
                warn!("Failed to close browser session for {}: {}", run_id, e);
            }
        }

        let video_id = self.reconcile_recording(&run_id, recorder).await;
        self.finish(&run_id, &module, &scenario, started, steps, video_id, outcome);
    }

    /// Drive every step of the script in order. A failing step is marked
    /// `error` and the remaining steps are aborted.
    async fn drive(
        &self,
        run_id: &str,
        script: &Scenario,
        steps: &mut [Step],
        actuator: &mut Option<Box<dyn Actuator>>,
    ) -> Result<()> {
        let total = steps.len();
        for index in 0..total {
            let def = &script.steps[index];
            steps[index].advance(StepStatus::Running, "In progress")?;
            self.checkpoint(run_id, steps)?;
            self.events.emit(RunEvent::StepUpdate {
                run_id: run_id.to_string(),
                step_index: index,
                status: StepStatus::Running,
                message: def.description.clone(),
            });

            match self.run_step(run_id, index, def, actuator).await {
                Ok(()) => {
                    steps[index].advance(StepStatus::Completed, &def.on_success)?;
                    self.checkpoint(run_id, steps)?;
                    self.events.emit(RunEvent::StepUpdate {
                        run_id: run_id.to_string(),
                        step_index: index,
                        status: StepStatus::Completed,
                        message: def.on_success.clone(),
                    });
                }
                Err(failure) => {
                    let message = failure.error.to_string();
                    steps[index].screenshot = failure.screenshot;
                    steps[index].advance(StepStatus::Error, &message)?;
                    for step in steps[index + 1..].iter_mut() {
                        step.advance(StepStatus::Error, "Aborted: a previous step failed")?;
                    }
                    self.checkpoint(run_id, steps)?;
                    self.events.emit(RunEvent::StepUpdate {
                        run_id: run_id.to_string(),
                        step_index: index,
                        status: StepStatus::Error,
                        message,
                    });
                    return Err(failure.error);
                }
            }
        }
        Ok(())
    }

    /// Run one step: ensure a browser session exists, apply its actions,
    /// then run the error-detection checkpoint over the live page text.
    async fn run_step(
        &self,
        run_id: &str,
        index: usize,
        def: &StepDef,
        actuator: &mut Option<Box<dyn Actuator>>,
    ) -> std::result::Result<(), StepFailure> {
        if actuator.is_none() {
            *actuator = Some(self.actuators.create().await.map_err(|e| StepFailure {
                error: e,
                screenshot: None,
            })?);
        }
        let driver = match actuator.as_mut() {
            Some(driver) => driver.as_mut(),
            None => {
                return Err(StepFailure {
                    error: Error::Internal("browser session unavailable".to_string()),
                    screenshot: None,
                })
            }
        };

        for action in &def.actions {
            if let Err(e) = self.apply_action(run_id, action, &mut *driver).await {
                let shot = self.failure_screenshot(run_id, index, &mut *driver).await;
                return Err(StepFailure {
                    error: e,
                    screenshot: shot,
                });
            }
        }

        if let Some(token) = self.detect_error_text(&mut *driver).await {
            let shot = self.failure_screenshot(run_id, index, &mut *driver).await;
            return Err(StepFailure {
                error: Error::Actuator(format!("error text detected on page: '{token}'")),
                screenshot: shot,
            });
        }

        Ok(())
    }

    async fn apply_action(
        &self,
        run_id: &str,
        action: &Action,
        driver: &mut dyn Actuator,
    ) -> Result<()> {
        match action {
            Action::Navigate { url } => driver.navigate(url).await?,
            Action::SwitchFrame { frame } => driver.switch_frame(frame).await?,
            Action::Fill { field, value } => driver.fill(field, value).await?,
            Action::SendKeys { text } => driver.send_keys(text).await?,
            Action::PressKey {
                key,
                times,
                delay_ms,
            } => {
                for _ in 0..*times {
                    driver.press_key(key).await?;
                    if *delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                    }
                }
            }
            Action::ClickImage { template } => driver.click_image(template).await?,
            Action::Screenshot { label } => {
                let png = driver.screenshot().await?;
                self.artifacts
                    .put(&format!("{run_id}_{label}.png"), "image/png", &png)?;
            }
            Action::CompareScreens { label, settle_ms } => {
                let before = driver.screenshot().await?;
                if *settle_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(*settle_ms)).await;
                }
                let after = driver.screenshot().await?;
                self.artifacts.put(
                    &format!("{run_id}_{label}_before.png"),
                    "image/png",
                    &before,
                )?;
                self.artifacts
                    .put(&format!("{run_id}_{label}_after.png"), "image/png", &after)?;
            }
            Action::Sleep { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
        }

        if self.config.action_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.action_delay_ms)).await;
        }
        Ok(())
    }

    /// Case-insensitive scan of the live page text for configured error
    /// tokens. An unreadable page is not itself a failure.
    async fn detect_error_text(&self, driver: &mut dyn Actuator) -> Option<String> {
        let text = match driver.page_text().await {
            Ok(text) => text.to_lowercase(),
            Err(e) => {
                warn!("Page text unavailable for error detection: {}", e);
                return None;
            }
        };
        self.config
            .error_tokens
            .iter()
            .find(|token| text.contains(&token.to_lowercase()))
            .cloned()
    }

    /// Best-effort screenshot of the failing page, stored as an artifact
    /// named after the failing step.
    async fn failure_screenshot(
        &self,
        run_id: &str,
        index: usize,
        driver: &mut dyn Actuator,
    ) -> Option<String> {
        let png = match driver.screenshot().await {
            Ok(png) => png,
            Err(e) => {
                warn!("No failure screenshot for {} step {}: {}", run_id, index + 1, e);
                return None;
            }
        };
        let filename = format!("{}_step{}.png", run_id, index + 1);
        match self.artifacts.put(&filename, "image/png", &png) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to store failure screenshot {}: {}", filename, e);
                None
            }
        }
    }

    fn checkpoint(&self, run_id: &str, steps: &[Step]) -> Result<()> {
        let completed = steps.iter().filter(|s| s.status.is_success()).count();
        self.store
            .update_steps(run_id, steps, progress_for(completed, steps.len()))
    }

    /// Stop the recorder and, when the file is usable, move it into the
    /// artifact store. Recording problems only cost the video.
    async fn reconcile_recording(
        &self,
        run_id: &str,
        recorder: Option<RecorderHandle>,
    ) -> Option<String> {
        let recorder = recorder?;
        let path = match recorder.stop().await {
            Ok(path) => path,
            Err(e) => {
                warn!("Recorder stop failed for {}: {}", run_id, e);
                return None;
            }
        };
        if !has_usable_video(&path).await {
            warn!("Recording for {} is empty, discarding", run_id);
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read recording {:?}: {}", path, e);
                return None;
            }
        };
        let video_id = match self
            .artifacts
            .put(&format!("{run_id}.mp4"), "video/mp4", &bytes)
        {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to store recording for {}: {}", run_id, e);
                return None;
            }
        };
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!("Failed to remove temp recording {:?}: {}", path, e);
        }
        Some(video_id)
    }

    /// The single terminal write plus its fan-out: report rendering,
    /// outcome persistence, completion event, retention sweep.
    fn finish(
        &self,
        run_id: &str,
        module: &str,
        scenario: &str,
        started: Instant,
        steps: Vec<Step>,
        video_id: Option<String>,
        outcome: Result<()>,
    ) {
        let elapsed = started.elapsed().as_secs_f64();
        let success = Run::compute_success(&steps);
        let stats = compute_stats(&steps);

        let mut status = RunStatus::Completed;
        let mut run_error = None;
        let mut artifact_id = None;
        let mut filename = None;

        match outcome {
            Ok(()) => {
                let meta = ReportMeta {
                    run_id: run_id.to_string(),
                    module: module.to_string(),
                    scenario: scenario.to_string(),
                    execution_time_seconds: elapsed,
                };
                let name = report_filename();
                match self
                    .renderer
                    .render(&meta, &steps)
                    .and_then(|bytes| self.artifacts.put(&name, "application/pdf", &bytes))
                {
                    Ok(id) => {
                        artifact_id = Some(id);
                        filename = Some(name);
                    }
                    Err(e) => {
                        // step outcomes stand, but a run without its report
                        // is a failed run
                        status = RunStatus::Error;
                        run_error = Some(format!("report generation failed: {e}"));
                    }
                }
            }
            Err(e) => {
                status = RunStatus::Error;
                run_error = Some(e.to_string());
            }
        }

        let completed = steps.iter().filter(|s| s.status.is_success()).count();
        let progress = if status == RunStatus::Completed {
            100
        } else {
            progress_for(completed, steps.len())
        };

        let record = RunOutcome {
            status,
            success,
            execution_time_seconds: elapsed,
            progress,
            steps,
            stats: Some(stats),
            artifact_id: artifact_id.clone(),
            filename,
            video_id,
            error: run_error,
        };
        match self.store.finalize(run_id, &record) {
            Ok(true) => info!(
                "Run {} finished: {} in {:.1}s",
                run_id,
                status.as_str(),
                elapsed
            ),
            Ok(false) => error!("Terminal write for {} was dropped", run_id),
            Err(e) => error!("Failed to finalize {}: {}", run_id, e),
        }

        self.events.emit(RunEvent::Complete {
            run_id: run_id.to_string(),
            artifact_id,
        });

        RetentionSweeper::new(self.store.clone()).sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_lock_is_exclusive() {
        let lock = AdmissionLock::new();
        let guard = lock.try_acquire().unwrap();
        assert!(lock.try_acquire().is_none());
        assert!(lock.is_held());

        drop(guard);
        assert!(!lock.is_held());
        assert!(lock.try_acquire().is_some());
    }
}

//! Anonymize → dispatch → await → revert state machine
//!
//! One `AnonymizerSession` drives at most one run at a time:
//!
//! ```text
//! Idle → Scanning → Substituting → Dispatching → AwaitingResponse → Reverting → Idle
//!            └──────────────┴─────────────┴───────────────┴──────────────┴──→ Error → Idle
//! ```
//!
//! Every step runs sequentially on the caller's task. The only suspension
//! points are the detector call, the response wait and the revert retries,
//! all of which honour cancellation.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::compliance::classifier::{DetectionStrategy, SelectionMode};
use crate::compliance::mapping::{Entity, EntityType, MappingStore};
use crate::compliance::revert::{AttemptRecord, RevertEngine, RevertReport};
use crate::core::awaiter::{await_response, cancellation, AwaitOutcome};
use crate::core::collaborators::{ChatSurface, Detector, Faker, ObservedResponse, ResponseObserver};
use crate::core::config::WorkflowConfig;
use crate::core::error::WorkflowError;
use crate::core::steps::{accept_spans, apply_substitutions, assign_substitutes};
use crate::core::storage::{self, PanelPosition, PreferenceStore, Preferences, StorageResult};

/// Phase of the session's state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Idle,
    Scanning,
    Substituting,
    Dispatching,
    AwaitingResponse,
    Reverting,
    Error,
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowPhase::Idle => "idle",
            WorkflowPhase::Scanning => "scanning",
            WorkflowPhase::Substituting => "substituting",
            WorkflowPhase::Dispatching => "dispatching",
            WorkflowPhase::AwaitingResponse => "awaiting-response",
            WorkflowPhase::Reverting => "reverting",
            WorkflowPhase::Error => "error",
        };
        f.write_str(name)
    }
}

/// External capabilities a session drives
#[derive(Clone)]
pub struct Collaborators {
    pub detector: Arc<dyn Detector>,
    pub faker: Arc<dyn Faker>,
    pub chat: Arc<dyn ChatSurface>,
    pub observer: Arc<dyn ResponseObserver>,
}

/// How a run ended, from the user's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportOutcome {
    FullyRestored,
    /// Some substitutes are still visible in the response
    PartiallyRestored,
    /// Nothing left the machine
    FailedBeforeSend,
    /// Substituted text was sent but the run could not finish reverting
    FailedAfterSend,
}

/// Terminal report of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub run_id: u64,
    pub restored_count: usize,
    pub total_mappings: usize,
    /// Entities whose substitute may still be visible to the user
    pub unresolved: Vec<Entity>,
    pub phase_reached: WorkflowPhase,
    pub strategy: Option<DetectionStrategy>,
    pub rationale: Option<String>,
    pub outcome: ReportOutcome,
    pub error: Option<WorkflowError>,
    pub attempts: Vec<AttemptRecord>,
    pub started_at: DateTime<Utc>,
}

impl WorkflowReport {
    /// One line for a status panel
    pub fn summary(&self) -> String {
        match self.outcome {
            ReportOutcome::FullyRestored if self.total_mappings == 0 => {
                "No sensitive values found, prompt sent unchanged".to_string()
            }
            ReportOutcome::FullyRestored => format!(
                "Fully restored: {} of {} values replaced back",
                self.restored_count, self.total_mappings
            ),
            ReportOutcome::PartiallyRestored => format!(
                "Partially restored: {} of {} values still show substitutes",
                self.unresolved.len(),
                self.total_mappings
            ),
            ReportOutcome::FailedBeforeSend => format!(
                "Failed before sending ({}), nothing left this machine",
                self.error_text()
            ),
            ReportOutcome::FailedAfterSend => format!(
                "Failed after sending ({}), {} values need manual restoring",
                self.error_text(),
                self.unresolved.len()
            ),
        }
    }

    fn error_text(&self) -> String {
        self.error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

/// Ephemeral state of one run. Owned by the task driving it.
struct WorkflowRun {
    id: u64,
    phase: WorkflowPhase,
    started_at: DateTime<Utc>,
    mode: SelectionMode,
    enabled_types: HashSet<EntityType>,
    baseline_response_count: usize,
    mappings: MappingStore,
    strategy: Option<DetectionStrategy>,
    rationale: Option<String>,
    /// Editable text as it was before substitution
    outbound_original: Option<String>,
    rewritten: bool,
    sent: bool,
    revert: Option<RevertReport>,
}

/// Last submit, for the duplicate-submit guard
struct Dispatch {
    /// Run that was active when the submit happened
    run: Option<u64>,
    until: Instant,
}

struct SessionState {
    phase: WorkflowPhase,
    active_run: Option<u64>,
    cancel: Option<watch::Sender<bool>>,
    last_dispatch: Option<Dispatch>,
    mode: SelectionMode,
    enabled_types: HashSet<EntityType>,
    panel_position: PanelPosition,
    /// Mappings of the last finished run, kept until the deferred clear
    inspection: Option<(u64, MappingStore)>,
}

struct SessionInner {
    config: WorkflowConfig,
    collaborators: Collaborators,
    preferences: Option<Arc<dyn PreferenceStore>>,
    state: Mutex<SessionState>,
    run_counter: AtomicU64,
}

/// Handle to the anonymization workflow. Clones share one session.
#[derive(Clone)]
pub struct AnonymizerSession {
    inner: Arc<SessionInner>,
}

impl AnonymizerSession {
    pub fn new(config: WorkflowConfig, collaborators: Collaborators) -> Self {
        Self::build(config, collaborators, None)
    }

    pub fn with_preferences(
        config: WorkflowConfig,
        collaborators: Collaborators,
        store: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self::build(config, collaborators, Some(store))
    }

    fn build(
        config: WorkflowConfig,
        collaborators: Collaborators,
        preferences: Option<Arc<dyn PreferenceStore>>,
    ) -> Self {
        AnonymizerSession {
            inner: Arc::new(SessionInner {
                config,
                collaborators,
                preferences,
                state: Mutex::new(SessionState {
                    phase: WorkflowPhase::Idle,
                    active_run: None,
                    cancel: None,
                    last_dispatch: None,
                    mode: SelectionMode::default(),
                    enabled_types: EntityType::ALL.into_iter().collect(),
                    panel_position: PanelPosition::default(),
                    inspection: None,
                }),
                run_counter: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.inner.config
    }

    pub fn phase(&self) -> WorkflowPhase {
        self.inner.state.lock().phase
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().active_run.is_some()
    }

    pub fn mode(&self) -> SelectionMode {
        self.inner.state.lock().mode
    }

    /// Takes effect from the next run
    pub fn set_mode(&self, mode: SelectionMode) {
        info!("🎛️  [Session] Detection mode set to {:?}", mode);
        self.inner.state.lock().mode = mode;
    }

    pub fn enabled_types(&self) -> Vec<EntityType> {
        let state = self.inner.state.lock();
        EntityType::ALL
            .into_iter()
            .filter(|t| state.enabled_types.contains(t))
            .collect()
    }

    pub fn set_enabled_types(&self, types: impl IntoIterator<Item = EntityType>) {
        self.inner.state.lock().enabled_types = types.into_iter().collect();
    }

    /// Entities of the last finished run, until its mappings are cleared
    pub fn inspect_mappings(&self) -> Vec<Entity> {
        self.inner
            .state
            .lock()
            .inspection
            .as_ref()
            .map(|(_, store)| store.all().to_vec())
            .unwrap_or_default()
    }

    /// Signal the active run to stop. False when nothing is running.
    pub fn cancel_workflow(&self) -> bool {
        let state = self.inner.state.lock();
        match (&state.cancel, state.active_run) {
            (Some(tx), Some(run_id)) => {
                info!("🛑 [Workflow] Cancel requested for run {}", run_id);
                tx.send_replace(true);
                true
            }
            _ => false,
        }
    }

    /// Manual send path. Shares the duplicate-submit guard with runs.
    /// Returns false when a submit happened too recently, or when the active
    /// run has not rewritten the prompt yet.
    pub fn dispatch_now(&self) -> Result<bool, WorkflowError> {
        let run = {
            let state = self.inner.state.lock();
            if state.active_run.is_some()
                && matches!(state.phase, WorkflowPhase::Scanning | WorkflowPhase::Substituting)
            {
                debug!("🔒 [Dispatch] Prompt not anonymized yet, holding manual submit");
                return Ok(false);
            }
            state.active_run
        };
        self.guarded_submit(run)
    }

    /// Apply stored preferences to this session
    pub async fn load_preferences(&self) -> StorageResult<Preferences> {
        let Some(store) = self.inner.preferences.clone() else {
            return Ok(self.current_preferences());
        };
        let prefs = storage::load_preferences(store.as_ref()).await?;
        {
            let mut state = self.inner.state.lock();
            state.mode = prefs.mode;
            state.enabled_types = prefs.enabled_types.iter().copied().collect();
            state.panel_position = prefs.panel_position;
        }
        info!("📥 [Session] Preferences loaded");
        Ok(prefs)
    }

    pub async fn save_preferences(&self) -> StorageResult<()> {
        let Some(store) = self.inner.preferences.clone() else {
            debug!("💾 [Session] No preference store configured, nothing saved");
            return Ok(());
        };
        let prefs = self.current_preferences();
        storage::save_preferences(store.as_ref(), &prefs).await
    }

    pub fn set_panel_position(&self, position: PanelPosition) {
        self.inner.state.lock().panel_position = position;
    }

    fn current_preferences(&self) -> Preferences {
        let state = self.inner.state.lock();
        Preferences {
            mode: state.mode,
            enabled_types: EntityType::ALL
                .into_iter()
                .filter(|t| state.enabled_types.contains(t))
                .collect(),
            panel_position: state.panel_position,
        }
    }

    /// Run one full anonymization cycle.
    ///
    /// `Err` only when the run could not start (`AlreadyRunning`,
    /// `NotSupportedHere`). Failures once started are carried by the report.
    ///
    /// Dropping the returned future mid-run unwinds the run as if it had
    /// been cancelled.
    pub async fn run_workflow(&self) -> Result<WorkflowReport, WorkflowError> {
        let (run, mut cancel) = self.begin()?;
        let mut guard = RunGuard {
            session: self.clone(),
            run,
            finished: false,
        };
        let result = self.drive(&mut guard.run, &mut cancel).await;
        guard.finished = true;
        Ok(self.finish(&mut guard.run, result))
    }

    fn begin(&self) -> Result<(WorkflowRun, watch::Receiver<bool>), WorkflowError> {
        let mut state = self.inner.state.lock();
        if let Some(active) = state.active_run {
            warn!("⛔ [Workflow] Run {} still in progress, rejecting trigger", active);
            return Err(WorkflowError::AlreadyRunning);
        }
        if let Err(reason) = self.inner.collaborators.chat.automation_support() {
            warn!("🚫 [Workflow] Surface cannot be automated: {}", reason);
            return Err(WorkflowError::NotSupportedHere(reason));
        }

        let id = self.inner.run_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = watch::channel(false);
        state.active_run = Some(id);
        state.cancel = Some(tx);
        state.phase = WorkflowPhase::Scanning;
        state.inspection = None;

        info!("🚀 [Workflow] Run {} started", id);
        let run = WorkflowRun {
            id,
            phase: WorkflowPhase::Scanning,
            started_at: Utc::now(),
            mode: state.mode,
            enabled_types: state.enabled_types.clone(),
            baseline_response_count: 0,
            mappings: MappingStore::new(),
            strategy: None,
            rationale: None,
            outbound_original: None,
            rewritten: false,
            sent: false,
            revert: None,
        };
        Ok((run, rx))
    }

    /// Move to `next` unless a cancel arrived since the last step.
    fn transition(
        &self,
        run: &mut WorkflowRun,
        next: WorkflowPhase,
        cancel: &watch::Receiver<bool>,
    ) -> Result<(), WorkflowError> {
        if *cancel.borrow() {
            return Err(WorkflowError::Cancelled);
        }
        debug!("➡️  [Workflow] Run {}: {} -> {}", run.id, run.phase, next);
        run.phase = next;
        self.inner.state.lock().phase = next;
        Ok(())
    }

    async fn drive(
        &self,
        run: &mut WorkflowRun,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), WorkflowError> {
        let collaborators = self.inner.collaborators.clone();
        let config = &self.inner.config;

        // Scanning
        let text = collaborators.chat.editable_text();
        run.outbound_original = Some(text.clone());
        let choice = run.mode.resolve(&text);
        info!(
            "🧭 [Workflow] Run {} using {} ({})",
            run.id, choice.strategy, choice.rationale
        );
        run.strategy = Some(choice.strategy);
        run.rationale = Some(choice.rationale);

        let spans = tokio::select! {
            result = collaborators.detector.detect(&text, choice.strategy) => result?,
            _ = cancellation(cancel) => return Err(WorkflowError::Cancelled),
        };
        debug!("🔎 [Workflow] Detector reported {} spans", spans.len());

        self.transition(run, WorkflowPhase::Substituting, cancel)?;
        let accepted = accept_spans(run.id, &text, spans, &run.enabled_types, &mut run.mappings)?;
        let outbound = if accepted == 0 {
            info!("🫙 [Workflow] Run {}: no entities accepted, sending unchanged", run.id);
            text.clone()
        } else {
            let assigned = assign_substitutes(&mut run.mappings, collaborators.faker.as_ref())?;
            info!(
                "🎭 [Workflow] Run {}: {} entities, {} substitutes assigned",
                run.id, accepted, assigned
            );
            apply_substitutions(&text, &run.mappings)
        };

        // Rewrite before entering Dispatching so a manual submit can only
        // ever send the anonymized text
        if outbound != text {
            collaborators.chat.set_editable_text(&outbound);
            run.rewritten = true;
        }
        run.baseline_response_count = collaborators.observer.count_responses();
        self.transition(run, WorkflowPhase::Dispatching, cancel)?;
        if !self.guarded_submit(Some(run.id))? {
            info!("📤 [Workflow] Run {}: already submitted through the manual path", run.id);
        }
        run.sent = true;

        if run.mappings.is_empty() {
            return Ok(());
        }

        self.transition(run, WorkflowPhase::AwaitingResponse, cancel)?;
        let outcome = await_response(
            collaborators.observer.as_ref(),
            run.baseline_response_count,
            &config.await_response,
            cancel,
        )
        .await?;
        if let AwaitOutcome::Unsettled(_) = outcome {
            warn!("🌊 [Workflow] Run {}: reverting a response that was still changing", run.id);
        }
        debug!("📨 [Workflow] Run {}: response of {} bytes", run.id, outcome.text().len());

        self.transition(run, WorkflowPhase::Reverting, cancel)?;
        let engine = RevertEngine::new(config.revert.clone());
        let target = ObservedResponse(collaborators.observer.as_ref());
        let report = tokio::select! {
            report = engine.run(&target, &run.mappings) => report,
            _ = cancellation(cancel) => return Err(WorkflowError::Cancelled),
        };
        run.revert = Some(report);
        Ok(())
    }

    /// Submit unless a submit for the same trigger happened inside the guard
    /// window. A run is only ever held back by its own earlier submit; a
    /// manual submit outside any run is held back by any recent one.
    fn guarded_submit(&self, run: Option<u64>) -> Result<bool, WorkflowError> {
        {
            let state = self.inner.state.lock();
            if let Some(last) = &state.last_dispatch {
                let same_trigger = run.is_none() || last.run == run;
                if same_trigger && Instant::now() < last.until {
                    debug!("🔒 [Dispatch] Suppressing duplicate submit");
                    return Ok(false);
                }
            }
        }

        if !self.inner.collaborators.chat.submit() {
            return Err(WorkflowError::DispatchFailed(
                "no send affordance available".to_string(),
            ));
        }
        self.inner.state.lock().last_dispatch = Some(Dispatch {
            run,
            until: Instant::now() + self.inner.config.dispatch_guard(),
        });
        info!("📤 [Dispatch] Submitted");
        Ok(true)
    }

    fn finish(&self, run: &mut WorkflowRun, result: Result<(), WorkflowError>) -> WorkflowReport {
        let total_mappings = run.mappings.len();
        let revert = run.revert.take();
        let error = result.err();

        let (restored_count, unresolved, attempts) = match (&revert, &error) {
            (Some(report), _) => (
                report.restored_count,
                report.unresolved.clone(),
                report.attempts.clone(),
            ),
            // Sent but never reverted: every substitute may be on screen
            (None, Some(_)) if run.sent => (0, run.mappings.substituted().cloned().collect(), Vec::new()),
            (None, _) => (0, Vec::new(), Vec::new()),
        };

        let outcome = match (&error, run.sent) {
            (Some(_), false) => ReportOutcome::FailedBeforeSend,
            (Some(_), true) => ReportOutcome::FailedAfterSend,
            (None, _) if unresolved.is_empty() => ReportOutcome::FullyRestored,
            (None, _) => ReportOutcome::PartiallyRestored,
        };

        match &error {
            None => {
                let mut state = self.inner.state.lock();
                state.phase = WorkflowPhase::Idle;
                state.active_run = None;
                state.cancel = None;
                state.inspection = Some((run.id, run.mappings.clone()));
                drop(state);
                self.schedule_clear(run.id);
                info!(
                    "🏁 [Workflow] Run {} finished: restored {}/{} ({} unresolved)",
                    run.id,
                    restored_count,
                    total_mappings,
                    unresolved.len()
                );
            }
            Some(err) => {
                error!("❌ [Workflow] Run {} failed during {}: {}", run.id, run.phase, err);
                if !run.sent && run.rewritten {
                    if let Some(original) = &run.outbound_original {
                        self.inner.collaborators.chat.set_editable_text(original);
                    }
                }
                run.mappings.clear();

                let mut state = self.inner.state.lock();
                state.phase = WorkflowPhase::Error;
                debug!("♻️  [Workflow] Run {}: resetting to idle", run.id);
                state.phase = WorkflowPhase::Idle;
                state.active_run = None;
                state.cancel = None;
                state.inspection = None;
            }
        }

        WorkflowReport {
            run_id: run.id,
            restored_count,
            total_mappings,
            unresolved,
            phase_reached: run.phase,
            strategy: run.strategy,
            rationale: run.rationale.take(),
            outcome,
            error,
            attempts,
            started_at: run.started_at,
        }
    }

    /// Drop the finished run's mappings after the configured delay, unless a
    /// newer run has replaced them.
    fn schedule_clear(&self, run_id: u64) {
        let delay = self.inner.config.clear_delay();
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            clear_inspection(&self.inner, run_id);
            return;
        };
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                clear_inspection(&inner, run_id);
            }
        });
    }
}

/// Unwinds a run whose future was dropped before `finish` ran
struct RunGuard {
    session: AnonymizerSession,
    run: WorkflowRun,
    finished: bool,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("🗑️  [Workflow] Run {} abandoned during {}", self.run.id, self.run.phase);
        self.session.finish(&mut self.run, Err(WorkflowError::Cancelled));
    }
}

fn clear_inspection(inner: &SessionInner, run_id: u64) {
    let mut state = inner.state.lock();
    if state.inspection.as_ref().is_some_and(|(id, _)| *id == run_id) {
        state.inspection = None;
        debug!("🧹 [Workflow] Run {}: mappings cleared", run_id);
    }
}

impl fmt::Debug for AnonymizerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("AnonymizerSession")
            .field("phase", &state.phase)
            .field("active_run", &state.active_run)
            .field("mode", &state.mode)
            .finish()
    }
}

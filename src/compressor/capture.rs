//! Run lifecycle: capture the history sent with the compression prompt, wait
//! for the model's answer, and turn both into a pending injection.

use crate::compressor::branch::{BranchOutcome, BranchSequencer, HostUi};
use crate::compressor::config::TimingConfig;
use crate::compressor::fingerprint::Fingerprint;
use crate::compressor::injection::{InjectionScheduler, PendingInjection};
use crate::compressor::intercept::{TrafficEvent, TrafficObserver};
use crate::compressor::settings::{Settings, SettingsSource};
use crate::compressor::summary::extract_summary;
use crate::compressor::tail::{pick_tail_turns, strip_compression_prompt_turn};
use crate::compressor::wire::{describe_history, extract_turns};
use crate::error::CompressorError;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Capturing,
    RequestPending,
    ResponsePending,
}

#[derive(Debug)]
pub struct RunState {
    pub compression_in_progress: bool,
    pub history_capture_pending: bool,
    pub compression_request_pending: bool,
    pub compression_response_pending: bool,
    pub last_history: Option<Value>,
    pub captured_at: Option<DateTime<Utc>>,
    pub started_at: Option<Instant>,
    pub active_prompt: String,
    pub fingerprint: Fingerprint,
}

impl RunState {
    fn new(prompt: &str) -> Self {
        Self {
            compression_in_progress: false,
            history_capture_pending: false,
            compression_request_pending: false,
            compression_response_pending: false,
            last_history: None,
            captured_at: None,
            started_at: None,
            active_prompt: prompt.to_string(),
            fingerprint: Fingerprint::from_prompt(prompt),
        }
    }

    pub fn phase(&self) -> RunPhase {
        if self.compression_response_pending {
            RunPhase::ResponsePending
        } else if self.history_capture_pending {
            RunPhase::Capturing
        } else if self.compression_request_pending {
            RunPhase::RequestPending
        } else {
            RunPhase::Idle
        }
    }

    fn set_prompt(&mut self, prompt: &str) {
        self.active_prompt = prompt.to_string();
        self.fingerprint = Fingerprint::from_prompt(prompt);
    }

    fn clear_flags(&mut self) {
        self.compression_in_progress = false;
        self.history_capture_pending = false;
        self.compression_request_pending = false;
        self.compression_response_pending = false;
        self.started_at = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    AlreadyRunning,
}

/// Owner of the run state and the only code that mutates it.
pub struct Compressor {
    state: Mutex<RunState>,
    settings: Mutex<Settings>,
    scheduler: Arc<InjectionScheduler>,
    branch: Arc<BranchSequencer>,
    ui: Arc<dyn HostUi>,
    timing: TimingConfig,
}

impl Compressor {
    pub fn new(
        settings: Settings,
        scheduler: Arc<InjectionScheduler>,
        ui: Arc<dyn HostUi>,
        timing: TimingConfig,
    ) -> Self {
        let branch = Arc::new(BranchSequencer::new(
            Arc::clone(&ui),
            Arc::clone(&scheduler),
            timing.clone(),
        ));
        Self {
            state: Mutex::new(RunState::new(settings.effective_prompt())),
            settings: Mutex::new(settings),
            scheduler,
            branch,
            ui,
            timing,
        }
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings_snapshot(&self) -> Settings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Always stored; the active prompt only follows while no run is going.
    pub fn on_settings_updated(&self, next: Settings) {
        let prompt = next.effective_prompt().to_string();
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = next;
        let mut state = self.state();
        if state.compression_in_progress {
            debug!(target: "compressor::ui", "settings stored; active prompt kept until the run ends");
            return;
        }
        state.set_prompt(&prompt);
        info!(target: "compressor::ui", "settings updated");
    }

    pub fn is_run_in_progress(&self) -> bool {
        self.state().compression_in_progress
    }

    pub fn phase(&self) -> RunPhase {
        self.state().phase()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.state().fingerprint.clone()
    }

    /// When the history of the current (or last) run was captured.
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        self.state().captured_at
    }

    /// Start a run: send the compression prompt through the host input box.
    ///
    /// The in-progress check and the claim of the run happen under one lock,
    /// so concurrent callers start at most one run.
    pub fn trigger(&self) -> Result<TriggerOutcome, CompressorError> {
        let prompt = self.settings_snapshot().effective_prompt().to_string();
        {
            let mut state = self.state();
            if state.compression_in_progress {
                info!(target: "compressor::ui", "compression already running");
                return Ok(TriggerOutcome::AlreadyRunning);
            }
            if !self.ui.has_prompt_input() {
                warn!(target: "compressor::ui", "input box not found, cannot run compression");
                return Err(CompressorError::PromptInputMissing);
            }
            state.last_history = None;
            state.captured_at = None;
            state.set_prompt(&prompt);
            state.history_capture_pending = true;
            state.compression_in_progress = true;
            state.compression_request_pending = true;
            state.compression_response_pending = false;
            state.started_at = Some(Instant::now());
        }
        self.scheduler.discard();
        self.ui.set_button_loading(true);

        if let Err(err) = self.ui.submit_prompt(&prompt) {
            warn!(target: "compressor::ui", "failed to send compression prompt: {err}");
            self.finalize_run();
            return Err(err);
        }
        info!(target: "compressor::ui", "compression request sent");
        Ok(TriggerOutcome::Started)
    }

    pub fn on_request(&self, body_text: Option<&str>) {
        let Some(body) = body_text else {
            return;
        };
        let mut state = self.state();
        if !state.history_capture_pending && !state.compression_in_progress {
            debug!(target: "compressor::net", "GenerateContent request observed outside compression run");
            return;
        }
        let is_compression = state.fingerprint.matches_body(body);

        if is_compression && state.history_capture_pending {
            state.history_capture_pending = false;
            match serde_json::from_str::<Value>(body) {
                Ok(payload) => {
                    let description = describe_history(&payload);
                    info!(
                        target: "compressor::net",
                        valid = description.valid,
                        turn_count = description.turn_count,
                        first_role = description.first_role.as_deref().unwrap_or("-"),
                        "stored prompt history snapshot for compression"
                    );
                    state.last_history = Some(payload);
                    state.captured_at = Some(Utc::now());
                }
                Err(err) => {
                    warn!(target: "compressor::net", "compression request detected but history parse failed: {err}");
                }
            }
        } else if state.history_capture_pending {
            debug!(target: "compressor::net", "history capture pending, skipping non-compression request");
        }

        if is_compression && state.compression_in_progress {
            state.compression_request_pending = false;
            state.compression_response_pending = true;
            info!(target: "compressor::net", "compression GenerateContent request captured");
        } else {
            debug!(target: "compressor::net", "regular GenerateContent request observed");
        }
    }

    /// Handle the compression response. Returns the spawned branch task when
    /// a pending injection was prepared.
    pub fn on_response(
        &self,
        body_text: Option<&str>,
    ) -> Option<JoinHandle<Result<BranchOutcome, CompressorError>>> {
        let (history, captured_at) = {
            let state = self.state();
            if !state.compression_in_progress || !state.compression_response_pending {
                debug!(
                    target: "compressor::net",
                    in_progress = state.compression_in_progress,
                    response_pending = state.compression_response_pending,
                    "GenerateContent response ignored"
                );
                return None;
            }
            (state.last_history.clone(), state.captured_at)
        };
        let captured_at = captured_at.map(|at| at.to_rfc3339());

        let result = self.reconstruct(body_text, history);
        self.finalize_run();
        match result {
            Ok(pending) => {
                info!(
                    target: "compressor::net",
                    turn_count = pending.turns.len(),
                    captured_at = captured_at.as_deref().unwrap_or("-"),
                    "compression summary extracted, branching"
                );
                self.spawn_branch()
            }
            Err(err) => {
                warn!(
                    target: "compressor::net",
                    code = err.code().as_str(),
                    captured_at = captured_at.as_deref().unwrap_or("-"),
                    "reconstruction aborted: {err}"
                );
                None
            }
        }
    }

    fn reconstruct(
        &self,
        body_text: Option<&str>,
        history: Option<Value>,
    ) -> Result<PendingInjection, CompressorError> {
        let body = body_text
            .ok_or_else(|| CompressorError::ShapeMismatch("response body missing".to_string()))?;
        let stream: Value = serde_json::from_str(body)
            .map_err(|err| CompressorError::ShapeMismatch(format!("response is not JSON: {err}")))?;
        let settings = self.settings_snapshot();
        let summary = extract_summary(&stream, settings.snapshot_pattern()).ok_or_else(|| {
            CompressorError::ShapeMismatch("no summary text in model output".to_string())
        })?;

        let history = history.ok_or_else(|| {
            CompressorError::CaptureMiss("prompt history was not captured".to_string())
        })?;
        let turns = extract_turns(&history);
        if turns.is_empty() {
            return Err(CompressorError::ShapeMismatch(
                "no turns extracted from prompt history".to_string(),
            ));
        }
        let fingerprint = self.fingerprint();
        let turns = strip_compression_prompt_turn(turns, &fingerprint);
        if turns.is_empty() {
            return Err(CompressorError::ShapeMismatch(
                "history only contained the compression prompt turn".to_string(),
            ));
        }
        let tail = pick_tail_turns(&turns, settings.tail_retention());
        Ok(self.scheduler.prepare(&summary, tail))
    }

    fn spawn_branch(&self) -> Option<JoinHandle<Result<BranchOutcome, CompressorError>>> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(target: "compressor::net", "no async runtime available, branch automation skipped");
            return None;
        };
        let branch = Arc::clone(&self.branch);
        Some(handle.spawn(async move {
            let outcome = branch.branch_from_here().await;
            if let Err(err) = &outcome {
                warn!(target: "compressor::net", "branch injection failed: {err}");
            }
            outcome
        }))
    }

    pub fn finalize_run(&self) {
        self.state().clear_flags();
        self.ui.set_button_loading(false);
    }

    /// Finalize a run whose traffic never completed. Returns true when a run
    /// was expired.
    pub fn expire_stale_run(&self) -> bool {
        let expired = {
            let state = self.state();
            state.compression_in_progress
                && state
                    .started_at
                    .is_some_and(|started| started.elapsed() >= self.timing.run_timeout())
        };
        if expired {
            let err = CompressorError::CaptureMiss(format!(
                "no compression response within {}ms",
                self.timing.run_timeout_ms
            ));
            warn!(target: "compressor::net", code = err.code().as_str(), "{err}");
            self.finalize_run();
        }
        expired
    }
}

impl SettingsSource for Compressor {
    fn snapshot(&self) -> Settings {
        self.settings_snapshot()
    }
}

impl TrafficObserver for Compressor {
    fn observe(&self, event: &TrafficEvent) {
        match event {
            TrafficEvent::Request { body_text, .. } => self.on_request(body_text.as_deref()),
            TrafficEvent::Response { body_text, .. } => {
                // The branch task runs detached; its outcome is logged inside.
                let _ = self.on_response(body_text.as_deref());
            }
        }
    }
}

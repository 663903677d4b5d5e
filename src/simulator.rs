//! Staged fake-progress state machine.
//!
//! `Idle -> Running(0..N-1) -> Complete`, and `Complete -> Running(0)` only
//! through `reset`. The machine never sleeps; a driver (see `runner`) or a
//! test feeds it time.

use serde::{Deserialize, Serialize};

use crate::logging::{log, log_stage_transition, log_store_failure, obj, v_num, v_str, Domain, Level};
use crate::stages::{total_duration_ms, AnalysisStage};
use crate::store::SharedStore;

pub const COMPLETE_MARKER: &str = "complete";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRunState {
    pub phase: RunPhase,
    pub current_stage_index: usize,
    /// Sum of completed stage durations.
    pub elapsed_ms: u64,
    pub progress_percent: f64,
}

impl AnalysisRunState {
    fn idle() -> Self {
        Self {
            phase: RunPhase::Idle,
            current_stage_index: 0,
            elapsed_ms: 0,
            progress_percent: 0.0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == RunPhase::Running
    }

    pub fn is_complete(&self) -> bool {
        self.phase == RunPhase::Complete
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    StageCompleted { index: usize, name: String, progress: f64 },
    RunCompleted,
}

pub struct StageSimulator {
    stages: Vec<AnalysisStage>,
    key: String,
    store: SharedStore,
    total_ms: u64,
    /// Time fed into the current stage that has not completed it yet.
    pending_ms: u64,
    state: AnalysisRunState,
}

impl StageSimulator {
    pub fn new(stages: Vec<AnalysisStage>, key: impl Into<String>, store: SharedStore) -> Self {
        let total_ms = total_duration_ms(&stages);
        Self {
            stages,
            key: key.into(),
            store,
            total_ms,
            pending_ms: 0,
            state: AnalysisRunState::idle(),
        }
    }

    pub fn state(&self) -> &AnalysisRunState {
        &self.state
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn stages(&self) -> &[AnalysisStage] {
        &self.stages
    }

    pub fn current_stage(&self) -> Option<&AnalysisStage> {
        if self.state.is_running() {
            self.stages.get(self.state.current_stage_index)
        } else {
            None
        }
    }

    /// Time left before the current stage completes.
    pub fn remaining_in_stage_ms(&self) -> Option<u64> {
        self.current_stage()
            .map(|s| s.duration_ms.saturating_sub(self.pending_ms))
    }

    /// Enter Complete if the marker is stored, otherwise start at stage 0.
    pub fn activate(&mut self) -> Vec<StageEvent> {
        if self.state.phase != RunPhase::Idle {
            return Vec::new();
        }
        if self.marker_present() {
            self.state = AnalysisRunState {
                phase: RunPhase::Complete,
                current_stage_index: self.stages.len(),
                elapsed_ms: self.total_ms,
                progress_percent: 100.0,
            };
            log(
                Level::Info,
                Domain::Stage,
                "restored_complete",
                obj(&[("key", v_str(&self.key))]),
            );
            return Vec::new();
        }
        self.start()
    }

    /// Complete the current stage now.
    pub fn advance(&mut self) -> Vec<StageEvent> {
        match self.remaining_in_stage_ms() {
            Some(rem) => self.advance_by(rem),
            None => Vec::new(),
        }
    }

    /// Feed elapsed time; may cross several stage boundaries.
    pub fn advance_by(&mut self, ms: u64) -> Vec<StageEvent> {
        let mut events = Vec::new();
        if !self.state.is_running() {
            return events;
        }
        self.pending_ms = self.pending_ms.saturating_add(ms);
        while let Some(stage) = self.current_stage() {
            if self.pending_ms < stage.duration_ms {
                break;
            }
            let duration = stage.duration_ms;
            let name = stage.name.clone();
            self.pending_ms -= duration;
            events.extend(self.complete_stage(duration, name));
        }
        if !self.state.is_running() {
            self.pending_ms = 0;
        }
        events
    }

    /// Clear the marker and restart at stage 0.
    pub fn reset(&mut self) -> Vec<StageEvent> {
        if let Err(err) = self.store.remove(&self.key) {
            log_store_failure("remove", &self.key, &err);
        }
        log(Level::Info, Domain::Stage, "reset", obj(&[("key", v_str(&self.key))]));
        self.start()
    }

    fn start(&mut self) -> Vec<StageEvent> {
        self.pending_ms = 0;
        self.state = AnalysisRunState {
            phase: RunPhase::Running,
            current_stage_index: 0,
            elapsed_ms: 0,
            progress_percent: 0.0,
        };
        log(
            Level::Info,
            Domain::Stage,
            "run_started",
            obj(&[
                ("key", v_str(&self.key)),
                ("stages", serde_json::json!(self.stages.len())),
                ("total_ms", serde_json::json!(self.total_ms)),
            ]),
        );
        if self.stages.is_empty() {
            return vec![self.finish()];
        }
        Vec::new()
    }

    fn complete_stage(&mut self, duration: u64, name: String) -> Vec<StageEvent> {
        let index = self.state.current_stage_index;
        self.state.current_stage_index += 1;
        self.state.elapsed_ms = self.state.elapsed_ms.saturating_add(duration);
        let progress = if self.state.current_stage_index >= self.stages.len() {
            100.0
        } else if self.total_ms == 0 {
            0.0
        } else {
            self.state.elapsed_ms as f64 / self.total_ms as f64 * 100.0
        };
        // Guards float drift; progress never moves backwards.
        self.state.progress_percent = progress.max(self.state.progress_percent);
        log_stage_transition(&self.key, index, &name, self.state.progress_percent);
        let mut events = vec![StageEvent::StageCompleted {
            index,
            name,
            progress: self.state.progress_percent,
        }];
        if self.state.current_stage_index >= self.stages.len() {
            events.push(self.finish());
        }
        events
    }

    fn finish(&mut self) -> StageEvent {
        self.state.phase = RunPhase::Complete;
        self.state.current_stage_index = self.stages.len();
        self.state.progress_percent = 100.0;
        if let Err(err) = self.store.set(&self.key, COMPLETE_MARKER) {
            log_store_failure("set", &self.key, &err);
        }
        log(
            Level::Info,
            Domain::Stage,
            "run_complete",
            obj(&[
                ("key", v_str(&self.key)),
                ("elapsed_ms", v_num(self.state.elapsed_ms as f64)),
            ]),
        );
        StageEvent::RunCompleted
    }

    fn marker_present(&self) -> bool {
        match self.store.get(&self.key) {
            Ok(v) => v.is_some(),
            Err(err) => {
                log_store_failure("get", &self.key, &err);
                false
            }
        }
    }
}

//! Drives a `StageSimulator` with a chain of tokio sleeps.
//!
//! One sleep is pending at a time. Cancelling bumps a generation counter under
//! the simulator lock, so a sleep that wakes after cancellation never touches
//! state. However a chain ends, its exit guard marks it dead and wakes
//! subscribers.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::simulator::{AnalysisRunState, StageSimulator};

struct Shared {
    sim: StageSimulator,
    generation: u64,
    chain_live: bool,
}

pub struct StageRunner {
    shared: Arc<Mutex<Shared>>,
    tx: Arc<watch::Sender<AnalysisRunState>>,
    rx: watch::Receiver<AnalysisRunState>,
    task: Option<JoinHandle<()>>,
    time_scale: f64,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    // A panic inside the simulator leaves plain data behind; keep going.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn scaled(ms: u64, time_scale: f64) -> Duration {
    let scale = if time_scale.is_finite() && time_scale >= 0.0 { time_scale } else { 1.0 };
    Duration::try_from_secs_f64(ms as f64 * scale / 1000.0).unwrap_or(Duration::MAX)
}

/// Clears `chain_live` when the chain future is dropped: normal return,
/// abort, or panic.
struct ChainExit {
    shared: Arc<Mutex<Shared>>,
    tx: Arc<watch::Sender<AnalysisRunState>>,
    generation: u64,
}

impl Drop for ChainExit {
    fn drop(&mut self) {
        let mut guard = lock(&self.shared);
        if guard.generation != self.generation {
            return;
        }
        guard.chain_live = false;
        // Bump the version even if the state is unchanged so waiters re-check.
        self.tx.send_replace(guard.sim.state().clone());
    }
}

impl StageRunner {
    /// Activate the simulator and start the timer chain. Must be called
    /// inside a tokio runtime.
    pub fn spawn(sim: StageSimulator, time_scale: f64) -> Self {
        let initial = sim.state().clone();
        let (tx, rx) = watch::channel(initial);
        let shared = Arc::new(Mutex::new(Shared {
            sim,
            generation: 0,
            chain_live: false,
        }));
        let mut runner = Self {
            shared,
            tx: Arc::new(tx),
            rx,
            task: None,
            time_scale,
        };
        {
            let mut guard = lock(&runner.shared);
            guard.sim.activate();
            runner.tx.send_replace(guard.sim.state().clone());
        }
        runner.start_chain();
        runner
    }

    pub fn subscribe(&self) -> watch::Receiver<AnalysisRunState> {
        self.rx.clone()
    }

    pub fn state(&self) -> AnalysisRunState {
        self.rx.borrow().clone()
    }

    /// True while a timer chain is pending or running.
    pub fn is_active(&self) -> bool {
        lock(&self.shared).chain_live
    }

    /// Cancel the pending chain, clear the marker and run again from stage 0.
    pub fn reset(&mut self) {
        self.cancel();
        {
            let mut guard = lock(&self.shared);
            guard.sim.reset();
            self.tx.send_replace(guard.sim.state().clone());
        }
        self.start_chain();
    }

    pub fn shutdown(&mut self) {
        self.cancel();
    }

    /// Resolves once the run reaches Complete. Returns `None` if the chain
    /// stopped first.
    pub async fn wait_complete(&self) -> Option<AnalysisRunState> {
        let mut rx = self.rx.clone();
        loop {
            let current = rx.borrow_and_update().clone();
            if current.is_complete() {
                return Some(current);
            }
            // `chain_live` is cleared before the exit publish, so a chain that
            // dies after this check still wakes `changed()` below.
            if !self.is_active() {
                let last = rx.borrow().clone();
                return last.is_complete().then_some(last);
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    fn cancel(&mut self) {
        {
            let mut guard = lock(&self.shared);
            guard.generation += 1;
            guard.chain_live = false;
        }
        if let Some(task) = self.task.take() {
            task.abort();
            log(Level::Debug, Domain::Stage, "chain_cancelled", obj(&[]));
        }
    }

    fn start_chain(&mut self) {
        let generation = {
            let mut guard = lock(&self.shared);
            guard.chain_live = true;
            guard.generation
        };
        let exit = ChainExit {
            shared: Arc::clone(&self.shared),
            tx: Arc::clone(&self.tx),
            generation,
        };
        let shared = Arc::clone(&self.shared);
        let tx = Arc::clone(&self.tx);
        let time_scale = self.time_scale;
        self.task = Some(tokio::spawn(async move {
            let _exit = exit;
            run_chain(shared, tx, generation, time_scale).await;
        }));
    }
}

impl Drop for StageRunner {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_chain(
    shared: Arc<Mutex<Shared>>,
    tx: Arc<watch::Sender<AnalysisRunState>>,
    generation: u64,
    time_scale: f64,
) {
    loop {
        let wait = {
            let guard = lock(&shared);
            if guard.generation != generation {
                return;
            }
            match guard.sim.remaining_in_stage_ms() {
                Some(ms) => {
                    if let Some(stage) = guard.sim.current_stage() {
                        log(
                            Level::Debug,
                            Domain::Stage,
                            "stage_started",
                            obj(&[
                                ("key", v_str(guard.sim.key())),
                                ("name", v_str(&stage.name)),
                                ("wait_ms", v_num(ms as f64 * time_scale)),
                            ]),
                        );
                    }
                    scaled(ms, time_scale)
                }
                None => return,
            }
        };

        sleep(wait).await;

        {
            let mut guard = lock(&shared);
            if guard.generation != generation {
                return;
            }
            guard.sim.advance();
            tx.send_replace(guard.sim.state().clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::RunPhase;
    use crate::stages::AnalysisStage;
    use crate::store::MemoryStore;

    fn stages() -> Vec<AnalysisStage> {
        vec![AnalysisStage::new(1, "A", 100), AnalysisStage::new(2, "B", 200)]
    }

    #[test]
    fn test_scaled_duration() {
        assert_eq!(scaled(1000, 1.0), Duration::from_secs(1));
        assert_eq!(scaled(1000, 0.5), Duration::from_millis(500));
        assert_eq!(scaled(1000, f64::NAN), Duration::from_secs(1));
        assert_eq!(scaled(1000, 0.0), Duration::ZERO);
        assert_eq!(scaled(1000, 1e300), Duration::MAX);
        assert_eq!(scaled(u64::MAX, f64::MAX), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_time_scale_keeps_chain_alive() {
        let sim = StageSimulator::new(stages(), "k", MemoryStore::shared());
        let mut runner = StageRunner::spawn(sim, 1e300);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(runner.is_active());
        assert!(!runner.task.as_ref().unwrap().is_finished());
        assert_eq!(runner.state().current_stage_index, 0);
        runner.shutdown();
        assert!(!runner.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_exit_wakes_subscribers() {
        let sim = StageSimulator::new(stages(), "k", MemoryStore::shared());
        let runner = StageRunner::spawn(sim, 1.0);
        let mut rx = runner.subscribe();
        rx.borrow_and_update();
        // Abort without going through cancel(): the generation still matches,
        // so the exit guard must publish and clear the live flag.
        runner.task.as_ref().unwrap().abort();
        rx.changed().await.unwrap();
        assert!(!runner.is_active());
        assert_eq!(runner.wait_complete().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_mid_stage_cancels_pending_timer() {
        let store = MemoryStore::shared();
        let sim = StageSimulator::new(stages(), "k", store.clone());
        let mut runner = StageRunner::spawn(sim, 1.0);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(runner.state().current_stage_index, 1);

        runner.reset();
        assert_eq!(runner.state().current_stage_index, 0);
        assert_eq!(runner.state().progress_percent, 0.0);
        assert!(runner.is_active());

        // The old chain's timer for B would have fired at 300ms; only the new
        // 100ms timer for A may advance the run.
        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(runner.state().current_stage_index, 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(runner.state().current_stage_index, 1);

        let done = runner.wait_complete().await.unwrap();
        assert_eq!(done.progress_percent, 100.0);
        assert!(store.get("k").unwrap().is_some());
        assert!(!runner.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_to_completion_monotonically() {
        let store = MemoryStore::shared();
        let sim = StageSimulator::new(stages(), "ai_analysis_AAPL", store.clone());
        let runner = StageRunner::spawn(sim, 1.0);
        let mut rx = runner.subscribe();

        let mut seen = vec![rx.borrow_and_update().progress_percent];
        while rx.changed().await.is_ok() {
            let s = rx.borrow_and_update().clone();
            seen.push(s.progress_percent);
            if s.is_complete() {
                break;
            }
        }
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert_eq!(seen.last().copied(), Some(100.0));
        assert!(store.get("ai_analysis_AAPL").unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_timing() {
        let sim = StageSimulator::new(stages(), "k", MemoryStore::shared());
        let runner = StageRunner::spawn(sim, 1.0);
        tokio::time::sleep(Duration::from_millis(150)).await;
        let s = runner.state();
        assert_eq!(s.current_stage_index, 1);
        assert!((s.progress_percent - 33.333).abs() < 0.01);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(runner.state().is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_chain() {
        let sim = StageSimulator::new(stages(), "k", MemoryStore::shared());
        let runner = StageRunner::spawn(sim, 1.0);
        let rx = runner.subscribe();
        let shared = Arc::clone(&runner.shared);
        drop(runner);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let guard = lock(&shared);
        assert_eq!(guard.sim.state().phase, RunPhase::Running);
        assert_eq!(guard.sim.state().current_stage_index, 0);
        assert_eq!(rx.borrow().current_stage_index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restarts() {
        let store = MemoryStore::shared();
        let sim = StageSimulator::new(stages(), "k", store.clone());
        let mut runner = StageRunner::spawn(sim, 1.0);
        assert!(runner.wait_complete().await.is_some());

        runner.reset();
        assert_eq!(runner.state().current_stage_index, 0);
        assert_eq!(runner.state().progress_percent, 0.0);
        assert!(store.get("k").unwrap().is_none());

        let done = runner.wait_complete().await.unwrap();
        assert_eq!(done.progress_percent, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_complete_needs_no_timers() {
        let store = MemoryStore::shared();
        store.set("k", "complete").unwrap();
        let sim = StageSimulator::new(stages(), "k", store);
        let runner = StageRunner::spawn(sim, 1.0);
        let s = runner.state();
        assert!(s.is_complete());
        assert_eq!(runner.wait_complete().await, Some(s));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_waiters() {
        let sim = StageSimulator::new(stages(), "k", MemoryStore::shared());
        let mut runner = StageRunner::spawn(sim, 1.0);
        runner.shutdown();
        assert_eq!(runner.wait_complete().await, None);
    }
}

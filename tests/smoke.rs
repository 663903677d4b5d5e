//! Smoke tests: end-to-end checks over the public API.

use std::sync::Arc;

use tradedeck::runner::StageRunner;
use tradedeck::seeded::{mock_series, SeriesParams};
use tradedeck::simulator::{StageEvent, StageSimulator, COMPLETE_MARKER};
use tradedeck::stages::{AnalysisStage, Page};
use tradedeck::store::{MemoryStore, SharedStore, SqliteStore};

const SEEDS: &[&str] = &["", "A", "AAPL", "BRK.B", "TSLA", "éclair", "0000"];

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

#[test]
fn s01_generator_deterministic_and_sized() {
    for seed in SEEDS {
        for (base, vol, len) in [(198.5, 0.08, 20), (1.0, 0.5, 64), (5000.0, 0.1, 1)] {
            let p = SeriesParams { volatility: vol, length: len };
            let a = mock_series(seed, base, p);
            let b = mock_series(seed, base, p);
            assert_eq!(a.points, b.points, "seed {seed:?}");
            assert_eq!(a.len(), len);
            assert!(a.points.iter().all(|v| *v >= 0.0));
        }
    }
}

#[test]
fn s02_aapl_scenario_byte_identical() {
    let p = SeriesParams { volatility: 0.08, length: 20 };
    let a = mock_series("AAPL", 198.5, p);
    let b = mock_series("AAPL", 198.5, p);
    let bytes = |s: &[f64]| s.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>();
    assert_eq!(bytes(&a.points), bytes(&b.points));
    assert_eq!(a.len(), 20);
}

// ---------------------------------------------------------------------------
// Simulator against every page catalog
// ---------------------------------------------------------------------------

#[test]
fn s03_every_page_runs_and_persists() {
    let store = MemoryStore::shared();
    for page in Page::ALL {
        let key = page.persistence_key("AAPL");
        let mut sim = StageSimulator::new(page.stages(), key.clone(), store.clone());
        sim.activate();
        let mut last = 0.0;
        let mut completions = 0;
        while sim.state().is_running() {
            for ev in sim.advance() {
                if let StageEvent::StageCompleted { progress, .. } = ev {
                    assert!(progress >= last);
                    last = progress;
                    completions += 1;
                }
            }
        }
        assert_eq!(completions, page.stages().len());
        assert_eq!(sim.state().progress_percent, 100.0);
        assert_eq!(store.get(&key).unwrap().as_deref(), Some(COMPLETE_MARKER));
    }
}

#[test]
fn s04_markers_are_namespaced() {
    let store = MemoryStore::shared();
    let mut ai = StageSimulator::new(Page::Ai.stages(), Page::Ai.persistence_key("AAPL"), store.clone());
    ai.activate();
    ai.advance_by(u64::MAX);
    assert!(ai.state().is_complete());

    let mut other_symbol =
        StageSimulator::new(Page::Ai.stages(), Page::Ai.persistence_key("MSFT"), store.clone());
    other_symbol.activate();
    assert!(other_symbol.state().is_running());

    let mut other_page =
        StageSimulator::new(Page::Quant.stages(), Page::Quant.persistence_key("AAPL"), store);
    other_page.activate();
    assert!(other_page.state().is_running());
}

#[test]
fn s05_sqlite_marker_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deck.sqlite");
    let path = path.to_str().unwrap().to_string();
    let stages = vec![AnalysisStage::new(1, "A", 100), AnalysisStage::new(2, "B", 200)];

    {
        let store: SharedStore = Arc::new(SqliteStore::new(&path).unwrap());
        let mut sim = StageSimulator::new(stages.clone(), "sentiment_analysis_AAPL", store);
        sim.activate();
        sim.advance_by(300);
        assert!(sim.state().is_complete());
    }

    let store: SharedStore = Arc::new(SqliteStore::new(&path).unwrap());
    let mut sim = StageSimulator::new(stages.clone(), "sentiment_analysis_AAPL", store.clone());
    assert!(sim.activate().is_empty());
    assert!(sim.state().is_complete());

    sim.reset();
    let mut fresh = StageSimulator::new(stages, "sentiment_analysis_AAPL", store);
    fresh.activate();
    assert_eq!(fresh.state().current_stage_index, 0);
    assert_eq!(fresh.state().progress_percent, 0.0);
}

// ---------------------------------------------------------------------------
// Timer chain
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn s06_runner_completes_page_then_restores() {
    let store = MemoryStore::shared();
    let key = Page::Technical.persistence_key("NVDA");

    let runner = StageRunner::spawn(
        StageSimulator::new(Page::Technical.stages(), key.clone(), store.clone()),
        0.5,
    );
    let done = runner.wait_complete().await.expect("run completes");
    assert_eq!(done.progress_percent, 100.0);
    drop(runner);

    let again = StageRunner::spawn(StageSimulator::new(Page::Technical.stages(), key, store), 0.5);
    assert!(again.state().is_complete());
}

//! Snapshot aggregator - polls every session and merges one snapshot per cycle

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use warrant_core::{AggregatorConfig, BoardSnapshot, Shutdown, Snapshot, SnapshotStore};
use warrant_reference::Enricher;

use crate::extract::{ExtractionOutcome, SessionExtraction};
use crate::pool::RenderSessionPool;
use crate::session::SessionFactory;

/// Merge per-session extractions into one snapshot.
///
/// Candidates are visited by ascending session index, then in row order,
/// and inserted keyed by symbol: the last write wins, so where adjacent
/// windows overlap the higher-indexed session's row is kept. The input
/// order of `extractions` does not matter.
pub fn merge_extractions(mut extractions: Vec<SessionExtraction>) -> (Snapshot, MergeStats) {
    extractions.sort_by_key(|e| e.session);

    let mut snapshot = Snapshot::new();
    let mut stats = MergeStats::default();

    for extraction in extractions {
        match extraction.outcome {
            ExtractionOutcome::Rows(rows) => {
                for row in rows {
                    if row.symbol.is_empty() {
                        continue;
                    }
                    stats.candidates += 1;
                    if snapshot.insert(row) {
                        stats.duplicates += 1;
                    }
                }
            }
            ExtractionOutcome::Failed(reason) => {
                stats.failed_sessions.push((extraction.session, reason));
            }
        }
    }

    (snapshot, stats)
}

/// Counters from one merge
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeStats {
    pub candidates: usize,
    pub duplicates: usize,
    pub failed_sessions: Vec<(usize, String)>,
}

/// Summary of one aggregation cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub rows: usize,
    pub candidates: usize,
    pub duplicates: usize,
    pub failed_sessions: Vec<(usize, String)>,
    pub duration: Duration,
}

/// Drives extraction cycles and publishes enriched snapshots
pub struct SnapshotAggregator<F: SessionFactory> {
    config: AggregatorConfig,
    pool: Arc<RenderSessionPool<F>>,
    enricher: Enricher,
    store: Arc<SnapshotStore>,
    current: RwLock<Arc<Snapshot>>,
    cycles: AtomicU64,
    last_report: RwLock<Option<CycleReport>>,
    /// Sessions whose last extraction failed
    failing: Mutex<BTreeSet<usize>>,
    recovery: Mutex<Option<JoinHandle<()>>>,
}

impl<F: SessionFactory + 'static> SnapshotAggregator<F> {
    pub fn new(
        config: AggregatorConfig,
        pool: Arc<RenderSessionPool<F>>,
        enricher: Enricher,
        store: Arc<SnapshotStore>,
    ) -> Self {
        Self {
            config,
            pool,
            enricher,
            store,
            current: RwLock::new(Arc::new(Snapshot::new())),
            cycles: AtomicU64::new(0),
            last_report: RwLock::new(None),
            failing: Mutex::new(BTreeSet::new()),
            recovery: Mutex::new(None),
        }
    }

    /// Run cycles until shutdown. The flag is checked before every cycle,
    /// so no new cycle starts once shutdown is requested. Recovery runs on
    /// its own task and never holds up a cycle.
    pub async fn run(&self, shutdown: Shutdown) {
        info!(
            "Starting snapshot aggregator over {} sessions every {:?}",
            self.pool.len(),
            self.config.cycle_interval()
        );

        loop {
            if shutdown.is_triggered() {
                break;
            }

            let report = self.run_cycle().await;

            if self.recovery_due(report.cycle) {
                self.spawn_recovery(&shutdown);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.cycle_interval()) => {}
                _ = shutdown.wait() => break,
            }
        }

        // Recovery observes the same shutdown signal and returns promptly
        let pending = self.recovery.lock().take();
        if let Some(handle) = pending {
            if let Err(e) = handle.await {
                warn!("Recovery task ended abnormally: {}", e);
            }
        }

        info!("Snapshot aggregator stopped after {} cycles", self.cycle_count());
    }

    fn recovery_due(&self, cycle: u64) -> bool {
        let every = self.config.recovery_every_cycles;
        every > 0 && cycle % every == 0
    }

    /// Start a recovery pass unless the previous one is still running
    fn spawn_recovery(&self, shutdown: &Shutdown) {
        let mut slot = self.recovery.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Previous recovery pass still running");
            return;
        }

        let pool = Arc::clone(&self.pool);
        let shutdown = shutdown.clone();
        *slot = Some(tokio::spawn(async move {
            let recovered = pool.recover_degraded(&shutdown).await;
            if recovered > 0 {
                info!("Recovered {} degraded sessions", recovered);
            }
        }));
    }

    /// Whether a recovery pass is currently in flight
    pub fn is_recovering(&self) -> bool {
        self.recovery
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Sessions whose most recent extraction failed, ascending
    pub fn failing_sessions(&self) -> Vec<usize> {
        self.failing.lock().iter().copied().collect()
    }

    /// Warn when a session starts failing and when it comes back; repeats
    /// of a known failure only go to debug.
    fn note_failures(&self, cycle: u64, failed: &[(usize, String)]) {
        let mut failing = self.failing.lock();

        for (session, reason) in failed {
            if failing.insert(*session) {
                warn!(session, cycle, "Extraction failed: {}", reason);
            } else {
                debug!(session, cycle, "Extraction still failing: {}", reason);
            }
        }

        failing.retain(|session| {
            let still_failing = failed.iter().any(|(s, _)| s == session);
            if !still_failing {
                info!(session, cycle, "Extraction recovered");
            }
            still_failing
        });
    }

    /// One full pass: extract from every session, merge, enrich, publish
    pub async fn run_cycle(&self) -> CycleReport {
        let start = Instant::now();
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;

        let extractions = self.pool.extract_all().await;
        let (snapshot, merge) = merge_extractions(extractions);

        self.note_failures(cycle, &merge.failed_sessions);

        let rows = self.enricher.enrich_snapshot(&snapshot);
        let row_count = snapshot.len();

        // Build privately, then swap in whole
        *self.current.write() = Arc::new(snapshot);
        self.store.publish(BoardSnapshot {
            cycle,
            captured_at: Utc::now(),
            rows,
        });

        let report = CycleReport {
            cycle,
            rows: row_count,
            candidates: merge.candidates,
            duplicates: merge.duplicates,
            failed_sessions: merge.failed_sessions,
            duration: start.elapsed(),
        };

        debug!(
            cycle,
            rows = report.rows,
            duplicates = report.duplicates,
            failed = report.failed_sessions.len(),
            "Cycle completed in {:?}",
            report.duration
        );

        *self.last_report.write() = Some(report.clone());
        report
    }

    /// Snapshot of the most recent cycle
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().clone()
    }

    pub fn store(&self) -> Arc<SnapshotStore> {
        Arc::clone(&self.store)
    }
}

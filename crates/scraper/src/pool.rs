//! Render session pool
//!
//! Owns every session, parks each one at its own virtual scroll offset and
//! exposes per-session extraction. Startup is sequential and staggered so
//! browsers do not all boot at once. A session that fails to start, or
//! loses its browser later, is kept in the pool in `Failed` state and
//! yields no rows until recovery re-positions it.

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use warrant_core::{ScrapeError, ScrapeResult, ScraperConfig, SessionState, Shutdown};

use crate::extract::{RowExtractor, SessionExtraction};

/// Consecutive extraction failures after which a session is re-positioned
pub const FAILURES_BEFORE_REPOSITION: u32 = 3;
use crate::scripts;
use crate::session::{RenderSession, SessionFactory};

/// Where the positioning script applied the scroll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Offset 0, nothing to scroll
    Top,
    Container,
    Window,
}

/// A session plus the pool's bookkeeping for it
#[derive(Debug)]
pub struct PooledSession<S> {
    pub index: usize,
    pub offset: u64,
    session: S,
    state: Mutex<SessionState>,
    needs_positioning: AtomicBool,
    recovering: AtomicBool,
    recovery_attempts: AtomicU32,
    consecutive_failures: AtomicU32,
}

impl<S: RenderSession> PooledSession<S> {
    fn new(index: usize, offset: u64, session: S) -> Self {
        Self {
            index,
            offset,
            session,
            state: Mutex::new(SessionState::Starting),
            needs_positioning: AtomicBool::new(true),
            recovering: AtomicBool::new(false),
            recovery_attempts: AtomicU32::new(0),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock();
        // Closed is terminal
        if *state != SessionState::Closed {
            *state = next;
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn needs_positioning(&self) -> bool {
        self.needs_positioning.load(Ordering::Relaxed)
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::Acquire)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

/// Pool of render sessions covering the virtualized list
pub struct RenderSessionPool<F: SessionFactory> {
    config: ScraperConfig,
    factory: F,
    extractor: RowExtractor,
    sessions: Vec<Arc<PooledSession<F::Session>>>,
    stopped: AtomicBool,
}

impl<F: SessionFactory> RenderSessionPool<F> {
    pub fn new(config: ScraperConfig, factory: F) -> Self {
        let extractor = RowExtractor::new(&config);

        Self {
            config,
            factory,
            extractor,
            sessions: vec![],
            stopped: AtomicBool::new(false),
        }
    }

    /// Launch `total_sessions` sessions one after another, waiting the
    /// stagger delay between consecutive launches. Per-session failures
    /// leave that session degraded; they never abort the pool. Returns the
    /// number of sessions launched, which is lower than requested only if
    /// shutdown was signalled during startup.
    pub async fn start(&mut self, total_sessions: usize, shutdown: &Shutdown) -> usize {
        info!("Initializing {} render sessions", total_sessions);

        for i in 0..total_sessions {
            if shutdown.is_triggered() {
                warn!("Shutdown during startup, {} of {} sessions launched", i, total_sessions);
                break;
            }

            if i > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.stagger_delay()) => {}
                    _ = shutdown.wait() => {
                        warn!("Shutdown during startup, {} of {} sessions launched", i, total_sessions);
                        break;
                    }
                }
            }

            let offset = self.config.offset_for(i);
            let pooled = Arc::new(PooledSession::new(i, offset, self.factory.create(i)));
            self.position_and_record(&pooled).await;
            self.sessions.push(pooled);
        }

        let failed = self.count_in(SessionState::Failed);
        info!(
            "Launched {} sessions ({} degraded)",
            self.sessions.len(),
            failed
        );

        self.sessions.len()
    }

    /// Navigate a session and scroll it to its offset, updating its state
    async fn position_and_record(&self, pooled: &PooledSession<F::Session>) -> bool {
        match self.position(pooled).await {
            Ok(placement) => {
                debug!(
                    session = pooled.index,
                    offset = pooled.offset,
                    "Positioned via {:?}",
                    placement
                );
                pooled.needs_positioning.store(false, Ordering::Relaxed);
                pooled.consecutive_failures.store(0, Ordering::Relaxed);
                pooled.set_state(SessionState::Positioned);
                true
            }
            Err(e) => {
                warn!(
                    session = pooled.index,
                    offset = pooled.offset,
                    "Positioning failed, keeping session degraded: {}",
                    e
                );
                pooled.needs_positioning.store(true, Ordering::Relaxed);
                pooled.set_state(SessionState::Failed);
                false
            }
        }
    }

    async fn position(&self, pooled: &PooledSession<F::Session>) -> ScrapeResult<Placement> {
        let session = pooled.session();

        session
            .navigate(&self.config.source_url, self.config.navigation_timeout())
            .await?;
        session
            .wait_for_selector(&self.config.row_selector, self.config.row_wait_timeout())
            .await?;

        if pooled.offset == 0 {
            return Ok(Placement::Top);
        }

        info!(session = pooled.index, "Positioning at {}px", pooled.offset);
        let result = session
            .execute(
                scripts::POSITION_VIEW,
                vec![
                    Value::from(self.config.row_selector.as_str()),
                    Value::from(pooled.offset),
                ],
            )
            .await?;

        let placement = match result.as_str() {
            Some("container") => Placement::Container,
            Some("window") => Placement::Window,
            Some("no-row") => {
                return Err(ScrapeError::Script("no row element to anchor the scroll".into()))
            }
            _ => return Err(ScrapeError::Script(format!("unexpected positioning result {}", result))),
        };

        // Let the virtualized rows re-render before the first extraction
        tokio::time::sleep(self.config.settle_delay()).await;
        Ok(placement)
    }

    /// Extract from one session and update its state
    pub async fn extract(&self, index: usize) -> Option<SessionExtraction> {
        let pooled = self.sessions.get(index)?;
        Some(self.extract_pooled(pooled).await)
    }

    async fn extract_pooled(&self, pooled: &PooledSession<F::Session>) -> SessionExtraction {
        // Not parked at its offset; its view would be wrong or absent
        if pooled.needs_positioning() {
            return SessionExtraction::failed(pooled.index, "awaiting re-positioning");
        }

        match self.extractor.try_extract(pooled.session()).await {
            Ok(rows) => {
                pooled.consecutive_failures.store(0, Ordering::Relaxed);
                pooled.recovery_attempts.store(0, Ordering::Relaxed);
                pooled.set_state(SessionState::Active);
                SessionExtraction::rows(pooled.index, rows)
            }
            Err(e) => {
                let failures = pooled.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                pooled.set_state(SessionState::Failed);

                if e.is_session_lost() || failures >= FAILURES_BEFORE_REPOSITION {
                    warn!(
                        session = pooled.index,
                        failures,
                        "Session degraded, scheduling re-positioning: {}",
                        e
                    );
                    pooled.needs_positioning.store(true, Ordering::Relaxed);
                }

                SessionExtraction::failed(pooled.index, e.to_string())
            }
        }
    }

    /// Extract from every live session concurrently. Results are returned
    /// in session-index order regardless of completion order. Sessions
    /// awaiting re-positioning report a failure without being queried.
    pub async fn extract_all(&self) -> Vec<SessionExtraction> {
        let live = self.sessions.iter().filter(|p| p.state().is_live());
        join_all(live.map(|pooled| self.extract_pooled(pooled))).await
    }

    /// Re-position degraded sessions concurrently, each bounded by the
    /// recovery timeout and at most `max_recovery_attempts` times in a row.
    /// A session already being recovered by another call is skipped.
    /// Returns how many recovered.
    pub async fn recover_degraded(&self, shutdown: &Shutdown) -> usize {
        if shutdown.is_triggered() || self.is_stopped() {
            return 0;
        }

        let claimed: Vec<_> = self
            .sessions
            .iter()
            .filter(|pooled| self.claim_recovery(pooled))
            .collect();

        let recoveries = claimed.into_iter().map(|pooled| async move {
            let recovered = tokio::select! {
                recovered = self.recover_one(pooled) => recovered,
                _ = shutdown.wait() => false,
            };
            pooled.recovering.store(false, Ordering::Release);
            recovered
        });

        join_all(recoveries).await.into_iter().filter(|ok| *ok).count()
    }

    fn claim_recovery(&self, pooled: &PooledSession<F::Session>) -> bool {
        if !pooled.needs_positioning() || !pooled.state().is_live() {
            return false;
        }

        let attempts = pooled.recovery_attempts.load(Ordering::Relaxed);
        if attempts >= self.config.max_recovery_attempts {
            return false;
        }
        if pooled.recovering.swap(true, Ordering::AcqRel) {
            return false;
        }
        pooled.recovery_attempts.store(attempts + 1, Ordering::Relaxed);

        info!(
            session = pooled.index,
            "Recovering degraded session (attempt {}/{})",
            attempts + 1,
            self.config.max_recovery_attempts
        );
        true
    }

    async fn recover_one(&self, pooled: &PooledSession<F::Session>) -> bool {
        let timeout = self.config.recovery_timeout();

        match tokio::time::timeout(timeout, self.position_and_record(pooled)).await {
            Ok(recovered) => recovered,
            Err(_) => {
                warn!(session = pooled.index, "Recovery timed out after {:?}", timeout);
                pooled.set_state(SessionState::Failed);
                false
            }
        }
    }

    /// Close every session. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Stopping {} render sessions", self.sessions.len());

        let closes = self.sessions.iter().map(|pooled| async move {
            if let Err(e) = pooled.session().close().await {
                warn!(session = pooled.index, "Error closing session: {}", e);
            }
            pooled.set_state(SessionState::Closed);
        });
        join_all(closes).await;

        info!("All render sessions closed");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn sessions(&self) -> &[Arc<PooledSession<F::Session>>] {
        &self.sessions
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    fn count_in(&self, state: SessionState) -> usize {
        self.sessions.iter().filter(|p| p.state() == state).count()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.sessions.len(),
            starting: self.count_in(SessionState::Starting),
            positioned: self.count_in(SessionState::Positioned),
            active: self.count_in(SessionState::Active),
            failed: self.count_in(SessionState::Failed),
            closed: self.count_in(SessionState::Closed),
        }
    }
}

/// Session counts per lifecycle state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub starting: usize,
    pub positioned: usize,
    pub active: usize,
    pub failed: usize,
    pub closed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cells, MockEvent, MockFactory};
    use std::time::Duration;

    fn config() -> ScraperConfig {
        ScraperConfig::default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_is_staggered() {
        let mut pool = RenderSessionPool::new(config(), MockFactory::new());
        let launched = pool.start(4, &Shutdown::new()).await;
        assert_eq!(launched, 4);

        let navigations = pool.factory().navigations();
        assert_eq!(navigations.len(), 4);

        for pair in navigations.windows(2) {
            let (prev, next) = (pair[0].1, pair[1].1);
            assert!(
                next.duration_since(prev) >= Duration::from_millis(1500),
                "launches must be at least the stagger delay apart"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_positioned_at_offsets() {
        let mut pool = RenderSessionPool::new(config(), MockFactory::new());
        pool.start(3, &Shutdown::new()).await;

        let offsets: Vec<_> = pool.sessions().iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![0, 800, 1600]);

        // Session 0 keeps the default view
        let scrolled: Vec<_> = pool
            .factory()
            .events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Position { session, offset } => Some((session, offset)),
                _ => None,
            })
            .collect();
        assert_eq!(scrolled, vec![(1, 800), (2, 1600)]);
        assert_eq!(pool.stats().positioned, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_startup_keeps_degraded_session() {
        let factory = MockFactory::new();
        factory.state(1).fail_navigation.store(true, Ordering::SeqCst);

        let mut pool = RenderSessionPool::new(config(), factory);
        let launched = pool.start(3, &Shutdown::new()).await;

        assert_eq!(launched, 3);
        assert_eq!(pool.sessions()[1].state(), SessionState::Failed);
        assert!(pool.sessions()[1].needs_positioning());
        assert_eq!(pool.stats().failed, 1);
        assert_eq!(pool.stats().positioned, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extract_all_isolates_failures() {
        let factory = MockFactory::new();
        factory.set_rows(0, vec![cells("A", "1.0")]);
        factory.set_rows(2, vec![cells("C", "3.0")]);
        factory.state(1).fail_extraction.store(true, Ordering::SeqCst);

        let mut pool = RenderSessionPool::new(config(), factory);
        pool.start(3, &Shutdown::new()).await;

        let extractions = pool.extract_all().await;
        let sessions: Vec<_> = extractions.iter().map(|e| e.session).collect();
        assert_eq!(sessions, vec![0, 1, 2]);
        assert!(extractions[1].is_failure());
        assert_eq!(extractions[0].row_count(), 1);
        assert_eq!(extractions[2].row_count(), 1);

        assert_eq!(pool.sessions()[0].state(), SessionState::Active);
        assert_eq!(pool.sessions()[1].state(), SessionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extract_all_orders_by_index_not_completion() {
        let factory = MockFactory::new();
        factory.set_rows(0, vec![cells("A", "1.0")]);
        factory.set_rows(1, vec![cells("B", "2.0")]);
        // Session 0 finishes last
        *factory.state(0).extraction_delay.lock() = Some(Duration::from_millis(500));

        let mut pool = RenderSessionPool::new(config(), factory);
        pool.start(2, &Shutdown::new()).await;

        let extractions = pool.extract_all().await;
        assert_eq!(extractions[0].session, 0);
        assert_eq!(extractions[1].session, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_degraded_session() {
        let factory = MockFactory::new();
        factory.state(2).fail_navigation.store(true, Ordering::SeqCst);

        let mut cfg = config();
        cfg.max_recovery_attempts = 2;
        let mut pool = RenderSessionPool::new(cfg, factory);
        let shutdown = Shutdown::new();
        pool.start(3, &shutdown).await;

        // Still failing: consumes an attempt
        assert_eq!(pool.recover_degraded(&shutdown).await, 0);

        pool.factory().state(2).fail_navigation.store(false, Ordering::SeqCst);
        assert_eq!(pool.recover_degraded(&shutdown).await, 1);
        assert_eq!(pool.sessions()[2].state(), SessionState::Positioned);
        assert!(!pool.sessions()[2].needs_positioning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_gives_up_after_limit() {
        let factory = MockFactory::new();
        factory.state(0).fail_navigation.store(true, Ordering::SeqCst);

        let mut cfg = config();
        cfg.max_recovery_attempts = 1;
        let mut pool = RenderSessionPool::new(cfg, factory);
        let shutdown = Shutdown::new();
        pool.start(1, &shutdown).await;

        pool.recover_degraded(&shutdown).await;
        let navigations = pool.factory().navigations().len();
        pool.recover_degraded(&shutdown).await;
        assert_eq!(pool.factory().navigations().len(), navigations);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_browser_is_renavigated() {
        let factory = MockFactory::new();
        factory.set_rows(0, vec![cells("A", "1.0")]);
        factory.set_rows(1, vec![cells("B", "2.0")]);

        let mut pool = RenderSessionPool::new(config(), factory);
        let shutdown = Shutdown::new();
        pool.start(2, &shutdown).await;
        assert_eq!(pool.factory().navigations().len(), 2);

        // Browser behind session 1 dies after a healthy start
        pool.factory().state(1).lose_session.store(true, Ordering::SeqCst);
        let extractions = pool.extract_all().await;
        assert!(extractions[1].is_failure());
        assert_eq!(pool.sessions()[1].state(), SessionState::Failed);
        assert!(pool.sessions()[1].needs_positioning());

        pool.factory().state(1).lose_session.store(false, Ordering::SeqCst);
        assert_eq!(pool.recover_degraded(&shutdown).await, 1);

        let navigations = pool.factory().navigations();
        assert_eq!(navigations.len(), 3);
        assert_eq!(navigations[2].0, 1);

        let extractions = pool.extract_all().await;
        assert_eq!(extractions[1].row_count(), 1);
        assert_eq!(pool.sessions()[1].state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_schedule_repositioning() {
        let factory = MockFactory::new();
        factory.state(0).fail_extraction.store(true, Ordering::SeqCst);

        let mut pool = RenderSessionPool::new(config(), factory);
        pool.start(1, &Shutdown::new()).await;

        for _ in 1..FAILURES_BEFORE_REPOSITION {
            pool.extract_all().await;
            assert!(!pool.sessions()[0].needs_positioning());
        }
        pool.extract_all().await;
        assert!(pool.sessions()[0].needs_positioning());
        assert_eq!(pool.sessions()[0].consecutive_failures(), FAILURES_BEFORE_REPOSITION);

        // Further cycles do not query the session until it is re-positioned
        let extractions = pool.extract_all().await;
        assert!(extractions[0].is_failure());
        assert_eq!(pool.sessions()[0].consecutive_failures(), FAILURES_BEFORE_REPOSITION);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_is_bounded_and_concurrent() {
        let factory = MockFactory::new();
        for index in 0..3 {
            factory.state(index).fail_navigation.store(true, Ordering::SeqCst);
            *factory.state(index).navigation_delay.lock() = Some(Duration::from_secs(3600));
        }

        let mut cfg = config();
        cfg.stagger_delay_ms = 0;
        let mut pool = RenderSessionPool::new(cfg.clone(), factory);
        let shutdown = Shutdown::new();
        pool.start(3, &shutdown).await;

        let started = tokio::time::Instant::now();
        assert_eq!(pool.recover_degraded(&shutdown).await, 0);

        // All three hang up to the navigation timeout side by side
        let elapsed = started.elapsed();
        assert!(elapsed <= cfg.recovery_timeout(), "took {:?}", elapsed);
        assert!(pool.sessions().iter().all(|p| !p.is_recovering()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_startup() {
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let mut pool = RenderSessionPool::new(config(), MockFactory::new());
        assert_eq!(pool.start(5, &shutdown).await, 0);
        pool.stop().await;
        assert!(pool.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let mut pool = RenderSessionPool::new(config(), MockFactory::new());
        pool.start(2, &Shutdown::new()).await;

        pool.stop().await;
        pool.stop().await;

        let closes = pool
            .factory()
            .events()
            .into_iter()
            .filter(|e| matches!(e, MockEvent::Close { .. }))
            .count();
        assert_eq!(closes, 2);
        assert_eq!(pool.stats().closed, 2);
        assert!(pool.extract_all().await.is_empty());
    }
}

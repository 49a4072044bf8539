// # Preload Manager
//
// Turns navigation into a bounded burst of load jobs: the pages in view
// first at `Critical`, then one page ahead of the reading direction, one
// behind, then the remaining budget ahead. Cached pages just get their
// LRU position bumped; everything else goes through the job engine so the
// worker pool and priority bands stay in charge of actual execution.
//
// Each wave carries its own cancellation token. Starting a new wave (or
// calling `cancel`) fires the prior token and cancels that wave's
// speculative jobs; main-page jobs run at `Critical` under the `PageView`
// category and are deliberately left alone so the page in view stays
// responsive. Results that arrive after a wave's token fired are ignored.
//
// The wave also respects memory pressure: once aggregate cache usage
// crosses the cleanup threshold, speculative loads stop.

use crate::cache::CacheManager;
use crate::common::{CancelToken, PageDescriptor, PageIndex, PageRange, ReadDirection};
use crate::error::{PipelineError, Result};
use crate::jobs::{JobCategory, JobEngine, JobId, JobPriority, JobStatus};
use crate::loader::PageLoader;
use crate::pipeline::commands::PageLoadCommand;
use crate::pipeline::events::{EventEmitter, PipelineEvent, PreloadPhase};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Default number of speculative pages per wave.
pub const DEFAULT_PRELOAD_SIZE: usize = 3;

/// Preloader configuration.
#[derive(Debug, Clone)]
pub struct PreloadConfig {
    /// Speculative pages per wave (ahead + behind + tail).
    pub preload_size: usize,

    /// Master switch for speculative loading.
    pub enable_ahead: bool,

    /// Priority of speculative jobs.
    pub ahead_priority: JobPriority,

    /// How many speculative loads run concurrently.
    pub concurrent_loads: usize,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            preload_size: DEFAULT_PRELOAD_SIZE,
            enable_ahead: true,
            ahead_priority: JobPriority::Low,
            concurrent_loads: 2,
        }
    }
}

/// Why a page is part of the current wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadState {
    /// In the visible range.
    View,

    /// Speculative neighbor.
    Ahead,

    /// Finished loading.
    Loaded,

    /// Load failed.
    Failed,
}

/// What the preloader needs to know about the open book.
#[derive(Clone)]
pub struct PreloadContext {
    pub book_path: String,
    pub total_pages: usize,
    pub pages: Arc<Vec<PageDescriptor>>,
}

struct WaveState {
    token: CancelToken,
    ahead_jobs: Vec<JobId>,
}

/// Direction-aware lookahead preloader.
pub struct PreloadManager {
    engine: Arc<JobEngine>,
    cache: Arc<CacheManager>,
    loader: Arc<dyn PageLoader>,
    events: Arc<EventEmitter>,
    config: RwLock<PreloadConfig>,
    context: RwLock<Option<PreloadContext>>,
    wave: Mutex<WaveState>,
    page_states: DashMap<PageIndex, PreloadState>,
    active: AtomicBool,
}

impl PreloadManager {
    pub fn new(
        engine: Arc<JobEngine>,
        cache: Arc<CacheManager>,
        loader: Arc<dyn PageLoader>,
        events: Arc<EventEmitter>,
        config: PreloadConfig,
    ) -> Self {
        Self {
            engine,
            cache,
            loader,
            events,
            config: RwLock::new(config),
            context: RwLock::new(None),
            wave: Mutex::new(WaveState { token: CancelToken::new(), ahead_jobs: Vec::new() }),
            page_states: DashMap::new(),
            active: AtomicBool::new(false),
        }
    }

    pub fn set_context(&self, context: PreloadContext) {
        *self.context.write() = Some(context);
    }

    pub fn clear_context(&self) {
        *self.context.write() = None;
        self.page_states.clear();
    }

    pub fn config(&self) -> PreloadConfig {
        self.config.read().clone()
    }

    pub fn set_preload_size(&self, preload_size: usize) {
        self.config.write().preload_size = preload_size;
    }

    pub fn set_enable_ahead(&self, enable: bool) {
        self.config.write().enable_ahead = enable;
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn page_state(&self, index: PageIndex) -> Option<PreloadState> {
        self.page_states.get(&index).map(|s| *s.value())
    }

    /// Run one wave for `range`. Cancels whatever wave was in flight.
    pub async fn request_load(&self, range: PageRange, direction: ReadDirection) -> Result<()> {
        let size = self.config.read().preload_size;
        self.request_load_sized(range, direction, size).await
    }

    /// Run one wave with an explicit speculative budget.
    pub async fn request_load_sized(
        &self,
        range: PageRange,
        direction: ReadDirection,
        preload_size: usize,
    ) -> Result<()> {
        let context = self
            .context
            .read()
            .clone()
            .ok_or(PipelineError::NoBookContext)?;
        let config = self.config.read().clone();
        let wave = self.begin_wave();
        self.active.store(true, Ordering::SeqCst);

        let total_pages = context.total_pages;
        let main: Vec<PageIndex> = range
            .ordered(direction)
            .into_iter()
            .filter(|i| *i < total_pages)
            .collect();
        let extras = if config.enable_ahead {
            plan_extras(&range, direction, total_pages, preload_size)
        } else {
            Vec::new()
        };

        let total = main.len() + extras.len();
        let loaded = AtomicUsize::new(0);
        debug!(?main, ?extras, %direction, "preload wave planned");
        self.emit_progress(0, total, PreloadPhase::Started);

        // Main pass: every page in view, in reading order, at Critical.
        let mut waits = Vec::new();
        for index in &main {
            self.page_states.insert(*index, PreloadState::View);
            match self.submit_load(
                &context,
                *index,
                JobCategory::PageView,
                JobPriority::Critical,
            ) {
                Ok(Some(job)) => waits.push((*index, job)),
                Ok(None) => {
                    self.page_states.insert(*index, PreloadState::Loaded);
                    let n = loaded.fetch_add(1, Ordering::SeqCst) + 1;
                    self.emit_progress(n, total, PreloadPhase::Loading);
                }
                Err(e) => {
                    self.active.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }

        {
            let loaded = &loaded;
            let wave = &wave;
            futures::future::join_all(waits.into_iter().map(|(index, job)| async move {
                let status = self.engine.wait_for_job(job).await;
                if wave.is_cancelled() {
                    return;
                }
                self.finish_page(index, status, loaded, total);
            }))
            .await;
        }

        if wave.is_cancelled() {
            self.active.store(false, Ordering::SeqCst);
            return Ok(());
        }

        // Speculative passes: ahead, behind, then the remaining budget.
        {
            let context = &context;
            let wave = &wave;
            let loaded = &loaded;
            let config = &config;
            stream::iter(extras)
                .for_each_concurrent(config.concurrent_loads.max(1), |index| async move {
                    if wave.is_cancelled() || self.cache.under_pressure() {
                        return;
                    }
                    if self.cache.has_blob(Some(&context.book_path), index) {
                        self.cache.touch_blob(Some(&context.book_path), index);
                        self.page_states.insert(index, PreloadState::Loaded);
                        let n = loaded.fetch_add(1, Ordering::SeqCst) + 1;
                        self.emit_progress(n, total, PreloadPhase::Loading);
                        return;
                    }

                    self.page_states.insert(index, PreloadState::Ahead);
                    match self.submit_load(
                        context,
                        index,
                        JobCategory::PageAhead,
                        config.ahead_priority,
                    ) {
                        Ok(Some(job)) => {
                            self.record_ahead_job(wave, job);
                            let status = self.engine.wait_for_job(job).await;
                            if wave.is_cancelled() {
                                return;
                            }
                            self.finish_page(index, status, loaded, total);
                        }
                        Ok(None) => {
                            self.page_states.insert(index, PreloadState::Loaded);
                            let n = loaded.fetch_add(1, Ordering::SeqCst) + 1;
                            self.emit_progress(n, total, PreloadPhase::Loading);
                        }
                        Err(_) => {}
                    }
                })
                .await;
        }

        self.active.store(false, Ordering::SeqCst);
        if !wave.is_cancelled() {
            self.emit_progress(loaded.load(Ordering::SeqCst), total, PreloadPhase::Completed);
        }
        Ok(())
    }

    /// Abort the in-flight wave and its speculative jobs. Main-page jobs
    /// are left running.
    pub fn cancel(&self) {
        {
            let mut wave = self.wave.lock();
            wave.token.cancel();
            wave.ahead_jobs.clear();
        }
        self.engine.cancel_category_jobs(JobCategory::PageAhead);
        self.active.store(false, Ordering::SeqCst);
    }

    fn begin_wave(&self) -> CancelToken {
        let mut wave = self.wave.lock();
        wave.token.cancel();
        for id in wave.ahead_jobs.drain(..) {
            self.engine.cancel_job(id);
        }
        wave.token = CancelToken::new();
        self.page_states.clear();
        wave.token.clone()
    }

    fn record_ahead_job(&self, wave: &CancelToken, id: JobId) {
        let mut state = self.wave.lock();
        if state.token.same(wave) {
            state.ahead_jobs.push(id);
        }
    }

    /// Consult the cache, then submit a load job on a miss. `Ok(None)`
    /// means the page was already cached and only had its LRU bumped.
    fn submit_load(
        &self,
        context: &PreloadContext,
        index: PageIndex,
        category: JobCategory,
        priority: JobPriority,
    ) -> Result<Option<JobId>> {
        if self.cache.has_blob(Some(&context.book_path), index) {
            self.cache.touch_blob(Some(&context.book_path), index);
            return Ok(None);
        }

        let descriptor = context
            .pages
            .get(index)
            .cloned()
            .ok_or(PipelineError::PageOutOfRange { index, total: context.total_pages })?;

        let command = Arc::new(PageLoadCommand::new(
            descriptor,
            Some(context.book_path.clone()),
            Arc::clone(&self.loader),
            Arc::clone(&self.cache),
        ));

        let id = self.engine.submit_job(
            category,
            priority,
            Some(index),
            Some(context.book_path.clone()),
            command,
        )?;
        Ok(Some(id))
    }

    fn finish_page(
        &self,
        index: PageIndex,
        status: Option<JobStatus>,
        loaded: &AtomicUsize,
        total: usize,
    ) {
        match status {
            Some(JobStatus::Completed) => {
                self.page_states.insert(index, PreloadState::Loaded);
                let n = loaded.fetch_add(1, Ordering::SeqCst) + 1;
                self.emit_progress(n, total, PreloadPhase::Loading);
            }
            Some(JobStatus::Failed) => {
                self.page_states.insert(index, PreloadState::Failed);
                self.events.emit(&PipelineEvent::Error {
                    source: "preload",
                    message: format!("preload of page {} failed", index),
                    page_index: Some(index),
                });
            }
            _ => {}
        }
    }

    fn emit_progress(&self, loaded: usize, total: usize, phase: PreloadPhase) {
        self.events
            .emit(&PipelineEvent::PreloadProgress { loaded, total, phase });
    }
}

/// Speculative indices for a wave: one ahead, one behind, then the
/// remaining budget continuing ahead, falling back to the behind side
/// when the book ends in the reading direction.
fn plan_extras(
    range: &PageRange,
    direction: ReadDirection,
    total_pages: usize,
    preload_size: usize,
) -> Vec<PageIndex> {
    let mut out = Vec::new();
    if preload_size == 0 {
        return out;
    }

    let mut fwd = range.next_outside(direction, total_pages);
    let mut bwd = range.next_outside(direction.reverse(), total_pages);
    if let Some(i) = fwd {
        out.push(i);
    }
    if preload_size > 1 {
        if let Some(i) = bwd {
            out.push(i);
        }
    }

    for _ in 0..preload_size.saturating_sub(2) {
        if let Some(next) = fwd.and_then(|i| direction.advance(i, 1, total_pages)) {
            out.push(next);
            fwd = Some(next);
        } else if let Some(next) =
            bwd.and_then(|i| direction.reverse().advance(i, 1, total_pages))
        {
            out.push(next);
            bwd = Some(next);
        } else {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_extras_forward() {
        // Viewing page 5 of 10, forward, budget 3: ahead 6, behind 4,
        // tail 7.
        let extras = plan_extras(&PageRange::single(5), ReadDirection::Forward, 10, 3);
        assert_eq!(extras, vec![6, 4, 7]);
    }

    #[test]
    fn test_plan_extras_backward() {
        let extras = plan_extras(&PageRange::single(5), ReadDirection::Backward, 10, 3);
        assert_eq!(extras, vec![4, 6, 3]);
    }

    #[test]
    fn test_plan_extras_at_start_reading_backward() {
        // Nothing exists behind page 0 in the reading direction; the whole
        // budget falls on the other side.
        let extras = plan_extras(&PageRange::single(0), ReadDirection::Backward, 10, 5);
        assert_eq!(extras, vec![1, 2, 3, 4]);
        assert!(extras.len() <= 5);
    }

    #[test]
    fn test_plan_extras_small_book() {
        let extras = plan_extras(&PageRange::single(0), ReadDirection::Forward, 2, 5);
        assert_eq!(extras, vec![1]);
    }

    #[test]
    fn test_plan_extras_zero_budget() {
        assert!(plan_extras(&PageRange::single(5), ReadDirection::Forward, 10, 0).is_empty());
    }
}

//! Fixtures shared by the reconciler behavior tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use opkit_core::{ObjectMeta, Resource, ResourceKey};
use opkit_reconciler::{
    Context, ControllerError, DispatchRecord, DispatcherConfig, EventDispatcher, EventScheduler,
    ResourceController, ResourceFacade, Result, SchedulerConfig, Trigger, UpdateControl,
};
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio::time::Instant;

pub const FINALIZER: &str = "widgets.example.com/finalizer";

#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub meta: ObjectMeta,
}

impl Resource for Widget {
    const KIND: &'static str = "Widget";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

/// A widget that has not been seen by the controller yet.
pub fn new_widget(name: &str, generation: i64) -> Widget {
    Widget {
        meta: ObjectMeta::new(name)
            .with_namespace("default")
            .with_uid(format!("{name}-uid"))
            .with_generation(generation),
    }
}

/// A widget already carrying the controller's finalizer.
pub fn widget(name: &str, generation: i64) -> Widget {
    let mut widget = new_widget(name, generation);
    widget.meta.add_finalizer(FINALIZER);
    widget
}

/// A widget whose deletion was requested.
pub fn deleting(mut widget: Widget) -> Widget {
    widget.meta.deletion_timestamp = Some(Utc::now());
    widget
}

pub fn key_of(name: &str) -> ResourceKey {
    ResourceKey::new(Some("default".to_string()), name, format!("{name}-uid"))
}

/// Ordered log shared by controller and facade.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub async fn push(&self, entry: impl Into<String>) {
        self.0.lock().await.push(entry.into());
    }

    pub async fn entries(&self) -> Vec<String> {
        self.0.lock().await.clone()
    }
}

/// One controller invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Call {
    pub generation: Option<i64>,
    pub trigger: Trigger,
    pub attempt: u32,
    pub at: Instant,
}

pub struct TestController {
    journal: Journal,
    calls: Mutex<Vec<Call>>,
    gate: Option<Semaphore>,
    work: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    fail_remaining: AtomicU32,
    panic_next: AtomicBool,
    cleanup_done: AtomicBool,
    reschedule_ms: AtomicU64,
}

impl TestController {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            calls: Mutex::new(Vec::new()),
            gate: None,
            work: Duration::ZERO,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            fail_remaining: AtomicU32::new(0),
            panic_next: AtomicBool::new(false),
            cleanup_done: AtomicBool::new(true),
            reschedule_ms: AtomicU64::new(0),
        }
    }

    /// Block every invocation until [`Self::release`] hands out a permit.
    #[must_use]
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Spend `work` inside every invocation.
    #[must_use]
    pub const fn with_work(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    pub fn fail_times(&self, times: u32) {
        self.fail_remaining.store(times, Ordering::SeqCst);
    }

    pub fn panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    pub fn set_cleanup_done(&self, done: bool) {
        self.cleanup_done.store(done, Ordering::SeqCst);
    }

    pub fn reschedule_after(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.reschedule_ms.store(millis, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn generations(&self) -> Vec<Option<i64>> {
        self.calls().await.iter().map(|c| c.generation).collect()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn enter(&self, op: &str, widget: &Widget, context: &Context) -> std::result::Result<(), ControllerError> {
        let generation = widget.meta.generation;
        self.calls.lock().await.push(Call {
            generation,
            trigger: context.trigger(),
            attempt: context.retry().attempt,
            at: Instant::now(),
        });
        self.journal
            .push(format!("{op}:{}", generation.unwrap_or_default()))
            .await;

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        assert!(
            !self.panic_next.swap(false, Ordering::SeqCst),
            "controller blew up"
        );
        let failing = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err("downstream unavailable".into());
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceController<Widget> for TestController {
    async fn create_or_update_resource(
        &self,
        resource: &Widget,
        context: &Context,
    ) -> std::result::Result<UpdateControl<Widget>, ControllerError> {
        self.enter("reconcile", resource, context).await?;
        let reschedule = self.reschedule_ms.load(Ordering::SeqCst);
        let control = UpdateControl::no_update();
        if reschedule > 0 {
            return Ok(control.reschedule_after(Duration::from_millis(reschedule)));
        }
        Ok(control)
    }

    async fn delete_resource(
        &self,
        resource: &Widget,
        context: &Context,
    ) -> std::result::Result<bool, ControllerError> {
        self.enter("cleanup", resource, context).await?;
        Ok(self.cleanup_done.load(Ordering::SeqCst))
    }
}

pub struct JournalFacade {
    journal: Journal,
}

impl JournalFacade {
    pub const fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

#[async_trait]
impl ResourceFacade<Widget> for JournalFacade {
    async fn add_finalizer(&self, _key: &ResourceKey, _finalizer: &str) -> Result<()> {
        self.journal.push("add_finalizer").await;
        Ok(())
    }

    async fn remove_finalizer(&self, _key: &ResourceKey, _finalizer: &str) -> Result<()> {
        self.journal.push("remove_finalizer").await;
        Ok(())
    }

    async fn update_status(&self, _key: &ResourceKey, _resource: &Widget) -> Result<()> {
        self.journal.push("update_status").await;
        Ok(())
    }
}

/// A scheduler wired to `controller` and a journaling facade.
pub struct Harness {
    pub scheduler: EventScheduler<Widget>,
    pub controller: Arc<TestController>,
    pub journal: Journal,
    pub records: broadcast::Receiver<DispatchRecord>,
}

impl Harness {
    pub fn new(controller: TestController, journal: Journal, config: DispatcherConfig) -> Self {
        let controller = Arc::new(controller);
        let dispatcher = EventDispatcher::new(
            controller.clone(),
            Arc::new(JournalFacade::new(journal.clone())),
            config,
        );
        let scheduler = EventScheduler::new(
            dispatcher,
            SchedulerConfig::default().with_max_concurrent_dispatches(4),
        )
        .expect("valid scheduler config");
        let records = scheduler.subscribe();
        Self {
            scheduler,
            controller,
            journal,
            records,
        }
    }

    pub fn with_defaults() -> Self {
        let journal = Journal::default();
        Self::new(
            TestController::new(journal.clone()),
            journal,
            DispatcherConfig::new(FINALIZER),
        )
    }

    /// Wait for the next dispatch record.
    ///
    /// The window is wide enough for armed timers to fire under a paused
    /// clock.
    pub async fn next_record(&mut self) -> Option<DispatchRecord> {
        tokio::time::timeout(Duration::from_secs(120), self.records.recv())
            .await
            .ok()
            .and_then(|r| r.ok())
    }

    /// Whether no dispatch completes within `window`.
    pub async fn stays_quiet(&mut self, window: Duration) -> bool {
        tokio::time::timeout(window, self.records.recv())
            .await
            .is_err()
    }
}

/// Assert that `later` happened `expected` after `earlier`, within a tick.
pub fn assert_gap(earlier: Instant, later: Instant, expected: Duration) {
    let gap = later - earlier;
    assert!(
        gap >= expected && gap < expected + Duration::from_millis(5),
        "expected a gap of {expected:?}, got {gap:?}"
    );
}

/// Poll `check` until it holds or a few seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

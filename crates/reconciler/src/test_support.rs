//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opkit_core::{ObjectMeta, Resource, ResourceKey};
use tokio::sync::Mutex;

use crate::controller::{Context, ResourceController, UpdateControl};
use crate::error::{ControllerError, Error, Result};
use crate::facade::ResourceFacade;

#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub meta: ObjectMeta,
    pub ready: bool,
}

impl Widget {
    pub fn new(name: &str, generation: i64) -> Self {
        Self {
            meta: ObjectMeta::new(name)
                .with_uid(format!("{name}-uid"))
                .with_generation(generation),
            ready: false,
        }
    }

    pub fn with_finalizer(mut self, finalizer: &str) -> Self {
        self.meta.add_finalizer(finalizer);
        self
    }

    pub fn deleting(mut self, at: DateTime<Utc>) -> Self {
        self.meta.deletion_timestamp = Some(at);
        self
    }
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

pub fn key_of(name: &str) -> ResourceKey {
    ResourceKey::new(None, name, format!("{name}-uid"))
}

/// Ordered log of controller and facade calls.
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

fn generation_of(widget: &Widget) -> String {
    widget
        .meta
        .generation
        .map_or_else(|| "-".to_string(), |g| g.to_string())
}

pub struct ScriptedController {
    journal: Journal,
    fail_remaining: AtomicU32,
    panic_next: AtomicBool,
    cleanup_done: AtomicBool,
    update_status: AtomicBool,
    reschedule_ms: AtomicU64,
    delay_ms: AtomicU64,
    last_seen: Mutex<Option<Widget>>,
}

impl ScriptedController {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            fail_remaining: AtomicU32::new(0),
            panic_next: AtomicBool::new(false),
            cleanup_done: AtomicBool::new(true),
            update_status: AtomicBool::new(false),
            reschedule_ms: AtomicU64::new(0),
            delay_ms: AtomicU64::new(0),
            last_seen: Mutex::new(None),
        }
    }

    pub fn fail_times(&self, times: u32) -> &Self {
        self.fail_remaining.store(times, Ordering::SeqCst);
        self
    }

    pub fn panic_next(&self) -> &Self {
        self.panic_next.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_cleanup_done(&self, done: bool) -> &Self {
        self.cleanup_done.store(done, Ordering::SeqCst);
        self
    }

    pub fn set_update_status(&self, enabled: bool) -> &Self {
        self.update_status.store(enabled, Ordering::SeqCst);
        self
    }

    pub fn set_reschedule(&self, after: Option<Duration>) -> &Self {
        self.reschedule_ms
            .store(after.map_or(0, millis), Ordering::SeqCst);
        self
    }

    pub fn set_delay(&self, delay: Option<Duration>) -> &Self {
        self.delay_ms.store(delay.map_or(0, millis), Ordering::SeqCst);
        self
    }

    pub async fn last_seen(&self) -> Option<Widget> {
        self.last_seen.lock().await.clone()
    }

    #[allow(clippy::panic)]
    async fn behave(&self, widget: &Widget) -> std::result::Result<(), ControllerError> {
        *self.last_seen.lock().await = Some(widget.clone());
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("scripted panic");
        }
        let failing = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err("scripted failure".into());
        }
        Ok(())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl ResourceController<Widget> for ScriptedController {
    async fn create_or_update_resource(
        &self,
        resource: &Widget,
        _context: &Context,
    ) -> std::result::Result<UpdateControl<Widget>, ControllerError> {
        self.behave(resource).await?;
        self.journal
            .push(format!("create_or_update:{}", generation_of(resource)))
            .await;

        let mut control = if self.update_status.load(Ordering::SeqCst) {
            let mut updated = resource.clone();
            updated.ready = true;
            UpdateControl::update_status(updated)
        } else {
            UpdateControl::no_update()
        };
        let reschedule = self.reschedule_ms.load(Ordering::SeqCst);
        if reschedule > 0 {
            control = control.reschedule_after(Duration::from_millis(reschedule));
        }
        Ok(control)
    }

    async fn delete_resource(
        &self,
        resource: &Widget,
        _context: &Context,
    ) -> std::result::Result<bool, ControllerError> {
        self.behave(resource).await?;
        self.journal
            .push(format!("delete:{}", generation_of(resource)))
            .await;
        Ok(self.cleanup_done.load(Ordering::SeqCst))
    }
}

pub struct RecordingFacade {
    journal: Journal,
    fail_next: AtomicBool,
}

impl RecordingFacade {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    async fn record(&self, operation: &str) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::facade_failed(operation, "store unavailable"));
        }
        self.journal.push(operation).await;
        Ok(())
    }
}

#[async_trait]
impl ResourceFacade<Widget> for RecordingFacade {
    async fn add_finalizer(&self, _key: &ResourceKey, _finalizer: &str) -> Result<()> {
        self.record("add_finalizer").await
    }

    async fn remove_finalizer(&self, _key: &ResourceKey, _finalizer: &str) -> Result<()> {
        self.record("remove_finalizer").await
    }

    async fn update_status(&self, _key: &ResourceKey, _resource: &Widget) -> Result<()> {
        self.record("update_status").await
    }
}

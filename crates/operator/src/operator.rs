//! Controller registry.
//!
//! The [`Operator`] wires a controller to its cluster: it checks the
//! resource definition exists, builds the dispatcher and scheduler, and
//! opens one watch per namespace that feeds the scheduler.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use opkit_core::Resource;
use opkit_reconciler::{
    EventDispatcher, EventScheduler, ResourceController, ResourceFacade, WatchEvent,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ControllerConfiguration;
use crate::error::{Error, Result};
use crate::settings::OperatorConfig;
use crate::watch::{DefinitionLookup, WatchEventSource, WatchScope};

/// Cluster access for one resource type.
pub struct ResourceClient<R: Resource> {
    source: Arc<dyn WatchEventSource<R>>,
    facade: Arc<dyn ResourceFacade<R>>,
}

impl<R: Resource> Clone for ResourceClient<R> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            facade: Arc::clone(&self.facade),
        }
    }
}

impl<R: Resource> ResourceClient<R> {
    /// Create a client from separate watch and write sides.
    pub fn new(source: Arc<dyn WatchEventSource<R>>, facade: Arc<dyn ResourceFacade<R>>) -> Self {
        Self { source, facade }
    }

    /// Create a client from one store implementing both sides.
    pub fn from_shared<K>(store: Arc<K>) -> Self
    where
        K: WatchEventSource<R> + ResourceFacade<R> + 'static,
    {
        Self::new(store.clone(), store)
    }
}

/// Summary of a registered controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredController {
    /// Controller name.
    pub name: String,
    /// Resource definition name.
    pub crd_name: String,
    /// Kind handled.
    pub kind: &'static str,
    /// Finalizer managed by the controller.
    pub finalizer: String,
    /// Watched scopes.
    pub scopes: Vec<WatchScope>,
}

/// Type-erased control over a running scheduler.
trait SchedulerHandle: Send + Sync {
    fn shutdown(&self);
    fn tracked_resources(&self) -> usize;
}

impl<R: Resource> SchedulerHandle for EventScheduler<R> {
    fn shutdown(&self) {
        Self::shutdown(self);
    }

    fn tracked_resources(&self) -> usize {
        Self::tracked_resources(self)
    }
}

struct Registration {
    summary: RegisteredController,
    scheduler: Box<dyn SchedulerHandle>,
    watches: Vec<JoinHandle<()>>,
}

/// Registry of running controllers.
pub struct Operator {
    definitions: Arc<dyn DefinitionLookup>,
    config: OperatorConfig,
    registrations: Vec<Registration>,
    stop_tx: watch::Sender<bool>,
}

impl Operator {
    /// Create an operator resolving definitions through `definitions`.
    ///
    /// Controllers registered later pick up their overrides from `config`.
    pub fn new(definitions: Arc<dyn DefinitionLookup>, config: OperatorConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            definitions,
            config,
            registrations: Vec::new(),
            stop_tx,
        }
    }

    /// Register a controller for the namespaces in `configuration`.
    ///
    /// File overrides for the controller's name are applied first. The
    /// returned scheduler can be used to observe dispatch outcomes.
    ///
    /// # Errors
    ///
    /// Fails if the operator was shut down, the configuration is invalid,
    /// a controller with the same name exists, the resource definition is
    /// missing or a watch cannot be opened.
    pub async fn register<R, C>(
        &mut self,
        controller: C,
        configuration: ControllerConfiguration,
        client: ResourceClient<R>,
    ) -> Result<EventScheduler<R>>
    where
        R: Resource,
        C: ResourceController<R> + 'static,
    {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }

        let configuration = match self.config.controller(configuration.name()) {
            Some(props) => configuration.with_overrides(props),
            None => configuration,
        };
        configuration.validate()?;

        if self.registrations.iter().any(|r| r.summary.name == configuration.name()) {
            return Err(Error::already_registered(configuration.name()));
        }

        let definition = self
            .definitions
            .find_definition(configuration.crd_name())
            .await?
            .ok_or_else(|| Error::definition_not_found(configuration.crd_name()))?;
        if definition.kind != R::KIND {
            warn!(
                crd = %definition.name,
                definition_kind = %definition.kind,
                resource_kind = R::KIND,
                "Resource definition serves a different kind"
            );
        }

        let dispatcher = EventDispatcher::new(
            Arc::new(controller),
            Arc::clone(&client.facade),
            configuration.dispatcher_config(),
        );
        let scheduler = EventScheduler::new(dispatcher, configuration.scheduler_config())?;

        let scopes = if definition.namespaced {
            configuration.watch_scopes()
        } else {
            debug!(crd = %definition.name, "Cluster-scoped definition; watching all namespaces");
            vec![WatchScope::AllNamespaces]
        };
        let mut watches = Vec::with_capacity(scopes.len());
        for scope in &scopes {
            match client.source.watch(scope).await {
                Ok(stream) => watches.push(self.spawn_watch(scope.clone(), stream, scheduler.clone())),
                Err(e) => {
                    for task in &watches {
                        task.abort();
                    }
                    scheduler.shutdown();
                    return Err(Error::watch_failed(scope, e.to_string()));
                }
            }
        }

        let summary = RegisteredController {
            name: configuration.name().to_string(),
            crd_name: configuration.crd_name().to_string(),
            kind: R::KIND,
            finalizer: configuration.finalizer(),
            scopes,
        };
        info!(
            controller = %summary.name,
            crd = %summary.crd_name,
            namespaces = ?summary.scopes,
            "Registered controller"
        );

        self.registrations.push(Registration {
            summary,
            scheduler: Box::new(scheduler.clone()),
            watches,
        });
        Ok(scheduler)
    }

    /// Register a controller for every namespace.
    ///
    /// File overrides naming explicit namespaces still take precedence.
    ///
    /// # Errors
    ///
    /// Same as [`Self::register`].
    pub async fn register_for_all_namespaces<R, C>(
        &mut self,
        controller: C,
        configuration: ControllerConfiguration,
        client: ResourceClient<R>,
    ) -> Result<EventScheduler<R>>
    where
        R: Resource,
        C: ResourceController<R> + 'static,
    {
        self.register(controller, configuration.watching_all_namespaces(), client)
            .await
    }

    /// Registered controllers in registration order.
    pub fn controllers(&self) -> Vec<RegisteredController> {
        self.registrations.iter().map(|r| r.summary.clone()).collect()
    }

    /// Keys with live bookkeeping across every controller.
    pub fn tracked_resources(&self) -> usize {
        self.registrations
            .iter()
            .map(|r| r.scheduler.tracked_resources())
            .sum()
    }

    /// Whether [`Self::shutdown`] was called.
    pub fn is_shut_down(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Stop all watches and schedulers.
    ///
    /// Waits for the watch tasks to exit; dispatches already running are
    /// left to finish on their own.
    pub async fn shutdown(&mut self) {
        if self.stop_tx.send_replace(true) {
            return;
        }
        for registration in &mut self.registrations {
            registration.scheduler.shutdown();
            for task in registration.watches.drain(..) {
                if let Err(e) = task.await {
                    warn!(controller = %registration.summary.name, error = %e, "Watch task failed");
                }
            }
        }
        info!(controllers = self.registrations.len(), "Operator stopped");
    }

    fn spawn_watch<R: Resource>(
        &self,
        scope: WatchScope,
        mut stream: BoxStream<'static, WatchEvent<R>>,
        scheduler: EventScheduler<R>,
    ) -> JoinHandle<()> {
        let mut stop_rx = self.stop_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    event = stream.next() => match event {
                        Some(event) => {
                            scheduler.on_event(event);
                        }
                        None => {
                            debug!(%scope, kind = R::KIND, "Watch stream ended");
                            break;
                        }
                    },
                }
            }
        })
    }
}

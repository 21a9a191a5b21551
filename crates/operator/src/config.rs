//! Per-controller registration settings.

use std::collections::BTreeSet;
use std::time::Duration;

use opkit_reconciler::{DispatcherConfig, RetryConfig, SchedulerConfig};

use crate::error::{Error, Result};
use crate::settings::ControllerProperties;
use crate::watch::WatchScope;

/// Appended to the definition name to form the default finalizer.
pub const FINALIZER_NAME_SUFFIX: &str = "/finalizer";

/// Default finalizer for a resource definition.
pub fn default_finalizer_name(crd_name: &str) -> String {
    format!("{crd_name}{FINALIZER_NAME_SUFFIX}")
}

/// Default name for a controller type: its type name, lowercased.
pub fn default_controller_name<C: ?Sized>() -> String {
    let full = std::any::type_name::<C>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::")
        .next()
        .unwrap_or(base)
        .to_ascii_lowercase()
}

/// Namespaces a controller watches.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Namespaces {
    /// Every namespace.
    All,
    /// The namespace the cluster client is bound to.
    #[default]
    ClientNamespace,
    /// An explicit list.
    Listed(Vec<String>),
}

/// Everything needed to register one controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfiguration {
    name: String,
    crd_name: String,
    finalizer: Option<String>,
    generation_aware: bool,
    retry: RetryConfig,
    namespaces: Namespaces,
    scheduler: SchedulerConfig,
    reconcile_timeout: Option<Duration>,
    delete_recheck_interval: Option<Duration>,
}

impl ControllerConfiguration {
    /// Create a configuration for controller `name` handling `crd_name`.
    pub fn new(name: impl Into<String>, crd_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            crd_name: crd_name.into(),
            finalizer: None,
            generation_aware: true,
            retry: RetryConfig::default(),
            namespaces: Namespaces::default(),
            scheduler: SchedulerConfig::default(),
            reconcile_timeout: None,
            delete_recheck_interval: None,
        }
    }

    /// Create a configuration named after the controller type `C`.
    pub fn for_controller<C: ?Sized>(crd_name: impl Into<String>) -> Self {
        Self::new(default_controller_name::<C>(), crd_name)
    }

    /// Use a custom finalizer.
    #[must_use]
    pub fn with_finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.finalizer = Some(finalizer.into());
        self
    }

    /// Enable or disable generation-aware skipping.
    #[must_use]
    pub const fn with_generation_aware(mut self, enabled: bool) -> Self {
        self.generation_aware = enabled;
        self
    }

    /// Set the retry schedule.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Watch the listed namespaces. An empty list means the client namespace.
    #[must_use]
    pub fn with_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let listed: Vec<String> = namespaces.into_iter().map(Into::into).collect();
        self.namespaces = if listed.is_empty() {
            Namespaces::ClientNamespace
        } else {
            Namespaces::Listed(listed)
        };
        self
    }

    /// Watch every namespace.
    #[must_use]
    pub fn watching_all_namespaces(mut self) -> Self {
        self.namespaces = Namespaces::All;
        self
    }

    /// Set the execution-slot pool size.
    #[must_use]
    pub const fn with_max_concurrent_dispatches(mut self, slots: usize) -> Self {
        self.scheduler = self.scheduler.with_max_concurrent_dispatches(slots);
        self
    }

    /// Bound each controller invocation.
    #[must_use]
    pub const fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = Some(timeout);
        self
    }

    /// Re-check incomplete deletions after `interval`.
    #[must_use]
    pub const fn with_delete_recheck_interval(mut self, interval: Duration) -> Self {
        self.delete_recheck_interval = Some(interval);
        self
    }

    /// Controller name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resource definition name.
    pub fn crd_name(&self) -> &str {
        &self.crd_name
    }

    /// Effective finalizer: the custom one or `<crd_name>/finalizer`.
    pub fn finalizer(&self) -> String {
        self.finalizer
            .clone()
            .unwrap_or_else(|| default_finalizer_name(&self.crd_name))
    }

    /// Whether generation-aware skipping is enabled.
    pub const fn generation_aware(&self) -> bool {
        self.generation_aware
    }

    /// Retry schedule.
    pub const fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Watched namespaces.
    pub const fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    /// One watch scope per watched namespace.
    pub fn watch_scopes(&self) -> Vec<WatchScope> {
        match &self.namespaces {
            Namespaces::All => vec![WatchScope::AllNamespaces],
            Namespaces::ClientNamespace => vec![WatchScope::ClientNamespace],
            Namespaces::Listed(list) => list.iter().cloned().map(WatchScope::Namespace).collect(),
        }
    }

    /// Settings for the dispatcher.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        let mut config = DispatcherConfig::new(self.finalizer())
            .with_generation_aware(self.generation_aware)
            .with_retry(self.retry.clone());
        config.reconcile_timeout = self.reconcile_timeout;
        config.delete_recheck_interval = self.delete_recheck_interval;
        config
    }

    /// Settings for the scheduler.
    pub const fn scheduler_config(&self) -> SchedulerConfig {
        self.scheduler
    }

    /// Apply file-based overrides.
    #[must_use]
    pub fn with_overrides(mut self, props: &ControllerProperties) -> Self {
        if let Some(finalizer) = &props.finalizer {
            self.finalizer = Some(finalizer.clone());
        }
        if let Some(enabled) = props.generation_aware {
            self.generation_aware = enabled;
        }
        if let Some(namespaces) = &props.namespaces {
            self = self.with_namespaces(namespaces.iter().cloned());
        }
        if props.watch_all_namespaces == Some(true) {
            self.namespaces = Namespaces::All;
        }
        if let Some(slots) = props.max_concurrent_dispatches {
            self.scheduler = self.scheduler.with_max_concurrent_dispatches(slots);
        }
        if let Some(ms) = props.reconcile_timeout {
            self.reconcile_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = props.delete_recheck_interval {
            self.delete_recheck_interval = Some(Duration::from_millis(ms));
        }
        if let Some(retry) = &props.retry {
            self.retry = retry.apply(self.retry);
        }
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] for an empty name or
    /// definition, bad namespace lists and invalid dispatch settings.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::invalid_configuration(&self.name, reason);

        if self.name.trim().is_empty() {
            return Err(invalid("controller name must not be empty".to_string()));
        }
        if self.crd_name.trim().is_empty() {
            return Err(invalid("resource definition name must not be empty".to_string()));
        }
        if let Namespaces::Listed(list) = &self.namespaces {
            if list.iter().any(|ns| ns.trim().is_empty()) {
                return Err(invalid("namespace names must not be empty".to_string()));
            }
            let unique: BTreeSet<&str> = list.iter().map(String::as_str).collect();
            if unique.len() != list.len() {
                return Err(invalid("namespaces must not repeat".to_string()));
            }
        }
        self.dispatcher_config()
            .validate()
            .and_then(|()| self.scheduler.validate())
            .map_err(|e| invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RetryProperties;

    const CRD: &str = "webpages.sample.opkit.dev";

    struct WebPageController;

    #[test]
    fn test_default_finalizer_from_crd_name() {
        let config = ControllerConfiguration::new("pages", CRD);
        assert_eq!(config.finalizer(), "webpages.sample.opkit.dev/finalizer");
    }

    #[test]
    fn test_custom_finalizer_wins() {
        let config = ControllerConfiguration::new("pages", CRD).with_finalizer("pages.example.com/cleanup");
        assert_eq!(config.finalizer(), "pages.example.com/cleanup");
        assert_eq!(config.dispatcher_config().finalizer, "pages.example.com/cleanup");
    }

    #[test]
    fn test_default_controller_name_is_lowercased_type_name() {
        assert_eq!(default_controller_name::<WebPageController>(), "webpagecontroller");
        assert_eq!(
            ControllerConfiguration::for_controller::<WebPageController>(CRD).name(),
            "webpagecontroller"
        );
    }

    #[test]
    fn test_watch_scopes() {
        let config = ControllerConfiguration::new("pages", CRD);
        assert_eq!(config.watch_scopes(), vec![WatchScope::ClientNamespace]);

        let config = config.with_namespaces(["a", "b"]);
        assert_eq!(
            config.watch_scopes(),
            vec![
                WatchScope::Namespace("a".to_string()),
                WatchScope::Namespace("b".to_string())
            ]
        );

        let config = config.watching_all_namespaces();
        assert_eq!(config.watch_scopes(), vec![WatchScope::AllNamespaces]);
    }

    #[test]
    fn test_overrides_replace_only_set_fields() {
        let props = ControllerProperties {
            generation_aware: Some(false),
            retry: Some(RetryProperties {
                max_attempts: Some(3),
                initial_interval: Some(1000),
                ..RetryProperties::default()
            }),
            ..ControllerProperties::default()
        };
        let config = ControllerConfiguration::new("pages", CRD)
            .with_finalizer("custom/finalizer")
            .with_overrides(&props);

        assert!(!config.generation_aware());
        assert_eq!(config.finalizer(), "custom/finalizer");
        assert_eq!(config.retry().max_attempts, 3);
        assert_eq!(config.retry().initial_interval, Duration::from_millis(1000));
    }

    #[test]
    fn test_validation_failures() {
        assert!(ControllerConfiguration::new("", CRD).validate().is_err());
        assert!(ControllerConfiguration::new("pages", " ").validate().is_err());
        assert!(
            ControllerConfiguration::new("pages", CRD)
                .with_namespaces(["a", "a"])
                .validate()
                .is_err()
        );
        assert!(
            ControllerConfiguration::new("pages", CRD)
                .with_max_concurrent_dispatches(0)
                .validate()
                .is_err()
        );
        let result = ControllerConfiguration::new("pages", CRD)
            .with_retry(RetryConfig::default().with_max_attempts(0))
            .validate();
        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
        assert!(ControllerConfiguration::new("pages", CRD).validate().is_ok());
    }
}

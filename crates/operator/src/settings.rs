//! File-backed operator settings.
//!
//! Settings are keyed by controller name and override the values a
//! controller was registered with. Durations are given in milliseconds.
//!
//! ```yaml
//! controllers:
//!   webpagecontroller:
//!     namespaces: [default, staging]
//!     retry:
//!       maxAttempts: 3
//!       initialInterval: 1000
//!       intervalMultiplier: 1.5
//!       maxInterval: 50000
//!       maxElapsedTime: 100000
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use opkit_reconciler::RetryConfig;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Settings for every controller of an operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// Per-controller overrides keyed by controller name.
    pub controllers: BTreeMap<String, ControllerProperties>,
}

impl OperatorConfig {
    /// Load settings from a `.toml`, `.yaml` or `.yml` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, has an unknown
    /// extension or fails to parse.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let parse: fn(&str) -> Result<Self> = match extension.as_deref() {
            Some("toml") => Self::from_toml_str,
            Some("yaml" | "yml") => Self::from_yaml_str,
            _ => return Err(opkit_core::Error::unsupported_format(path).into()),
        };

        let content = std::fs::read_to_string(path)
            .map_err(|e| opkit_core::Error::file_read_failed(path, e.to_string()))?;
        parse(&content)
    }

    /// Parse TOML settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is not valid TOML for this schema.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| opkit_core::Error::toml_parse_failed(e.to_string()).into())
    }

    /// Parse YAML settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is not valid YAML for this schema.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| opkit_core::Error::yaml_parse_failed(e.to_string()).into())
    }

    /// Overrides for the controller called `name`.
    pub fn controller(&self, name: &str) -> Option<&ControllerProperties> {
        self.controllers.get(name)
    }
}

/// Overrides for one controller. Unset fields keep the registered value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerProperties {
    /// Finalizer name.
    pub finalizer: Option<String>,
    /// Generation-aware skipping.
    pub generation_aware: Option<bool>,
    /// Namespaces to watch.
    pub namespaces: Option<Vec<String>>,
    /// Watch every namespace.
    pub watch_all_namespaces: Option<bool>,
    /// Execution-slot pool size.
    pub max_concurrent_dispatches: Option<usize>,
    /// Upper bound for one controller invocation, in milliseconds.
    pub reconcile_timeout: Option<u64>,
    /// Re-check interval for incomplete deletions, in milliseconds.
    pub delete_recheck_interval: Option<u64>,
    /// Retry schedule.
    pub retry: Option<RetryProperties>,
}

/// Retry overrides, intervals in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryProperties {
    pub max_attempts: Option<u32>,
    pub initial_interval: Option<u64>,
    pub interval_multiplier: Option<f64>,
    pub max_interval: Option<u64>,
    pub max_elapsed_time: Option<u64>,
}

impl RetryProperties {
    /// Apply the set fields on top of `base`.
    #[must_use]
    pub fn apply(&self, base: RetryConfig) -> RetryConfig {
        let mut retry = base;
        if let Some(attempts) = self.max_attempts {
            retry = retry.with_max_attempts(attempts);
        }
        if let Some(ms) = self.initial_interval {
            retry = retry.with_initial_interval(Duration::from_millis(ms));
        }
        if let Some(multiplier) = self.interval_multiplier {
            retry = retry.with_interval_multiplier(multiplier);
        }
        if let Some(ms) = self.max_interval {
            retry = retry.with_max_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.max_elapsed_time {
            retry = retry.with_max_elapsed_time(Duration::from_millis(ms));
        }
        retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    const YAML: &str = r"
controllers:
  webpagecontroller:
    generationAware: false
    namespaces: [default, staging]
    retry:
      maxAttempts: 3
      initialInterval: 1000
      intervalMultiplier: 1.5
      maxInterval: 50000
      maxElapsedTime: 100000
";

    #[test]
    fn test_yaml_retry_properties() {
        let config = OperatorConfig::from_yaml_str(YAML).ok();
        let props = config
            .as_ref()
            .and_then(|c| c.controller("webpagecontroller"))
            .and_then(|c| c.retry.clone());

        assert_eq!(
            props,
            Some(RetryProperties {
                max_attempts: Some(3),
                initial_interval: Some(1000),
                interval_multiplier: Some(1.5),
                max_interval: Some(50_000),
                max_elapsed_time: Some(100_000),
            })
        );
    }

    #[test]
    fn test_toml_controller_properties() {
        let toml = r#"
[controllers.webpagecontroller]
finalizer = "pages.example.com/cleanup"
maxConcurrentDispatches = 2
reconcileTimeout = 30000
"#;
        let config = OperatorConfig::from_toml_str(toml).ok();
        let props = config.as_ref().and_then(|c| c.controller("webpagecontroller"));

        assert_eq!(
            props.and_then(|p| p.finalizer.as_deref()),
            Some("pages.example.com/cleanup")
        );
        assert_eq!(props.and_then(|p| p.max_concurrent_dispatches), Some(2));
        assert_eq!(props.and_then(|p| p.reconcile_timeout), Some(30_000));
    }

    #[test]
    fn test_retry_properties_keep_unset_fields() {
        let props = RetryProperties {
            max_attempts: Some(7),
            ..RetryProperties::default()
        };
        let retry = props.apply(RetryConfig::default());
        assert_eq!(retry.max_attempts, 7);
        assert_eq!(retry.initial_interval, RetryConfig::default().initial_interval);
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let result = OperatorConfig::from_path("operator.ini");
        assert!(matches!(
            result,
            Err(Error::Core(opkit_core::Error::UnsupportedFormat { .. }))
        ));
    }

    #[test]
    fn test_malformed_yaml_is_reported() {
        let result = OperatorConfig::from_yaml_str("controllers: [not, a, map]");
        assert!(matches!(
            result,
            Err(Error::Core(opkit_core::Error::YamlParseFailed { .. }))
        ));
    }
}

//! Integration tests for the sample scenario.
//!
//! These tests verify that:
//! - A page goes through create, update and delete with the expected dispatches
//! - Settings files reach the registered controller
//! - Bad settings halt the run with a clear error

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::io::Write;

use opkit::sample::run_scenario;
use opkit_operator::OperatorConfig;
use opkit_reconciler::{CompletionAction, DispatchOutcome, FinalizerState, Trigger};

/// The full lifecycle reconciles each generation once, then cleans up.
#[tokio::test]
async fn test_scenario_reconciles_each_generation_then_cleans_up()
-> Result<(), Box<dyn std::error::Error>> {
    let records = run_scenario(OperatorConfig::default(), "default").await?;

    let actions: Vec<CompletionAction> = records
        .iter()
        .filter_map(|r| r.outcome.action())
        .collect();
    let reconciled = actions
        .iter()
        .filter(|a| **a == CompletionAction::Reconciled)
        .count();
    assert_eq!(reconciled, 2, "one reconciliation per generation: {actions:?}");
    assert!(actions.contains(&CompletionAction::FinalizerRemoved));
    assert!(records.iter().all(|r| r.outcome.is_success()));
    assert!(records.iter().all(|r| r.trigger == Trigger::Notification));

    let last = records.last().ok_or("scenario produced no records")?;
    assert_eq!(last.outcome.finalizer(), FinalizerState::Removed);
    Ok(())
}

/// Every dispatch for the page is recorded under its own namespace.
#[tokio::test]
async fn test_scenario_uses_client_namespace() -> Result<(), Box<dyn std::error::Error>> {
    let records = run_scenario(OperatorConfig::default(), "staging").await?;

    assert!(!records.is_empty());
    assert!(records.iter().all(|r| r.key.namespace() == Some("staging")));
    Ok(())
}

/// Settings for the sample controller are applied at registration.
#[tokio::test]
async fn test_scenario_with_settings_file() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile()?;
    write!(
        file,
        "controllers:\n  webpagecontroller:\n    finalizer: webpages.sample.opkit.dev/cleanup\n    maxConcurrentDispatches: 2\n"
    )?;
    let config = OperatorConfig::from_path(file.path())?;

    let records = run_scenario(config, "default").await?;

    assert!(
        records
            .iter()
            .any(|r| matches!(&r.outcome, DispatchOutcome::Success(c) if c.action == CompletionAction::FinalizerRemoved))
    );
    Ok(())
}

/// Invalid settings fail registration instead of running.
#[tokio::test]
async fn test_invalid_settings_halt_the_run() -> Result<(), Box<dyn std::error::Error>> {
    let config = OperatorConfig::from_toml_str(
        "[controllers.webpagecontroller]\nmaxConcurrentDispatches = 0\n",
    )?;

    let result = run_scenario(config, "default").await;

    let err = result.err().ok_or("zero execution slots should be rejected")?;
    assert!(
        format!("{err:#}").contains("webpagecontroller"),
        "error should name the controller: {err:#}"
    );
    Ok(())
}

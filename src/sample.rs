//! Sample `WebPage` controller and the scripted demo scenario.
//!
//! The scenario runs one page through its whole lifecycle against the
//! in-memory cluster: create, change the spec, delete. Every dispatch
//! record produced along the way is returned to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use opkit_core::{ObjectMeta, Resource, ResourceKey};
use opkit_operator::{
    ControllerConfiguration, InMemoryCluster, Operator, OperatorConfig, ResourceClient,
    ResourceDefinition,
};
use opkit_reconciler::{
    Context, ControllerError, DispatchRecord, ResourceController, UpdateControl,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Definition name the sample controller is registered for.
pub const WEBPAGE_CRD: &str = "webpages.sample.opkit.dev";

const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Desired state of a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebPageSpec {
    pub html: String,
}

/// Observed state of a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebPageStatus {
    pub html_config_map: Option<String>,
    pub observed_generation: Option<i64>,
}

/// A static web page served from a config map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebPage {
    pub metadata: ObjectMeta,
    pub spec: WebPageSpec,
    pub status: Option<WebPageStatus>,
}

impl WebPage {
    pub fn new(name: &str, html: &str) -> Self {
        Self {
            metadata: ObjectMeta::new(name),
            spec: WebPageSpec {
                html: html.to_string(),
            },
            status: None,
        }
    }
}

impl Resource for WebPage {
    const KIND: &'static str = "WebPage";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Publishes page content into an in-process config map store.
#[derive(Clone, Default)]
pub struct WebPageController {
    config_maps: Arc<Mutex<HashMap<String, String>>>,
}

impl WebPageController {
    /// Content currently published for `page`.
    pub async fn published(&self, page: &str) -> Option<String> {
        self.config_maps.lock().await.get(&config_map_name(page)).cloned()
    }
}

fn config_map_name(page: &str) -> String {
    format!("{page}-html")
}

#[async_trait]
impl ResourceController<WebPage> for WebPageController {
    async fn create_or_update_resource(
        &self,
        resource: &WebPage,
        context: &Context,
    ) -> std::result::Result<UpdateControl<WebPage>, ControllerError> {
        let name = config_map_name(&resource.metadata.name);
        debug!(config_map = %name, attempt = context.retry().attempt, "Publishing page");
        self.config_maps
            .lock()
            .await
            .insert(name.clone(), resource.spec.html.clone());

        let mut updated = resource.clone();
        updated.status = Some(WebPageStatus {
            html_config_map: Some(name),
            observed_generation: resource.metadata.generation,
        });
        Ok(UpdateControl::update_status(updated))
    }

    async fn delete_resource(
        &self,
        resource: &WebPage,
        _context: &Context,
    ) -> std::result::Result<bool, ControllerError> {
        let name = config_map_name(&resource.metadata.name);
        self.config_maps.lock().await.remove(&name);
        debug!(config_map = %name, "Page unpublished");
        Ok(true)
    }
}

/// Run the create, update, delete scenario and return every dispatch record.
///
/// # Errors
///
/// Returns an error if registration fails or a step does not settle in time.
pub async fn run_scenario(config: OperatorConfig, namespace: &str) -> Result<Vec<DispatchRecord>> {
    let cluster = Arc::new(
        InMemoryCluster::new(namespace).with_definition(ResourceDefinition::new(
            WEBPAGE_CRD,
            "sample.opkit.dev",
            "v1",
            WebPage::KIND,
        )),
    );
    let controller = WebPageController::default();
    let mut operator = Operator::new(cluster.clone(), config);

    let scheduler = operator
        .register(
            controller.clone(),
            ControllerConfiguration::for_controller::<WebPageController>(WEBPAGE_CRD),
            ResourceClient::from_shared(cluster.clone()),
        )
        .await
        .context("Failed to register the web page controller")?;
    let mut records = scheduler.subscribe();

    let page = cluster
        .create(WebPage::new("hello", "<h1>Hello</h1>"))
        .await
        .context("Failed to create page")?;
    let key = page.key();
    info!(key = %key, "Page created");
    settle("page published", &cluster, &key, |page| {
        observed_generation(page) == Some(1)
    })
    .await?;

    cluster
        .update_spec(&key, |p| p.spec.html = "<h1>Hello again</h1>".to_string())
        .await
        .context("Failed to update page")?;
    info!(key = %key, "Page spec changed");
    settle("page republished", &cluster, &key, |page| {
        observed_generation(page) == Some(2)
    })
    .await?;

    cluster
        .request_deletion(&key)
        .await
        .context("Failed to delete page")?;
    info!(key = %key, "Page deletion requested");

    // State is purged before its record is published.
    let deadline = deadline_after(SETTLE_TIMEOUT)?;
    let mut collected = Vec::new();
    loop {
        let record = tokio::time::timeout_at(deadline, records.recv())
            .await
            .context("page was not purged in time")?
            .context("dispatch records unavailable")?;
        collected.push(record);
        if cluster.is_empty().await && scheduler.tracked_resources() == 0 {
            break;
        }
    }

    operator.shutdown().await;
    Ok(collected)
}

fn observed_generation(page: Option<&WebPage>) -> Option<i64> {
    page.and_then(|p| p.status.as_ref())
        .and_then(|s| s.observed_generation)
}

fn deadline_after(timeout: Duration) -> Result<tokio::time::Instant> {
    tokio::time::Instant::now()
        .checked_add(timeout)
        .with_context(|| format!("settle timeout {timeout:?} is out of range"))
}

/// Poll the page until `done` holds.
async fn settle<P>(
    step: &str,
    cluster: &InMemoryCluster<WebPage>,
    key: &ResourceKey,
    done: P,
) -> Result<()>
where
    P: Fn(Option<&WebPage>) -> bool,
{
    let deadline = deadline_after(SETTLE_TIMEOUT)?;
    while tokio::time::Instant::now() < deadline {
        let page = cluster.get(key).await;
        if done(page.as_ref()) {
            debug!(step, "Scenario step settled");
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    bail!("scenario step '{step}' did not settle within {SETTLE_TIMEOUT:?}")
}

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, WatchParams};
use kube::Api;
use tracing::info;

use crate::error::SyncError;
use crate::k8s::client::{exactly_one, K8sClient};
use crate::watch::predicates::{pod_phase, TERMINAL_POD_PHASES};
use crate::watch::{ConditionWatcher, WatchSubscription};

impl K8sClient {
    /// Wait until a pod matching the label `selector` reports `desired_phase`.
    ///
    /// Watch terminations surface as [`crate::error::WatchError`] inside the
    /// returned error and can be recovered with `downcast_ref`.
    pub async fn wait_and_get_pod(&self, selector: &str, desired_phase: &str) -> Result<Pod> {
        if TERMINAL_POD_PHASES.contains(&desired_phase) {
            return Err(SyncError::Configuration(format!(
                "cannot wait for pod phase {}: it is a failure phase",
                desired_phase
            ))
            .into());
        }

        let api: Api<Pod> = self.namespaced();
        let stream = api
            .watch(&WatchParams::default().labels(selector), "0")
            .await
            .with_context(|| format!("unable to watch pods for selector: {}", selector))?;

        info!(%selector, %desired_phase, namespace = %self.current_namespace(), "waiting for pod");
        let pod = ConditionWatcher::new(self.config().pod_watch())
            .wait_for(
                WatchSubscription::from_watch(selector, stream),
                pod_phase(desired_phase),
            )
            .await?;
        Ok(pod)
    }

    /// The only pod matching `selector`.
    pub async fn get_one_pod_from_selector(&self, selector: &str) -> Result<Pod> {
        let api: Api<Pod> = self.namespaced();
        let pods = api
            .list(&ListParams::default().labels(selector))
            .await
            .with_context(|| format!("unable to get Pod for the selector: {}", selector))?;

        exactly_one(pods.items, "Pod", selector)
    }
}

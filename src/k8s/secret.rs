use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{ListParams, WatchParams};
use kube::Api;
use tracing::info;

use crate::k8s::client::K8sClient;
use crate::k8s::namespace::name_selector;
use crate::watch::predicates::exists;
use crate::watch::{ConditionWatcher, WatchSubscription};

impl K8sClient {
    pub async fn get_secret(&self, name: &str, namespace: &str) -> Result<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client(), namespace);
        api.get(name)
            .await
            .with_context(|| format!("unable to get the secret {}", name))
    }

    /// Secrets in the current namespace. An empty selector lists them all.
    pub async fn list_secrets(&self, selector: &str) -> Result<Vec<Secret>> {
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(selector);
        }
        let secrets = self
            .namespaced::<Secret>()
            .list(&params)
            .await
            .context("unable to get secret list")?;
        Ok(secrets.items)
    }

    /// Block until the secret `name` shows up in `namespace`.
    pub async fn wait_and_get_secret(&self, name: &str, namespace: &str) -> Result<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client(), namespace);
        let selector = name_selector(name);
        let stream = api
            .watch(&WatchParams::default().fields(&selector), "0")
            .await
            .with_context(|| format!("unable to watch secret {}", name))?;

        info!(secret = %name, %namespace, "waiting for secret");
        let secret = ConditionWatcher::new(self.config().secret_watch())
            .wait_for(WatchSubscription::from_watch(selector, stream), exists())
            .await?;
        Ok(secret)
    }
}

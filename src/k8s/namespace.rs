use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, PostParams, WatchParams};
use kube::Api;
use tracing::info;

use crate::k8s::client::K8sClient;
use crate::watch::predicates::{exists, namespace_deleted, namespace_phase};
use crate::watch::{ConditionWatcher, WatchSubscription};

/// Field selector matching exactly one object by name.
pub fn name_selector(name: &str) -> String {
    format!("metadata.name={}", name)
}

impl K8sClient {
    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client())
    }

    /// Names of every namespace visible to the caller, sorted.
    pub async fn namespace_names(&self) -> Result<Vec<String>> {
        let namespaces = self
            .namespaces()
            .list(&Default::default())
            .await
            .context("unable to list namespaces")?;

        let mut names: Vec<String> = namespaces
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect();
        names.sort();
        Ok(names)
    }

    /// The namespace called `name`, or `None` when it does not exist or is
    /// not visible to the caller.
    pub async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        match self.namespaces().get_opt(name).await {
            Ok(namespace) => Ok(namespace),
            Err(kube::Error::Api(status)) if status.code == 403 => Ok(None),
            Err(err) => Err(err).with_context(|| format!("unable to get namespace {}", name)),
        }
    }

    /// Create a namespace, optionally waiting until the API reports it.
    ///
    /// The watch is opened before the create call so the creation event
    /// cannot be missed.
    pub async fn create_namespace(&self, name: &str, wait: bool) -> Result<Namespace> {
        let api = self.namespaces();
        let selector = name_selector(name);

        let subscription = if wait {
            let stream = api
                .watch(&WatchParams::default().fields(&selector), "0")
                .await
                .with_context(|| format!("unable to watch new namespace {} creation", name))?;
            Some(WatchSubscription::from_watch(selector.clone(), stream))
        } else {
            None
        };

        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let created = api
            .create(&PostParams::default(), &namespace)
            .await
            .with_context(|| format!("unable to create new namespace {}", name))?;
        info!(namespace = %name, "namespace created");

        let Some(subscription) = subscription else {
            return Ok(created);
        };
        let ready = ConditionWatcher::new(self.config().namespace_watch())
            .wait_for(subscription, exists())
            .await?;
        info!(namespace = %name, phase = namespace_phase(&ready), "namespace ready");
        Ok(ready)
    }

    /// Delete a namespace and wait until it is gone.
    pub async fn delete_namespace(&self, name: &str) -> Result<()> {
        let api = self.namespaces();
        let selector = name_selector(name);

        let stream = api
            .watch(&WatchParams::default().fields(&selector), "0")
            .await
            .with_context(|| format!("unable to watch namespace {}", name))?;
        let subscription = WatchSubscription::from_watch(selector, stream);

        api.delete(name, &DeleteParams::default())
            .await
            .with_context(|| format!("unable to delete namespace {}", name))?;
        info!(namespace = %name, "namespace deletion requested");

        ConditionWatcher::new(self.config().namespace_watch())
            .wait_for(subscription, namespace_deleted())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_selector() {
        assert_eq!(name_selector("scratch"), "metadata.name=scratch");
    }
}

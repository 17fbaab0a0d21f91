use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{DeleteParams, ListParams};
use tracing::info;

use crate::k8s::client::{exactly_one, K8sClient};

impl K8sClient {
    pub async fn services_from_selector(&self, selector: &str) -> Result<Vec<Service>> {
        let services = self
            .namespaced::<Service>()
            .list(&ListParams::default().labels(selector))
            .await
            .context("unable to list Services")?;
        Ok(services.items)
    }

    pub async fn one_service_from_selector(&self, selector: &str) -> Result<Service> {
        let services = self
            .services_from_selector(selector)
            .await
            .with_context(|| format!("unable to get services for the selector: {}", selector))?;
        exactly_one(services, "Service", selector)
    }

    pub async fn list_ingresses(&self, selector: &str) -> Result<Vec<Ingress>> {
        let ingresses = self
            .namespaced::<Ingress>()
            .list(&ListParams::default().labels(selector))
            .await
            .context("unable to get ingress list")?;
        Ok(ingresses.items)
    }

    pub async fn ingress_names(&self, selector: &str) -> Result<Vec<String>> {
        let ingresses = self
            .list_ingresses(selector)
            .await
            .context("unable to list ingresses")?;
        Ok(ingresses.into_iter().filter_map(|i| i.metadata.name).collect())
    }

    pub async fn delete_ingress(&self, name: &str) -> Result<()> {
        self.namespaced::<Ingress>()
            .delete(name, &DeleteParams::default())
            .await
            .with_context(|| format!("unable to delete ingress {}", name))?;
        info!(ingress = %name, "ingress deleted");
        Ok(())
    }
}

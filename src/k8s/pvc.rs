use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::ListParams;

use crate::k8s::client::K8sClient;

impl K8sClient {
    pub async fn pvcs_from_selector(&self, selector: &str) -> Result<Vec<PersistentVolumeClaim>> {
        let pvcs = self
            .namespaced::<PersistentVolumeClaim>()
            .list(&ListParams::default().labels(selector))
            .await
            .with_context(|| format!("unable to get PVCs for selector: {}", selector))?;
        Ok(pvcs.items)
    }

    pub async fn pvc_names_from_selector(&self, selector: &str) -> Result<Vec<String>> {
        let pvcs = self
            .pvcs_from_selector(selector)
            .await
            .context("unable to get PVCs from selector")?;
        Ok(pvcs.into_iter().filter_map(|pvc| pvc.metadata.name).collect())
    }

    pub async fn get_pvc(&self, name: &str) -> Result<PersistentVolumeClaim> {
        self.namespaced::<PersistentVolumeClaim>()
            .get(name)
            .await
            .with_context(|| format!("unable to get PVC {}", name))
    }
}

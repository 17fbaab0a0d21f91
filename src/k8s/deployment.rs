use anyhow::{anyhow, bail, Context, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, VolumeMount};
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::ResourceExt;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::DeploymentNotFound;
use crate::k8s::client::{exactly_one, K8sClient};
use crate::k8s::env::merge_env_vars;

fn pod_spec(deployment: &Deployment) -> Option<&PodSpec> {
    deployment.spec.as_ref()?.template.spec.as_ref()
}

fn containers(deployment: &Deployment) -> &[Container] {
    pod_spec(deployment)
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default()
}

fn only_container(deployment: &Deployment) -> Result<&Container> {
    match containers(deployment) {
        [container] => Ok(container),
        other => bail!(
            "expected exactly one container in Deployment {}, got {}",
            deployment.name_any(),
            other.len()
        ),
    }
}

/// JSON patch linking `secret` into the first container's `envFrom`.
///
/// The link is always inserted at the front, so the current content of
/// `envFrom` does not need to be known.
pub fn link_secret_patch(deployment: &Deployment, secret: &str) -> Result<Value> {
    let container = containers(deployment)
        .first()
        .ok_or_else(|| anyhow!("Deployment {} has no containers", deployment.name_any()))?;
    let secret_ref = json!({ "secretRef": { "name": secret } });

    let has_env_from = container.env_from.as_ref().is_some_and(|e| !e.is_empty());
    Ok(if has_env_from {
        json!([{ "op": "add", "path": "/spec/template/spec/containers/0/envFrom/0", "value": secret_ref }])
    } else {
        json!([{ "op": "add", "path": "/spec/template/spec/containers/0/envFrom", "value": [secret_ref] }])
    })
}

/// JSON patch removing the link to `secret` from the first container.
pub fn unlink_secret_patch(deployment: &Deployment, secret: &str) -> Result<Value> {
    let index = containers(deployment)
        .first()
        .and_then(|container| container.env_from.as_ref())
        .and_then(|env_from| {
            env_from.iter().position(|source| {
                source.secret_ref.as_ref().is_some_and(|r| r.name == secret)
            })
        })
        .ok_or_else(|| anyhow!("Deployment does not contain a link to {}", secret))?;

    Ok(json!([{ "op": "remove", "path": format!("/spec/template/spec/containers/0/envFrom/{}", index) }]))
}

/// Every volume mount of every container.
pub fn volume_mounts(deployment: &Deployment) -> Vec<VolumeMount> {
    containers(deployment)
        .iter()
        .flat_map(|c| c.volume_mounts.iter().flatten().cloned())
        .collect()
}

pub fn is_volume_empty_dir(volume: &str, deployment: &Deployment) -> bool {
    pod_spec(deployment)
        .and_then(|spec| spec.volumes.as_ref())
        .is_some_and(|volumes| {
            volumes
                .iter()
                .any(|v| v.name == volume && v.empty_dir.is_some())
        })
}

/// Claim backing `volume`, if it is a PVC volume.
pub fn pvc_name_for_volume(volume: &str, deployment: &Deployment) -> Option<String> {
    pod_spec(deployment)?
        .volumes
        .as_ref()?
        .iter()
        .filter(|v| v.name == volume)
        .find_map(|v| v.persistent_volume_claim.as_ref())
        .map(|claim| claim.claim_name.clone())
}

/// Sorted values of `label` across `deployments`; unlabelled ones are skipped.
pub fn label_values(deployments: &[Deployment], label: &str) -> Vec<String> {
    let mut values: Vec<String> = deployments
        .iter()
        .filter_map(|d| d.labels().get(label).cloned())
        .collect();
    values.sort();
    values
}

impl K8sClient {
    /// Deployments matching `selector`; every deployment of the current
    /// namespace when the selector is empty.
    pub async fn deployments_from_selector(&self, selector: &str) -> Result<Vec<Deployment>> {
        let params = if selector.is_empty() {
            ListParams::default().fields(&format!("metadata.namespace={}", self.current_namespace()))
        } else {
            ListParams::default().labels(selector)
        };
        let deployments = self
            .namespaced::<Deployment>()
            .list(&params)
            .await
            .context("unable to list Deployments")?;
        Ok(deployments.items)
    }

    /// Fails with [`DeploymentNotFound`] when there is no such deployment.
    pub async fn deployment_by_name(&self, name: &str) -> Result<Deployment> {
        debug!(deployment = %name, "getting deployment");
        self.namespaced::<Deployment>()
            .get_opt(name)
            .await
            .with_context(|| format!("unable to get Deployment {}", name))?
            .ok_or_else(|| DeploymentNotFound(name.to_string()).into())
    }

    pub async fn one_deployment_from_selector(&self, selector: &str) -> Result<Deployment> {
        let deployments = self
            .deployments_from_selector(selector)
            .await
            .with_context(|| format!("unable to get Deployment for the selector: {}", selector))?;
        exactly_one(deployments, "Deployment", selector)
    }

    pub async fn deployment_label_values(&self, label: &str, selector: &str) -> Result<Vec<String>> {
        let deployments = self
            .namespaced::<Deployment>()
            .list(&ListParams::default().labels(selector))
            .await
            .context("unable to list Deployments")?;
        Ok(label_values(&deployments.items, label))
    }

    /// Merge `envs` into the only container of `deployment` and update it.
    pub async fn add_env_vars_to_deployment(
        &self,
        envs: &[EnvVar],
        deployment: &Deployment,
    ) -> Result<Deployment> {
        let existing = only_container(deployment)?.env.clone().unwrap_or_default();
        let mut updated = deployment.clone();
        if let Some(container) = updated
            .spec
            .as_mut()
            .and_then(|spec| spec.template.spec.as_mut())
            .and_then(|spec| spec.containers.first_mut())
        {
            container.env = Some(merge_env_vars(&existing, envs));
        }

        let name = deployment.name_any();
        self.namespaced::<Deployment>()
            .replace(&name, &PostParams::default(), &updated)
            .await
            .with_context(|| format!("unable to update Deployment {}", name))
    }

    pub async fn env_vars_from_deployment(&self, name: &str) -> Result<Vec<EnvVar>> {
        let deployment = self
            .deployment_by_name(name)
            .await
            .context("error occurred while retrieving the deployment")?;
        Ok(only_container(&deployment)?.env.clone().unwrap_or_default())
    }

    /// Fetch `name`, ask `provider` for a JSON patch against it, and apply
    /// the patch unless it is empty.
    pub async fn patch_deployment<F>(&self, name: &str, provider: F) -> Result<()>
    where
        F: FnOnce(&Deployment) -> Result<Value>,
    {
        let deployment = self
            .deployment_by_name(name)
            .await
            .with_context(|| format!("unable to locate Deployment {}", name))?;
        let patch = provider(&deployment).context("unable to create a patch for the Deployment")?;

        if patch.as_array().is_some_and(|ops| ops.is_empty()) {
            debug!(deployment = %name, "nothing to patch");
            return Ok(());
        }

        let patch = Patch::<()>::Json(serde_json::from_value(patch).context("invalid JSON patch")?);
        self.namespaced::<Deployment>()
            .patch(name, &PatchParams::default(), &patch)
            .await
            .with_context(|| format!("Deployment not patched {}", name))?;
        info!(deployment = %name, "deployment patched");
        Ok(())
    }

    pub async fn link_secret(&self, secret: &str, deployment: &str) -> Result<()> {
        self.patch_deployment(deployment, |d| link_secret_patch(d, secret)).await
    }

    pub async fn unlink_secret(&self, secret: &str, deployment: &str) -> Result<()> {
        self.patch_deployment(deployment, |d| unlink_secret_patch(d, secret)).await
    }
}

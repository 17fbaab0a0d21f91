use std::path::{Path, PathBuf};

use anyhow::Result;
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Config, Resource};
use tracing::debug;

use crate::config::KclientConfig;
use crate::error::SyncError;
use crate::exec::{CommandExecutor, ExecIo, ExecTarget, PodExecutor};
use crate::sync::{ArchiveStats, FileSync, SyncRequest};

/// Handle on one cluster, bound to a current namespace.
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
    current_namespace: String,
    config: KclientConfig,
}

impl K8sClient {
    /// Connect using the ambient kubeconfig or in-cluster credentials.
    pub async fn new() -> Result<Self> {
        let config = Config::infer().await?;
        let namespace = config.default_namespace.clone();
        let client = Client::try_from(config)?;

        Ok(Self::with_config(client, namespace, KclientConfig::default()))
    }

    pub fn with_config(client: Client, namespace: impl Into<String>, config: KclientConfig) -> Self {
        Self {
            client,
            current_namespace: namespace.into(),
            config,
        }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn config(&self) -> &KclientConfig {
        &self.config
    }

    pub fn current_namespace(&self) -> &str {
        &self.current_namespace
    }

    pub fn set_namespace(&mut self, namespace: String) {
        debug!(from = %self.current_namespace, to = %namespace, "switching namespace");
        self.current_namespace = namespace;
    }

    /// API handle for a namespaced kind in the current namespace.
    pub(crate) fn namespaced<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.current_namespace)
    }

    /// Exec target for `pod` in the current namespace and configured container.
    pub fn exec_target(&self, pod: &str) -> ExecTarget {
        ExecTarget::new(&self.current_namespace, pod).with_container(self.config.container.clone())
    }

    /// Run `command` in `pod` with the given streams attached.
    pub async fn exec_in_pod(
        &self,
        pod: &str,
        command: Vec<String>,
        io: ExecIo,
    ) -> Result<(), SyncError> {
        PodExecutor::new(self.client.clone())
            .exec(&self.exec_target(pod), command, io)
            .await
    }

    /// Copy the content of `local` (or the listed `files` below it) into the
    /// `target` directory of `pod`.
    pub async fn copy_file(
        &self,
        local: &Path,
        pod: &str,
        target: &str,
        files: &[PathBuf],
        excludes: &[String],
    ) -> Result<ArchiveStats, SyncError> {
        let request = SyncRequest::new(local, target)
            .with_files(files)
            .with_excludes(excludes.iter().cloned());

        FileSync::new(PodExecutor::new(self.client.clone()), self.config.sync())
            .copy(request, &self.exec_target(pod))
            .await
    }
}

/// The single item of a selector lookup. Zero or several matches are errors.
pub(crate) fn exactly_one<T>(mut items: Vec<T>, kind: &str, selector: &str) -> Result<T> {
    match items.len() {
        0 => anyhow::bail!("no {} was found for the selector: {}", kind, selector),
        1 => Ok(items.remove(0)),
        _ => anyhow::bail!(
            "multiple {}s exist for the selector: {}. Only one must be present",
            kind,
            selector
        ),
    }
}

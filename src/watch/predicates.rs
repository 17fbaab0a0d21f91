//! Ready-made predicates for the waits the client performs.

use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::ResourceExt;

use crate::watch::condition::Verdict;
use crate::watch::subscription::ResourceEvent;

/// Pod phases that never lead to the desired one.
pub const TERMINAL_POD_PHASES: [&str; 2] = ["Failed", "Unknown"];

fn pod_phase_of(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.phase.as_deref()
}

/// Satisfied once a pod reports `desired`. `Failed`, `Unknown` and removal
/// of the pod end the wait as failed.
pub fn pod_phase(desired: &str) -> impl FnMut(&ResourceEvent<Pod>) -> Verdict + Send + 'static {
    let desired = desired.to_string();
    move |event| {
        let Some(pod) = event.object() else {
            return Verdict::Pending;
        };
        if event.is_deleted() {
            return Verdict::Failed(format!("pod {} was deleted", pod.name_any()));
        }
        match pod_phase_of(pod) {
            Some(phase) if phase == desired => Verdict::Satisfied,
            Some(phase) if TERMINAL_POD_PHASES.contains(&phase) => {
                Verdict::Failed(format!("pod {} entered phase {}", pod.name_any(), phase))
            }
            _ => Verdict::Pending,
        }
    }
}

/// Satisfied by the first add or update of a matching resource.
pub fn exists<K: 'static>() -> impl FnMut(&ResourceEvent<K>) -> Verdict + Send + 'static {
    |event| match event {
        ResourceEvent::Added(_) | ResourceEvent::Modified(_) => Verdict::Satisfied,
        _ => Verdict::Pending,
    }
}

/// Satisfied once the namespace has been removed.
///
/// Delete notifications are authoritative. An update with an empty phase is
/// ambiguous between active and gone, so it keeps the wait open.
pub fn namespace_deleted() -> impl FnMut(&ResourceEvent<Namespace>) -> Verdict + Send + 'static {
    |event| match event {
        ResourceEvent::Deleted(_) => Verdict::Satisfied,
        _ => Verdict::Pending,
    }
}

/// Lifecycle phase of a namespace, empty when not reported.
pub fn namespace_phase(namespace: &Namespace) -> &str {
    namespace
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NamespaceStatus, PodStatus};
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod(phase: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web-0".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: phase.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn namespace(phase: Option<&str>) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some("scratch".to_string()),
                ..Default::default()
            },
            status: phase.map(|p| NamespaceStatus {
                phase: Some(p.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_phase() {
        let mut running = pod_phase("Running");

        assert_eq!(running(&ResourceEvent::Added(pod(None))), Verdict::Pending);
        assert_eq!(running(&ResourceEvent::Modified(pod(Some("Pending")))), Verdict::Pending);
        assert_eq!(running(&ResourceEvent::Modified(pod(Some("Running")))), Verdict::Satisfied);
        assert_eq!(
            running(&ResourceEvent::Modified(pod(Some("Unknown")))),
            Verdict::Failed("pod web-0 entered phase Unknown".to_string())
        );
    }

    #[test]
    fn test_pod_deleted_while_waiting() {
        let mut running = pod_phase("Running");
        assert!(matches!(
            running(&ResourceEvent::Deleted(pod(Some("Running")))),
            Verdict::Failed(_)
        ));
    }

    #[test]
    fn test_exists() {
        let mut found = exists::<Secret>();
        assert_eq!(found(&ResourceEvent::Added(Secret::default())), Verdict::Satisfied);
        assert_eq!(found(&ResourceEvent::Deleted(Secret::default())), Verdict::Pending);
    }

    #[test]
    fn test_namespace_deleted_with_empty_phase() {
        let mut gone = namespace_deleted();
        let removed = namespace(None);
        assert_eq!(namespace_phase(&removed), "");

        assert_eq!(gone(&ResourceEvent::Modified(namespace(Some("Terminating")))), Verdict::Pending);
        assert_eq!(gone(&ResourceEvent::Modified(namespace(None))), Verdict::Pending);
        assert_eq!(gone(&ResourceEvent::Deleted(removed)), Verdict::Satisfied);
    }
}

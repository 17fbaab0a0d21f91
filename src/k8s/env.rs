//! Pure helpers over container specs and image references.

use std::collections::HashSet;

use anyhow::{bail, Result};
use k8s_openapi::api::core::v1::{Container, EnvVar};

/// Build env vars from `NAME=value` strings.
///
/// Only the first `=` splits; the value may contain more. Repeated names
/// are rejected.
pub fn parse_env_vars<S: AsRef<str>>(pairs: &[S]) -> Result<Vec<EnvVar>> {
    let mut seen = HashSet::new();
    let mut vars = Vec::with_capacity(pairs.len());

    for pair in pairs {
        let Some((name, value)) = pair.as_ref().split_once('=') else {
            bail!("invalid syntax for env, please specify a VariableName=Value pair");
        };
        if !seen.insert(name.to_string()) {
            bail!("multiple values found for VariableName: {}", name);
        }
        vars.push(EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            ..Default::default()
        });
    }
    Ok(vars)
}

/// Overwrite vars already in `existing` in place, then append the new ones
/// in the order given. A name repeated in `new` keeps its last value.
pub fn merge_env_vars(existing: &[EnvVar], new: &[EnvVar]) -> Vec<EnvVar> {
    let latest = |name: &str| new.iter().rev().find(|var| var.name == name);

    let mut merged: Vec<EnvVar> = existing
        .iter()
        .map(|var| latest(&var.name).unwrap_or(var).clone())
        .collect();

    for var in new {
        if !merged.iter().any(|m| m.name == var.name) {
            if let Some(last) = latest(&var.name) {
                merged.push(last.clone());
            }
        }
    }
    merged
}

/// `existing` without the first var called `name`.
pub fn remove_env_var(existing: &[EnvVar], name: &str) -> Vec<EnvVar> {
    let mut vars = existing.to_vec();
    if let Some(index) = vars.iter().position(|var| var.name == name) {
        vars.remove(index);
    }
    vars
}

pub fn find_container<'a>(containers: &'a [Container], name: &str) -> Result<&'a Container> {
    if name.is_empty() {
        bail!("invalid parameter for find_container, unable to find a blank container");
    }
    containers
        .iter()
        .find(|container| container.name == name)
        .ok_or_else(|| anyhow::anyhow!("unable to find container {}", name))
}

/// Parts of an image reference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageRef {
    pub namespace: String,
    pub name: String,
    /// Empty for digest references; `latest` when not given.
    pub tag: String,
    /// Empty for tag references.
    pub digest: String,
}

/// Split `[namespace/]name[:tag]` or `[namespace/]name@digest`.
///
/// Only a single `/` is read as a namespace separator. Longer tag and bare
/// references keep the whole repository path as the name, while digest
/// references keep only the first segment.
pub fn parse_image_name(image: &str) -> Result<ImageRef> {
    fn split_namespace(path: &str, keep_path: bool) -> (String, String) {
        let parts: Vec<&str> = path.split('/').collect();
        match parts.as_slice() {
            [namespace, name] => (namespace.to_string(), name.to_string()),
            _ if keep_path => (String::new(), path.to_string()),
            _ => (String::new(), parts[0].to_string()),
        }
    }

    let invalid = || anyhow::anyhow!("invalid image reference {}", image);
    let digest_parts: Vec<&str> = image.split('@').collect();

    match digest_parts.as_slice() {
        [name, digest] if !name.is_empty() && !digest.is_empty() => {
            let (namespace, name) = split_namespace(name, false);
            Ok(ImageRef {
                namespace,
                name,
                tag: String::new(),
                digest: digest.to_string(),
            })
        }
        [reference] if !reference.is_empty() => {
            let tag_parts: Vec<&str> = reference.split(':').collect();
            let (path, tag) = match tag_parts.as_slice() {
                [path, tag] if !path.is_empty() => (*path, tag.to_string()),
                [path] => (*path, "latest".to_string()),
                _ => return Err(invalid()),
            };
            let (namespace, name) = split_namespace(path, true);
            Ok(ImageRef {
                namespace,
                name,
                tag,
                digest: String::new(),
            })
        }
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, value: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_env_vars() {
        let vars = parse_env_vars(&["PORT=8080", "DSN=postgres://u:p@db/app?x=1"]).unwrap();
        assert_eq!(vars, vec![var("PORT", "8080"), var("DSN", "postgres://u:p@db/app?x=1")]);
    }

    #[test]
    fn test_parse_env_vars_rejects_bad_input() {
        assert!(parse_env_vars(&["PORT"]).is_err());
        let err = parse_env_vars(&["A=1", "A=2"]).unwrap_err();
        assert_eq!(err.to_string(), "multiple values found for VariableName: A");
    }

    #[test]
    fn test_merge_env_vars_keeps_order() {
        let existing = vec![var("A", "1"), var("B", "2"), var("C", "3")];
        let new = vec![var("D", "4"), var("B", "20")];

        assert_eq!(
            merge_env_vars(&existing, &new),
            vec![var("A", "1"), var("B", "20"), var("C", "3"), var("D", "4")]
        );
    }

    #[test]
    fn test_merge_env_vars_last_value_wins() {
        let merged = merge_env_vars(&[], &[var("A", "1"), var("A", "2")]);
        assert_eq!(merged, vec![var("A", "2")]);
    }

    #[test]
    fn test_remove_env_var() {
        let existing = vec![var("A", "1"), var("B", "2")];
        assert_eq!(remove_env_var(&existing, "A"), vec![var("B", "2")]);
        assert_eq!(remove_env_var(&existing, "Z"), existing);
    }

    #[test]
    fn test_find_container() {
        let containers = vec![Container {
            name: "runtime".to_string(),
            ..Default::default()
        }];
        assert_eq!(find_container(&containers, "runtime").unwrap().name, "runtime");
        assert!(find_container(&containers, "").is_err());
        assert!(find_container(&containers, "sidecar").is_err());
    }

    #[test]
    fn test_parse_image_name() {
        let tagged = parse_image_name("myproject/nodejs:12").unwrap();
        assert_eq!(
            tagged,
            ImageRef {
                namespace: "myproject".to_string(),
                name: "nodejs".to_string(),
                tag: "12".to_string(),
                digest: String::new(),
            }
        );

        let bare = parse_image_name("nodejs").unwrap();
        assert_eq!(bare.tag, "latest");
        assert!(bare.namespace.is_empty());

        let pinned = parse_image_name("nodejs@sha256:abcd").unwrap();
        assert_eq!(pinned.name, "nodejs");
        assert!(pinned.tag.is_empty());
        assert_eq!(pinned.digest, "sha256:abcd");
    }

    #[test]
    fn test_parse_image_name_keeps_repository_path() {
        let qualified = parse_image_name("quay.io/org/nodejs:12").unwrap();
        assert!(qualified.namespace.is_empty());
        assert_eq!(qualified.name, "quay.io/org/nodejs");
        assert_eq!(qualified.tag, "12");

        let bare = parse_image_name("quay.io/org/nodejs").unwrap();
        assert_eq!(bare.name, "quay.io/org/nodejs");
        assert_eq!(bare.tag, "latest");

        let pinned = parse_image_name("quay.io/org/nodejs@sha256:abcd").unwrap();
        assert_eq!(pinned.name, "quay.io");
        assert_eq!(pinned.digest, "sha256:abcd");
    }

    #[test]
    fn test_parse_image_name_invalid() {
        for image in ["", ":1.0.0", "@sha256:abcd", "a:b:c", "a@b@c"] {
            assert!(parse_image_name(image).is_err(), "{} should be rejected", image);
        }
    }
}

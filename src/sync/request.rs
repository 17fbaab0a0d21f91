use std::path::{Path, PathBuf};

/// What to copy and where. Built by the caller and consumed by one sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Local base path. Its last component names the synthetic top-level
    /// directory of the archive.
    pub local_path: PathBuf,
    /// Directory inside the workload the archive is unpacked into.
    pub remote_path: String,
    /// Explicit subset of paths under `local_path`. Empty means the whole
    /// subtree. Relative entries are resolved against `local_path`.
    pub files: Vec<PathBuf>,
    /// Exclusion globs matched against local source paths.
    pub excludes: Vec<String>,
}

impl SyncRequest {
    pub fn new(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            files: Vec::new(),
            excludes: Vec::new(),
        }
    }

    /// Restrict the sync to the given paths.
    pub fn with_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.files = files.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
        self
    }

    pub fn with_excludes<I, S>(mut self, excludes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excludes = excludes.into_iter().map(Into::into).collect();
        self
    }

    /// `true` when no explicit file list was given.
    pub fn is_whole_subtree(&self) -> bool {
        self.files.is_empty()
    }

    /// Remote target with forward slashes, whatever the host convention.
    pub fn remote_dir(&self) -> String {
        to_slash(&self.remote_path)
    }
}

/// Render a path with `/` separators.
pub fn to_slash(path: &str) -> String {
    path.replace('\\', "/")
}

/// `parent/child` with exactly one `/` between the two.
pub fn join_slash(parent: &str, child: &str) -> String {
    let trimmed = parent.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    if child.is_empty() {
        return parent.to_string();
    }
    if trimmed.is_empty() {
        return if parent.starts_with('/') {
            format!("/{}", child)
        } else {
            child.to_string()
        };
    }
    format!("{}/{}", trimmed, child)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_methods() {
        let request = SyncRequest::new("/work/app", "/opt/app-root/src")
            .with_files(["/work/app/main.rs"])
            .with_excludes(["*.log"]);

        assert!(!request.is_whole_subtree());
        assert_eq!(request.files, vec![PathBuf::from("/work/app/main.rs")]);
        assert_eq!(request.excludes, vec!["*.log".to_string()]);
    }

    #[test]
    fn test_remote_dir_uses_forward_slashes() {
        let request = SyncRequest::new("app", r"\opt\app-root\src");
        assert_eq!(request.remote_dir(), "/opt/app-root/src");
    }

    #[test]
    fn test_join_slash() {
        assert_eq!(join_slash("/opt/src", "app"), "/opt/src/app");
        assert_eq!(join_slash("/opt/src/", "/app"), "/opt/src/app");
        assert_eq!(join_slash("/", "app"), "/app");
        assert_eq!(join_slash("/opt", ""), "/opt");
    }
}

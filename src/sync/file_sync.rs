//! Copy a local path into a running workload.
//!
//! The archive is built on a blocking thread and streamed through a
//! [`bridge`](crate::sync::bridge) into the stdin of `tar xf -` running in
//! the target. Producer and consumer run at the same time; neither side ever
//! holds the whole archive.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, error, info};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::exec::{CommandExecutor, ExecIo, ExecTarget};
use crate::sync::archive::{ArchiveBuilder, ArchiveStats};
use crate::sync::bridge;
use crate::sync::filter::PathFilter;
use crate::sync::request::{join_slash, SyncRequest};

/// Remote command that unpacks the archive from stdin into `target_dir`,
/// dropping the synthetic top-level component of every entry.
pub fn unpack_command(target_dir: &str) -> Vec<String> {
    ["tar", "xf", "-", "-C", target_dir, "--strip", "1"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Last component of the local path, used as the archive prefix.
pub fn base_name(path: &Path) -> Result<String, SyncError> {
    let name = match path.file_name() {
        Some(name) => name.to_os_string(),
        None => fs::canonicalize(path)
            .map_err(|e| SyncError::source_read(path, e))?
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| {
                SyncError::Configuration(format!("cannot sync {}: it has no name", path.display()))
            })?,
    };
    Ok(name.to_string_lossy().into_owned())
}

/// Streams local files into a workload through a [`CommandExecutor`].
pub struct FileSync<E> {
    executor: E,
    config: SyncConfig,
}

impl<E: CommandExecutor> FileSync<E> {
    pub fn new(executor: E, config: SyncConfig) -> Self {
        Self { executor, config }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// `remote_path/basename(local_path)`, always with forward slashes.
    pub fn destination(request: &SyncRequest) -> Result<String, SyncError> {
        Ok(join_slash(&request.remote_dir(), &base_name(&request.local_path)?))
    }

    fn filter_for(&self, request: &SyncRequest) -> Result<PathFilter, SyncError> {
        let mut patterns = self.config.default_excludes.clone();
        patterns.extend(request.excludes.iter().cloned());
        let filter = PathFilter::from_patterns(&patterns)?;
        debug!(patterns = ?filter.patterns(), "compiled exclude patterns");
        Ok(filter)
    }

    /// Copy `request.local_path` (or its listed subset) into `target`.
    ///
    /// Either every entry is sent and unpacked, or the call fails. When the
    /// archive build fails, the exec path sees a broken stdin stream and that
    /// error is returned with the build failure text in it.
    pub async fn copy(
        &self,
        request: SyncRequest,
        target: &ExecTarget,
    ) -> Result<ArchiveStats, SyncError> {
        let prefix = base_name(&request.local_path)?;
        let remote_dir = request.remote_dir();
        let destination = join_slash(&remote_dir, &prefix);
        let builder = ArchiveBuilder::new(self.filter_for(&request)?);

        // Configuration problems must surface before anything runs remotely.
        builder.plan(&request, &prefix)?;

        info!(
            local = %request.local_path.display(),
            %destination,
            %target,
            files = request.files.len(),
            "starting file sync"
        );

        let (writer, reader) = bridge::open(self.config.bridge_capacity, self.config.chunk_size);
        let producer = tokio::task::spawn_blocking(move || {
            let mut writer = writer;
            match builder.write_to(&request, &prefix, &mut writer) {
                Ok(stats) => {
                    writer.close();
                    Ok(stats)
                }
                Err(err) => {
                    writer.fail(io::Error::other(err.to_string()));
                    Err(err)
                }
            }
        });

        let exec_result = self
            .executor
            .exec(target, unpack_command(&remote_dir), ExecIo::new().stdin(reader))
            .await;

        let build_result = match producer.await {
            Ok(result) => result,
            Err(join_err) => Err(SyncError::StreamBroken {
                reason: format!("archive producer did not finish: {}", join_err),
            }),
        };

        match (exec_result, build_result) {
            (Ok(()), Ok(stats)) => {
                info!(
                    %destination,
                    files = stats.files,
                    directories = stats.directories,
                    symlinks = stats.symlinks,
                    bytes = stats.bytes,
                    "file sync complete"
                );
                Ok(stats)
            }
            (Err(exec_err), Err(build_err)) => {
                error!(%destination, error = %build_err, "archive build failed");
                Err(exec_err)
            }
            (Err(exec_err), Ok(_)) => Err(exec_err),
            (Ok(()), Err(build_err)) => {
                error!(%destination, error = %build_err, "archive build failed");
                Err(build_err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_command() {
        assert_eq!(
            unpack_command("/opt/app-root/src"),
            vec!["tar", "xf", "-", "-C", "/opt/app-root/src", "--strip", "1"]
        );
    }

    #[test]
    fn test_destination_is_target_plus_basename() {
        let request = SyncRequest::new("/home/dev/project", "/opt/app-root/src");
        assert_eq!(
            FileSync::<crate::exec::PodExecutor>::destination(&request).unwrap(),
            "/opt/app-root/src/project"
        );
    }

    #[test]
    fn test_base_name_of_trailing_slash() {
        assert_eq!(base_name(Path::new("/home/dev/project/")).unwrap(), "project");
    }

    #[test]
    fn test_base_name_resolves_dot() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("workspace");
        fs::create_dir_all(&inner).unwrap();

        assert_eq!(base_name(&inner.join("..").join("workspace")).unwrap(), "workspace");
        assert!(matches!(
            base_name(&inner.join("sub").join("..")),
            Err(SyncError::SourceRead { .. })
        ));
    }
}

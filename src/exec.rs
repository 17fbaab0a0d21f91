//! Remote command execution inside a running pod.
//!
//! One call negotiates one multiplexed channel and attaches up to three
//! byte streams (stdin, stdout, stderr) plus the exit status. The call
//! returns once the remote command has exited and every attached stream has
//! been drained.

use std::fmt;
use std::io;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::AttachParams;
use kube::{Api, Client};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::SyncError;

pub type ExecReader = Box<dyn AsyncRead + Send + Unpin>;
pub type ExecWriter = Box<dyn AsyncWrite + Send + Unpin>;

const PUMP_BUFFER_SIZE: usize = 32 * 1024;

/// The process to run a command in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecTarget {
    pub namespace: String,
    pub pod: String,
    /// `None` lets the API server pick the first container.
    pub container: Option<String>,
}

impl ExecTarget {
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: None,
        }
    }

    pub fn with_container(mut self, container: Option<String>) -> Self {
        self.container = container;
        self
    }
}

impl fmt::Display for ExecTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod)?;
        if let Some(container) = &self.container {
            write!(f, "/{}", container)?;
        }
        Ok(())
    }
}

/// Local ends of the streams attached to a remote command.
///
/// A stream that is `None` is not requested from the remote side.
#[derive(Default)]
pub struct ExecIo {
    pub stdin: Option<ExecReader>,
    pub stdout: Option<ExecWriter>,
    pub stderr: Option<ExecWriter>,
    /// Allocate a terminal. stderr is merged into stdout when set.
    pub tty: bool,
}

impl ExecIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdin(mut self, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stdin = Some(Box::new(reader));
        self
    }

    pub fn stdout(mut self, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stdout = Some(Box::new(writer));
        self
    }

    pub fn stderr(mut self, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stderr = Some(Box::new(writer));
        self
    }

    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }
}

impl fmt::Debug for ExecIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecIo")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("tty", &self.tty)
            .finish()
    }
}

/// Runs a command in a workload process.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command` in `target` with the given streams attached.
    ///
    /// Errors when the channel cannot be negotiated, the command does not
    /// exit successfully, or any attached stream fails. A stdin source that
    /// fails mid-stream always fails the call, even if the remote command
    /// happens to exit cleanly afterwards.
    async fn exec(
        &self,
        target: &ExecTarget,
        command: Vec<String>,
        io: ExecIo,
    ) -> Result<(), SyncError>;
}

/// [`CommandExecutor`] backed by the pod `exec` subresource.
#[derive(Clone)]
pub struct PodExecutor {
    client: Client,
}

impl PodExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CommandExecutor for PodExecutor {
    async fn exec(
        &self,
        target: &ExecTarget,
        command: Vec<String>,
        io: ExecIo,
    ) -> Result<(), SyncError> {
        let ExecIo {
            stdin,
            stdout,
            stderr,
            tty,
        } = io;

        let api: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let attach_params = AttachParams {
            container: target.container.clone(),
            stdin: stdin.is_some(),
            stdout: stdout.is_some(),
            stderr: stderr.is_some() && !tty,
            tty,
            ..Default::default()
        };

        debug!(%target, ?command, "opening exec channel");
        let mut attached = api
            .exec(&target.pod, command, &attach_params)
            .await
            .map_err(|e| remote_error(target, format!("unable to open exec channel: {}", e), None))?;

        let status = attached.take_status();
        let remote_stdin = attached.stdin();
        let remote_stdout = attached.stdout();
        let remote_stderr = attached.stderr();
        let process = &attached;

        let feed = async move {
            match (stdin, remote_stdin) {
                (Some(source), Some(sink)) => {
                    let result = pump(source, sink).await;
                    if let Err(PumpError::Source(_)) = &result {
                        // Without a clean EOF the remote side would wait forever.
                        process.abort();
                    }
                    result
                }
                _ => Ok(0),
            }
        };
        let status = async move {
            match status {
                Some(status) => status.await,
                None => None,
            }
        };

        let (fed, out, err, status) = tokio::join!(
            feed,
            drain(remote_stdout, stdout),
            drain(remote_stderr, stderr),
            status
        );

        if let Err(PumpError::Source(e)) = &fed {
            warn!(%target, error = %e, "stdin source failed, exec aborted");
            return Err(SyncError::StreamBroken {
                reason: format!("stdin source failed: {}", e),
            });
        }

        check_status(target, status.as_ref())?;

        if let Err(PumpError::Sink(e)) = &fed {
            return Err(remote_error(
                target,
                format!("remote stdin closed before all input was sent: {}", e),
                None,
            ));
        }
        out.map_err(SyncError::from_stream)?;
        err.map_err(SyncError::from_stream)?;

        attached
            .join()
            .await
            .map_err(|e| remote_error(target, e.to_string(), None))?;

        if let Ok(bytes) = fed {
            debug!(%target, stdin_bytes = bytes, "exec finished");
        }
        Ok(())
    }
}

fn remote_error(target: &ExecTarget, reason: String, exit_code: Option<i32>) -> SyncError {
    SyncError::RemoteExec {
        target: target.to_string(),
        reason,
        exit_code,
    }
}

/// Turn the status reported on the error channel into a result.
pub fn check_status(target: &ExecTarget, status: Option<&Status>) -> Result<(), SyncError> {
    let Some(status) = status else {
        return Err(remote_error(
            target,
            "exec channel closed without an exit status".to_string(),
            None,
        ));
    };

    if status.status.as_deref() == Some("Success") {
        return Ok(());
    }

    let reason = status
        .message
        .clone()
        .or_else(|| status.reason.clone())
        .unwrap_or_else(|| "command failed".to_string());
    Err(remote_error(target, reason, exit_code(status)))
}

/// Exit code carried in the `ExitCode` cause of a failure status.
pub fn exit_code(status: &Status) -> Option<i32> {
    status
        .details
        .as_ref()?
        .causes
        .as_ref()?
        .iter()
        .find(|cause| cause.reason.as_deref() == Some("ExitCode"))
        .and_then(|cause| cause.message.as_deref()?.parse().ok())
}

#[derive(Debug)]
enum PumpError {
    /// Reading the local stdin source failed.
    Source(io::Error),
    /// Writing to the remote stdin failed.
    Sink(io::Error),
}

/// Copy `source` into `sink`, shutting `sink` down only after a clean EOF.
async fn pump<W: AsyncWrite + Unpin>(mut source: ExecReader, mut sink: W) -> Result<u64, PumpError> {
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = source.read(&mut buf).await.map_err(PumpError::Source)?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n]).await.map_err(PumpError::Sink)?;
        total += n as u64;
    }
    sink.shutdown().await.map_err(PumpError::Sink)?;
    Ok(total)
}

async fn drain<R: AsyncRead + Unpin>(remote: Option<R>, local: Option<ExecWriter>) -> io::Result<u64> {
    match (remote, local) {
        (Some(mut remote), Some(mut local)) => {
            let n = tokio::io::copy(&mut remote, &mut local).await?;
            local.flush().await?;
            Ok(n)
        }
        (Some(mut remote), None) => tokio::io::copy(&mut remote, &mut tokio::io::sink()).await,
        (None, _) => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{StatusCause, StatusDetails};

    fn target() -> ExecTarget {
        ExecTarget::new("dev", "web-0")
    }

    #[test]
    fn test_target_display() {
        assert_eq!(target().to_string(), "dev/web-0");
        let with_container = target().with_container(Some("runtime".to_string()));
        assert_eq!(with_container.to_string(), "dev/web-0/runtime");
    }

    #[test]
    fn test_success_status() {
        let status = Status {
            status: Some("Success".to_string()),
            ..Default::default()
        };
        assert!(check_status(&target(), Some(&status)).is_ok());
    }

    #[test]
    fn test_failure_status_carries_exit_code() {
        let status = Status {
            status: Some("Failure".to_string()),
            message: Some("command terminated with non-zero exit code".to_string()),
            reason: Some("NonZeroExitCode".to_string()),
            details: Some(StatusDetails {
                causes: Some(vec![StatusCause {
                    reason: Some("ExitCode".to_string()),
                    message: Some("2".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        match check_status(&target(), Some(&status)) {
            Err(SyncError::RemoteExec {
                target,
                reason,
                exit_code,
            }) => {
                assert_eq!(target, "dev/web-0");
                assert!(reason.contains("non-zero"));
                assert_eq!(exit_code, Some(2));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_missing_status_is_failure() {
        assert!(matches!(
            check_status(&target(), None),
            Err(SyncError::RemoteExec { .. })
        ));
    }

    #[tokio::test]
    async fn test_pump_shuts_down_after_eof() {
        let (mut remote, local) = tokio::io::duplex(64);
        let source: ExecReader = Box::new(&b"archive bytes"[..]);

        let sent = pump(source, local).await.unwrap();
        assert_eq!(sent, 13);

        let mut received = Vec::new();
        remote.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"archive bytes");
    }

    #[tokio::test]
    async fn test_pump_reports_source_failure() {
        struct Failing;
        impl AsyncRead for Failing {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _: &mut std::task::Context<'_>,
                _: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<io::Result<()>> {
                std::task::Poll::Ready(Err(io::Error::other("tar build failed")))
            }
        }

        let (_remote, local) = tokio::io::duplex(64);
        let result = pump(Box::new(Failing), local).await;
        assert!(matches!(result, Err(PumpError::Source(_))));
    }

    #[tokio::test]
    async fn test_drain_copies_into_local_writer() {
        let (local, mut reader) = tokio::io::duplex(64);
        let n = drain(Some(&b"hello"[..]), Some(Box::new(local) as ExecWriter))
            .await
            .unwrap();
        assert_eq!(n, 5);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }
}

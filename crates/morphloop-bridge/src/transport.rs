//! Message transports between the bridge actor and a backend.

use std::ffi::OsStr;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{info, warn};

use crate::BridgeError;
use crate::protocol::{Envelope, Request, Response};

/// A duplex channel of envelopes to one backend.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, envelope: &Envelope<Request>) -> Result<(), BridgeError>;

    /// Next response, or `None` once the backend has gone away.
    async fn recv(&mut self) -> Result<Option<Envelope<Response>>, BridgeError>;
}

/// Newline-delimited JSON over any async reader/writer pair.
///
/// Lines that fail to parse are logged and skipped so a worker printing
/// diagnostics to stdout does not wedge the bridge.
pub struct LineTransport<R, W> {
    lines: Lines<R>,
    writer: W,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            lines: reader.lines(),
            writer,
        }
    }
}

#[async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, envelope: &Envelope<Request>) -> Result<(), BridgeError> {
        let mut line = serde_json::to_string(envelope)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Envelope<Response>>, BridgeError> {
        while let Some(line) = self.lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(e) => warn!(error = %e, line, "skipping malformed backend line"),
            }
        }
        Ok(None)
    }
}

/// A worker program spawned as a child process, spoken to over stdin/stdout.
///
/// The child inherits stderr and is killed when the transport is dropped.
pub struct ProcessTransport {
    child: Child,
    inner: LineTransport<BufReader<ChildStdout>, ChildStdin>,
}

impl ProcessTransport {
    pub fn spawn<I, S>(program: &str, args: I) -> Result<Self, BridgeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::Transport(format!("spawning {program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Transport("worker stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Transport("worker stdout unavailable".into()))?;

        info!(program, pid = child.id(), "spawned backend worker");
        Ok(Self {
            child,
            inner: LineTransport::new(BufReader::new(stdout), stdin),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn send(&mut self, envelope: &Envelope<Request>) -> Result<(), BridgeError> {
        self.inner.send(envelope).await
    }

    async fn recv(&mut self) -> Result<Option<Envelope<Response>>, BridgeError> {
        let next = self.inner.recv().await?;
        if next.is_none()
            && let Ok(Some(status)) = self.child.try_wait()
        {
            warn!(%status, "backend worker exited");
        }
        Ok(next)
    }
}

//! Line sources for the orchestrator's log.
//!
//! A live source tails the output of a process attached to the compute
//! node; a buffered source walks a previously fetched log blob. Both expose
//! the same non-blocking contract: ask whether a line is ready (waiting at
//! most a given timeout), then read it.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::ComputeEngine;

#[async_trait]
pub trait LineSource: Send {
    /// Whether a line is ready, waiting at most `timeout`.
    async fn has_data(&mut self, timeout: Duration) -> bool;

    /// Next line without its terminator. Only valid after `has_data`
    /// returned true.
    async fn read_line(&mut self) -> Result<Vec<u8>>;

    /// No further lines will ever arrive.
    fn is_closed(&self) -> bool;

    async fn close(&mut self);
}

/// Opens a live tail of the orchestrator running on a given VM.
#[async_trait]
pub trait LogTailer: Send + Sync {
    async fn tail(&self, compute: &ComputeEngine) -> Result<Box<dyn LineSource>>;
}

// ---------------------------------------------------------------------------
// Buffered
// ---------------------------------------------------------------------------

/// A complete, previously fetched log.
pub struct BufferedLog {
    data: Vec<u8>,
    cursor: usize,
}

impl BufferedLog {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, cursor: 0 }
    }

    fn next_line(&mut self) -> Option<Vec<u8>> {
        if self.cursor >= self.data.len() {
            return None;
        }
        let rest = &self.data[self.cursor..];
        let (line, advance) = match rest.iter().position(|&b| b == b'\n') {
            Some(end) => (&rest[..end], end + 1),
            None => (rest, rest.len()),
        };
        let line = line.strip_suffix(b"\r").unwrap_or(line).to_vec();
        self.cursor += advance;
        Some(line)
    }
}

#[async_trait]
impl LineSource for BufferedLog {
    async fn has_data(&mut self, _timeout: Duration) -> bool {
        self.cursor < self.data.len()
    }

    async fn read_line(&mut self) -> Result<Vec<u8>> {
        self.next_line()
            .ok_or_else(|| Error::Other("read past end of buffered log".to_string()))
    }

    fn is_closed(&self) -> bool {
        self.cursor >= self.data.len()
    }

    async fn close(&mut self) {
        self.cursor = self.data.len();
    }
}

// ---------------------------------------------------------------------------
// Live
// ---------------------------------------------------------------------------

/// Standard output of a child process, one line at a time. Its stderr
/// (ssh banners, key propagation notices) only goes to the debug log.
pub struct LiveLog {
    child: Option<Child>,
    lines: mpsc::Receiver<Vec<u8>>,
    peeked: Option<Vec<u8>>,
    closed: bool,
}

impl LiveLog {
    pub fn spawn(mut command: Command) -> Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn()?;

        let (tx, rx) = mpsc::channel(1024);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(trace_stderr(stderr));
        }

        Ok(Self {
            child: Some(child),
            lines: rx,
            peeked: None,
            closed: false,
        })
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                if tx.send(buf.clone()).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn trace_stderr<R: AsyncRead + Unpin>(reader: R) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(line = %line, "tail stderr");
    }
}

#[async_trait]
impl LineSource for LiveLog {
    async fn has_data(&mut self, timeout: Duration) -> bool {
        if self.peeked.is_some() {
            return true;
        }
        if self.closed {
            return false;
        }
        match tokio::time::timeout(timeout, self.lines.recv()).await {
            Ok(Some(line)) => {
                self.peeked = Some(line);
                true
            }
            Ok(None) => {
                debug!("live log stream ended");
                self.closed = true;
                false
            }
            Err(_) => false,
        }
    }

    async fn read_line(&mut self) -> Result<Vec<u8>> {
        if let Some(line) = self.peeked.take() {
            return Ok(line);
        }
        self.lines
            .try_recv()
            .map_err(|e| Error::Other(format!("no line ready on live log: {e}")))
    }

    fn is_closed(&self) -> bool {
        self.closed && self.peeked.is_none()
    }

    async fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        self.lines.close();
        self.peeked = None;
        self.closed = true;
    }
}

/// Tails the orchestrator's container output over `gcloud compute ssh`.
pub struct GcloudTailer;

#[async_trait]
impl LogTailer for GcloudTailer {
    async fn tail(&self, compute: &ComputeEngine) -> Result<Box<dyn LineSource>> {
        debug!(zone = %compute.zone, instance = %compute.instance_name, "attaching to orchestrator log");
        let mut command = Command::new("gcloud");
        command.args([
            "compute",
            "ssh",
            "--zone",
            &compute.zone,
            &compute.instance_name,
            "--",
            "docker logs -f $(docker ps -q)",
        ]);
        Ok(Box::new(LiveLog::spawn(command)?))
    }
}

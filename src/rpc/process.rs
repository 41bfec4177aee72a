/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Subprocess transport shared by the analysis and debug clients.
//!
//! A [`ProcessConnection`] owns one child process and three tasks: a reader
//! that decodes stdout frames and hands them to a [`MessageSink`] in arrival
//! order, a writer that drains a FIFO queue into stdin, and a stderr
//! forwarder. When stdout closes the sink is told the exit code, which is
//! where pending requests and event waits get failed.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::error::RpcError;
use crate::protocol::FrameCodec;

/// How long to wait for an exit status once stdout has closed.
const EXIT_STATUS_WAIT: Duration = Duration::from_secs(1);

/// How a child process is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable to run.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory (the workspace or program root).
    pub cwd: PathBuf,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    /// Creates a spec with no extra environment.
    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: cwd.into(),
            env: Vec::new(),
        }
    }

    /// Renders the command line for logs.
    #[must_use]
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Receives decoded messages from the reader task.
///
/// Called synchronously from the reader, one message at a time, so
/// implementations must not block.
pub trait MessageSink<M>: Send + Sync + 'static {
    /// Handles one inbound message. `outbound` can be used to answer
    /// server-initiated requests.
    fn on_message(&self, message: M, outbound: &Outbound<M>);

    /// Called once after stdout has closed.
    fn on_exit(&self, code: Option<i32>);
}

/// Cloneable handle onto a connection's outgoing FIFO queue.
pub struct Outbound<M> {
    tx: mpsc::UnboundedSender<Bytes>,
    _message: PhantomData<fn(M)>,
}

impl<M> Clone for Outbound<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            _message: PhantomData,
        }
    }
}

impl<M: Serialize> Outbound<M> {
    /// Frames and queues a message.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the writer has stopped.
    pub fn send(&self, message: &M) -> Result<(), RpcError> {
        let framed =
            FrameCodec::encode(message).map_err(|e| RpcError::Transport(e.to_string()))?;
        self.tx
            .send(framed)
            .map_err(|_| RpcError::Transport("process stdin is closed".into()))
    }
}

/// A running child process speaking a framed protocol over stdio.
pub struct ProcessConnection<M> {
    label: String,
    pid: Option<u32>,
    outbound: Outbound<M>,
    child: Arc<Mutex<Child>>,
    alive: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl<M> ProcessConnection<M>
where
    M: Serialize + DeserializeOwned + Send + 'static,
{
    /// Spawns the process and starts its I/O tasks.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Spawn`] if the program cannot be started.
    pub fn spawn(
        label: &str,
        spec: &LaunchSpec,
        sink: Arc<dyn MessageSink<M>>,
    ) -> Result<Self, RpcError> {
        let spawn_error = |reason: String| RpcError::Spawn {
            program: spec.program.clone(),
            reason,
        };

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout not captured".into()))?;
        let stderr = child.stderr.take();

        let pid = child.id();
        info!("[{}] spawned `{}` (pid {:?})", label, spec.display(), pid);

        let (tx, rx) = mpsc::unbounded_channel();
        let outbound = Outbound {
            tx,
            _message: PhantomData,
        };
        let child = Arc::new(Mutex::new(child));
        let alive = Arc::new(AtomicBool::new(true));

        let mut tasks = vec![
            tokio::spawn(writer_task(label.to_string(), stdin, rx)),
            tokio::spawn(reader_task(
                label.to_string(),
                stdout,
                outbound.clone(),
                sink,
                child.clone(),
                alive.clone(),
            )),
        ];
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(stderr_task(label.to_string(), stderr)));
        }

        Ok(Self {
            label: label.to_string(),
            pid,
            outbound,
            child,
            alive,
            tasks,
        })
    }

    /// Queues a message for the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer has stopped.
    pub fn send(&self, message: &M) -> Result<(), RpcError> {
        self.outbound.send(message)
    }
}

impl<M> ProcessConnection<M> {
    /// Label used in logs.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// OS process id, if still known.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether stdout is still open.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Kills the process and waits briefly for it to be reaped.
    ///
    /// Never fails; problems are logged.
    pub async fn terminate(&self) {
        let mut child = self.child.lock().await;
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("[{}] already exited: {}", self.label, status);
                return;
            }
            Ok(None) => {}
            Err(e) => warn!("[{}] failed to poll process: {}", self.label, e),
        }

        if let Err(e) = child.start_kill() {
            warn!("[{}] failed to kill process: {}", self.label, e);
            return;
        }
        match tokio::time::timeout(EXIT_STATUS_WAIT, child.wait()).await {
            Ok(Ok(status)) => info!("[{}] terminated: {}", self.label, status),
            Ok(Err(e)) => warn!("[{}] failed to reap process: {}", self.label, e),
            Err(_) => warn!("[{}] process did not exit after kill", self.label),
        }
    }
}

impl<M> Drop for ProcessConnection<M> {
    fn drop(&mut self) {
        // Releases the reader's handle on the child so kill_on_drop applies.
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn writer_task(label: String, mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(frame) = rx.recv().await {
        trace!("[{}] -> {}", label, String::from_utf8_lossy(&frame));
        if let Err(e) = stdin.write_all(&frame).await {
            warn!("[{}] failed to write to stdin: {}", label, e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            warn!("[{}] failed to flush stdin: {}", label, e);
            break;
        }
    }
    debug!("[{}] writer exiting", label);
}

async fn reader_task<M>(
    label: String,
    stdout: ChildStdout,
    outbound: Outbound<M>,
    sink: Arc<dyn MessageSink<M>>,
    child: Arc<Mutex<Child>>,
    alive: Arc<AtomicBool>,
) where
    M: DeserializeOwned + 'static,
{
    let mut reader = BufReader::new(stdout);
    let mut codec = FrameCodec::<M>::new();
    let mut temp = [0u8; 4096];

    loop {
        match reader.read(&mut temp).await {
            Ok(0) => {
                debug!("[{}] stdout closed", label);
                break;
            }
            Ok(n) => {
                for message in codec.decode(&temp[..n]) {
                    sink.on_message(message, &outbound);
                }
            }
            Err(e) => {
                error!("[{}] error reading stdout: {}", label, e);
                break;
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    if codec.buffered() > 0 {
        warn!("[{}] discarding {} bytes of partial frame", label, codec.buffered());
    }

    let code = {
        let mut child = child.lock().await;
        match tokio::time::timeout(EXIT_STATUS_WAIT, child.wait()).await {
            Ok(Ok(status)) => status.code(),
            _ => None,
        }
    };
    warn!("[{}] connection lost (exit code {:?})", label, code);
    sink.on_exit(code);
}

async fn stderr_task(label: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("[{} stderr] {}", label, line);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Recorder {
        messages: StdMutex<Vec<Value>>,
        exit: StdMutex<Option<Option<i32>>>,
        exited: Notify,
    }

    impl MessageSink<Value> for Recorder {
        fn on_message(&self, message: Value, _outbound: &Outbound<Value>) {
            self.messages.lock().unwrap().push(message);
        }

        fn on_exit(&self, code: Option<i32>) {
            *self.exit.lock().unwrap() = Some(code);
            self.exited.notify_one();
        }
    }

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec::new("sh", vec!["-c".into(), script.into()], std::env::temp_dir())
    }

    #[tokio::test]
    async fn test_reads_frames_and_reports_exit_code() {
        let body = r#"{"seq":1,"type":"event","event":"initialized"}"#;
        let script = format!("printf 'Content-Length: {}\\r\\n\\r\\n{}'; exit 7", body.len(), body);

        let recorder = Arc::new(Recorder::default());
        let conn = ProcessConnection::<Value>::spawn("test", &sh(&script), recorder.clone()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), recorder.exited.notified())
            .await
            .unwrap();

        assert_eq!(
            *recorder.messages.lock().unwrap(),
            vec![json!({"seq": 1, "type": "event", "event": "initialized"})]
        );
        assert_eq!(*recorder.exit.lock().unwrap(), Some(Some(7)));
        assert!(!conn.is_alive());
    }

    #[tokio::test]
    async fn test_hostile_length_still_reports_exit() {
        let script = "printf 'Content-Length: 18446744073709551615\\r\\n\\r\\n'; exit 3";

        let recorder = Arc::new(Recorder::default());
        let conn = ProcessConnection::<Value>::spawn("test", &sh(script), recorder.clone()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), recorder.exited.notified())
            .await
            .unwrap();

        assert!(recorder.messages.lock().unwrap().is_empty());
        assert_eq!(*recorder.exit.lock().unwrap(), Some(Some(3)));
        assert!(!conn.is_alive());
    }

    #[tokio::test]
    async fn test_echoes_written_frames() {
        // `cat` echoes our own frames back, exercising both directions.
        let recorder = Arc::new(Recorder::default());
        let conn = ProcessConnection::<Value>::spawn(
            "cat",
            &LaunchSpec::new("cat", vec![], std::env::temp_dir()),
            recorder.clone(),
        )
        .unwrap();

        conn.send(&json!({"n": 1})).unwrap();
        conn.send(&json!({"n": 2})).unwrap();

        for _ in 0..100 {
            if recorder.messages.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(*recorder.messages.lock().unwrap(), vec![json!({"n": 1}), json!({"n": 2})]);

        conn.terminate().await;
        tokio::time::timeout(Duration::from_secs(5), recorder.exited.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_is_typed() {
        let recorder = Arc::new(Recorder::default());
        let result = ProcessConnection::<Value>::spawn(
            "missing",
            &LaunchSpec::new("definitely-not-a-real-binary-xyz", vec![], std::env::temp_dir()),
            recorder,
        );
        assert!(matches!(result, Err(RpcError::Spawn { .. })));
    }
}

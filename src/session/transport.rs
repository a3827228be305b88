use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::runtime::Runtime;
use tokio::time::timeout;

use crate::config::SimulatorConfig;
use crate::error::SessionError;

use super::MAXIMUM_RESPONSE_LENGTH;

/// Byte-stream link to a simulator
///
/// This is the narrow seam between the line protocol and whatever is on the
/// other end, a real subprocess or an in-memory stand-in.
pub trait Transport: Send {
    /// Writes `data` followed by a single newline and flushes it
    fn send_line(&mut self, data: &[u8]) -> Result<(), SessionError>;

    /// Reads one line, newline included, but never more than `limit + 1`
    /// bytes. An empty buffer means the other end closed its output.
    fn read_line(&mut self, limit: usize) -> Result<Vec<u8>, SessionError>;

    /// Closes both directions and releases the other end
    fn shutdown(&mut self) -> Result<(), SessionError>;
}

/// Something that can start a fresh simulator for each session
pub trait Launch: Send + Sync {
    fn launch(&self) -> Result<Box<dyn Transport>, SessionError>;

    fn max_reply_len(&self) -> usize {
        MAXIMUM_RESPONSE_LENGTH
    }
}

/// Launches the simulator executable as a child process
pub struct ProcessLauncher {
    config: SimulatorConfig,
}

impl ProcessLauncher {
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }
}

impl Launch for ProcessLauncher {
    fn launch(&self) -> Result<Box<dyn Transport>, SessionError> {
        let transport = ProcessTransport::spawn(&self.config)?;
        Ok(Box::new(transport))
    }

    fn max_reply_len(&self) -> usize {
        self.config.max_reply_len
    }
}

/// Child process reached through its standard input and output
///
/// Blocking from the caller's point of view. Each write and read runs on a
/// private single-threaded runtime so it can be bounded by a wall-clock
/// timeout; on expiry the child is killed.
pub struct ProcessTransport {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    stdout: Option<BufReader<ChildStdout>>,
    reply_timeout: Duration,
    // dropped last, after the child and its pipes
    runtime: Runtime,
}

impl ProcessTransport {
    pub fn spawn(config: &SimulatorConfig) -> Result<Self, SessionError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(SessionError::Launch)?;

        let mut cmd = Command::new(&config.executable);
        cmd.args(&config.args)
            .current_dir(&config.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = {
            let _guard = runtime.enter();
            cmd.spawn().map_err(SessionError::Launch)?
        };

        let stdin = child.stdin.take().ok_or_else(|| {
            SessionError::Launch(std::io::Error::other("simulator stdin was not captured"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            SessionError::Launch(std::io::Error::other("simulator stdout was not captured"))
        })?;

        log::info!(
            "Spawned simulator {} (pid {:?})",
            config.executable.display(),
            child.id()
        );

        Ok(Self {
            child,
            stdin: Some(BufWriter::new(stdin)),
            stdout: Some(BufReader::new(stdout)),
            reply_timeout: config.reply_timeout.into(),
            runtime,
        })
    }

    fn timed_out(&mut self) -> SessionError {
        log::warn!(
            "Simulator (pid {:?}) unresponsive for {:?}, killing it",
            self.child.id(),
            self.reply_timeout
        );
        if let Err(e) = self.child.start_kill() {
            log::error!("Failed to kill unresponsive simulator: {e}");
        }
        SessionError::Timeout(self.reply_timeout.as_millis() as u64)
    }
}

impl Transport for ProcessTransport {
    fn send_line(&mut self, data: &[u8]) -> Result<(), SessionError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SessionError::Protocol("simulator input already closed".into()))?;

        let reply_timeout = self.reply_timeout;
        let written = self.runtime.block_on(async {
            let write = async {
                stdin.write_all(data).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await
            };
            timeout(reply_timeout, write).await
        });

        match written {
            Ok(result) => result.map_err(SessionError::Io),
            Err(_) => Err(self.timed_out()),
        }
    }

    fn read_line(&mut self, limit: usize) -> Result<Vec<u8>, SessionError> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| SessionError::Protocol("simulator output already closed".into()))?;

        let reply_timeout = self.reply_timeout;
        let read = self.runtime.block_on(async {
            let read = async {
                let mut line = Vec::new();
                let mut bounded = stdout.take(limit as u64 + 1);
                bounded.read_until(b'\n', &mut line).await?;
                Ok::<_, std::io::Error>(line)
            };
            timeout(reply_timeout, read).await
        });

        match read {
            Ok(result) => result.map_err(SessionError::Io),
            Err(_) => Err(self.timed_out()),
        }
    }

    fn shutdown(&mut self) -> Result<(), SessionError> {
        // closing stdin is the simulator's cue to exit if it missed the quit
        drop(self.stdin.take());
        drop(self.stdout.take());

        let reply_timeout = self.reply_timeout;
        let child = &mut self.child;
        let waited = self
            .runtime
            .block_on(async { timeout(reply_timeout, child.wait()).await });

        match waited {
            Ok(status) => {
                log::debug!("Simulator exited with {:?}", status?);
                Ok(())
            }
            Err(_) => {
                log::warn!("Simulator did not exit after quit, killing it");
                self.runtime.block_on(self.child.kill())?;
                Ok(())
            }
        }
    }
}

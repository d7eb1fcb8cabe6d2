//! Out-of-process SIP calling via `linphonec`.
//!
//! The agent is driven through its stdin command console; its output is
//! forwarded to the log from a reader thread.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CallError {
    #[error("failed to start telephony agent: {0}")]
    Spawn(std::io::Error),
    #[error("telephony agent not running")]
    NotRunning,
    #[error("failed to send command to telephony agent: {0}")]
    Command(std::io::Error),
}

/// Black-box call placement.
pub trait CallAgent: Send {
    fn call(&mut self) -> Result<(), CallError>;
    fn hangup(&mut self) -> Result<(), CallError>;
    /// Stop the agent process, if any.
    fn shutdown(&mut self);
}

/// `linphonec` child process dialing a fixed SIP target.
pub struct Linphone {
    program: String,
    sip_target: String,
    soundcard: Option<u32>,
    boot_delay: Duration,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl Linphone {
    pub fn new(sip_target: impl Into<String>, soundcard: Option<u32>) -> Self {
        Self {
            program: "linphonec".to_string(),
            sip_target: sip_target.into(),
            soundcard,
            boot_delay: Duration::from_secs(2),
            child: None,
            stdin: None,
        }
    }

    /// Override the executable (e.g. an absolute path).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_boot_delay(mut self, delay: Duration) -> Self {
        self.boot_delay = delay;
        self
    }

    fn is_running(&mut self) -> bool {
        match self.child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                tracing::warn!(%status, "telephony agent exited");
                self.child = None;
                self.stdin = None;
                false
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "failed to poll telephony agent");
                false
            }
            None => false,
        }
    }

    fn start(&mut self) -> Result<(), CallError> {
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(CallError::Spawn)?;

        if let Some(stdout) = child.stdout.take() {
            let spawned = std::thread::Builder::new()
                .name("doorward-linphone".into())
                .spawn(move || {
                    for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                        tracing::debug!(line = %line.trim(), "linphonec");
                    }
                });
            if let Err(e) = spawned {
                tracing::warn!(error = %e, "failed to spawn linphonec output reader");
            }
        }

        self.stdin = child.stdin.take();
        self.child = Some(child);
        tracing::info!(program = %self.program, "telephony agent started");

        std::thread::sleep(self.boot_delay);
        if let Some(card) = self.soundcard {
            self.send(&format!("soundcard use {card}"))?;
        }
        Ok(())
    }

    fn send(&mut self, command: &str) -> Result<(), CallError> {
        let stdin = self.stdin.as_mut().ok_or(CallError::NotRunning)?;
        writeln!(stdin, "{command}").map_err(CallError::Command)?;
        stdin.flush().map_err(CallError::Command)
    }
}

impl CallAgent for Linphone {
    fn call(&mut self) -> Result<(), CallError> {
        if !self.is_running() {
            self.start()?;
        }
        tracing::info!(sip_target = %self.sip_target, "placing call");
        let command = format!("call {}", self.sip_target);
        self.send(&command)
    }

    fn hangup(&mut self) -> Result<(), CallError> {
        tracing::info!("hanging up");
        self.send("terminate")
    }

    fn shutdown(&mut self) {
        if self.child.is_none() {
            return;
        }
        if let Err(e) = self.send("quit") {
            tracing::debug!(error = %e, "quit not delivered to telephony agent");
        }
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                tracing::debug!(error = %e, "telephony agent already gone");
            }
            if let Err(e) = child.wait() {
                tracing::debug!(error = %e, "telephony agent not reaped");
            }
        }
        tracing::info!("telephony agent stopped");
    }
}

impl Drop for Linphone {
    fn drop(&mut self) {
        self.shutdown();
    }
}

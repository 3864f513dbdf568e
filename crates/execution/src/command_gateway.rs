//! Gateway that runs a local agent command per message.
//!
//! The prompt is written to the command's stdin; each stdout line streams
//! back as a delta and a zero exit finishes the run with the full stdout.

use std::path::PathBuf;
use std::process::Stdio;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::gateway::{Gateway, GatewayError, GatewayEvent, GatewaySignal, SendAck, SendRequest};

/// Runs `sh -c <command>` for every message.
pub struct CommandGateway {
    command: String,
    workdir: Option<PathBuf>,
    signals: mpsc::Sender<GatewaySignal>,
}

impl CommandGateway {
    /// Create a gateway that reports events on `signals`.
    pub fn new(command: impl Into<String>, signals: mpsc::Sender<GatewaySignal>) -> Self {
        Self {
            command: command.into(),
            workdir: None,
            signals,
        }
    }

    /// Run the command in `dir`.
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }
}

#[async_trait]
impl Gateway for CommandGateway {
    async fn send(&self, request: SendRequest) -> Result<SendAck, GatewayError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .env("MISSION_SESSION_KEY", &request.session_key)
            .env("MISSION_RUN_ID", request.idempotency_key.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        tracing::debug!("Spawned agent command for run {}", request.idempotency_key);

        if let Some(mut stdin) = child.stdin.take() {
            // An agent that never reads its prompt closes the pipe early.
            if let Err(e) = stdin.write_all(request.message.as_bytes()).await {
                tracing::debug!("Agent did not read prompt for {}: {}", request.idempotency_key, e);
            }
        }
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::Send("agent stdout unavailable".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| GatewayError::Send("agent stderr unavailable".into()))?;

        let run_id = request.idempotency_key.clone();
        let signals = self.signals.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut output = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                output.push_str(&line);
                output.push('\n');
                let delta = GatewayEvent::Delta {
                    run_id: run_id.clone(),
                    text: format!("{}\n", line),
                };
                if signals.send(GatewaySignal::Event(delta)).await.is_err() {
                    return;
                }
            }

            let mut err_text = String::new();
            let _ = stderr.read_to_string(&mut err_text).await;

            let event = match child.wait().await {
                Ok(status) if status.success() => GatewayEvent::Final {
                    run_id,
                    text: Some(output.trim_end().to_string()),
                },
                Ok(status) => GatewayEvent::Error {
                    run_id,
                    message: failure_message(&format!("agent exited with {}", status), &err_text),
                },
                Err(e) => GatewayEvent::Error {
                    run_id,
                    message: format!("agent wait failed: {}", e),
                },
            };
            let _ = signals.send(GatewaySignal::Event(event)).await;
        });

        Ok(SendAck::default())
    }
}

fn failure_message(status: &str, stderr: &str) -> String {
    let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
    if tail.is_empty() {
        status.to_string()
    } else {
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        format!("{}: {}", status, tail.join(" | "))
    }
}

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;

use crate::DeploySettings;
use crate::error::DeployError;
use crate::notify::Notifier;
use crate::trigger::TriggerDefinition;
use crate::webhook::WebhookData;

/// Maximum size for captured output before truncation (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Maximum number of output characters embedded in a notification
pub const MAX_MESSAGE_OUTPUT: usize = 1800;

/// How long to keep reading output once the command has exited
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

const TRUNCATED_MARKER: &str = "\n... (output truncated)";

/// Terminal state of a deploy run
#[derive(Debug)]
pub enum DeployOutcome {
    Success { output: String },
    Failure { error: DeployError, output: String },
}

impl DeployOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeployOutcome::Success { .. })
    }

    pub fn output(&self) -> &str {
        match self {
            DeployOutcome::Success { output } | DeployOutcome::Failure { output, .. } => output,
        }
    }
}

/// One execution of a trigger's command for one matched event. The v7 id
/// carries the creation time.
#[derive(Debug)]
pub struct DeployJob {
    pub id: Uuid,
    pub trigger: Arc<TriggerDefinition>,
    pub data: WebhookData,
}

impl DeployJob {
    pub fn new(trigger: Arc<TriggerDefinition>, data: WebhookData) -> Self {
        Self {
            id: Uuid::now_v7(),
            trigger,
            data,
        }
    }

    /// Run the command, then report the result. Intended to be spawned and
    /// never awaited by the request path.
    pub async fn run(self, settings: DeploySettings, notifier: Notifier) {
        let span = info_span!("deploy", job_id = %self.id, trigger = %self.trigger.name);
        async move {
            info!("Deploying: {}", self.trigger.name);
            let start = Instant::now();
            let outcome = self.execute(&settings).await;
            let message = render_message(
                &self.trigger.name,
                &outcome,
                start.elapsed(),
                self.trigger.include_output(&settings),
            );

            match &outcome {
                DeployOutcome::Success { output } => {
                    info!("{}", message);
                    info!("command output:\n{}", output);
                }
                DeployOutcome::Failure { error, output } => {
                    error!("Deploying {} failed: {}", self.trigger.name, error);
                    error!("command output:\n{}", output);
                }
            }

            notifier
                .notify(&self.trigger.name, &self.trigger.notify_endpoint, &message)
                .await;
        }
        .instrument(span)
        .await
    }

    /// Run the trigger's command in its working directory and capture
    /// combined stdout/stderr.
    pub async fn execute(&self, settings: &DeploySettings) -> DeployOutcome {
        let trigger = &self.trigger;
        let dir = &trigger.working_directory;

        match tokio::fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return failure(DeployError::WorkingDirectory {
                    path: dir.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotADirectory,
                        "not a directory",
                    ),
                });
            }
            Err(source) => {
                return failure(DeployError::WorkingDirectory {
                    path: dir.clone(),
                    source,
                });
            }
        }

        info!(
            "Running (cwd = '{}'): {} {}",
            dir.display(),
            trigger.command,
            trigger.arguments.join(" ")
        );

        let mut command = Command::new(&trigger.command);
        command
            .args(&trigger.arguments)
            .current_dir(dir)
            .env("WEBHOOK_TRIGGER", &trigger.name)
            .env("WEBHOOK_JOB_ID", self.id.to_string())
            .envs(self.data.env_vars())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down everything the command started
        #[cfg(unix)]
        {
            command.process_group(0);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                return failure(DeployError::Spawn {
                    command: trigger.command.clone(),
                    source,
                });
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_chunks(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_chunks(stderr, tx.clone()));
        }
        drop(tx);

        let mut captured = Vec::new();
        let status = match trigger.timeout(settings) {
            Some(limit) => {
                let timed =
                    tokio::time::timeout(limit, collect_until_exit(&mut child, &mut rx, &mut captured))
                        .await;
                match timed {
                    Ok(status) => status,
                    Err(_) => {
                        kill_command(&mut child).await;
                        drain_output(&mut rx, &mut captured).await;
                        return DeployOutcome::Failure {
                            error: DeployError::TimedOut(limit),
                            output: finish_output(captured),
                        };
                    }
                }
            }
            None => collect_until_exit(&mut child, &mut rx, &mut captured).await,
        };

        // Background processes started by the command may hold the pipes
        // open; the exit status alone decides the outcome.
        drain_output(&mut rx, &mut captured).await;

        let output = finish_output(captured);
        match status {
            Ok(status) if status.success() => DeployOutcome::Success { output },
            Ok(status) => DeployOutcome::Failure {
                error: DeployError::ExitStatus(status),
                output,
            },
            Err(e) => DeployOutcome::Failure {
                error: DeployError::Output(e),
                output,
            },
        }
    }
}

fn failure(error: DeployError) -> DeployOutcome {
    DeployOutcome::Failure {
        error,
        output: String::new(),
    }
}

async fn collect_until_exit(
    child: &mut Child,
    rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    captured: &mut Vec<u8>,
) -> std::io::Result<std::process::ExitStatus> {
    let wait = child.wait();
    tokio::pin!(wait);
    loop {
        tokio::select! {
            status = &mut wait => return status,
            Some(chunk) = rx.recv() => append_capped(captured, &chunk),
        }
    }
}

/// Collect output still buffered after exit, for at most `OUTPUT_GRACE`
async fn drain_output(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>, captured: &mut Vec<u8>) {
    let drain = async {
        while let Some(chunk) = rx.recv().await {
            append_capped(captured, &chunk);
        }
    };
    if tokio::time::timeout(OUTPUT_GRACE, drain).await.is_err() {
        debug!("Output pipes still open after exit, keeping what was captured");
    }
}

/// Kill the command together with its process group
async fn kill_command(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // Spawned with process_group(0): the group id is the child's pid
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                warn!("Failed to kill process group {}: {}", pid, e);
            }
        }
    }
    if let Err(e) = child.kill().await {
        error!("Failed to kill timed out command: {}", e);
    }
}

async fn forward_chunks<R>(mut reader: R, tx: mpsc::UnboundedSender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
}

fn append_capped(captured: &mut Vec<u8>, chunk: &[u8]) {
    let room = (MAX_OUTPUT_SIZE + 1).saturating_sub(captured.len());
    captured.extend_from_slice(&chunk[..chunk.len().min(room)]);
}

/// Decode captured bytes, marking output that hit the size cap
fn finish_output(mut captured: Vec<u8>) -> String {
    let truncated = captured.len() > MAX_OUTPUT_SIZE;
    captured.truncate(MAX_OUTPUT_SIZE);
    let mut output = String::from_utf8_lossy(&captured).into_owned();
    if truncated {
        output.push_str(TRUNCATED_MARKER);
    }
    output
}

/// Keep at most `max_chars` trailing characters of `output`
fn tail_chars(output: &str, max_chars: usize) -> String {
    let count = output.chars().count();
    if count <= max_chars {
        return output.to_string();
    }
    let skip = count - max_chars;
    let tail: String = output.chars().skip(skip).collect();
    format!("... (output truncated)\n{}", tail)
}

/// Human readable result message for the chat notification
pub fn render_message(
    name: &str,
    outcome: &DeployOutcome,
    elapsed: Duration,
    include_output: bool,
) -> String {
    let secs = elapsed.as_secs_f64();
    match outcome {
        DeployOutcome::Failure { error, output } => {
            let mut message = format!("**Deploying {} FAILED**:\n", name);
            if !output.trim().is_empty() {
                message.push_str(&format!(
                    "```\n{}\n```\n",
                    tail_chars(output.trim_end(), MAX_MESSAGE_OUTPUT)
                ));
            }
            message.push_str(&format!(
                "Failed to deploy {}: {} in {:.2} seconds",
                name, error, secs
            ));
            message
        }
        DeployOutcome::Success { output } => {
            let mut message = format!("Deployed {} successfully in {:.2} seconds", name, secs);
            if include_output && !output.trim().is_empty() {
                message.push_str(&format!(
                    "\n```\n{}\n```",
                    tail_chars(output.trim_end(), MAX_MESSAGE_OUTPUT)
                ));
            }
            message
        }
    }
}

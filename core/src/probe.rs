//! Probe execution - runs the external measurement command in a subprocess
//!
//! Process isolation keeps a hung or crashing probe from touching scheduler
//! state; the timeout bounds each attempt and `kill_on_drop` reaps the
//! child when the attempt is abandoned.

use crate::config::ProbeConfig;
use crate::error::{Error, Result};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// Raw outcome of one probe invocation.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Unparsed payload from the probe's stdout
    pub raw: String,
    /// Process id of the isolated runner
    pub pid: Option<u32>,
    /// Wall-clock duration of the call
    pub elapsed: Duration,
}

/// Seam between the measurement cycle and the external probe.
pub trait Probe: Send + Sync {
    fn run(&self) -> impl std::future::Future<Output = Result<ProbeOutcome>> + Send;
}

pub struct ProbeRunner {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProbeRunner {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl Probe for ProbeRunner {
    /// One attempt, no internal retries - the next tick is the retry.
    async fn run(&self) -> Result<ProbeOutcome> {
        let started = Instant::now();

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Probe(format!("failed to spawn {}: {e}", self.command)))?;

        let pid = child.id();
        debug!("probe started: {} (pid {:?})", self.command, pid);

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Error::Probe(format!("probe wait failed: {e}"))),
            Err(_) => {
                return Err(Error::Probe(format!(
                    "timed out after {} seconds",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Probe(format!(
                "probe exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if raw.is_empty() {
            return Err(Error::Probe("probe produced no output".to_string()));
        }

        let elapsed = started.elapsed();
        debug!("probe finished in {:.1}s", elapsed.as_secs_f64());

        Ok(ProbeOutcome { raw, pid, elapsed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeConfig;

    fn runner(command: &str, args: &[&str], timeout_secs: u64) -> ProbeRunner {
        ProbeRunner::new(&ProbeConfig {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_secs,
        })
    }

    #[tokio::test]
    async fn captures_stdout_pid_and_elapsed() {
        let outcome = runner("echo", &[r#"{"ok":true}"#], 5).run().await.unwrap();
        assert_eq!(outcome.raw, r#"{"ok":true}"#);
        assert!(outcome.pid.is_some());
        assert!(outcome.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_command_is_a_probe_error() {
        let err = runner("speedlog-no-such-probe", &[], 5).run().await.unwrap_err();
        assert!(matches!(err, Error::Probe(_)));
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn slow_probe_times_out() {
        let err = runner("sleep", &["30"], 1).run().await.unwrap_err();
        assert!(matches!(err, Error::Probe(_)));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn failing_probe_reports_exit_status() {
        let err = runner("sh", &["-c", "echo oops >&2; exit 3"], 5)
            .run()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("oops"));
    }

    #[tokio::test]
    async fn empty_output_is_rejected() {
        let err = runner("true", &[], 5).run().await.unwrap_err();
        assert!(err.to_string().contains("no output"));
    }
}

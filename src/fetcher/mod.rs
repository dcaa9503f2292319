//! Fetch worker transports.
//!
//! Every transport runs the actual upstream interaction as a subprocess
//! returning one JSON blob on stdout; the variants only differ in how the
//! command line is built. A dedicated exit code distinguishes structured
//! upstream errors from everything else.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::error;

use crate::models::FetcherIdentity;

/// Hard wall-clock ceiling for one fetch.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Exit code the fetch script uses for structured upstream errors.
const STRUCTURED_ERROR_EXIT: i32 = 5;

#[derive(Debug, Error)]
pub enum FetchError {
    /// The upstream service answered with a structured error.
    #[error("upstream error {code}: {msg}")]
    Response { code: i64, msg: String },
    /// The fetch process failed, timed out, or returned garbage.
    #[error("fetch failed: {0}")]
    Fatal(String),
}

impl FetchError {
    /// Upstream HTTP 500, the one error the dispatcher rides out.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Response { code: 500, .. })
    }
}

/// Wire shape of a structured fetcher error.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i64,
    msg: String,
}

/// How a transport reaches its fetch script.
#[derive(Debug, Clone)]
pub enum TransportKind {
    /// Child process running the script directly.
    Local { script: PathBuf },
    /// Child process under another identity.
    Sudo {
        script: String,
        user: String,
        group: String,
    },
    /// Remote script over ssh, arguments passed on stdin.
    Ssh { user: String, host: String },
}

/// A fetch worker with its provenance identity.
#[derive(Debug, Clone)]
pub struct Transport {
    pub kind: TransportKind,
    /// Upstream API flavor this worker serves.
    pub api: String,
}

impl Transport {
    pub fn local(script: PathBuf, api: String) -> Self {
        Self {
            kind: TransportKind::Local { script },
            api,
        }
    }

    /// (name, host, api) identity interned into the store for provenance.
    pub fn identity(&self) -> FetcherIdentity {
        let (name, host) = match &self.kind {
            TransportKind::Local { script } => {
                (format!("popen:{}", script.display()), "localhost".to_string())
            }
            TransportKind::Sudo { script, user, .. } => {
                (format!("sudo:{}:{}", user, script), "localhost".to_string())
            }
            TransportKind::Ssh { user, host } => (format!("ssh:{}", user), host.clone()),
        };
        FetcherIdentity {
            name,
            host,
            api: self.api.clone(),
        }
    }

    /// Fetch one window. Returns the raw payload bytes.
    pub async fn fetch(
        &self,
        window: &str,
        keyword: &str,
        geo: Option<&str>,
    ) -> Result<Vec<u8>, FetchError> {
        match &self.kind {
            TransportKind::Local { script } => {
                let mut cmd = Command::new(script);
                cmd.arg(window).arg(keyword);
                if let Some(geo) = geo {
                    cmd.arg(geo);
                }
                run_fetch(cmd, None).await
            }
            TransportKind::Sudo {
                script,
                user,
                group,
            } => {
                let mut cmd = Command::new("sudo");
                cmd.args(["-u", user.as_str(), "-g", group.as_str()]);
                cmd.args(["/bin/sh", script.as_str(), "fetch"]);
                cmd.arg(window).arg(keyword);
                if let Some(geo) = geo {
                    cmd.arg(geo);
                }
                run_fetch(cmd, None).await
            }
            TransportKind::Ssh { user, host } => {
                let mut cmd = Command::new("ssh");
                cmd.arg("-T").arg(format!("{}@{}", user, host));
                // The remote launcher reads three lines and decides whether
                // a geo is present by whether the third line is empty.
                let stdin = format!("{}\n{}\n{}\n", window, keyword, geo.unwrap_or(""));
                run_fetch(cmd, Some(stdin.into_bytes())).await
            }
        }
    }
}

/// Spawn the fetch command, feed it stdin if given, and collect stdout
/// under the wall-clock ceiling.
async fn run_fetch(mut cmd: Command, stdin: Option<Vec<u8>>) -> Result<Vec<u8>, FetchError> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| FetchError::Fatal(format!("failed to spawn fetcher: {e}")))?;

    if let Some(bytes) = stdin {
        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| FetchError::Fatal("fetcher stdin unavailable".to_string()))?;
        pipe.write_all(&bytes)
            .await
            .map_err(|e| FetchError::Fatal(format!("failed to write fetcher stdin: {e}")))?;
        // Dropping the pipe closes it so the remote launcher sees EOF.
    }

    let output = match tokio::time::timeout(FETCH_TIMEOUT, child.wait_with_output()).await {
        Ok(result) => {
            result.map_err(|e| FetchError::Fatal(format!("fetcher wait failed: {e}")))?
        }
        Err(_) => {
            return Err(FetchError::Fatal(format!(
                "fetcher timed out after {}s",
                FETCH_TIMEOUT.as_secs()
            )))
        }
    };

    if output.status.success() {
        return Ok(output.stdout);
    }

    if output.status.code() == Some(STRUCTURED_ERROR_EXIT) {
        if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(&output.stdout) {
            return Err(FetchError::Response {
                code: envelope.error.code,
                msg: envelope.error.msg,
            });
        }
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    error!(
        "fetcher exited with {}; stdout: {}; stderr: {}",
        output.status,
        stdout.trim(),
        stderr.trim()
    );
    Err(FetchError::Fatal(format!(
        "fetcher exited with {}",
        output.status
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_error_envelope_parses() {
        let raw = r#"{"error":{"code":500,"msg":"The request failed"}}"#;
        let envelope: ErrorEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.error.code, 500);
        assert_eq!(envelope.error.msg, "The request failed");
    }

    #[test]
    fn identity_distinguishes_workers() {
        let a = Transport::local(PathBuf::from("/opt/fetch-a"), "web".to_string());
        let b = Transport::local(PathBuf::from("/opt/fetch-b"), "web".to_string());
        assert_ne!(a.identity().name, b.identity().name);
        assert_eq!(a.identity().host, "localhost");

        let ssh = Transport {
            kind: TransportKind::Ssh {
                user: "miner".to_string(),
                host: "worker-3".to_string(),
            },
            api: "web".to_string(),
        };
        assert_eq!(ssh.identity().host, "worker-3");
    }

    #[test]
    fn server_error_detection() {
        let e = FetchError::Response {
            code: 500,
            msg: "boom".to_string(),
        };
        assert!(e.is_server_error());
        let e = FetchError::Response {
            code: 429,
            msg: "slow down".to_string(),
        };
        assert!(!e.is_server_error());
        assert!(!FetchError::Fatal("x".to_string()).is_server_error());
    }
}

//! Room creation through an external helper process.
//!
//! Some deployments create rooms with a standalone helper program instead of
//! a live signaling connection. [`ProcessBridge`] runs that program with the
//! request on its command line, waits a bounded time for a single JSON
//! document on stdout, and turns every outcome, including failures, into a
//! [`BridgeResponse`].

use std::ffi::OsString;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Default upper bound on a helper run.
pub const DEFAULT_BRIDGE_TIMEOUT: Duration = Duration::from_secs(15);

/// How long to wait for the output pipes to drain after the helper was killed.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

const ERR_MISSING_INPUT: &str = "missing server URL or username";
const ERR_TIMED_OUT: &str = "helper process timed out; server may be down";
const ERR_NO_OUTPUT: &str = "no output from helper process";
const ERR_INVALID_OUTPUT: &str = "invalid response from helper process, expected JSON";

/// Request to create (or join) a room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRequest {
    pub server_url: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_code: Option<String>,
    /// Echo the helper's stdout to the log.
    #[serde(default)]
    pub debug: bool,
}

impl BridgeRequest {
    pub fn new(server_url: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            username: username.into(),
            room_code: None,
            debug: false,
        }
    }

    #[must_use]
    pub fn with_room_code(mut self, room_code: impl Into<String>) -> Self {
        self.room_code = Some(room_code.into());
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Helper arguments for this request.
    fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--server-url".into(),
            self.server_url.clone().into(),
            "--username".into(),
            self.username.clone().into(),
        ];
        if let Some(code) = self.room_code.as_deref().filter(|c| !c.is_empty()) {
            args.push("--room-code".into());
            args.push(code.into());
        }
        if self.debug {
            args.push("--debug".into());
        }
        args
    }
}

/// Outcome of a bridge call.
///
/// A successful run carries whatever the helper printed; a failed one carries
/// `error` and, where available, the helper's stderr and raw stdout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unparsed stdout, kept when it was not valid JSON.
    #[serde(
        rename = "rawOutput",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub raw_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl BridgeResponse {
    /// A response carrying only `error`.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    #[must_use]
    fn with_stderr(mut self, stderr: String) -> Self {
        self.stderr = Some(stderr);
        self
    }

    /// Returns `true` if the call failed.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Request/response interface for room creation outside a live connection.
#[async_trait]
pub trait RoomBridge: Send + Sync {
    /// Run one request. Always produces exactly one response; failures are
    /// reported in [`BridgeResponse::error`].
    async fn create_room(&self, request: BridgeRequest) -> BridgeResponse;
}

/// [`RoomBridge`] that runs a helper program.
///
/// The helper is invoked as
/// `program [args...] --server-url URL --username NAME [--room-code CODE] [--debug]`
/// and is expected to print one JSON object on stdout. If it has not exited
/// within the timeout it is killed.
#[derive(Debug, Clone)]
pub struct ProcessBridge {
    program: OsString,
    args: Vec<OsString>,
    timeout: Duration,
}

impl ProcessBridge {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_BRIDGE_TIMEOUT,
        }
    }

    /// Arguments placed before the request arguments, e.g. a script path.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Defaults to [`DEFAULT_BRIDGE_TIMEOUT`].
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl RoomBridge for ProcessBridge {
    async fn create_room(&self, request: BridgeRequest) -> BridgeResponse {
        if request.server_url.trim().is_empty() || request.username.trim().is_empty() {
            return BridgeResponse::failure(ERR_MISSING_INPUT);
        }

        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .args(request.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            server_url = %request.server_url,
            username = %request.username,
            "spawning room helper"
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("failed to spawn room helper: {e}");
                return BridgeResponse::failure(format!("failed to spawn helper process: {e}"));
            }
        };

        // Take the pipes so the child can still be killed on timeout.
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let mut stdout_handle = tokio::spawn(read_pipe(stdout_pipe, "stdout"));
        let mut stderr_handle = tokio::spawn(read_pipe(stderr_pipe, "stderr"));

        let exited = tokio::select! {
            status = child.wait() => Some(status),
            () = tokio::time::sleep_until(deadline) => None,
        };

        let Some(status) = exited else {
            if let Err(e) = child.kill().await {
                warn!("failed to kill room helper: {e}");
            }
            stdout_handle.abort();
            let stderr = match tokio::time::timeout(PIPE_DRAIN_TIMEOUT, stderr_handle).await {
                Ok(Ok(stderr)) => stderr,
                _ => String::new(),
            };
            return self.timed_out(stderr);
        };

        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        match status {
            Ok(status) => debug!(code = ?status.code(), elapsed_ms, "room helper exited"),
            Err(e) => warn!("failed to wait for room helper: {e}"),
        }

        // A descendant of the helper can keep the pipes open after the helper
        // itself exits, so draining shares the same deadline.
        let drained = tokio::time::timeout_at(deadline, async {
            let stdout = (&mut stdout_handle).await.unwrap_or_default();
            let stderr = (&mut stderr_handle).await.unwrap_or_default();
            (stdout, stderr)
        })
        .await;
        let Ok((stdout, stderr)) = drained else {
            stdout_handle.abort();
            stderr_handle.abort();
            debug!("room helper output still open after exit");
            return self.timed_out(String::new());
        };

        if !stderr.trim().is_empty() {
            warn!("room helper stderr: {}", stderr.trim());
        }
        if request.debug {
            debug!("room helper stdout: {}", stdout.trim());
        }
        parse_output(stdout, stderr)
    }
}

impl ProcessBridge {
    fn timed_out(&self, stderr: String) -> BridgeResponse {
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        warn!(timeout_ms, "room helper timed out");
        BridgeResponse::failure(ERR_TIMED_OUT).with_stderr(stderr)
    }
}

async fn read_pipe(pipe: Option<impl tokio::io::AsyncRead + Unpin>, name: &'static str) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!("failed to read room helper {name}: {e}");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn parse_output(stdout: String, stderr: String) -> BridgeResponse {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return BridgeResponse::failure(ERR_NO_OUTPUT).with_stderr(stderr);
    }
    match serde_json::from_str::<BridgeResponse>(trimmed) {
        Ok(response) => response,
        Err(e) => {
            warn!("room helper printed invalid JSON: {e}");
            BridgeResponse {
                raw_output: Some(stdout),
                ..BridgeResponse::failure(ERR_INVALID_OUTPUT).with_stderr(stderr)
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn request_args() {
        let args = BridgeRequest::new("http://h:5000", "alice")
            .with_room_code("ABC123")
            .with_debug(true)
            .to_args();
        assert_eq!(
            args,
            [
                "--server-url",
                "http://h:5000",
                "--username",
                "alice",
                "--room-code",
                "ABC123",
                "--debug"
            ]
            .map(OsString::from)
        );

        let args = BridgeRequest::new("http://h", "bob").to_args();
        assert_eq!(args.len(), 4);
    }

    #[test]
    fn request_uses_camel_case() {
        let json = serde_json::to_value(BridgeRequest::new("http://h", "bob")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"serverUrl": "http://h", "username": "bob", "debug": false})
        );
    }

    #[test]
    fn response_keeps_raw_output_name() {
        let response = BridgeResponse {
            raw_output: Some("oops".into()),
            ..BridgeResponse::failure("bad")
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json, serde_json::json!({"error": "bad", "rawOutput": "oops"}));
    }

    #[test]
    fn parse_output_cases() {
        let ok = parse_output(
            r#"{"status":"ok","room_code":"ABC123","my_ip":"10.0.0.2","my_port":40000}"#.into(),
            String::new(),
        );
        assert!(!ok.is_error());
        assert_eq!(ok.room_code.as_deref(), Some("ABC123"));
        assert_eq!(ok.my_port, Some(40000));

        let empty = parse_output("  \n".into(), "trace".into());
        assert_eq!(empty.error.as_deref(), Some(ERR_NO_OUTPUT));
        assert_eq!(empty.stderr.as_deref(), Some("trace"));

        let junk = parse_output("hello".into(), String::new());
        assert_eq!(junk.error.as_deref(), Some(ERR_INVALID_OUTPUT));
        assert_eq!(junk.raw_output.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn missing_input_does_not_spawn() {
        let bridge = ProcessBridge::new("/definitely/not/a/program");
        let response = bridge.create_room(BridgeRequest::new("", "alice")).await;
        assert_eq!(response, BridgeResponse::failure(ERR_MISSING_INPUT));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let bridge = ProcessBridge::new("/definitely/not/a/program");
        let response = bridge
            .create_room(BridgeRequest::new("http://h", "alice"))
            .await;
        assert!(response
            .error
            .unwrap()
            .starts_with("failed to spawn helper process"));
    }

    #[cfg(unix)]
    fn shell(script: &str) -> ProcessBridge {
        // `sh -c SCRIPT NAME ARGS...`: the request arguments land in $1.. .
        ProcessBridge::new("sh").with_args(["-c", script, "helper"])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn helper_output_is_returned() {
        let bridge = shell(r#"printf '{"status":"ok","room_code":"%s"}' "$6""#);
        let response = bridge
            .create_room(BridgeRequest::new("http://h", "alice").with_room_code("XYZ789"))
            .await;
        assert_eq!(response.status.as_deref(), Some("ok"));
        assert_eq!(response.room_code.as_deref(), Some("XYZ789"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn helper_garbage_keeps_raw_output_and_stderr() {
        let bridge = shell("echo not json; echo boom >&2");
        let response = bridge
            .create_room(BridgeRequest::new("http://h", "alice"))
            .await;
        assert_eq!(response.error.as_deref(), Some(ERR_INVALID_OUTPUT));
        assert_eq!(response.raw_output.as_deref(), Some("not json\n"));
        assert_eq!(response.stderr.as_deref(), Some("boom\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn helper_timeout_kills_process() {
        let bridge = shell("exec sleep 5").with_timeout(Duration::from_millis(100));
        let started = Instant::now();
        let response = bridge
            .create_room(BridgeRequest::new("http://h", "alice"))
            .await;
        assert_eq!(response.error.as_deref(), Some(ERR_TIMED_OUT));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn lingering_descendant_does_not_extend_timeout() {
        // The helper exits at once but leaves a background child holding
        // stdout open.
        let bridge = shell(r#"sleep 3 & printf '{"status":"ok"}'"#)
            .with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let response = bridge
            .create_room(BridgeRequest::new("http://h", "alice"))
            .await;
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "took {:?}",
            started.elapsed()
        );
        assert_eq!(response.error.as_deref(), Some(ERR_TIMED_OUT));
    }
}

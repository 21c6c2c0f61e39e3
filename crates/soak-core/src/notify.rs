//! Best-effort state-change notifications over a local socket.
//!
//! Each notification is one newline-delimited JSON object written on a
//! fresh connection. There is no delivery guarantee and no retry: this
//! is an observability signal for an external listener, not a control
//! channel, and a missing or broken endpoint must never abort a run.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tracing::debug;

/// The one state key currently defined: the in-progress run directory
/// (a path string) or `null` once the run has finished.
pub const ACTIVE_RESULTS_DIRECTORY: &str = "active_results_directory";

/// Fire-and-forget notifier. Unconfigured means every call is a no-op.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    socket: Option<PathBuf>,
}

impl Notifier {
    pub fn new(socket: Option<PathBuf>) -> Self {
        Self { socket }
    }

    pub fn disabled() -> Self {
        Self { socket: None }
    }

    /// Emits `{"state_change": {"changes": {key: value}, "time": ...}}`.
    /// Connection or write failures are logged at debug and swallowed.
    pub async fn notify(&self, key: &str, value: Value) {
        let Some(path) = &self.socket else {
            return;
        };
        if let Err(e) = send(path, key, value).await {
            debug!(
                socket = %path.display(),
                error = %e,
                "state-change notification dropped"
            );
        }
    }
}

#[cfg(unix)]
async fn send(path: &Path, key: &str, value: Value) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;

    let mut changes = serde_json::Map::new();
    changes.insert(key.to_string(), value);
    let message = serde_json::json!({
        "state_change": {
            "changes": changes,
            "time": Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        }
    });
    let mut line = serde_json::to_vec(&message)?;
    line.push(b'\n');

    let mut stream = UnixStream::connect(path).await?;
    stream.write_all(&line).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn send(_path: &Path, _key: &str, _value: Value) -> std::io::Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn unconfigured_notifier_is_a_no_op() {
        let notifier = Notifier::disabled();
        notifier
            .notify(ACTIVE_RESULTS_DIRECTORY, Value::String("/tmp/x".into()))
            .await;
    }

    #[tokio::test]
    async fn broken_endpoint_is_swallowed() {
        let temp = TempDir::new().unwrap();
        let notifier = Notifier::new(Some(temp.path().join("nobody-listening.sock")));
        notifier.notify(ACTIVE_RESULTS_DIRECTORY, Value::Null).await;
    }

    #[tokio::test]
    async fn emits_one_json_object_per_connection() {
        let temp = TempDir::new().unwrap();
        let sock = temp.path().join("soak.sock");
        let listener = UnixListener::bind(&sock).unwrap();

        let notifier = Notifier::new(Some(sock));
        notifier
            .notify(
                ACTIVE_RESULTS_DIRECTORY,
                Value::String("/results/2024-01-21_08.49.56".into()),
            )
            .await;

        let (mut conn, _) = listener.accept().await.unwrap();
        let mut raw = String::new();
        conn.read_to_string(&mut raw).await.unwrap();
        assert!(raw.ends_with('\n'));

        let message: Value = serde_json::from_str(raw.trim_end()).unwrap();
        let change = &message["state_change"];
        assert_eq!(
            change["changes"][ACTIVE_RESULTS_DIRECTORY],
            Value::String("/results/2024-01-21_08.49.56".into())
        );
        let time = change["time"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(time).is_ok());
    }

    #[tokio::test]
    async fn null_value_marks_run_end() {
        let temp = TempDir::new().unwrap();
        let sock = temp.path().join("soak.sock");
        let listener = UnixListener::bind(&sock).unwrap();

        let notifier = Notifier::new(Some(sock));
        notifier.notify(ACTIVE_RESULTS_DIRECTORY, Value::Null).await;

        let (mut conn, _) = listener.accept().await.unwrap();
        let mut raw = String::new();
        conn.read_to_string(&mut raw).await.unwrap();
        let message: Value = serde_json::from_str(raw.trim_end()).unwrap();
        assert!(message["state_change"]["changes"][ACTIVE_RESULTS_DIRECTORY].is_null());
    }
}

//! Polling of service-side processes such as a remote-native crawl.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::RemoteIndex;

/// State of a service-side ingest process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    Queued,
    Processing,
    Complete,
    Error,
    Cancelled,
    /// A status this client does not know; treated as still running.
    Other(String),
}

impl ProcessState {
    pub fn parse(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "queued" => Self::Queued,
            "processing" | "training" => Self::Processing,
            "complete" => Self::Complete,
            "error" => Self::Error,
            "cancelled" => Self::Cancelled,
            _ => Self::Other(status.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => f.write_str("queued"),
            Self::Processing => f.write_str("processing"),
            Self::Complete => f.write_str("complete"),
            Self::Error => f.write_str("error"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// How waiting on a process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The process reached a terminal state.
    Finished(ProcessState),
    /// The timeout elapsed first; carries the last state seen.
    TimedOut(Option<ProcessState>),
}

/// Poll `process_id` every `interval` until it is terminal or `timeout` passes.
///
/// Status check failures are logged and polling continues. `on_state` sees
/// every state observed, for progress display.
pub async fn wait_for_process(
    index: &dyn RemoteIndex,
    process_id: &str,
    interval: Duration,
    timeout: Duration,
    mut on_state: impl FnMut(&ProcessState) + Send,
) -> WaitOutcome {
    let start = Instant::now();
    let mut last = None;

    while start.elapsed() < timeout {
        match index.process_status(process_id).await {
            Ok(state) => {
                on_state(&state);
                if state.is_terminal() {
                    info!(process_id, %state, "remote process finished");
                    return WaitOutcome::Finished(state);
                }
                last = Some(state);
            }
            Err(e) => warn!(process_id, error = %e, "status check failed"),
        }
        tokio::time::sleep(interval).await;
    }

    warn!(process_id, timeout_secs = timeout.as_secs(), "timed out waiting for remote process");
    WaitOutcome::TimedOut(last)
}

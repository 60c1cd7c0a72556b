#![forbid(unsafe_code)]

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::warn;

/// Runs `work` on its own task. Nobody awaits the outcome; an error is logged under `label`
/// and dropped.
pub fn spawn_detached<F, E>(label: &'static str, work: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = work.await {
            warn!(task = label, error = %err, "detached task failed");
        }
    })
}

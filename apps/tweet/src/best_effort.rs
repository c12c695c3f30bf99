use std::fmt::Display;
use std::future::Future;

use tracing::warn;

/// Awaits a side-channel operation whose failure must not fail the caller.
/// Errors are logged under `operation` and discarded.
pub async fn best_effort<T, E, F>(operation: &str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(operation, error = %e, "Best-effort operation failed, continuing");
            None
        }
    }
}

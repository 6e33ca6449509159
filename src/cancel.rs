//! Cancellation helpers

use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Race `fut` against `cancel`; cancellation wins ties.
pub(crate) async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, Error> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        output = fut => Ok(output),
    }
}

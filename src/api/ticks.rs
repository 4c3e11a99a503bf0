use axum::Extension;

use crate::dispatch::Dispatcher;
use crate::dispatch::TickSummary;
use crate::messaging::Messenger;
use crate::storage::Storage;

use super::Authorized;
use super::Error;
use super::Success;

/// Run a tick right away
///
/// Conflicts with a tick that is still running
pub async fn create<S: Storage, M: Messenger>(
    _: Authorized,
    Extension(dispatcher): Extension<Dispatcher<S, M>>,
) -> Result<Success<TickSummary>, Error> {
    let summary = dispatcher.tick().await?;

    Ok(Success::ok(summary))
}

//! Stop flag shared by the background loops.
//!
//! Services own a `watch::Sender<bool>` and hand receivers to every loop they
//! spawn. Flipping the flag to `true` ends all of them.

use tokio::sync::watch;

/// Resolves once the flag reads `true`, or once the sender is gone.
///
/// The borrow taken by `wait_for` is released before returning, so the future
/// stays `Send` when raced inside `tokio::select!`.
pub async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

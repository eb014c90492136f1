use std::thread;

use tokio::sync::oneshot;

use crate::{capture, CaptureConfig, CaptureRequest, CaptureResult, ErrorKind};

/// Run [`capture`] on a dedicated thread and await its result.
///
/// The blocking pipeline (including the HTTP client) never touches the
/// caller's runtime. If the worker thread cannot be started or dies, the
/// result reports `CaptureFailed`.
///
/// A request that ends while its main document fetch is still blocked
/// returns without waiting for it; that loader thread exits within
/// `config.timeout_ms` (see [`crate::loader::LoadHandle`]).
pub async fn capture_async(request: CaptureRequest, config: CaptureConfig) -> CaptureResult {
    let (tx, rx) = oneshot::channel::<CaptureResult>();

    let spawned = thread::Builder::new()
        .name("rfshot-capture".into())
        .spawn(move || {
            let result = capture(&request, &config);
            // receiver gone means the caller stopped waiting
            let _ = tx.send(result);
        });
    if let Err(e) = spawned {
        log::warn!("cannot start capture thread: {}", e);
        return CaptureResult::failed(ErrorKind::CaptureFailed);
    }

    match rx.await {
        Ok(result) => result,
        Err(_) => {
            log::warn!("capture thread exited without a result");
            CaptureResult::failed(ErrorKind::CaptureFailed)
        }
    }
}

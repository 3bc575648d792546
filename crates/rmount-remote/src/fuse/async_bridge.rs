//! Bridge between synchronous FUSE callbacks and the async filesystem core.

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Runtime};

/// Process-wide runtime driving FUSE callbacks.
///
/// Keeps the creation result so a failure is reported instead of panicking.
static RUNTIME: OnceLock<Result<Runtime, String>> = OnceLock::new();

/// Errors from the runtime bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("FUSE runtime unavailable: {0}")]
    Runtime(String),
}

/// Create the runtime on first use.
pub fn init_runtime() -> Result<&'static Runtime, BridgeError> {
    let result = RUNTIME.get_or_init(|| {
        Builder::new_multi_thread()
            .worker_threads(4)
            .thread_name("rmount-fuse-worker")
            .enable_all()
            .build()
            .map_err(|e| e.to_string())
    });
    match result {
        Ok(rt) => Ok(rt),
        Err(e) => Err(BridgeError::Runtime(e.clone())),
    }
}

/// Run a future to completion from a FUSE callback thread.
///
/// Must not be called from inside another tokio runtime.
pub fn block_on<F>(future: F) -> Result<F::Output, BridgeError>
where
    F: Future,
{
    Ok(init_runtime()?.block_on(future))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on_runs_future() {
        let value = block_on(async {
            tokio::task::yield_now().await;
            41 + 1
        })
        .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_runtime_is_shared() {
        let a = init_runtime().unwrap() as *const Runtime;
        let b = init_runtime().unwrap() as *const Runtime;
        assert_eq!(a, b);
    }
}

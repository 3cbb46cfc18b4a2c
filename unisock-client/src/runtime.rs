//! The I/O runtime that drives session tasks.
//!
//! Clients run their session tasks on a tokio runtime. When a client is built
//! inside a multi-threaded runtime it uses that runtime; otherwise a
//! background runtime with a single worker thread is started on first use and
//! shared by every client in the process.

use crate::errors::ClientError;
use once_cell::sync::OnceCell;
use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};

static BACKGROUND: OnceCell<Runtime> = OnceCell::new();

/// Name of the background I/O worker thread.
pub const IO_THREAD_NAME: &str = "unisock-io";

/// Return a handle to the runtime that should drive new clients.
///
/// A current-thread runtime is never picked up: blocking client commands would
/// deadlock it, so the background runtime is used instead.
///
/// # Errors
///
/// Returns [`ClientError::Internal`] if the background runtime cannot start.
pub fn io_handle() -> Result<Handle, ClientError> {
    if let Ok(handle) = Handle::try_current() {
        if handle.runtime_flavor() == RuntimeFlavor::MultiThread {
            return Ok(handle);
        }
    }

    let runtime = BACKGROUND.get_or_try_init(|| {
        tracing::debug!("Starting background I/O runtime");
        Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(IO_THREAD_NAME)
            .enable_all()
            .build()
            .map_err(|e| ClientError::Internal(format!("Failed to start I/O runtime: {e}")))
    })?;

    Ok(runtime.handle().clone())
}

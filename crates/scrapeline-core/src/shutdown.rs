//! Graceful shutdown support via atomic flag

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;

use signal_hook::consts::{SIGINT, SIGTERM};

static FLAG: LazyLock<Arc<AtomicBool>> = LazyLock::new(|| Arc::new(AtomicBool::new(false)));

/// Global shutdown flag, set by the SIGINT/SIGTERM handler
pub fn shutdown_flag() -> &'static AtomicBool {
    &FLAG
}

/// Check if shutdown was requested
pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

/// Request shutdown (for signal handlers)
pub fn request_shutdown() {
    shutdown_flag().store(true, Ordering::Relaxed);
}

/// Route SIGINT/SIGTERM to the shutdown flag.
///
/// The first signal only sets the flag so the driver stops between pages and
/// the queue still drains; a second one terminates the process.
pub fn install_signal_handlers() -> std::io::Result<()> {
    for sig in [SIGINT, SIGTERM] {
        signal_hook::flag::register_conditional_shutdown(sig, 130, Arc::clone(&FLAG))?;
        signal_hook::flag::register(sig, Arc::clone(&FLAG))?;
    }
    Ok(())
}

//! Signal handling for graceful shutdown of the CLI.
//!
//! The first SIGINT/SIGTERM runs a shutdown callback (unfollowing the tail
//! session so it can close its descriptor and end the stream). A second
//! signal exits immediately with code 1.

use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use signal_hook::iterator::Signals;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::debug;

/// Install termination handlers that call `on_shutdown` on the first signal.
///
/// Returns the flag that becomes `true` once a termination signal arrived.
pub fn setup_shutdown_handlers<F>(on_shutdown: F) -> io::Result<Arc<AtomicBool>>
where
    F: Fn() + Send + 'static,
{
    let term_now = Arc::new(AtomicBool::new(false));

    for sig in TERM_SIGNALS {
        // Exits with code 1 only if term_now is already set, i.e. on the second signal
        flag::register_conditional_shutdown(*sig, 1, Arc::clone(&term_now))?;
        flag::register(*sig, Arc::clone(&term_now))?;
    }

    let mut signals = Signals::new(TERM_SIGNALS)?;
    let flag = Arc::clone(&term_now);
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                debug!(signal = sig, "termination requested");
                flag.store(true, Ordering::SeqCst);
                on_shutdown();
            }
        })?;

    Ok(term_now)
}

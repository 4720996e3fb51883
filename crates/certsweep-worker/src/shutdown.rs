//! Signal-driven shutdown.
//!
//! SIGINT and SIGTERM set one process-wide flag. Worker threads check
//! it at every sleep point (100 ms granularity) so a shutdown request
//! propagates fast enough to drain buffers, post `resume` for held
//! ranges, and exit inside the 5 second deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

static STOP: AtomicBool = AtomicBool::new(false);
static FATAL: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_: nix::libc::c_int) {
    STOP.store(true, Ordering::SeqCst);
}

/// Installs the SIGINT/SIGTERM handlers.
///
/// # Errors
///
/// Returns the underlying `sigaction` failure.
pub fn install() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        sigaction(Signal::SIGINT, &action)?;
        sigaction(Signal::SIGTERM, &action)?;
    }
    Ok(())
}

/// The process-wide stop flag. Threads hold a reference to it; tests
/// substitute their own.
#[must_use]
pub fn flag() -> &'static AtomicBool {
    &STOP
}

/// Records an unrecoverable local failure (disk full on the spool and
/// the like) and requests shutdown. The process exits with code 1.
pub fn request_fatal() {
    FATAL.store(true, Ordering::SeqCst);
    STOP.store(true, Ordering::SeqCst);
}

/// Whether a fatal local failure was recorded.
#[must_use]
pub fn fatal() -> bool {
    FATAL.load(Ordering::SeqCst)
}

/// Sleeps for `duration` in 100 ms slices, returning early when the
/// stop flag is raised. Returns `true` when the full duration passed.
pub fn sleep_unless_stopped(stop: &AtomicBool, duration: Duration) -> bool {
    let slices = duration.as_millis().div_ceil(100);
    for _ in 0..slices {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    !stop.load(Ordering::Acquire)
}

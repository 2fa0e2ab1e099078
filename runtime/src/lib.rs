//! Process-wide ambient concerns shared by every task in the tunnel: the
//! stop flag every long-lived thread polls, signal wiring, the colored
//! logger, and small time helpers. No protocol logic lives here.

use std::sync::atomic::{AtomicBool, Ordering};

pub mod logger;
pub mod time;

static STOP: AtomicBool = AtomicBool::new(false);

/// Register a Ctrl+C / SIGTERM handler that flips the global stop flag.
///
/// Every long-lived task loop polls [`stopping`] at each iteration and
/// drains-and-exits once it flips; there is no per-task cancellation
/// channel beyond this.
pub fn install_signal_handler() -> Result<(), ctrlc::Error> {
	ctrlc::set_handler(|| STOP.store(true, Ordering::Relaxed))
}

/// Whether a shutdown has been requested.
pub fn stopping() -> bool {
	STOP.load(Ordering::Relaxed)
}

/// Request shutdown programmatically, e.g. after a fatal I/O error on a task
/// that isn't the signal handler.
pub fn request_stop() {
	STOP.store(true, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn stop_flag_round_trips() {
		assert!(!stopping());
		request_stop();
		assert!(stopping());
	}
}

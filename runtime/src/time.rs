//! Small time helpers used by the FDB's age tracking and the logger.

use std::time::{Instant, SystemTime};

/// Seconds since the UNIX epoch, for diagnostics only (the FDB itself keys
/// age off [`Instant`], which is monotonic and immune to clock steps).
pub fn unix_now() -> u64 {
	SystemTime::now()
		.duration_since(SystemTime::UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

/// Monotonic "now" used by the FDB for `last_seen` and by expiry age checks.
pub fn monotonic_now() -> Instant {
	Instant::now()
}

//! The learning forwarding database (§4.4): MAC → peer, with age-based
//! expiry. Keyed on the raw 6-byte MAC, read/write-locked so lookups on the
//! TAP-read hot path never block behind the 10-second expiry sweep for
//! longer than a single map read.
//!
//! `RemoteNode`s are owned by an arena in [`crate::switch::PacketSwitch`]
//! (§9 "Cyclic references"); an entry only ever stores the peer's
//! [`PeerId`] index, never the node itself.

use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use ahash::AHasher;

use crate::mac::MacAddr;

pub type PeerId = usize;

/// `peer = None` means this MAC was learned from the TAP side (local).
#[derive(Debug, Clone, Copy)]
pub struct FdbEntry {
	pub peer: Option<PeerId>,
	pub last_seen: Instant,
}

pub struct Fdb {
	table: RwLock<HashMap<MacAddr, FdbEntry, BuildHasherDefault<AHasher>>>,
}

impl Default for Fdb {
	fn default() -> Self {
		Self::new()
	}
}

impl Fdb {
	pub fn new() -> Self {
		Self { table: RwLock::new(HashMap::default()) }
	}

	/// Idempotent: an existing entry's `peer` is never replaced, but its
	/// `last_seen` is always refreshed. Returns the entry as it stands
	/// after this call.
	pub fn add(&self, mac: MacAddr, peer: Option<PeerId>) -> FdbEntry {
		let now = Instant::now();
		let mut table = self.table.write().expect("fdb lock poisoned");

		match table.get_mut(&mac) {
			Some(entry) => {
				entry.last_seen = now;
				*entry
			}
			None => {
				let entry = FdbEntry { peer, last_seen: now };
				table.insert(mac, entry);
				entry
			}
		}
	}

	pub fn get(&self, mac: &MacAddr) -> Option<FdbEntry> {
		self.table.read().expect("fdb lock poisoned").get(mac).copied()
	}

	/// Removes entries whose `last_seen` is older than `max_age`. Requires
	/// exclusive access (§5).
	pub fn expire(&self, max_age: Duration) {
		let now = Instant::now();
		let mut table = self.table.write().expect("fdb lock poisoned");
		table.retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= max_age);
	}

	/// Snapshot for diagnostics; never holds the lock across I/O.
	pub fn dump(&self) -> Vec<(MacAddr, FdbEntry)> {
		self.table.read().expect("fdb lock poisoned").iter().map(|(mac, entry)| (*mac, *entry)).collect()
	}

	pub fn len(&self) -> usize {
		self.table.read().expect("fdb lock poisoned").len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn mac(n: u8) -> MacAddr {
		MacAddr([0x02, 0, 0, 0, 0, n])
	}

	#[test]
	fn add_is_idempotent_but_refreshes_last_seen() {
		let fdb = Fdb::new();
		let first = fdb.add(mac(1), Some(7));
		std::thread::sleep(Duration::from_millis(5));
		let second = fdb.add(mac(1), Some(99));

		assert_eq!(second.peer, Some(7), "existing peer must not be replaced");
		assert!(second.last_seen > first.last_seen);
	}

	#[test]
	fn get_returns_none_for_unknown_mac() {
		let fdb = Fdb::new();
		assert!(fdb.get(&mac(1)).is_none());
	}

	#[test]
	fn expire_removes_only_stale_entries() {
		let fdb = Fdb::new();
		fdb.add(mac(1), None);
		std::thread::sleep(Duration::from_millis(20));
		fdb.add(mac(2), None);

		fdb.expire(Duration::from_millis(10));

		assert!(fdb.get(&mac(1)).is_none());
		assert!(fdb.get(&mac(2)).is_some());
	}

	#[test]
	fn dump_snapshots_all_entries() {
		let fdb = Fdb::new();
		fdb.add(mac(1), None);
		fdb.add(mac(2), Some(3));
		let mut snapshot = fdb.dump();
		snapshot.sort_by_key(|(mac, _)| mac.0);
		assert_eq!(snapshot.len(), 2);
	}
}

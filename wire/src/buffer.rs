//! [`Buffer`] and [`BufferPool`]: the fixed-size byte containers that flow,
//! with no dynamic allocation in the hot path, between TAP-read, encode,
//! socket-write and their inverse roles (spec §3, §5).
//!
//! The pool is built directly on a bounded [`crossbeam_channel`] rather than
//! a hand-rolled mutex+condvar queue: a channel pre-loaded with N buffers at
//! construction *is* a bounded multiset with blocking/timed wait built in,
//! which is the "lock-free-friendly queue" the design calls for.

use std::net::SocketAddr;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

/// A fixed-capacity byte container with a used-length, plus the sideband
/// metadata the socket-read task stamps on received datagrams so the
/// decoder queue can be drained in arrival order without re-parsing.
pub struct Buffer {
	data: Vec<u8>,
	used: usize,
	capacity: usize,
	/// The peer a received datagram arrived from, or the peer an outgoing
	/// datagram is destined for.
	pub peer_addr: Option<SocketAddr>,
	/// The outer header's sequence field, cached by the socket-read task.
	pub sequence_key: Option<u32>,
}

impl Buffer {
	pub fn new(capacity: usize) -> Self {
		Self {
			data: vec![0u8; capacity],
			used: 0,
			capacity,
			peer_addr: None,
			sequence_key: None,
		}
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn used(&self) -> usize {
		self.used
	}

	/// Fails (returning `false`) if `used + src.len()` would exceed capacity.
	#[must_use]
	pub fn append(&mut self, src: &[u8]) -> bool {
		if self.used + src.len() > self.capacity {
			return false;
		}

		self.data[self.used..self.used + src.len()].copy_from_slice(src);
		self.used += src.len();
		true
	}

	/// Fails (returning `false`) if `n` exceeds capacity.
	#[must_use]
	pub fn set_used(&mut self, n: usize) -> bool {
		if n > self.capacity {
			return false;
		}

		self.used = n;
		true
	}

	pub fn clear(&mut self) {
		self.used = 0;
		self.peer_addr = None;
		self.sequence_key = None;
	}

	pub fn as_slice(&self) -> &[u8] {
		&self.data[..self.used]
	}

	pub fn as_mut_slice(&mut self) -> &mut [u8] {
		let used = self.used;
		&mut self.data[..used]
	}

	/// The full backing storage, including bytes past `used` — for the
	/// socket-read task priming `recvmmsg` buffers before anything has been
	/// written into them.
	pub fn full_mut(&mut self) -> &mut [u8] {
		&mut self.data
	}

	pub fn is_empty(&self) -> bool {
		self.used == 0
	}
}

impl Default for Buffer {
	/// A zero-capacity placeholder, only ever used as the target of
	/// `std::mem::take` while a real buffer is swapped in from a pool.
	fn default() -> Self {
		Buffer::new(0)
	}
}

/// A bounded multiset of uniformly-sized [`Buffer`]s.
#[derive(Clone)]
pub struct BufferPool {
	capacity: usize,
	tx: Sender<Buffer>,
	rx: Receiver<Buffer>,
}

impl BufferPool {
	/// Creates a pool of `count` buffers, each `capacity` bytes.
	pub fn new(count: usize, capacity: usize) -> Self {
		let (tx, rx) = bounded(count);

		for _ in 0..count {
			tx.send(Buffer::new(capacity)).expect("freshly created bounded channel has room");
		}

		Self { capacity, tx, rx }
	}

	/// A queue variant: bounded at `slots` in-flight buffers but starts
	/// empty rather than pre-loaded. Used for `encoder_queue`,
	/// `decoder_queue`, `socket_write_queue`, and `tap_write_pool` (§5) —
	/// the same primitive as a supply pool, just without the initial fill.
	pub fn new_queue(slots: usize, element_size: usize) -> Self {
		let (tx, rx) = bounded(slots);
		Self { capacity: element_size, tx, rx }
	}

	pub fn element_size(&self) -> usize {
		self.capacity
	}

	/// Non-blocking pop; `None` if the pool is currently empty.
	pub fn pop(&self) -> Option<Buffer> {
		self.rx.try_recv().ok()
	}

	/// Blocks until a buffer is available.
	pub fn pop_wait(&self) -> Buffer {
		self.rx.recv().expect("sender half is held by the pool itself and never dropped")
	}

	/// Blocks until at least one buffer is available, then drains every
	/// buffer currently queued into `out`.
	pub fn wait(&self, out: &mut Vec<Buffer>) {
		out.push(self.pop_wait());
		out.extend(self.rx.try_iter());
	}

	/// Like [`Self::wait`], but gives up after `timeout` if nothing arrived.
	/// Returns `true` if it got data, `false` on timeout.
	pub fn wait_for(&self, timeout: Duration, out: &mut Vec<Buffer>) -> bool {
		match self.rx.recv_timeout(timeout) {
			Ok(buf) => {
				out.push(buf);
				out.extend(self.rx.try_iter());
				true
			}
			Err(RecvTimeoutError::Timeout) => false,
			Err(RecvTimeoutError::Disconnected) => unreachable!("sender half is held by the pool itself"),
		}
	}

	/// Returns a buffer to the pool. Fails if its capacity doesn't match
	/// this pool's configured element size (property 6). Does not clear the
	/// buffer: a "pool" used as a supply of empty buffers is always drained
	/// through a helper that clears on pop (e.g. the encoder's
	/// `reserved_buffer`), while a "queue" used to hand off a finished
	/// buffer (e.g. `tap_write_pool`) relies on `peer_addr`/`sequence_key`
	/// surviving the handoff.
	#[must_use]
	pub fn push(&self, buf: Buffer) -> bool {
		if buf.capacity() != self.capacity {
			return false;
		}

		self.tx.try_send(buf).is_ok()
	}

	/// Batch form: empties `batch` into the pool, in order.
	pub fn push_batch(&self, batch: &mut Vec<Buffer>) {
		for buf in batch.drain(..) {
			// A full pool here means more buffers are in flight than were
			// ever issued, which would be a bug elsewhere; drop rather than
			// panic so a single stray buffer can't take the process down.
			let _ = self.push(buf);
		}
	}

	/// Number of buffers currently sitting in the pool (not checked out).
	pub fn count(&self) -> usize {
		self.rx.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn append_rejects_overflow() {
		let mut buf = Buffer::new(4);
		assert!(buf.append(&[1, 2, 3]));
		assert!(!buf.append(&[4, 5]));
		assert_eq!(buf.used(), 3);
	}

	#[test]
	fn pop_push_round_trip_preserves_count() {
		let pool = BufferPool::new(3, 16);
		assert_eq!(pool.count(), 3);

		let a = pool.pop().unwrap();
		let b = pool.pop().unwrap();
		assert_eq!(pool.count(), 1);

		assert!(pool.push(a));
		assert!(pool.push(b));
		assert_eq!(pool.count(), 3);
	}

	#[test]
	fn pop_fails_when_empty() {
		let pool = BufferPool::new(1, 16);
		assert!(pool.pop().is_some());
		assert!(pool.pop().is_none());
	}

	#[test]
	fn push_rejects_mismatched_capacity() {
		let pool = BufferPool::new(1, 16);
		let wrong = Buffer::new(32);
		assert!(!pool.push(wrong));
	}

	#[test]
	fn wait_for_times_out_when_empty() {
		let pool = BufferPool::new(0, 16);
		let mut out = Vec::new();
		assert!(!pool.wait_for(Duration::from_millis(5), &mut out));
		assert!(out.is_empty());
	}

	#[test]
	fn wait_drains_everything_queued() {
		let pool = BufferPool::new(3, 16);
		let a = pool.pop().unwrap();
		let b = pool.pop().unwrap();
		let c = pool.pop().unwrap();
		assert!(pool.push(a));
		assert!(pool.push(b));
		assert!(pool.push(c));

		let mut out = Vec::new();
		pool.wait(&mut out);
		assert_eq!(out.len(), 3);
		assert_eq!(pool.count(), 0);
	}
}

//! Per-peer state and tasks (§4.5): each configured remote peer gets its own
//! encoder/decoder/socket-writer threads and the three queues that connect
//! them to the rest of [`crate::switch::PacketSwitch`].

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::buffer::BufferPool;
use crate::decoder::PacketDecoder;
use crate::encoder::PacketEncoder;
use crate::error::TransientIoError;
use crate::tap::PeerKey;
use crate::wireformat::CompressionFormat;

/// How long the encoder task waits for the next frame before flushing a
/// partial datagram so traffic doesn't stall during idle periods (§5).
const ENCODER_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

pub struct RemoteNode {
	pub key: PeerKey,
	pub addr: SocketAddr,
	pub l2mtu: u16,
	pub l4mtu: u16,
	/// Frames destined for this peer, fed by the TAP-read task's FDB lookup
	/// or broadcast fan-out, drained by this node's encoder task.
	pub encoder_queue: BufferPool,
	/// Datagrams received from this peer, fed by the socket-read task's
	/// demux, drained by this node's decoder task.
	pub decoder_queue: BufferPool,
	/// Completed datagrams ready to send, fed by the encoder task, drained
	/// by this node's socket-writer task.
	pub socket_write_queue: BufferPool,
}

impl RemoteNode {
	pub fn new(key: PeerKey, addr: SocketAddr, l2mtu: u16, txsize: u16, queue_depth: usize, buf_size: usize) -> Self {
		let ip_header = if key.is_ipv4_mapped() { 20 } else { 40 };
		let l4mtu = txsize.saturating_sub(ip_header).saturating_sub(8);

		Self {
			key,
			addr,
			l2mtu,
			l4mtu,
			encoder_queue: BufferPool::new_queue(queue_depth, buf_size),
			decoder_queue: BufferPool::new_queue(queue_depth, buf_size),
			socket_write_queue: BufferPool::new_queue(queue_depth, buf_size),
		}
	}

	pub fn spawn_encoder(&self, avail_pool: BufferPool, compression: CompressionFormat) -> JoinHandle<()> {
		let encoder_queue = self.encoder_queue.clone();
		let socket_write_queue = self.socket_write_queue.clone();
		let l2mtu = self.l2mtu;
		let l4mtu = self.l4mtu;
		let addr = self.addr;

		thread::spawn(move || {
			let mut encoder = PacketEncoder::new(l2mtu, l4mtu, socket_write_queue, avail_pool, compression);
			let mut batch = Vec::new();

			while !runtime::stopping() {
				batch.clear();

				if encoder_queue.wait_for(ENCODER_FLUSH_INTERVAL, &mut batch) {
					for frame in batch.drain(..) {
						if let Err(e) = encoder.encode(frame) {
							log::error!("encoding for {addr}: {e}");
						}
					}
					continue;
				}

				// Idle: flush whatever's pending, then block indefinitely
				// instead of re-polling every millisecond (§4.5). The next
				// frame's arrival wakes this and the loop reverts to timed
				// waits above.
				encoder.flush();

				if runtime::stopping() {
					break;
				}

				batch.clear();
				encoder_queue.wait(&mut batch);
				for frame in batch.drain(..) {
					if let Err(e) = encoder.encode(frame) {
						log::error!("encoding for {addr}: {e}");
					}
				}
			}

			encoder.flush();
		})
	}

	pub fn spawn_decoder(&self, reassembly_pool: BufferPool, tap_write_pool: BufferPool, dgram_pool: BufferPool) -> JoinHandle<()> {
		let decoder_queue = self.decoder_queue.clone();
		let l2mtu = self.l2mtu;
		let addr = self.addr;

		thread::spawn(move || {
			let mut decoder = PacketDecoder::new(l2mtu, reassembly_pool, tap_write_pool, dgram_pool, addr);
			let mut batch = Vec::new();

			while !runtime::stopping() {
				batch.clear();
				decoder_queue.wait(&mut batch);

				for dgram in batch.drain(..) {
					if let Err(e) = decoder.decode(dgram) {
						log::warn!("decoding from {addr}: {e}");
					}
				}
			}
		})
	}

	pub fn spawn_socket_writer(&self, socket: Arc<UdpSocket>, avail_pool: BufferPool) -> JoinHandle<()> {
		let socket_write_queue = self.socket_write_queue.clone();
		let addr = self.addr;

		thread::spawn(move || {
			let mut batch = Vec::new();

			while !runtime::stopping() {
				batch.clear();
				socket_write_queue.wait(&mut batch);

				for dgram in batch.drain(..) {
					if let Err(e) = socket.send_to(dgram.as_slice(), addr) {
						log::error!("{}", TransientIoError(e));
					}
					let _ = avail_pool.push(dgram);
				}
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::{IpAddr, Ipv4Addr};

	#[test]
	fn l4mtu_subtracts_ipv4_mapped_overhead() {
		let key = PeerKey::from_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)));
		let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)), 58023);
		let node = RemoteNode::new(key, addr, 1522, 1500, 8, 2048);
		assert_eq!(node.l4mtu, 1500 - 20 - 8);
	}
}

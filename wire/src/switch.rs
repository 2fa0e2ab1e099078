//! Owns the TAP device, the UDP socket, the peer arena, the shared FDB, and
//! the shared buffer pools (§4.6): the four long-lived switch tasks that
//! move frames between TAP and wire are spawned from here, alongside one
//! `RemoteNode`'s worth of encoder/decoder/socket-writer threads per
//! configured peer.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use slab::Slab;

use crate::buffer::{Buffer, BufferPool};
use crate::config::Config;
use crate::fdb::Fdb;
use crate::mac::MacAddr;
use crate::remote_node::RemoteNode;
use crate::tap::{PeerKey, Tap};
use crate::wireformat::{CompressionFormat, OuterHeader};

/// `buf_pool` is the single shared supply of raw-frame/datagram-sized
/// buffers, sized at startup to `SETH_BUFFER_COUNT × peer_count` (§5); one
/// buffer size covers both a raw TAP frame and an encoded datagram, with
/// 10% headroom for compression expansion. Every task that draws from it
/// (`tap-read`, `socket-read`, each peer's encoder/decoder/socket-writer,
/// `tap-write`) also returns consumed buffers to it, so the pool's total
/// buffer count never drifts — a buffer that started life as a TAP frame
/// may come back as a datagram or vice versa, and that's fine since they
/// share one size class.
const SETH_BUFFER_COUNT: usize = 5000;
const POOL_HEADROOM_NUM: usize = 11;
const POOL_HEADROOM_DEN: usize = 10;

/// `recvmmsg` batch size (§4.6).
const SETH_MAX_RECVMM_MESSAGES: usize = 256;

/// Per-`RemoteNode` queue depth. Not pinned down by the design beyond "a
/// bounded queue"; chosen as a few multiples of a `recvmmsg` batch so one
/// backed-up peer can't stall the others indefinitely.
const PEER_QUEUE_DEPTH: usize = 64;

const FDB_SWEEP_INTERVAL: Duration = Duration::from_secs(10);
const FDB_MAX_AGE: Duration = Duration::from_secs(300);

fn element_size(config: &Config) -> usize {
	let base = config.l2mtu().max(config.txsize) as usize;
	base * POOL_HEADROOM_NUM / POOL_HEADROOM_DEN
}

pub struct PacketSwitch {
	tap: Arc<Mutex<Box<dyn Tap>>>,
	socket: Arc<UdpSocket>,
	fdb: Arc<Fdb>,
	peers: Arc<Slab<RemoteNode>>,
	peer_index: Arc<HashMap<PeerKey, usize>>,
	buf_pool: BufferPool,
	tap_write_pool: BufferPool,
	compression: CompressionFormat,
	handles: Vec<JoinHandle<()>>,
}

impl PacketSwitch {
	/// `socket` must already be bound (dual-stack per §6.1); this only
	/// tunes its buffer sizes. `tap` must already be open at `config.mtu`.
	pub fn new(tap: Box<dyn Tap>, socket: UdpSocket, config: &Config, fdb: Arc<Fdb>) -> io::Result<Self> {
		tune_socket_buffers(&socket, config.l2mtu())?;

		let size = element_size(config);
		let peer_count = config.peers.len().max(1);

		let buf_pool = BufferPool::new(SETH_BUFFER_COUNT * peer_count, size);
		let tap_write_pool = BufferPool::new_queue(SETH_BUFFER_COUNT * peer_count, size);

		let mut peers = Slab::with_capacity(config.peers.len());
		let mut peer_index = HashMap::with_capacity(config.peers.len());

		for &peer_ip in &config.peers {
			let key = PeerKey::from_ip(peer_ip);
			let addr = SocketAddr::new(peer_ip, config.port);
			let node = RemoteNode::new(key, addr, config.l2mtu(), config.txsize, PEER_QUEUE_DEPTH, size);
			let id = peers.insert(node);
			peer_index.insert(key, id);
		}

		Ok(Self {
			tap: Arc::new(Mutex::new(tap)),
			socket: Arc::new(socket),
			fdb,
			peers: Arc::new(peers),
			peer_index: Arc::new(peer_index),
			buf_pool,
			tap_write_pool,
			compression: config.compression,
			handles: Vec::new(),
		})
	}

	/// Spawns the four switch tasks plus each peer's encoder/decoder/
	/// socket-writer triple (§5: "4 + 3N concurrent long-lived threads").
	pub fn spawn(&mut self) {
		self.handles.push(self.spawn_tap_read());
		self.handles.push(self.spawn_socket_read());
		self.handles.push(self.spawn_tap_write());
		self.handles.push(self.spawn_fdb_expiry());

		for (_, node) in self.peers.iter() {
			self.handles.push(node.spawn_encoder(self.buf_pool.clone(), self.compression));
			self.handles.push(node.spawn_decoder(self.buf_pool.clone(), self.tap_write_pool.clone(), self.buf_pool.clone()));
			self.handles.push(node.spawn_socket_writer(self.socket.clone(), self.buf_pool.clone()));
		}
	}

	/// Blocks until every spawned task has drained and exited. Only
	/// returns once `runtime::request_stop` (or a signal) has fired.
	pub fn join(self) {
		for handle in self.handles {
			let _ = handle.join();
		}
	}

	fn spawn_tap_read(&self) -> JoinHandle<()> {
		let tap = self.tap.clone();
		let buf_pool = self.buf_pool.clone();
		let fdb = self.fdb.clone();
		let peers = self.peers.clone();

		thread::spawn(move || {
			while !runtime::stopping() {
				let mut frame = buf_pool.pop_wait();
				frame.clear();

				let read = tap.lock().expect("tap lock poisoned").read_frame(frame.full_mut());
				let len = match read {
					Ok(len) => len,
					Err(e) => {
						log::error!("tap read: {e}");
						let _ = buf_pool.push(frame);
						continue;
					}
				};

				if !frame.set_used(len) {
					let _ = buf_pool.push(frame);
					continue;
				}

				handle_tap_frame(frame, &fdb, &peers, &buf_pool);
			}
		})
	}

	fn spawn_socket_read(&self) -> JoinHandle<()> {
		let socket = self.socket.clone();
		let buf_pool = self.buf_pool.clone();
		let peers = self.peers.clone();
		let peer_index = self.peer_index.clone();

		thread::spawn(move || {
			#[cfg(target_os = "linux")]
			socket_read_linux(&socket, &buf_pool, &peers, &peer_index);

			#[cfg(not(target_os = "linux"))]
			socket_read_fallback(&socket, &buf_pool, &peers, &peer_index);
		})
	}

	/// Returns each decoded frame's TAP-write buffer to `buf_pool`, the same
	/// shared pool `tap-read` and `socket-read` draw from — not a
	/// dead-end queue, or the pool would drain to empty after
	/// `SETH_BUFFER_COUNT × peer_count` forwarded frames.
	fn spawn_tap_write(&self) -> JoinHandle<()> {
		let tap = self.tap.clone();
		let tap_write_pool = self.tap_write_pool.clone();
		let buf_pool = self.buf_pool.clone();
		let fdb = self.fdb.clone();
		let peer_index = self.peer_index.clone();

		thread::spawn(move || {
			let mut batch = Vec::new();

			while !runtime::stopping() {
				batch.clear();
				tap_write_pool.wait(&mut batch);

				for frame in batch.drain(..) {
					if let Err(e) = write_decoded_frame(&tap, &fdb, &peer_index, &frame) {
						log::error!("{e}");
						runtime::request_stop();
					}
					let _ = buf_pool.push(frame);
				}
			}
		})
	}

	fn spawn_fdb_expiry(&self) -> JoinHandle<()> {
		let fdb = self.fdb.clone();

		thread::spawn(move || {
			while !runtime::stopping() {
				thread::sleep(FDB_SWEEP_INTERVAL);
				fdb.expire(FDB_MAX_AGE);
				log::debug!("fdb: {} entries after expiry sweep", fdb.len());
			}
		})
	}
}

/// `SO_RCVBUF`/`SO_SNDBUF` sized to `l2mtu × 8192` (§6.2); falls back
/// silently on platforms/permissions that reject the request, since it's
/// an optimization, not a correctness requirement.
fn tune_socket_buffers(socket: &UdpSocket, l2mtu: u16) -> io::Result<()> {
	let size = l2mtu as usize * 8192;

	#[cfg(unix)]
	{
		use std::os::unix::io::{AsRawFd, FromRawFd};
		let sock2 = unsafe { socket2::Socket::from_raw_fd(socket.as_raw_fd()) };
		let _ = sock2.set_recv_buffer_size(size);
		let _ = sock2.set_send_buffer_size(size);
		std::mem::forget(sock2);
	}

	let _ = size;
	Ok(())
}

fn handle_tap_frame(frame: Buffer, fdb: &Fdb, peers: &Slab<RemoteNode>, buf_pool: &BufferPool) {
	let bytes = frame.as_slice();

	if bytes.len() < 12 {
		let _ = buf_pool.push(frame);
		return;
	}

	let dst = MacAddr::from_slice(&bytes[0..6]).expect("checked length above");
	let src = MacAddr::from_slice(&bytes[6..12]).expect("checked length above");

	if src.is_multicast() {
		log::warn!("dropping TAP frame with multicast source MAC {src}");
		let _ = buf_pool.push(frame);
		return;
	}

	fdb.add(src, None);

	if dst.is_multicast() {
		flood(frame, peers, buf_pool);
		return;
	}

	match fdb.get(&dst).and_then(|entry| entry.peer) {
		Some(peer_id) => match peers.get(peer_id) {
			Some(node) => {
				let _ = node.encoder_queue.push(frame);
			}
			None => {
				let _ = buf_pool.push(frame);
			}
		},
		// Unknown unicast: dropped, never flooded (§4.6).
		None => {
			let _ = buf_pool.push(frame);
		}
	}
}

fn flood(frame: Buffer, peers: &Slab<RemoteNode>, buf_pool: &BufferPool) {
	let nodes: Vec<&RemoteNode> = peers.iter().map(|(_, node)| node).collect();

	if nodes.is_empty() {
		let _ = buf_pool.push(frame);
		return;
	}

	let bytes = frame.as_slice().to_vec();

	for node in &nodes[..nodes.len() - 1] {
		let mut copy = buf_pool.pop_wait();
		copy.clear();

		if copy.append(&bytes) {
			let _ = node.encoder_queue.push(copy);
		} else {
			let _ = buf_pool.push(copy);
		}
	}

	let _ = nodes[nodes.len() - 1].encoder_queue.push(frame);
}

fn write_decoded_frame(
	tap: &Mutex<Box<dyn Tap>>,
	fdb: &Fdb,
	peer_index: &HashMap<PeerKey, usize>,
	frame: &Buffer,
) -> Result<(), crate::error::FatalIoError> {
	let bytes = frame.as_slice();

	if bytes.len() < 12 {
		return Ok(());
	}

	let src = MacAddr::from_slice(&bytes[6..12]).expect("checked length above");

	if src.is_multicast() {
		log::warn!("dropping decoded frame with multicast source MAC {src}");
		return Ok(());
	}

	let peer_id = frame.peer_addr.and_then(|addr| peer_index.get(&PeerKey::from_ip(addr.ip())).copied());
	fdb.add(src, peer_id);

	tap.lock().expect("tap lock poisoned").write_frame(bytes).map_err(crate::error::FatalIoError)
}

#[cfg(not(target_os = "linux"))]
fn socket_read_fallback(socket: &UdpSocket, buf_pool: &BufferPool, peers: &Slab<RemoteNode>, peer_index: &HashMap<PeerKey, usize>) {
	use crate::error::TransientIoError;

	while !runtime::stopping() {
		let mut datagram = buf_pool.pop_wait();
		datagram.clear();

		match socket.recv_from(datagram.full_mut()) {
			Ok((len, src)) => {
				if !datagram.set_used(len) {
					let _ = buf_pool.push(datagram);
					continue;
				}
				dispatch_datagram(datagram, src, peers, peer_index, buf_pool);
			}
			Err(e) => {
				log::error!("{}", TransientIoError(e));
				let _ = buf_pool.push(datagram);
			}
		}
	}
}

#[cfg(not(target_os = "linux"))]
fn dispatch_datagram(
	mut datagram: Buffer,
	src: SocketAddr,
	peers: &Slab<RemoteNode>,
	peer_index: &HashMap<PeerKey, usize>,
	buf_pool: &BufferPool,
) {
	let key = PeerKey::from_ip(src.ip());

	let peer_id = match peer_index.get(&key) {
		Some(&id) => id,
		None => {
			log::warn!("dropping datagram from unknown peer {src}");
			let _ = buf_pool.push(datagram);
			return;
		}
	};

	let header = match OuterHeader::parse_and_validate(datagram.as_slice()) {
		Ok(h) => h,
		Err(e) => {
			log::warn!("dropping malformed datagram from {src}: {e}");
			let _ = buf_pool.push(datagram);
			return;
		}
	};

	datagram.sequence_key = Some(header.sequence);
	datagram.peer_addr = Some(src);

	match peers.get(peer_id) {
		Some(node) => {
			let _ = node.decoder_queue.push(datagram);
		}
		None => {
			let _ = buf_pool.push(datagram);
		}
	}
}

/// Linux hot path: one `recvmmsg` syscall fills up to
/// `SETH_MAX_RECVMM_MESSAGES` pre-primed `buf_pool` buffers per call,
/// grouped by peer and bulk-pushed into each peer's `decoder_queue` (§4.6).
#[cfg(target_os = "linux")]
fn socket_read_linux(socket: &UdpSocket, buf_pool: &BufferPool, peers: &Slab<RemoteNode>, peer_index: &HashMap<PeerKey, usize>) {
	use std::os::unix::io::AsRawFd;
	use std::ptr::null_mut;

	let fd = socket.as_raw_fd();

	while !runtime::stopping() {
		let mut bufs: Vec<Buffer> = (0..SETH_MAX_RECVMM_MESSAGES).map(|_| buf_pool.pop_wait()).collect();
		for buf in &mut bufs {
			buf.clear();
		}

		let mut names: Vec<libc::sockaddr_storage> = vec![unsafe { std::mem::zeroed() }; SETH_MAX_RECVMM_MESSAGES];
		let mut iovs: Vec<libc::iovec> = bufs
			.iter_mut()
			.map(|buf| {
				let cap = buf.capacity();
				libc::iovec { iov_base: buf.full_mut().as_mut_ptr() as _, iov_len: cap }
			})
			.collect();

		let mut msgs: Vec<libc::mmsghdr> = (0..SETH_MAX_RECVMM_MESSAGES)
			.map(|i| libc::mmsghdr {
				msg_hdr: libc::msghdr {
					msg_name: &mut names[i] as *mut libc::sockaddr_storage as *mut libc::c_void,
					msg_namelen: std::mem::size_of::<libc::sockaddr_storage>() as u32,
					msg_iov: &mut iovs[i] as *mut libc::iovec,
					msg_iovlen: 1,
					msg_control: null_mut(),
					msg_controllen: 0,
					msg_flags: 0,
				},
				msg_len: 0,
			})
			.collect();

		let n = unsafe { libc::recvmmsg(fd, msgs.as_mut_ptr(), SETH_MAX_RECVMM_MESSAGES as _, 0, null_mut()) };

		if n < 0 {
			let err = io::Error::last_os_error();
			if err.kind() != io::ErrorKind::Interrupted {
				log::error!("recvmmsg: {err}");
			}
			for buf in bufs {
				let _ = buf_pool.push(buf);
			}
			continue;
		}

		let received = n as usize;
		let mut grouped: HashMap<usize, Vec<Buffer>> = HashMap::new();

		for (i, mut buf) in bufs.into_iter().enumerate() {
			if i >= received {
				let _ = buf_pool.push(buf);
				continue;
			}

			let len = msgs[i].msg_len as usize;
			if len == 0 || !buf.set_used(len) {
				let _ = buf_pool.push(buf);
				continue;
			}

			let src = match sockaddr_to_std(&names[i], msgs[i].msg_hdr.msg_namelen) {
				Some(addr) => addr,
				None => {
					let _ = buf_pool.push(buf);
					continue;
				}
			};

			let peer_id = match peer_index.get(&PeerKey::from_ip(src.ip())) {
				Some(&id) => id,
				None => {
					let _ = buf_pool.push(buf);
					continue;
				}
			};

			let header = match OuterHeader::parse_and_validate(buf.as_slice()) {
				Ok(h) => h,
				Err(_) => {
					let _ = buf_pool.push(buf);
					continue;
				}
			};

			buf.sequence_key = Some(header.sequence);
			buf.peer_addr = Some(src);
			grouped.entry(peer_id).or_default().push(buf);
		}

		for (peer_id, mut batch) in grouped {
			match peers.get(peer_id) {
				Some(node) => node.decoder_queue.push_batch(&mut batch),
				None => buf_pool.push_batch(&mut batch),
			}
		}
	}
}

#[cfg(target_os = "linux")]
fn sockaddr_to_std(storage: &libc::sockaddr_storage, len: u32) -> Option<SocketAddr> {
	use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

	match storage.ss_family as libc::c_int {
		libc::AF_INET if len as usize >= std::mem::size_of::<libc::sockaddr_in>() => {
			let sin: libc::sockaddr_in = unsafe { std::ptr::read(storage as *const _ as *const libc::sockaddr_in) };
			let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
			Some(SocketAddr::new(IpAddr::V4(ip), u16::from_be(sin.sin_port)))
		}
		libc::AF_INET6 if len as usize >= std::mem::size_of::<libc::sockaddr_in6>() => {
			let sin6: libc::sockaddr_in6 = unsafe { std::ptr::read(storage as *const _ as *const libc::sockaddr_in6) };
			let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
			Some(SocketAddr::new(IpAddr::V6(ip), u16::from_be(sin6.sin6_port)))
		}
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::VecDeque;
	use std::io;
	use std::sync::Mutex as StdMutex;

	struct FakeTap {
		inbox: VecDeque<Vec<u8>>,
		outbox: Arc<StdMutex<Vec<Vec<u8>>>>,
	}

	impl Tap for FakeTap {
		fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
			match self.inbox.pop_front() {
				Some(frame) => {
					buf[..frame.len()].copy_from_slice(&frame);
					Ok(frame.len())
				}
				None => Err(io::Error::new(io::ErrorKind::WouldBlock, "no more frames")),
			}
		}

		fn write_frame(&mut self, buf: &[u8]) -> io::Result<()> {
			self.outbox.lock().unwrap().push(buf.to_vec());
			Ok(())
		}

		fn hw_addr(&self) -> [u8; 6] {
			[0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f]
		}

		fn mtu(&self) -> u16 {
			1500
		}
	}

	fn ethernet_frame(dst: [u8; 6], src: [u8; 6], payload: &[u8]) -> Vec<u8> {
		let mut frame = Vec::with_capacity(14 + payload.len());
		frame.extend_from_slice(&dst);
		frame.extend_from_slice(&src);
		frame.extend_from_slice(&[0x08, 0x00]);
		frame.extend_from_slice(payload);
		frame
	}

	#[test]
	fn unknown_unicast_is_dropped_not_flooded() {
		let buf_pool = BufferPool::new(4, 64);
		let fdb = Fdb::new();
		let peers: Slab<RemoteNode> = Slab::new();

		let mut frame = buf_pool.pop_wait();
		frame.clear();
		let bytes = ethernet_frame([0x01, 0x02, 0x03, 0x04, 0x05, 0x06], [0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f], b"hi");
		assert!(frame.append(&bytes));

		let before = buf_pool.count();
		handle_tap_frame(frame, &fdb, &peers, &buf_pool);

		assert_eq!(buf_pool.count(), before + 1, "dropped frame must return to buf_pool");
		assert!(fdb.get(&MacAddr([0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f])).is_some(), "source MAC must still be learned");
	}

	#[test]
	fn multicast_source_is_dropped() {
		let buf_pool = BufferPool::new(4, 64);
		let fdb = Fdb::new();
		let peers: Slab<RemoteNode> = Slab::new();

		let mut frame = buf_pool.pop_wait();
		frame.clear();
		let bytes = ethernet_frame(crate::mac::BROADCAST.0, [0x03, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f], b"hi");
		assert!(frame.append(&bytes));

		handle_tap_frame(frame, &fdb, &peers, &buf_pool);
		assert!(fdb.is_empty(), "multicast-sourced frames must not be learned");
	}

	#[test]
	fn tap_write_learns_source_against_the_sending_peer() {
		let fdb = Fdb::new();
		let mut peer_index = HashMap::new();
		let addr = SocketAddr::new("192.168.10.1".parse().unwrap(), 58023);
		peer_index.insert(PeerKey::from_ip(addr.ip()), 0usize);

		let outbox = Arc::new(StdMutex::new(Vec::new()));
		let tap: Mutex<Box<dyn Tap>> = Mutex::new(Box::new(FakeTap { inbox: VecDeque::new(), outbox: outbox.clone() }));

		let pool = BufferPool::new(1, 64);
		let mut frame = pool.pop_wait();
		frame.clear();
		let bytes = ethernet_frame([0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f], [0x11, 0x22, 0x33, 0x44, 0x55, 0x66], b"hi");
		assert!(frame.append(&bytes));
		frame.peer_addr = Some(addr);

		write_decoded_frame(&tap, &fdb, &peer_index, &frame).unwrap();

		let entry = fdb.get(&MacAddr([0x11, 0x22, 0x33, 0x44, 0x55, 0x66])).expect("source MAC must be learned");
		assert_eq!(entry.peer, Some(0));
		assert_eq!(outbox.lock().unwrap().len(), 1);
	}
}

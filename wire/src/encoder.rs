//! Frame → datagram(s): batching, fragmentation, sequence assignment, and
//! optional stream compression (§4.2).

use crate::buffer::{Buffer, BufferPool};
use crate::compress::{self, StreamEncoder};
use crate::error::Oversize;
use crate::wireformat::{CompressionFormat, OuterFormat, OuterHeader, FrameOption, OPTION_HEADER_LEN, OUTER_HEADER_LEN, VERSION};

fn reserved_buffer(pool: &BufferPool) -> Buffer {
	let mut buf = pool.pop_wait();
	buf.clear();
	let reserved = buf.set_used(OUTER_HEADER_LEN);
	debug_assert!(reserved, "avail_pool buffers must be at least as large as the outer header");
	buf
}

pub struct PacketEncoder {
	l2mtu: u16,
	l4mtu: u16,
	/// Destination queue for completed datagrams (the peer's socket-write
	/// queue in the running system).
	tx_pool: BufferPool,
	/// Supply of empty buffers this encoder draws from to build datagrams,
	/// and where consumed input frame buffers are returned. In the running
	/// system this is the switch's shared `buf_pool` — the same pool
	/// `tap-read` draws frames from — so every frame handed to [`Self::encode`]
	/// comes back here, never stranded in a different pool.
	avail_pool: BufferPool,
	compression: Option<Box<dyn StreamEncoder>>,
	compression_format: CompressionFormat,
	tx_buffer: Buffer,
	opt_len: u8,
	sequence: u32,
	/// Pre-compression source buffers withheld from `avail_pool` until the
	/// next flush resets the compressor (§9).
	inflight: Vec<Buffer>,
}

impl PacketEncoder {
	pub fn new(l2mtu: u16, l4mtu: u16, tx_pool: BufferPool, avail_pool: BufferPool, compression_mode: CompressionFormat) -> Self {
		let tx_buffer = reserved_buffer(&avail_pool);

		Self {
			l2mtu,
			l4mtu,
			tx_pool,
			avail_pool,
			compression: compress::encoder_for(compression_mode),
			compression_format: compression_mode,
			tx_buffer,
			opt_len: 0,
			sequence: 1,
			inflight: Vec::new(),
		}
	}

	/// Packs one Ethernet frame into the current datagram, fragmenting and
	/// flushing as needed. The frame buffer is always consumed: returned to
	/// `avail_pool` immediately if uncompressed or rejected, or retained in
	/// `inflight` until the next flush if compression succeeded.
	pub fn encode(&mut self, frame_buffer: Buffer) -> Result<(), Oversize> {
		if frame_buffer.used() > self.l2mtu as usize {
			let oversize = Oversize { size: frame_buffer.used(), l2mtu: self.l2mtu };
			let _ = self.avail_pool.push(frame_buffer);
			return Err(oversize);
		}

		let orig_size = frame_buffer.used() as u16;
		let mut payload = Vec::new();
		let format;

		if let Some(compressor) = self.compression.as_mut() {
			let mut scratch = Vec::new();
			match compressor.compress(frame_buffer.as_slice(), &mut scratch) {
				Ok(()) if !scratch.is_empty() => {
					payload = scratch;
					format = self.compression_format;
					self.inflight.push(frame_buffer);
				}
				_ => {
					payload.extend_from_slice(frame_buffer.as_slice());
					format = CompressionFormat::None;
					let _ = self.avail_pool.push(frame_buffer);
				}
			}
		} else {
			payload.extend_from_slice(frame_buffer.as_slice());
			format = CompressionFormat::None;
			let _ = self.avail_pool.push(frame_buffer);
		}

		self.append_payload(&payload, orig_size, format);
		Ok(())
	}

	fn headroom(&self) -> isize {
		self.l4mtu as isize - self.tx_buffer.used() as isize - OPTION_HEADER_LEN as isize
	}

	fn append_payload(&mut self, mut payload: &[u8], orig_size: u16, format: CompressionFormat) {
		if self.headroom() <= 0 {
			self.flush();
		}

		if payload.len() <= self.headroom().max(0) as usize {
			let opt = FrameOption::complete(orig_size, format, payload.len() as u16);
			self.write_option(&opt, payload);

			if self.tx_buffer.used() == self.l4mtu as usize {
				self.flush();
			}
		} else {
			let mut part: u8 = 1;

			while !payload.is_empty() {
				if self.headroom() <= 0 {
					self.flush();
					continue;
				}

				let chunk_len = payload.len().min(self.headroom() as usize);
				let (chunk, rest) = payload.split_at(chunk_len);
				let last = rest.is_empty();

				let opt = FrameOption::partial(orig_size, format, part, chunk_len as u16, last);
				self.write_option(&opt, chunk);

				payload = rest;
				part += 1;

				if self.tx_buffer.used() == self.l4mtu as usize {
					self.flush();
				}
			}
		}

		// Worst case the next frame is a lone max-size fragment: make sure
		// there's room for at least one more option header chain before it
		// would need ten consecutive option headers' worth of headroom.
		if self.headroom() < OUTER_HEADER_LEN as isize + 10 * OPTION_HEADER_LEN as isize {
			self.flush();
		}
	}

	fn write_option(&mut self, opt: &FrameOption, payload: &[u8]) {
		let mut header_bytes = [0u8; OPTION_HEADER_LEN];
		opt.write(&mut header_bytes);

		let header_fit = self.tx_buffer.append(&header_bytes);
		debug_assert!(header_fit, "headroom check must guarantee the option header fits");

		let payload_fit = self.tx_buffer.append(payload);
		debug_assert!(payload_fit, "headroom check must guarantee the payload fits");

		self.opt_len += 1;
	}

	/// Moves the current datagram to `tx_pool` (unless it holds only the
	/// reserved outer header) and assigns it the current sequence number,
	/// then advances the sequence (wrapping `2^32-1` back to `1`, never 0).
	pub fn flush(&mut self) {
		if self.tx_buffer.used() == OUTER_HEADER_LEN {
			return;
		}

		let header = OuterHeader {
			ver: VERSION,
			opt_len: self.opt_len,
			oam: false,
			critical: false,
			reserved: 0,
			format: OuterFormat::Encapsulated.to_byte(),
			channel: 0,
			sequence: self.sequence,
		};

		header.write(&mut self.tx_buffer.as_mut_slice()[..OUTER_HEADER_LEN]);

		self.sequence = if self.sequence == u32::MAX { 1 } else { self.sequence + 1 };
		self.opt_len = 0;

		let finished = std::mem::replace(&mut self.tx_buffer, reserved_buffer(&self.avail_pool));
		let _ = self.tx_pool.push(finished);

		for buf in self.inflight.drain(..) {
			let _ = self.avail_pool.push(buf);
		}

		if let Some(compressor) = self.compression.as_mut() {
			compressor.reset();
		}
	}

	pub fn sequence(&self) -> u32 {
		self.sequence
	}

	#[cfg(any(test, feature = "test-util"))]
	pub fn set_sequence_for_test(&mut self, sequence: u32) {
		self.sequence = sequence;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	/// `tx_pool` is a destination queue (starts empty, like the real
	/// `socket_write_queue`); `avail_pool` is a supply pool (starts full).
	fn pools(count: usize, size: usize) -> (BufferPool, BufferPool) {
		(BufferPool::new_queue(count, size), BufferPool::new(count, size))
	}

	fn frame(pool: &BufferPool, bytes: &[u8]) -> Buffer {
		let mut buf = pool.pop_wait();
		buf.clear();
		assert!(buf.append(bytes));
		buf
	}

	#[test]
	fn single_small_frame_flushes_one_complete_option() {
		let (tx_pool, avail_pool) = pools(4, 64);
		let mut enc = PacketEncoder::new(1522, 64, tx_pool.clone(), avail_pool.clone(), CompressionFormat::None);

		enc.encode(frame(&avail_pool, &[1, 2, 3, 4])).unwrap();
		enc.flush();

		let datagram = tx_pool.pop().expect("one datagram should have been flushed");
		let header = OuterHeader::parse(datagram.as_slice());
		assert_eq!(header.opt_len, 1);
		assert_eq!(header.sequence, 1);

		let opt = FrameOption::parse(&datagram.as_slice()[OUTER_HEADER_LEN..]);
		assert!(opt.complete && !opt.partial);
		assert_eq!(opt.orig_packet_size, 4);
	}

	#[test]
	fn oversize_frame_is_rejected_and_buffer_recycled() {
		let (tx_pool, avail_pool) = pools(2, 32);
		let mut enc = PacketEncoder::new(16, 32, tx_pool, avail_pool.clone(), CompressionFormat::None);

		let before = avail_pool.count();
		let err = enc.encode(frame(&avail_pool, &[0u8; 20])).unwrap_err();
		assert_eq!(err.size, 20);
		assert_eq!(avail_pool.count(), before);
	}

	#[test]
	fn sequence_wraps_from_u32_max_to_one() {
		let (tx_pool, avail_pool) = pools(16, 64);
		let mut enc = PacketEncoder::new(1522, 64, tx_pool.clone(), avail_pool.clone(), CompressionFormat::None);
		enc.set_sequence_for_test(u32::MAX - 4);

		let mut seen = Vec::new();
		for _ in 0..10 {
			enc.encode(frame(&avail_pool, &[0xAB; 4])).unwrap();
			enc.flush();
			let dgram = tx_pool.pop().expect("each encode+flush pair emits one datagram");
			seen.push(OuterHeader::parse(dgram.as_slice()).sequence);
		}

		assert_eq!(seen, vec![u32::MAX - 4, u32::MAX - 3, u32::MAX - 2, u32::MAX - 1, u32::MAX, 1, 2, 3, 4, 5]);
		assert_eq!(enc.sequence(), 6);
	}

	#[test]
	fn oversized_frame_fragments_across_two_datagrams() {
		let (tx_pool, avail_pool) = pools(8, 200);
		let mut enc = PacketEncoder::new(9220, 64, tx_pool.clone(), avail_pool.clone(), CompressionFormat::None);

		let big = vec![0x42u8; 100];
		enc.encode(frame(&avail_pool, &big)).unwrap();
		enc.flush();

		let mut reassembled = Vec::new();
		let mut count = 0;
		while let Some(dgram) = tx_pool.pop() {
			count += 1;
			let header = OuterHeader::parse(dgram.as_slice());
			let mut pos = OUTER_HEADER_LEN;
			for _ in 0..header.opt_len {
				let opt = FrameOption::parse(&dgram.as_slice()[pos..]);
				pos += OPTION_HEADER_LEN;
				reassembled.extend_from_slice(&dgram.as_slice()[pos..pos + opt.payload_length as usize]);
				pos += opt.payload_length as usize;
			}
		}

		assert!(count >= 2, "100-byte frame with 64-byte L4MTU must fragment");
		assert_eq!(reassembled, big);
	}
}

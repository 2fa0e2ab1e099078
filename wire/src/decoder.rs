//! Datagram → frame(s): header/option validation, sequence tracking,
//! fragment reassembly, and decompression (§4.3).
//!
//! Three pools are in play, named to match §4.6 rather than §4.3's looser
//! prose (which calls two differently-sized pools "avail_pool"): buffers the
//! size of a reassembled frame come from `reassembly_pool` (the switch's
//! shared `buf_pool`) and decoded frames are pushed to `out_pool` (the
//! switch's `tap_write_pool`); buffers the size of a received UDP datagram
//! belong to `dgram_pool` (also the switch's `buf_pool` — `reassembly_pool`
//! and `dgram_pool` are the same pool in the running system, since both
//! hold buffers of the one shared size class) and are returned there.

use std::net::SocketAddr;

use crate::buffer::{Buffer, BufferPool};
use crate::compress::{Lz4Decoder, StreamDecoder, ZstdDecoder};
use crate::error::{DecodeError, ProtocolError, SequenceAnomaly};
use crate::wireformat::{CompressionFormat, OuterFormat, OuterHeader, FrameOption, OPTION_HEADER_LEN, OUTER_HEADER_LEN, VERSION};

/// Mirrors the encoder's `reserved_buffer`: a freshly drawn reassembly
/// buffer may carry whatever a prior occupant left in it (a PARTIAL
/// sequence's accumulated bytes can be pushed back to the pool with
/// `used() > 0`), so every draw is cleared before use.
fn fresh_tx_buffer(pool: &BufferPool) -> Buffer {
	let mut buf = pool.pop_wait();
	buf.clear();
	buf
}

pub struct PacketDecoder {
	l2mtu: u16,
	reassembly_pool: BufferPool,
	out_pool: BufferPool,
	dgram_pool: BufferPool,
	/// Stamped onto every frame this decoder hands to `out_pool`, so the
	/// TAP-write task can learn the source MAC against the right peer in
	/// the FDB (§4.6) without re-deriving it from the datagram bytes.
	peer_addr: SocketAddr,

	first_packet: bool,
	last_sequence: u32,
	last_part: u8,
	last_format: CompressionFormat,
	last_orig_size: u16,

	tx_buffer: Buffer,
	inflight: Vec<Buffer>,

	lz4: Lz4Decoder,
	zstd: ZstdDecoder,
}

impl PacketDecoder {
	pub fn new(l2mtu: u16, reassembly_pool: BufferPool, out_pool: BufferPool, dgram_pool: BufferPool, peer_addr: SocketAddr) -> Self {
		let tx_buffer = fresh_tx_buffer(&reassembly_pool);

		Self {
			l2mtu,
			reassembly_pool,
			out_pool,
			dgram_pool,
			peer_addr,
			first_packet: true,
			last_sequence: 0,
			last_part: 0,
			last_format: CompressionFormat::None,
			last_orig_size: 0,
			tx_buffer,
			inflight: Vec::new(),
			lz4: Lz4Decoder,
			zstd: ZstdDecoder::new(),
		}
	}

	pub fn decode(&mut self, datagram: Buffer) -> Result<(), DecodeError> {
		if datagram.used() < OUTER_HEADER_LEN {
			self.reset_reassembly();
			self.flush_inflight_list();
			let _ = self.dgram_pool.push(datagram);
			return Err(ProtocolError::TooShort.into());
		}

		let header = OuterHeader::parse(datagram.as_slice());

		if header.ver > VERSION {
			return self.reject(datagram, ProtocolError::UnsupportedVersion(header.ver));
		}
		if header.reserved != 0 {
			return self.reject(datagram, ProtocolError::NonZeroReserved);
		}
		if header.format != OuterFormat::Encapsulated.to_byte() {
			return self.reject(datagram, ProtocolError::UnsupportedFormat(header.format));
		}
		if header.channel != 0 {
			return self.reject(datagram, ProtocolError::NonZeroChannel(header.channel));
		}

		let anomaly = self.track_sequence(header.sequence);

		let mut pos = OUTER_HEADER_LEN;
		let mut flush_inflight = false;

		for _ in 0..header.opt_len {
			if let Err(e) = self.process_one_option(&datagram, &mut pos, &mut flush_inflight) {
				return self.reject(datagram, e);
			}
		}

		self.inflight.push(datagram);
		if flush_inflight {
			self.flush_inflight_list();
		}

		match anomaly {
			Some(a) => Err(a.into()),
			None => Ok(()),
		}
	}

	fn reject(&mut self, datagram: Buffer, err: ProtocolError) -> Result<(), DecodeError> {
		self.reset_reassembly();
		self.flush_inflight_list();
		let _ = self.dgram_pool.push(datagram);
		Err(err.into())
	}

	/// Implements §4.3 step 2. The wrap formula `(prev > cur) ∧ (prev − cur)
	/// > 2^31` (§3) is checked before the ordinary expected-sequence
	/// comparison, since a genuine wrap makes `prev.wrapping_add(1)`
	/// overflow to a small number that would otherwise look like a loss.
	fn track_sequence(&mut self, seq: u32) -> Option<SequenceAnomaly> {
		if self.first_packet {
			self.first_packet = false;
			self.last_sequence = seq.wrapping_sub(1);
		}

		let prev = self.last_sequence;
		let wrapped = prev > seq && prev.wrapping_sub(seq) > (1u32 << 31);
		let expected = prev.wrapping_add(1);

		let anomaly = if wrapped || seq == expected {
			None
		} else if seq > expected {
			self.reset_reassembly();
			self.flush_inflight_list();
			Some(SequenceAnomaly::Loss { expected, got: seq })
		} else {
			self.reset_reassembly();
			self.flush_inflight_list();
			Some(SequenceAnomaly::OutOfOrder { last: prev, got: seq })
		};

		self.last_sequence = seq;
		anomaly
	}

	fn process_one_option(&mut self, datagram: &Buffer, pos: &mut usize, flush_inflight: &mut bool) -> Result<(), ProtocolError> {
		let bytes = datagram.as_slice();

		if *pos + OPTION_HEADER_LEN > bytes.len() {
			return Err(ProtocolError::OptionOverrun);
		}
		if FrameOption::reserved(&bytes[*pos..]) != 0 {
			return Err(ProtocolError::NonZeroReserved);
		}

		let opt = FrameOption::parse(&bytes[*pos..]);
		if !opt.is_valid_type() {
			return Err(ProtocolError::InvalidOptionType(bytes[*pos]));
		}

		let payload_start = *pos + OPTION_HEADER_LEN;
		let payload_end = payload_start + opt.payload_length as usize;
		if payload_end > bytes.len() {
			return Err(ProtocolError::PayloadOverrun);
		}
		if opt.orig_packet_size > self.l2mtu {
			return Err(ProtocolError::FrameTooLarge(opt.orig_packet_size));
		}

		let format = CompressionFormat::from_nibble(opt.format).ok_or(ProtocolError::InvalidOptionType(opt.format))?;
		// Copied out so `self` can be borrowed mutably below without
		// fighting the borrow checker over `datagram`.
		let payload = bytes[payload_start..payload_end].to_vec();
		*pos = payload_end;

		if opt.complete && !opt.partial {
			*flush_inflight = true;

			if self.last_part != 0 {
				log::warn!("orphaned partial reassembly abandoned at part {}", self.last_part);
				self.reset_reassembly();
			}

			if let Err(e) = self.apply_complete(&payload, opt.orig_packet_size, format) {
				log::error!("{e}");
			}

			return Ok(());
		}

		*flush_inflight = false;

		if opt.part == 1 {
			if self.last_part != 0 {
				log::warn!("fragment sequence restarted with a prior partial still pending");
				self.reset_reassembly();
				*flush_inflight = true;
				return Ok(());
			}
		} else if opt.part != self.last_part + 1 {
			log::warn!("out-of-sequence fragment part {} (expected {})", opt.part, self.last_part + 1);
			self.reset_reassembly();
			*flush_inflight = true;
			return Ok(());
		} else if self.last_part != 0 && (opt.orig_packet_size != self.last_orig_size || format != self.last_format) {
			log::warn!("fragment reassembly invariant violated mid-stream");
			self.reset_reassembly();
			*flush_inflight = true;
			return Ok(());
		}

		if !self.tx_buffer.append(&payload) {
			log::error!("{}", ProtocolError::ReassemblyOverflow);
			self.reset_reassembly();
			*flush_inflight = true;
			return Ok(());
		}

		if opt.complete {
			if let Err(e) = self.finish_partial(opt.orig_packet_size, format) {
				log::error!("{e}");
			}
			self.reset_reassembly();
			*flush_inflight = true;
		} else {
			self.last_part = opt.part;
			self.last_format = format;
			self.last_orig_size = opt.orig_packet_size;
		}

		Ok(())
	}

	fn apply_complete(&mut self, payload: &[u8], orig_size: u16, format: CompressionFormat) -> Result<(), ProtocolError> {
		self.tx_buffer.clear();
		self.fill_tx_buffer(payload, format, orig_size as usize)?;

		if self.tx_buffer.used() != orig_size as usize {
			self.tx_buffer.clear();
			return Err(ProtocolError::SizeMismatch);
		}

		let mut finished = std::mem::replace(&mut self.tx_buffer, fresh_tx_buffer(&self.reassembly_pool));
		finished.peer_addr = Some(self.peer_addr);
		let _ = self.out_pool.push(finished);
		Ok(())
	}

	/// The last fragment of a PARTIAL sequence: `tx_buffer` already holds
	/// the full (possibly compressed) accumulated byte stream.
	fn finish_partial(&mut self, orig_size: u16, format: CompressionFormat) -> Result<(), ProtocolError> {
		if format != CompressionFormat::None {
			let accumulated = std::mem::replace(&mut self.tx_buffer, fresh_tx_buffer(&self.reassembly_pool));
			let result = self.fill_tx_buffer(accumulated.as_slice(), format, orig_size as usize);
			let _ = self.reassembly_pool.push(accumulated);
			result?;
		}

		if self.tx_buffer.used() != orig_size as usize {
			self.tx_buffer.clear();
			return Err(ProtocolError::SizeMismatch);
		}

		let mut finished = std::mem::replace(&mut self.tx_buffer, fresh_tx_buffer(&self.reassembly_pool));
		finished.peer_addr = Some(self.peer_addr);
		let _ = self.out_pool.push(finished);
		Ok(())
	}

	fn fill_tx_buffer(&mut self, payload: &[u8], format: CompressionFormat, expected_size: usize) -> Result<(), ProtocolError> {
		match format {
			CompressionFormat::None => {
				if !self.tx_buffer.append(payload) {
					return Err(ProtocolError::ReassemblyOverflow);
				}
			}
			CompressionFormat::Lz4 | CompressionFormat::Zstd => {
				let mut out = Vec::new();
				let result = match format {
					CompressionFormat::Lz4 => self.lz4.decompress(payload, expected_size, &mut out),
					CompressionFormat::Zstd => self.zstd.decompress(payload, expected_size, &mut out),
					CompressionFormat::None => unreachable!(),
				};

				if let Err(e) = result {
					log::error!("{e}");
					return Err(ProtocolError::SizeMismatch);
				}
				if !self.tx_buffer.append(&out) {
					return Err(ProtocolError::ReassemblyOverflow);
				}
			}
		}
		Ok(())
	}

	fn reset_reassembly(&mut self) {
		self.tx_buffer.clear();
		self.last_part = 0;
		self.last_format = CompressionFormat::None;
		self.last_orig_size = 0;
	}

	fn flush_inflight_list(&mut self) {
		for buf in self.inflight.drain(..) {
			let _ = self.dgram_pool.push(buf);
		}
		self.lz4.reset();
		self.zstd.reset();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::encoder::PacketEncoder;
	use std::net::{IpAddr, Ipv4Addr, SocketAddr};

	fn peer_addr() -> SocketAddr {
		SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 10, 1)), 58023)
	}

	/// `frame_pool` is a supply pool (starts full, like the real shared
	/// `buf_pool`); `dgram_pool` and `out_pool` are destination queues
	/// (start empty) standing in for the decoder's consumed-datagram
	/// hand-off and the real `tap_write_pool`.
	fn pools() -> (BufferPool, BufferPool, BufferPool) {
		(BufferPool::new(8, 2048), BufferPool::new_queue(8, 2048), BufferPool::new_queue(8, 2048))
	}

	fn frame(pool: &BufferPool, bytes: &[u8]) -> Buffer {
		let mut buf = pool.pop_wait();
		buf.clear();
		assert!(buf.append(bytes));
		buf
	}

	#[test]
	fn round_trips_a_single_complete_frame() {
		let (frame_pool, dgram_pool, out_pool) = pools();
		let mut enc = PacketEncoder::new(1522, 1472, dgram_pool.clone(), frame_pool.clone(), CompressionFormat::None);
		let mut dec = PacketDecoder::new(1522, frame_pool.clone(), out_pool.clone(), dgram_pool.clone(), peer_addr());

		let payload = b"hello seth".to_vec();
		enc.encode(frame(&frame_pool, &payload)).unwrap();
		enc.flush();

		let dgram = dgram_pool.pop().unwrap();
		dec.decode(dgram).unwrap();

		let decoded = out_pool.pop().unwrap();
		assert_eq!(decoded.as_slice(), payload.as_slice());
	}

	#[test]
	fn rejects_bad_version_without_touching_state() {
		let (frame_pool, dgram_pool, out_pool) = pools();
		let mut dec = PacketDecoder::new(1522, frame_pool.clone(), out_pool.clone(), dgram_pool.clone(), peer_addr());

		let mut bad = dgram_pool.pop_wait();
		bad.clear();
		let header = OuterHeader { ver: 9, opt_len: 0, oam: false, critical: false, reserved: 0, format: 1, channel: 0, sequence: 1 };
		let mut bytes = [0u8; OUTER_HEADER_LEN];
		header.write(&mut bytes);
		assert!(bad.append(&bytes));

		let before = dgram_pool.count();
		let err = dec.decode(bad).unwrap_err();
		assert!(matches!(err, DecodeError::Protocol(ProtocolError::UnsupportedVersion(9))));
		assert_eq!(dgram_pool.count(), before + 1, "rejected datagram must return to its pool");
	}

	#[test]
	fn fragmented_frame_reassembles_across_two_datagrams() {
		let (frame_pool, dgram_pool, out_pool) = pools();
		let mut enc = PacketEncoder::new(1522, 64, dgram_pool.clone(), frame_pool.clone(), CompressionFormat::None);
		let mut dec = PacketDecoder::new(1522, frame_pool.clone(), out_pool.clone(), dgram_pool.clone(), peer_addr());

		let payload = vec![0x7eu8; 100];
		enc.encode(frame(&frame_pool, &payload)).unwrap();
		enc.flush();

		while let Some(dgram) = dgram_pool.pop() {
			dec.decode(dgram).unwrap();
		}

		let decoded = out_pool.pop().expect("reassembled frame should have been delivered");
		assert_eq!(decoded.as_slice(), payload.as_slice());
	}

	#[test]
	fn sequence_loss_does_not_propagate_past_one_datagram() {
		let (frame_pool, dgram_pool, out_pool) = pools();
		let mut enc = PacketEncoder::new(1522, 1472, dgram_pool.clone(), frame_pool.clone(), CompressionFormat::None);
		let mut dec = PacketDecoder::new(1522, frame_pool.clone(), out_pool.clone(), dgram_pool.clone(), peer_addr());

		enc.encode(frame(&frame_pool, b"first")).unwrap();
		enc.flush();
		let _dropped = dgram_pool.pop().unwrap();

		enc.encode(frame(&frame_pool, b"second")).unwrap();
		enc.flush();
		let second = dgram_pool.pop().unwrap();

		let err = dec.decode(second).unwrap_err();
		assert!(matches!(err, DecodeError::Sequence(SequenceAnomaly::Loss { .. })));

		let decoded = out_pool.pop().expect("the surviving datagram must still decode");
		assert_eq!(decoded.as_slice(), b"second");
	}
}

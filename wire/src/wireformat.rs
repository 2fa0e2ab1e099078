//! On-wire byte layouts: the outer datagram header and the per-frame option
//! header, plus the plain big-endian helpers used to read/write their
//! multi-byte fields (§4.1, §9 "Endianness" — no cross-byte packed bitfield
//! tricks, single-byte bitfields only, via [`bilge`]).

use bilge::prelude::*;

use crate::error::ProtocolError;

pub const OUTER_HEADER_LEN: usize = 8;
pub const OPTION_HEADER_LEN: usize = 8;

pub const VERSION: u8 = 1;

/// The outer header's `format` field. Only [`OuterFormat::Encapsulated`] is
/// ever accepted on decode; `Compressed` is reserved and always rejected
/// (§9 open question: compression lives in the frame option, not here).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OuterFormat {
	Encapsulated,
	Compressed,
	Unknown(u8),
}

impl OuterFormat {
	pub fn from_byte(b: u8) -> Self {
		match b {
			1 => OuterFormat::Encapsulated,
			2 => OuterFormat::Compressed,
			other => OuterFormat::Unknown(other),
		}
	}

	pub fn to_byte(self) -> u8 {
		match self {
			OuterFormat::Encapsulated => 1,
			OuterFormat::Compressed => 2,
			OuterFormat::Unknown(b) => b,
		}
	}
}

/// Byte 0 of the outer header: `Ver:4 | OptLen:4`.
#[bitsize(8)]
#[derive(FromBits, Clone, Copy, PartialEq, Eq, DebugBits)]
pub struct VerOptLen {
	pub opt_len: u4,
	pub ver: u4,
}

/// Byte 1 of the outer header: `O:1 | C:1 | Rsvd:6`.
#[bitsize(8)]
#[derive(FromBits, Clone, Copy, PartialEq, Eq, DebugBits)]
pub struct Flags {
	pub reserved: u6,
	pub critical: bool,
	pub oam: bool,
}

/// The 8-byte outer datagram header, parsed field-by-field rather than
/// transmuted over the wire bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OuterHeader {
	pub ver: u8,
	pub opt_len: u8,
	pub oam: bool,
	pub critical: bool,
	pub reserved: u8,
	pub format: u8,
	pub channel: u8,
	pub sequence: u32,
}

impl OuterHeader {
	pub fn write(&self, out: &mut [u8]) {
		debug_assert!(out.len() >= OUTER_HEADER_LEN);

		let ver_opt_len = VerOptLen::new(u4::new(self.opt_len), u4::new(self.ver));
		out[0] = u8::from(ver_opt_len);

		let flags = Flags::new(self.critical, self.oam);
		out[1] = u8::from(flags);

		out[2] = self.format;
		out[3] = self.channel;
		out[4..8].copy_from_slice(&self.sequence.to_be_bytes());
	}

	pub fn parse(src: &[u8]) -> Self {
		debug_assert!(src.len() >= OUTER_HEADER_LEN);

		let ver_opt_len = VerOptLen::from(src[0]);
		let flags = Flags::from(src[1]);

		Self {
			ver: ver_opt_len.ver().value(),
			opt_len: ver_opt_len.opt_len().value(),
			oam: flags.oam(),
			critical: flags.critical(),
			reserved: flags.reserved_i().value(),
			format: src[2],
			channel: src[3],
			sequence: u32::from_be_bytes([src[4], src[5], src[6], src[7]]),
		}
	}

	/// Parses and checks the fixed-field rules of §4.3 step 1 in one pass,
	/// for the socket-read task's pre-queue filter (§4.6) — the same checks
	/// [`crate::decoder::PacketDecoder::decode`] repeats per datagram, run
	/// once on arrival so garbage never reaches a decoder queue.
	pub fn parse_and_validate(bytes: &[u8]) -> Result<OuterHeader, ProtocolError> {
		if bytes.len() < OUTER_HEADER_LEN {
			return Err(ProtocolError::TooShort);
		}

		let header = OuterHeader::parse(bytes);

		if header.ver > VERSION {
			return Err(ProtocolError::UnsupportedVersion(header.ver));
		}
		if header.reserved != 0 {
			return Err(ProtocolError::NonZeroReserved);
		}
		if header.format != OuterFormat::Encapsulated.to_byte() {
			return Err(ProtocolError::UnsupportedFormat(header.format));
		}
		if header.channel != 0 {
			return Err(ProtocolError::NonZeroChannel(header.channel));
		}

		Ok(header)
	}
}

/// Byte 3 of the frame option header: `Format:4 | Part:4`.
#[bitsize(8)]
#[derive(FromBits, Clone, Copy, PartialEq, Eq, DebugBits)]
pub struct FormatPart {
	pub part: u4,
	pub format: u4,
}

pub const OPTION_TYPE_PARTIAL: u8 = 0b01;
pub const OPTION_TYPE_COMPLETE: u8 = 0b10;

/// A frame is fully uncompressed, LZ4-streamed, or ZSTD-streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
	None,
	Lz4,
	Zstd,
}

impl CompressionFormat {
	pub fn from_nibble(n: u8) -> Option<Self> {
		match n {
			0 => Some(CompressionFormat::None),
			1 => Some(CompressionFormat::Lz4),
			2 => Some(CompressionFormat::Zstd),
			_ => None,
		}
	}

	pub fn to_nibble(self) -> u8 {
		match self {
			CompressionFormat::None => 0,
			CompressionFormat::Lz4 => 1,
			CompressionFormat::Zstd => 2,
		}
	}
}

/// The 8-byte per-frame option header: §4.1's unification of the original's
/// "complete" and "partial" shapes into one fixed layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOption {
	pub partial: bool,
	pub complete: bool,
	pub orig_packet_size: u16,
	pub format: u8,
	pub part: u8,
	pub payload_length: u16,
}

impl FrameOption {
	pub fn complete(orig_packet_size: u16, format: CompressionFormat, payload_length: u16) -> Self {
		Self {
			partial: false,
			complete: true,
			orig_packet_size,
			format: format.to_nibble(),
			part: 0,
			payload_length,
		}
	}

	pub fn partial(orig_packet_size: u16, format: CompressionFormat, part: u8, payload_length: u16, last: bool) -> Self {
		Self {
			partial: true,
			complete: last,
			orig_packet_size,
			format: format.to_nibble(),
			part,
			payload_length,
		}
	}

	pub fn write(&self, out: &mut [u8]) {
		debug_assert!(out.len() >= OPTION_HEADER_LEN);

		out[0] = (self.partial as u8) | ((self.complete as u8) << 1);
		out[1..3].copy_from_slice(&self.orig_packet_size.to_be_bytes());

		let format_part = FormatPart::new(u4::new(self.part), u4::new(self.format));
		out[3] = u8::from(format_part);

		out[4..6].copy_from_slice(&self.payload_length.to_be_bytes());
		out[6..8].copy_from_slice(&0u16.to_be_bytes());
	}

	pub fn parse(src: &[u8]) -> Self {
		debug_assert!(src.len() >= OPTION_HEADER_LEN);

		let format_part = FormatPart::from(src[3]);

		Self {
			partial: src[0] & OPTION_TYPE_PARTIAL != 0,
			complete: src[0] & OPTION_TYPE_COMPLETE != 0,
			orig_packet_size: u16::from_be_bytes([src[1], src[2]]),
			format: format_part.format().value(),
			part: format_part.part().value(),
			payload_length: u16::from_be_bytes([src[4], src[5]]),
		}
	}

	/// `reserved` bytes 6..8, which must be zero on decode.
	pub fn reserved(src: &[u8]) -> u16 {
		u16::from_be_bytes([src[6], src[7]])
	}

	pub fn is_valid_type(&self) -> bool {
		self.partial || self.complete
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn outer_header_round_trips() {
		let header = OuterHeader {
			ver: 1,
			opt_len: 3,
			oam: false,
			critical: false,
			reserved: 0,
			format: 1,
			channel: 0,
			sequence: 0xdead_beef,
		};

		let mut buf = [0u8; OUTER_HEADER_LEN];
		header.write(&mut buf);
		assert_eq!(OuterHeader::parse(&buf), header);
	}

	#[test]
	fn frame_option_complete_round_trips() {
		let opt = FrameOption::complete(1400, CompressionFormat::Zstd, 512);
		let mut buf = [0u8; OPTION_HEADER_LEN];
		opt.write(&mut buf);

		let parsed = FrameOption::parse(&buf);
		assert_eq!(parsed, opt);
		assert_eq!(FrameOption::reserved(&buf), 0);
		assert!(parsed.is_valid_type());
	}

	#[test]
	fn frame_option_partial_last_sets_both_bits() {
		let opt = FrameOption::partial(2000, CompressionFormat::None, 3, 100, true);
		let mut buf = [0u8; OPTION_HEADER_LEN];
		opt.write(&mut buf);
		assert_eq!(buf[0], OPTION_TYPE_PARTIAL | OPTION_TYPE_COMPLETE);
	}

	#[test]
	fn invalid_type_is_rejected() {
		let mut buf = [0u8; OPTION_HEADER_LEN];
		buf[0] = 0;
		let opt = FrameOption::parse(&buf);
		assert!(!opt.is_valid_type());
	}

	#[test]
	fn parse_and_validate_accepts_a_well_formed_header() {
		let header = OuterHeader { ver: 1, opt_len: 0, oam: false, critical: false, reserved: 0, format: 1, channel: 0, sequence: 7 };
		let mut buf = [0u8; OUTER_HEADER_LEN];
		header.write(&mut buf);
		assert_eq!(OuterHeader::parse_and_validate(&buf).unwrap(), header);
	}

	#[test]
	fn parse_and_validate_rejects_short_buffers() {
		let buf = [0u8; OUTER_HEADER_LEN - 1];
		assert!(matches!(OuterHeader::parse_and_validate(&buf), Err(ProtocolError::TooShort)));
	}

	#[test]
	fn parse_and_validate_rejects_nonzero_channel() {
		let header = OuterHeader { ver: 1, opt_len: 0, oam: false, critical: false, reserved: 0, format: 1, channel: 3, sequence: 1 };
		let mut buf = [0u8; OUTER_HEADER_LEN];
		header.write(&mut buf);
		assert!(matches!(OuterHeader::parse_and_validate(&buf), Err(ProtocolError::NonZeroChannel(3))));
	}
}

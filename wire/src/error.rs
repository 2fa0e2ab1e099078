//! The error taxonomy of the design: each variant carries its own recovery
//! policy, enforced by where callers are allowed to propagate it (see the
//! module docs on [`crate::encoder`] and [`crate::decoder`]).

use std::fmt;
use std::io;

/// Invalid CLI/INI configuration. Surfaced at startup; the process exits 1.
#[derive(Debug)]
pub enum ConfigError {
	OutOfRange { field: &'static str, value: i64, min: i64, max: i64 },
	Missing { field: &'static str },
	Invalid { field: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::OutOfRange { field, value, min, max } => {
				write!(f, "{field}={value} is out of range [{min}, {max}]")
			}
			ConfigError::Missing { field } => write!(f, "missing mandatory field '{field}'"),
			ConfigError::Invalid { field, reason } => write!(f, "invalid value for '{field}': {reason}"),
		}
	}
}

impl std::error::Error for ConfigError {}

/// Socket bind, TAP open, or ioctl failure. Surfaced at startup; exit 1.
#[derive(Debug)]
pub struct SetupError(pub String);

impl fmt::Display for SetupError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "setup failed: {}", self.0)
	}
}

impl std::error::Error for SetupError {}

impl From<io::Error> for SetupError {
	fn from(err: io::Error) -> Self {
		SetupError(err.to_string())
	}
}

/// A malformed inbound datagram: bad header fields, option layout, or size
/// overflow. Recovery: drop the datagram and reassembly state, log, continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
	TooShort,
	UnsupportedVersion(u8),
	NonZeroReserved,
	UnsupportedFormat(u8),
	NonZeroChannel(u8),
	OptionOverrun,
	InvalidOptionType(u8),
	PayloadOverrun,
	FrameTooLarge(u16),
	ReassemblyOverflow,
	SizeMismatch,
}

impl fmt::Display for ProtocolError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ProtocolError::TooShort => write!(f, "datagram shorter than the outer header"),
			ProtocolError::UnsupportedVersion(v) => write!(f, "unsupported version {v}"),
			ProtocolError::NonZeroReserved => write!(f, "non-zero reserved bits"),
			ProtocolError::UnsupportedFormat(fmt_val) => write!(f, "unsupported outer format {fmt_val}"),
			ProtocolError::NonZeroChannel(c) => write!(f, "non-zero channel {c}"),
			ProtocolError::OptionOverrun => write!(f, "option header runs past the end of the datagram"),
			ProtocolError::InvalidOptionType(t) => write!(f, "invalid option type bits {t:#04b}"),
			ProtocolError::PayloadOverrun => write!(f, "option payload runs past the end of the datagram"),
			ProtocolError::FrameTooLarge(size) => write!(f, "OrigPacketSize {size} exceeds L2MTU"),
			ProtocolError::ReassemblyOverflow => write!(f, "reassembly buffer would exceed its capacity"),
			ProtocolError::SizeMismatch => write!(f, "reassembled size does not match OrigPacketSize"),
		}
	}
}

impl std::error::Error for ProtocolError {}

/// Loss, out-of-order arrival, or sequence wrap. Recovery: abandon any
/// partial reassembly, log at info/notice, continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceAnomaly {
	Loss { expected: u32, got: u32 },
	OutOfOrder { last: u32, got: u32 },
	OrphanedPartial { last_part: u8 },
}

impl fmt::Display for SequenceAnomaly {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SequenceAnomaly::Loss { expected, got } => write!(f, "sequence loss: expected {expected}, got {got}"),
			SequenceAnomaly::OutOfOrder { last, got } => write!(f, "out-of-order datagram: last {last}, got {got}"),
			SequenceAnomaly::OrphanedPartial { last_part } => write!(f, "orphaned partial reassembly at part {last_part}"),
		}
	}
}

impl std::error::Error for SequenceAnomaly {}

/// Everything [`crate::decoder::PacketDecoder::decode`] can hand back to its
/// caller for logging. Both variants mean the decoder already recovered on
/// its own (reassembly state reset, in-flight buffers returned); the error
/// only carries what happened for the RemoteNode decoder task to log.
#[derive(Debug)]
pub enum DecodeError {
	Protocol(ProtocolError),
	Sequence(SequenceAnomaly),
}

impl fmt::Display for DecodeError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DecodeError::Protocol(e) => write!(f, "{e}"),
			DecodeError::Sequence(e) => write!(f, "{e}"),
		}
	}
}

impl std::error::Error for DecodeError {}

impl From<ProtocolError> for DecodeError {
	fn from(e: ProtocolError) -> Self {
		DecodeError::Protocol(e)
	}
}

impl From<SequenceAnomaly> for DecodeError {
	fn from(e: SequenceAnomaly) -> Self {
		DecodeError::Sequence(e)
	}
}

/// A stream compressor/decompressor returned an error. On encode: fall back
/// to uncompressed and continue. On decode: drop the datagram and
/// reassembly state.
#[derive(Debug)]
pub struct CodecError(pub String);

impl fmt::Display for CodecError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "compression codec error: {}", self.0)
	}
}

impl std::error::Error for CodecError {}

/// `sendto` failed. Logged, buffer returned to pool, traffic continues.
#[derive(Debug)]
pub struct TransientIoError(pub io::Error);

impl fmt::Display for TransientIoError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "transient I/O error: {}", self.0)
	}
}

impl std::error::Error for TransientIoError {}

/// TAP `write` failed. Treated as unrecoverable: the kernel interface is
/// assumed gone and the process exits 1.
#[derive(Debug)]
pub struct FatalIoError(pub io::Error);

impl fmt::Display for FatalIoError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "fatal I/O error: {}", self.0)
	}
}

impl std::error::Error for FatalIoError {}

/// A frame read from the TAP exceeds L2MTU. Dropped, logged at error.
#[derive(Debug, Clone, Copy)]
pub struct Oversize {
	pub size: usize,
	pub l2mtu: u16,
}

impl fmt::Display for Oversize {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "frame of {} bytes exceeds L2MTU {}", self.size, self.l2mtu)
	}
}

impl std::error::Error for Oversize {}

//! Per-stream compression (§4.2 step 2, §4.3 per-frame decompress, §9
//! "Ownership of in-flight buffers during stream compression").
//!
//! Each [`RemoteNode`](crate::remote_node::RemoteNode) owns one encode-side
//! compressor (matching its configured [`CompressionFormat`]) and the decode
//! side always owns exactly one LZ4 and one ZSTD context, since an incoming
//! datagram's per-frame option declares its own format independent of what
//! this peer sends. `reset()` drops and rebuilds the underlying context,
//! which is the point at which buffers retained in an encoder's in-flight
//! list become safe to return to the pool again.

use crate::error::CodecError;
use crate::wireformat::CompressionFormat;

pub trait StreamEncoder: Send {
	fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError>;
	fn reset(&mut self);
}

pub trait StreamDecoder: Send {
	fn decompress(&mut self, input: &[u8], expected_size: usize, out: &mut Vec<u8>) -> Result<(), CodecError>;
	fn reset(&mut self);
}

/// Builds the encode-side compressor matching a [`CompressionFormat`], or
/// `None` for [`CompressionFormat::None`].
pub fn encoder_for(format: CompressionFormat) -> Option<Box<dyn StreamEncoder>> {
	match format {
		CompressionFormat::None => None,
		CompressionFormat::Lz4 => Some(Box::new(Lz4Encoder)),
		CompressionFormat::Zstd => Some(Box::new(ZstdEncoder::new())),
	}
}

pub struct Lz4Encoder;

impl StreamEncoder for Lz4Encoder {
	fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
		let compressed = lz4::block::compress(input, None, false).map_err(|e| CodecError(e.to_string()))?;
		out.clear();
		out.extend_from_slice(&compressed);
		Ok(())
	}

	fn reset(&mut self) {}
}

pub struct Lz4Decoder;

impl StreamDecoder for Lz4Decoder {
	fn decompress(&mut self, input: &[u8], expected_size: usize, out: &mut Vec<u8>) -> Result<(), CodecError> {
		let decompressed =
			lz4::block::decompress(input, Some(expected_size as i32)).map_err(|e| CodecError(e.to_string()))?;
		out.clear();
		out.extend_from_slice(&decompressed);
		Ok(())
	}

	fn reset(&mut self) {}
}

/// ZSTD's default compression level; the design does not expose level
/// tuning, matching spec.md's single `-a/--compression {none|lz4|zstd}` knob.
const ZSTD_LEVEL: i32 = 3;

pub struct ZstdEncoder {
	inner: zstd::bulk::Compressor<'static>,
}

impl ZstdEncoder {
	pub fn new() -> Self {
		Self {
			inner: zstd::bulk::Compressor::new(ZSTD_LEVEL).expect("zstd compressor context allocation"),
		}
	}
}

impl StreamEncoder for ZstdEncoder {
	fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
		let compressed = self.inner.compress(input).map_err(|e| CodecError(e.to_string()))?;
		out.clear();
		out.extend_from_slice(&compressed);
		Ok(())
	}

	fn reset(&mut self) {
		self.inner = zstd::bulk::Compressor::new(ZSTD_LEVEL).expect("zstd compressor context allocation");
	}
}

pub struct ZstdDecoder {
	inner: zstd::bulk::Decompressor<'static>,
}

impl ZstdDecoder {
	pub fn new() -> Self {
		Self {
			inner: zstd::bulk::Decompressor::new().expect("zstd decompressor context allocation"),
		}
	}
}

impl StreamDecoder for ZstdDecoder {
	fn decompress(&mut self, input: &[u8], expected_size: usize, out: &mut Vec<u8>) -> Result<(), CodecError> {
		let decompressed = self.inner.decompress(input, expected_size).map_err(|e| CodecError(e.to_string()))?;
		out.clear();
		out.extend_from_slice(&decompressed);
		Ok(())
	}

	fn reset(&mut self) {
		self.inner = zstd::bulk::Decompressor::new().expect("zstd decompressor context allocation");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn lz4_round_trips() {
		let mut enc = Lz4Encoder;
		let mut dec = Lz4Decoder;
		let input = b"the quick brown fox jumps over the lazy dog".repeat(8);

		let mut compressed = Vec::new();
		enc.compress(&input, &mut compressed).unwrap();

		let mut output = Vec::new();
		dec.decompress(&compressed, input.len(), &mut output).unwrap();
		assert_eq!(output, input);
	}

	#[test]
	fn zstd_round_trips_across_reset() {
		let mut enc = ZstdEncoder::new();
		let mut dec = ZstdDecoder::new();
		let input = b"A0123456789B0123456789C0123456789".repeat(16);

		let mut compressed = Vec::new();
		enc.compress(&input, &mut compressed).unwrap();
		enc.reset();

		let mut output = Vec::new();
		dec.decompress(&compressed, input.len(), &mut output).unwrap();
		dec.reset();
		assert_eq!(output, input);
	}
}

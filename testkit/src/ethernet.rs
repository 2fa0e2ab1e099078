//! Byte-builder for Ethernet II frames: 6-byte dst/src MAC plus a 16-bit
//! ethertype, with the payload appended untouched.

pub const HEADER_LEN: usize = 14;
pub const MAC_LEN: usize = 6;

pub const ETHERTYPE_IPV4: u16 = 0x0800;

pub fn build(dst_mac: [u8; MAC_LEN], src_mac: [u8; MAC_LEN], ethertype: u16, payload: &[u8]) -> Vec<u8> {
	let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
	frame.extend_from_slice(&dst_mac);
	frame.extend_from_slice(&src_mac);
	frame.extend_from_slice(&ethertype.to_be_bytes());
	frame.extend_from_slice(payload);
	frame
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn build_lays_out_dst_then_src_then_ethertype_then_payload() {
		let dst = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
		let src = [0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f];
		let frame = build(dst, src, ETHERTYPE_IPV4, &[0xaa, 0xbb]);

		assert_eq!(&frame[0..6], &dst);
		assert_eq!(&frame[6..12], &src);
		assert_eq!(&frame[12..14], &0x0800u16.to_be_bytes());
		assert_eq!(&frame[14..], &[0xaa, 0xbb]);
	}
}

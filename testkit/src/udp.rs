//! Byte-builder for UDPv4 datagrams: the 8-byte UDP header (with checksum
//! computed over the IPv4 pseudo-header, per RFC 768) stitched to an IPv4
//! header built via [`crate::ipv4`].

use crate::checksum;
use crate::ipv4::{self, Ipv4Header};

pub const HEADER_LEN: usize = 8;

pub struct UdpDatagram {
	pub src_addr: [u8; 4],
	pub dst_addr: [u8; 4],
	pub src_port: u16,
	pub dst_port: u16,
	pub ttl: u8,
	pub id: u16,
}

impl UdpDatagram {
	/// Builds a complete IPv4 + UDP datagram carrying `payload`.
	pub fn build(&self, payload: &[u8]) -> Vec<u8> {
		let udp_len = HEADER_LEN + payload.len();

		let mut udp_header = vec![0u8; HEADER_LEN];
		udp_header[0..2].copy_from_slice(&self.src_port.to_be_bytes());
		udp_header[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
		udp_header[4..6].copy_from_slice(&(udp_len as u16).to_be_bytes());

		let sum = pseudo_header_checksum(&self.src_addr, &self.dst_addr, udp_len as u16, &udp_header, payload);
		udp_header[6..8].copy_from_slice(&sum.to_be_bytes());

		let ip_header = Ipv4Header { id: self.id, ttl: self.ttl, protocol: ipv4::PROTO_UDP, src_addr: self.src_addr, dst_addr: self.dst_addr }
			.build(udp_len as u16);

		let mut datagram = Vec::with_capacity(ip_header.len() + udp_header.len() + payload.len());
		datagram.extend_from_slice(&ip_header);
		datagram.extend_from_slice(&udp_header);
		datagram.extend_from_slice(payload);
		datagram
	}
}

fn pseudo_header_checksum(src: &[u8; 4], dst: &[u8; 4], udp_len: u16, udp_header: &[u8], payload: &[u8]) -> u16 {
	let mut pseudo = Vec::with_capacity(12);
	pseudo.extend_from_slice(src);
	pseudo.extend_from_slice(dst);
	pseudo.push(0);
	pseudo.push(ipv4::PROTO_UDP);
	pseudo.extend_from_slice(&udp_len.to_be_bytes());

	let mut sum = checksum::partial(&pseudo, 0);
	sum = checksum::partial(udp_header, sum);
	sum = checksum::partial(payload, sum);
	checksum::finalize(sum)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn build_embeds_both_headers_and_the_payload() {
		let datagram = UdpDatagram { src_addr: [172, 16, 10, 99], dst_addr: [172, 16, 10, 12], src_port: 58023, dst_port: 6729, ttl: 64, id: 0x1c46 };
		let bytes = datagram.build(b"hello");

		assert_eq!(bytes.len(), ipv4::HEADER_LEN + HEADER_LEN + 5);
		assert_eq!(&bytes[ipv4::HEADER_LEN..ipv4::HEADER_LEN + 2], &58023u16.to_be_bytes());
		assert_eq!(&bytes[ipv4::HEADER_LEN + 2..ipv4::HEADER_LEN + 4], &6729u16.to_be_bytes());
		assert_eq!(&bytes[ipv4::HEADER_LEN + HEADER_LEN..], b"hello");
	}
}

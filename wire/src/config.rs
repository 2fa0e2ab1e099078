//! The validated configuration `seth` builds from CLI flags and the
//! optional INI config file (§6.1, §6.2) before handing it to
//! [`crate::switch::PacketSwitch`]. Parsing CLI args and the INI file is
//! `seth`'s job; this module only owns the shape of a valid configuration
//! and the range/consistency checks spec.md §9 calls out.

use std::net::IpAddr;
use std::ops::RangeInclusive;

use crate::error::ConfigError;
use crate::wireformat::CompressionFormat;

pub const MTU_RANGE: RangeInclusive<u16> = 1200..=9198;
pub const TXSIZE_RANGE: RangeInclusive<u16> = 1200..=9218;

pub const DEFAULT_MTU: u16 = 1500;
pub const DEFAULT_TXSIZE: u16 = 1500;
pub const DEFAULT_PORT: u16 = 58023;
pub const DEFAULT_IFNAME: &str = "seth0";
pub const IFNAMSIZ: usize = 16;

/// Extra room `txsize` is allowed over `l2mtu` to account for the Ethernet
/// header the tunnel adds when a frame is carried intact, resolving the
/// "txsize vs mtu" open question of spec.md §9 as `l4_txsize ≤ l2mtu +
/// ethernet_framing`.
pub const ETHERNET_FRAME_OVERHEAD: u16 = 14;

#[derive(Debug, Clone)]
pub struct Config {
	pub mtu: u16,
	pub txsize: u16,
	pub src: IpAddr,
	pub port: u16,
	pub ifname: String,
	pub compression: CompressionFormat,
	pub peers: Vec<IpAddr>,
}

impl Config {
	/// Derived as device MTU + 14 (Ethernet header) + 8 (double-tag slack).
	pub fn l2mtu(&self) -> u16 {
		self.mtu + 22
	}

	#[allow(clippy::too_many_arguments)]
	pub fn validate(
		mtu: u16,
		txsize: u16,
		src: Option<IpAddr>,
		port: u16,
		ifname: &str,
		compression: CompressionFormat,
		peers: Vec<IpAddr>,
	) -> Result<Config, ConfigError> {
		if !MTU_RANGE.contains(&mtu) {
			return Err(ConfigError::OutOfRange {
				field: "mtu",
				value: mtu as i64,
				min: *MTU_RANGE.start() as i64,
				max: *MTU_RANGE.end() as i64,
			});
		}

		if !TXSIZE_RANGE.contains(&txsize) {
			return Err(ConfigError::OutOfRange {
				field: "txsize",
				value: txsize as i64,
				min: *TXSIZE_RANGE.start() as i64,
				max: *TXSIZE_RANGE.end() as i64,
			});
		}

		let l2mtu = mtu + 22;
		if txsize > l2mtu + ETHERNET_FRAME_OVERHEAD {
			return Err(ConfigError::Invalid {
				field: "txsize",
				reason: format!("txsize {txsize} exceeds l2mtu {l2mtu} + ethernet framing {ETHERNET_FRAME_OVERHEAD}"),
			});
		}

		let src = src.ok_or(ConfigError::Missing { field: "src" })?;

		if peers.is_empty() {
			return Err(ConfigError::Missing { field: "dst" });
		}

		if ifname.is_empty() || ifname.len() >= IFNAMSIZ {
			return Err(ConfigError::Invalid {
				field: "ifname",
				reason: format!("must be 1 to {} characters", IFNAMSIZ - 1),
			});
		}

		if port == 0 {
			return Err(ConfigError::OutOfRange { field: "port", value: 0, min: 1, max: 65535 });
		}

		Ok(Config { mtu, txsize, src, port, ifname: ifname.to_string(), compression, peers })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::Ipv4Addr;

	fn ok_args() -> (u16, u16, Option<IpAddr>, u16, &'static str, CompressionFormat, Vec<IpAddr>) {
		(
			DEFAULT_MTU,
			DEFAULT_TXSIZE,
			Some(IpAddr::V4(Ipv4Addr::new(172, 16, 101, 102))),
			DEFAULT_PORT,
			DEFAULT_IFNAME,
			CompressionFormat::None,
			vec![IpAddr::V4(Ipv4Addr::new(192, 168, 10, 1))],
		)
	}

	#[test]
	fn defaults_validate_cleanly() {
		let (mtu, txsize, src, port, ifname, compression, peers) = ok_args();
		assert!(Config::validate(mtu, txsize, src, port, ifname, compression, peers).is_ok());
	}

	#[test]
	fn mtu_out_of_range_is_rejected() {
		let (_, txsize, src, port, ifname, compression, peers) = ok_args();
		let err = Config::validate(1000, txsize, src, port, ifname, compression, peers).unwrap_err();
		assert!(matches!(err, ConfigError::OutOfRange { field: "mtu", .. }));
	}

	#[test]
	fn missing_src_is_rejected() {
		let (mtu, txsize, _, port, ifname, compression, peers) = ok_args();
		let err = Config::validate(mtu, txsize, None, port, ifname, compression, peers).unwrap_err();
		assert!(matches!(err, ConfigError::Missing { field: "src" }));
	}

	#[test]
	fn empty_peers_is_rejected() {
		let (mtu, txsize, src, port, ifname, compression, _) = ok_args();
		let err = Config::validate(mtu, txsize, src, port, ifname, compression, Vec::new()).unwrap_err();
		assert!(matches!(err, ConfigError::Missing { field: "dst" }));
	}

	#[test]
	fn txsize_far_beyond_l2mtu_is_rejected() {
		let (mtu, _, src, port, ifname, compression, peers) = ok_args();
		let err = Config::validate(mtu, 9218, src, port, ifname, compression, peers).unwrap_err();
		assert!(matches!(err, ConfigError::Invalid { field: "txsize", .. }));
	}
}

//! Merges CLI flags, an optional INI file, and `wire::config`'s defaults
//! into one [`Config`] (§6.2: CLI wins over config file over built-in
//! defaults).

use std::net::IpAddr;
use std::path::Path;

use runtime::logger::LogLevel;
use wire::config::{Config, DEFAULT_IFNAME, DEFAULT_MTU, DEFAULT_PORT, DEFAULT_TXSIZE};
use wire::error::ConfigError;
use wire::wireformat::CompressionFormat;

use crate::cli::Cli;
use crate::inifile::{IniError, IniFile};

pub struct Resolved {
	pub config: Config,
	pub log_level: LogLevel,
}

pub fn resolve(cli: &Cli) -> Result<Resolved, ResolveError> {
	let ini = match &cli.config_file {
		Some(path) => Some(IniFile::load(path)?),
		None => None,
	};
	let global = ini.as_ref().map(|f| &f.global);

	let mtu = cli.mtu.or_else(|| ini_parse(global, "mtu")).unwrap_or(DEFAULT_MTU);
	let txsize = cli.txsize.or_else(|| ini_parse(global, "txsize")).unwrap_or(DEFAULT_TXSIZE);
	let port = cli.port.or_else(|| ini_parse(global, "port")).unwrap_or(DEFAULT_PORT);
	let src = cli.src.or_else(|| ini_parse(global, "src"));

	let ifname = cli
		.ifname
		.clone()
		.or_else(|| global.and_then(|g| g.get("ifname").cloned()))
		.unwrap_or_else(|| DEFAULT_IFNAME.to_string());

	let compression = cli
		.compression
		.map(CompressionFormat::from)
		.or_else(|| global.and_then(|g| g.get("compression")).and_then(|s| parse_compression(s)))
		.unwrap_or(CompressionFormat::None);

	let log_level: LogLevel = cli
		.log_level
		.map(LogLevel::from)
		.or_else(|| global.and_then(|g| g.get("log-level")).and_then(|s| s.parse().ok()))
		.unwrap_or(LogLevel::Notice);

	let mut peers: Vec<IpAddr> = cli.dst.clone();
	if let Some(file) = &ini {
		for section in &file.peers {
			if let Some(dst) = section.get("dst") {
				let addr = dst.parse().map_err(|_| ResolveError::Config(ConfigError::Invalid { field: "dst", reason: format!("'{dst}' is not a valid IP address") }))?;
				peers.push(addr);
			}
		}
	}

	let config = Config::validate(mtu, txsize, src, port, &ifname, compression, peers)?;

	Ok(Resolved { config, log_level })
}

fn ini_parse<T: std::str::FromStr>(global: Option<&std::collections::HashMap<String, String>>, key: &str) -> Option<T> {
	global.and_then(|g| g.get(key)).and_then(|s| s.parse().ok())
}

fn parse_compression(s: &str) -> Option<CompressionFormat> {
	match s {
		"none" => Some(CompressionFormat::None),
		"lz4" => Some(CompressionFormat::Lz4),
		"zstd" => Some(CompressionFormat::Zstd),
		_ => None,
	}
}

#[derive(Debug)]
pub enum ResolveError {
	Ini(IniError),
	Config(ConfigError),
}

impl std::fmt::Display for ResolveError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ResolveError::Ini(e) => write!(f, "{e}"),
			ResolveError::Config(e) => write!(f, "{e}"),
		}
	}
}

impl std::error::Error for ResolveError {}

impl From<IniError> for ResolveError {
	fn from(e: IniError) -> Self {
		ResolveError::Ini(e)
	}
}

impl From<ConfigError> for ResolveError {
	fn from(e: ConfigError) -> Self {
		ResolveError::Config(e)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::Ipv4Addr;

	fn base_cli() -> Cli {
		Cli {
			config_file: None,
			log_level: None,
			mtu: None,
			txsize: None,
			src: Some(IpAddr::V4(Ipv4Addr::new(172, 16, 101, 102))),
			dst: vec![IpAddr::V4(Ipv4Addr::new(192, 168, 10, 1))],
			port: None,
			ifname: None,
			compression: None,
		}
	}

	#[test]
	fn cli_only_resolves_with_defaults() {
		let resolved = resolve(&base_cli()).unwrap();
		assert_eq!(resolved.config.mtu, DEFAULT_MTU);
		assert_eq!(resolved.config.peers.len(), 1);
	}

	#[test]
	fn missing_destination_is_a_resolve_error() {
		let mut cli = base_cli();
		cli.dst.clear();
		assert!(resolve(&cli).is_err());
	}
}

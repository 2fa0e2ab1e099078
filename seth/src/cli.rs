//! `-c/--config-file`, `-l/--log-level`, and the flags that mirror
//! [`wire::config::Config`]'s fields (§6.1). CLI values always win over the
//! config file (§6.2).

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use runtime::logger::LogLevel;
use wire::wireformat::CompressionFormat;

#[derive(Parser, Debug)]
#[command(name = "seth", author, version, about = "Super-Ethernet tunnel: L2-over-UDP with a learning FDB")]
pub struct Cli {
	/// INI file with a `[global]` section and one or more `[[peer]]` blocks.
	#[arg(short = 'c', long = "config-file")]
	pub config_file: Option<PathBuf>,

	#[arg(short = 'l', long = "log-level")]
	pub log_level: Option<CliLogLevel>,

	/// Device MTU; the wire-level L2MTU adds tagging/framing headroom.
	#[arg(short = 'm', long)]
	pub mtu: Option<u16>,

	/// Max UDP payload size the encoder will fill before fragmenting.
	#[arg(short = 't', long)]
	pub txsize: Option<u16>,

	/// Local address to bind the tunnel socket to.
	#[arg(short = 's', long)]
	pub src: Option<IpAddr>,

	/// Remote peer address. Repeatable: one `RemoteNode` per occurrence.
	#[arg(short = 'd', long = "dst")]
	pub dst: Vec<IpAddr>,

	#[arg(short = 'p', long)]
	pub port: Option<u16>,

	#[arg(short = 'i', long)]
	pub ifname: Option<String>,

	#[arg(short = 'a', long, value_enum)]
	pub compression: Option<CliCompression>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum CliCompression {
	None,
	Lz4,
	Zstd,
}

impl From<CliCompression> for CompressionFormat {
	fn from(c: CliCompression) -> Self {
		match c {
			CliCompression::None => CompressionFormat::None,
			CliCompression::Lz4 => CompressionFormat::Lz4,
			CliCompression::Zstd => CompressionFormat::Zstd,
		}
	}
}

/// `log` has no `Notice` level (§6.4); kept as its own CLI variant so
/// `--log-level notice` still parses, folding onto `LevelFilter::Info`.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum CliLogLevel {
	Error,
	Warning,
	Notice,
	Info,
	Debug,
}

impl From<CliLogLevel> for LogLevel {
	fn from(l: CliLogLevel) -> Self {
		match l {
			CliLogLevel::Error => LogLevel::Error,
			CliLogLevel::Warning => LogLevel::Warning,
			CliLogLevel::Notice => LogLevel::Notice,
			CliLogLevel::Info => LogLevel::Info,
			CliLogLevel::Debug => LogLevel::Debug,
		}
	}
}

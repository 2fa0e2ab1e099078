//! `seth`: opens a TAP device and a UDP socket per the resolved
//! configuration, then hands both to [`wire::switch::PacketSwitch`] and
//! blocks until a signal requests shutdown (§6, §5).

mod cli;
mod inifile;
mod resolve;
mod tuntap;

use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6, UdpSocket};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use socket2::{Domain, Socket, Type};

use wire::fdb::Fdb;
use wire::switch::PacketSwitch;

use cli::Cli;
use tuntap::TunTap;

/// Binds `[::]:port` with `IPV6_V6ONLY` cleared so IPv4 peers (reachable as
/// IPv4-mapped IPv6 addresses) and native IPv6 peers share one socket.
fn bind_dual_stack(port: u16) -> std::io::Result<UdpSocket> {
	let socket = Socket::new(Domain::IPV6, Type::DGRAM, None)?;
	socket.set_only_v6(false)?;
	let addr: SocketAddr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0).into();
	socket.bind(&addr.into())?;
	Ok(socket.into())
}

fn main() -> ExitCode {
	let cli = Cli::parse();

	let resolved = match resolve::resolve(&cli) {
		Ok(r) => r,
		Err(e) => {
			eprintln!("seth: {e}");
			return ExitCode::FAILURE;
		}
	};

	runtime::logger::init(resolved.log_level);

	if let Err(e) = runtime::install_signal_handler() {
		log::error!("installing signal handler: {e}");
		return ExitCode::FAILURE;
	}

	let config = resolved.config;

	let tap = match TunTap::open(&config.ifname, config.mtu) {
		Ok(tap) => tap,
		Err(e) => {
			log::error!("{e}");
			return ExitCode::FAILURE;
		}
	};
	log::info!("opened TAP device {} at mtu {}", tap.name(), config.mtu);

	let socket = match bind_dual_stack(config.port) {
		Ok(s) => s,
		Err(e) => {
			log::error!("binding [::]:{}: {e}", config.port);
			return ExitCode::FAILURE;
		}
	};
	log::info!("listening on [::]:{} (local identity {}), {} peer(s) configured", config.port, config.src, config.peers.len());

	let fdb = Arc::new(Fdb::new());

	let mut switch = match PacketSwitch::new(Box::new(tap), socket, &config, fdb) {
		Ok(s) => s,
		Err(e) => {
			log::error!("setting up packet switch: {e}");
			return ExitCode::FAILURE;
		}
	};

	switch.spawn();
	switch.join();

	ExitCode::SUCCESS
}

//! Opens a real Linux TAP device and implements [`wire::tap::Tap`] over it
//! (§1 "Out of scope... TAP device creation" is `wire`'s boundary, not
//! `seth`'s). Grounded on the `ioctl(TUNSETIFF)` dance other tunnel clients
//! in the retrieval pack use for their TUN devices, adapted to request
//! `IFF_TAP` instead and to also fetch the kernel-assigned MAC and bring the
//! link up.

use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;

use wire::config::IFNAMSIZ;
use wire::error::SetupError;
use wire::tap::Tap;

/// `_IOW('T', 202, int)`, hardcoded the same way other `/dev/net/tun`
/// clients do since `libc` doesn't expose Linux's tun/tap-specific ioctls.
const TUNSETIFF: u64 = 0x4004_54ca;

#[repr(C)]
union IfReqData {
	flags: libc::c_short,
	mtu: libc::c_int,
	hwaddr: libc::sockaddr,
}

#[repr(C)]
struct IfReq {
	name: [libc::c_char; libc::IFNAMSIZ],
	data: IfReqData,
}

impl IfReq {
	fn named(ifname: &str) -> Self {
		let mut name = [0 as libc::c_char; libc::IFNAMSIZ];
		for (dst, &byte) in name.iter_mut().zip(ifname.as_bytes()) {
			*dst = byte as libc::c_char;
		}
		IfReq { name, data: IfReqData { flags: 0 } }
	}
}

pub struct TunTap {
	fd: RawFd,
	name: String,
	hw_addr: [u8; 6],
	mtu: u16,
}

impl TunTap {
	pub fn open(ifname: &str, mtu: u16) -> Result<Self, SetupError> {
		if ifname.is_empty() || ifname.len() >= IFNAMSIZ {
			return Err(SetupError(format!("interface name '{ifname}' must be 1 to {} characters", IFNAMSIZ - 1)));
		}

		let path = CString::new("/dev/net/tun").expect("no interior NUL");
		let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR) };
		if fd < 0 {
			return Err(io::Error::last_os_error().into());
		}

		let mut req = IfReq::named(ifname);
		req.data.flags = (libc::IFF_TAP | libc::IFF_NO_PI) as libc::c_short;

		if unsafe { libc::ioctl(fd, TUNSETIFF, &req) } < 0 {
			let err = io::Error::last_os_error();
			unsafe { libc::close(fd) };
			return Err(err.into());
		}

		let ctl = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
		if ctl < 0 {
			let err = io::Error::last_os_error();
			unsafe { libc::close(fd) };
			return Err(err.into());
		}

		let result = Self::configure(ctl, ifname, mtu);
		unsafe { libc::close(ctl) };

		let hw_addr = match result {
			Ok(addr) => addr,
			Err(err) => {
				unsafe { libc::close(fd) };
				return Err(err);
			}
		};

		Ok(TunTap { fd, name: ifname.to_string(), hw_addr, mtu })
	}

	/// Sets the device MTU, reads back the kernel-assigned MAC, and brings
	/// the link up, all over one `AF_INET`/`SOCK_DGRAM` control socket.
	fn configure(ctl: RawFd, ifname: &str, mtu: u16) -> Result<[u8; 6], SetupError> {
		let mut mtu_req = IfReq::named(ifname);
		mtu_req.data.mtu = mtu as libc::c_int;
		if unsafe { libc::ioctl(ctl, libc::SIOCSIFMTU, &mtu_req) } < 0 {
			return Err(io::Error::last_os_error().into());
		}

		let mut hw_req = IfReq::named(ifname);
		if unsafe { libc::ioctl(ctl, libc::SIOCGIFHWADDR, &mut hw_req) } < 0 {
			return Err(io::Error::last_os_error().into());
		}
		let sa_data = unsafe { hw_req.data.hwaddr.sa_data };
		let mut hw_addr = [0u8; 6];
		for (dst, &byte) in hw_addr.iter_mut().zip(sa_data.iter()) {
			*dst = byte as u8;
		}

		let mut flags_req = IfReq::named(ifname);
		if unsafe { libc::ioctl(ctl, libc::SIOCGIFFLAGS, &mut flags_req) } < 0 {
			return Err(io::Error::last_os_error().into());
		}
		unsafe { flags_req.data.flags |= libc::IFF_UP as libc::c_short };
		if unsafe { libc::ioctl(ctl, libc::SIOCSIFFLAGS, &flags_req) } < 0 {
			return Err(io::Error::last_os_error().into());
		}

		Ok(hw_addr)
	}

	pub fn name(&self) -> &str {
		&self.name
	}
}

impl Drop for TunTap {
	fn drop(&mut self) {
		unsafe { libc::close(self.fd) };
	}
}

impl Tap for TunTap {
	fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
		if n < 0 {
			return Err(io::Error::last_os_error());
		}
		Ok(n as usize)
	}

	fn write_frame(&mut self, buf: &[u8]) -> io::Result<()> {
		let n = unsafe { libc::write(self.fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
		if n < 0 {
			return Err(io::Error::last_os_error());
		}
		Ok(())
	}

	fn hw_addr(&self) -> [u8; 6] {
		self.hw_addr
	}

	fn mtu(&self) -> u16 {
		self.mtu
	}
}

//! The tunnel core: wire format, frame encode/decode, the learning FDB, and
//! the peer/switch plumbing that ties them to a TAP device and a UDP
//! socket. `seth` is the only thing that knows how to open either of
//! those; everything here operates on the [`tap::Tap`] trait and a
//! `std::net::UdpSocket` handed in from outside.

pub mod buffer;
pub mod compress;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod fdb;
pub mod mac;
pub mod remote_node;
pub mod switch;
pub mod tap;
pub mod wireformat;

//! Minimal packet-building helpers for `wire`'s integration tests: just
//! enough of Ethernet, IPv4, and UDP to construct the literal frames the
//! test scenarios call for, plus deterministic filler payloads.

pub mod checksum;
pub mod ethernet;
pub mod ipv4;
pub mod sequence;
pub mod udp;

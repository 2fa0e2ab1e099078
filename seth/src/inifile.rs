//! Hand-rolled INI reader for `-c/--config-file` (§6.2): a `[global]`
//! section of `key = value` lines plus zero or more `[peer]` sections, each
//! contributing one `dst = ADDR` line. No nesting, no quoting, `#`/`;`
//! comment lines, blank lines ignored.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Debug)]
pub struct IniError(pub String);

impl fmt::Display for IniError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "config file error: {}", self.0)
	}
}

impl std::error::Error for IniError {}

#[derive(Debug, Default)]
pub struct IniFile {
	pub global: HashMap<String, String>,
	pub peers: Vec<HashMap<String, String>>,
}

impl IniFile {
	pub fn load(path: &Path) -> Result<Self, IniError> {
		let text = fs::read_to_string(path).map_err(|e| IniError(format!("{}: {e}", path.display())))?;
		Self::parse(&text)
	}

	pub fn parse(text: &str) -> Result<Self, IniError> {
		let mut file = IniFile::default();
		let mut current: Option<&mut HashMap<String, String>> = None;

		for (lineno, raw) in text.lines().enumerate() {
			let line = raw.trim();

			if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
				continue;
			}

			if let Some(section) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
				match section {
					"global" => current = Some(&mut file.global),
					"peer" => {
						file.peers.push(HashMap::new());
						current = file.peers.last_mut();
					}
					other => return Err(IniError(format!("line {}: unknown section '[{other}]'", lineno + 1))),
				}
				continue;
			}

			let (key, value) = line
				.split_once('=')
				.ok_or_else(|| IniError(format!("line {}: expected 'key = value'", lineno + 1)))?;

			let section = current.as_mut().ok_or_else(|| IniError(format!("line {}: key outside any section", lineno + 1)))?;
			section.insert(key.trim().to_string(), value.trim().to_string());
		}

		Ok(file)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_global_and_repeated_peer_sections() {
		let text = "\
[global]
mtu = 1500
txsize = 1500

[peer]
dst = 192.168.10.1

[peer]
dst = 192.168.10.2
";
		let file = IniFile::parse(text).unwrap();
		assert_eq!(file.global.get("mtu").map(String::as_str), Some("1500"));
		assert_eq!(file.peers.len(), 2);
		assert_eq!(file.peers[1].get("dst").map(String::as_str), Some("192.168.10.2"));
	}

	#[test]
	fn comments_and_blank_lines_are_ignored() {
		let text = "; a comment\n# another\n\n[global]\nmtu = 1500\n";
		let file = IniFile::parse(text).unwrap();
		assert_eq!(file.global.get("mtu").map(String::as_str), Some("1500"));
	}

	#[test]
	fn key_outside_a_section_is_rejected() {
		let text = "mtu = 1500\n";
		assert!(IniFile::parse(text).is_err());
	}

	#[test]
	fn unknown_section_is_rejected() {
		let text = "[bogus]\nfoo = bar\n";
		assert!(IniFile::parse(text).is_err());
	}
}

//! Colored stderr logger and the `-l/--log-level` scale.

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use log::{Level, LevelFilter};
use nu_ansi_term::ansi::RESET;
use nu_ansi_term::{Color, Style};

pub struct Logger;

impl log::Log for Logger {
	fn enabled(&self, _: &log::Metadata) -> bool {
		true
	}

	fn log(&self, record: &log::Record) {
		let time = humantime::format_rfc3339_nanos(SystemTime::now());

		let dim = Style::new().dimmed().prefix();

		eprintln!(
			"{dim}{time}{RESET} {}{:5}{RESET} {}{}{RESET}{dim}:{RESET} {}",
			match record.level() {
				Level::Trace => Color::Purple,
				Level::Debug => Color::Blue,
				Level::Info => Color::Green,
				Level::Warn => Color::Yellow,
				Level::Error => Color::Red,
			}
			.bold()
			.prefix(),
			record.level(),
			Style::new().bold().prefix(),
			record.target(),
			record.args()
		);
	}

	fn flush(&self) {}
}

/// The five levels accepted by `-l/--log-level`. `log` has no `Notice`
/// level, so `Notice` and `Info` both filter at [`LevelFilter::Info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
	Error,
	Warning,
	Notice,
	Info,
	Debug,
}

impl LogLevel {
	pub fn filter(self) -> LevelFilter {
		match self {
			LogLevel::Error => LevelFilter::Error,
			LogLevel::Warning => LevelFilter::Warn,
			LogLevel::Notice | LogLevel::Info => LevelFilter::Info,
			LogLevel::Debug => LevelFilter::Debug,
		}
	}
}

impl fmt::Display for LogLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			LogLevel::Error => "error",
			LogLevel::Warning => "warning",
			LogLevel::Notice => "notice",
			LogLevel::Info => "info",
			LogLevel::Debug => "debug",
		})
	}
}

impl FromStr for LogLevel {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"error" => Ok(LogLevel::Error),
			"warning" => Ok(LogLevel::Warning),
			"notice" => Ok(LogLevel::Notice),
			"info" => Ok(LogLevel::Info),
			"debug" => Ok(LogLevel::Debug),
			other => Err(format!("invalid log level '{other}', expected one of error|warning|notice|info|debug")),
		}
	}
}

/// Install [`Logger`] as the global logger at the given level. Must be
/// called once, before any worker thread is spawned.
pub fn init(level: LogLevel) {
	log::set_max_level(level.filter());

	if log::set_boxed_logger(Box::new(Logger)).is_err() {
		// A logger is already installed (e.g. a second call in tests); keep it.
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_all_levels() {
		for s in ["error", "warning", "notice", "info", "debug"] {
			assert_eq!(s.parse::<LogLevel>().unwrap().to_string(), s);
		}
	}

	#[test]
	fn rejects_unknown_level() {
		assert!("verbose".parse::<LogLevel>().is_err());
	}
}

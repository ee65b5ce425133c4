use std::fmt;
use std::panic::Location;

/// Where a subscription was made. Diagnostics only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SiteInfo {
	pub function: Option<&'static str>,
	pub file: &'static str,
	pub line: u32,
	pub column: u32,
}

impl SiteInfo {
	pub const fn new(function: Option<&'static str>, file: &'static str, line: u32, column: u32) -> Self {
		SiteInfo {
			function,
			file,
			line,
			column,
		}
	}

	/// The location of whoever called the surrounding `#[track_caller]` fn.
	#[track_caller]
	pub fn caller() -> Self {
		Location::caller().into()
	}

	pub fn in_function(mut self, function: &'static str) -> Self {
		self.function = Some(function);
		self
	}

	/// Site recorded for a subscription when call-site capture is compiled in.
	#[track_caller]
	pub(crate) fn capture(explicit: Option<SiteInfo>) -> Option<SiteInfo> {
		match explicit {
			Some(site) => Some(site),
			None if cfg!(feature = "debug-subscriptions") => Some(SiteInfo::caller()),
			None => None,
		}
	}
}

impl From<&'static Location<'static>> for SiteInfo {
	fn from(location: &'static Location<'static>) -> Self {
		SiteInfo::new(None, location.file(), location.line(), location.column())
	}
}

impl fmt::Display for SiteInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.function {
			Some(function) => write!(f, "{} ({}:{}:{})", function, self.file, self.line, self.column),
			None => write!(f, "{}:{}:{}", self.file, self.line, self.column),
		}
	}
}

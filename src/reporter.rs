//! Status indicator and diagnostic log handed to the exporter.
//!
//! Neither carries export logic; the exporter only pushes text into them.

use std::sync::Mutex;

/// Short "what is happening now" display.
pub trait StatusIndicator: Send + Sync {
	fn show(&self, text: &str, tooltip: &str);
	fn hide(&self);
}

/// Line-oriented log of every step and subprocess line.
pub trait DiagnosticLog: Send + Sync {
	fn append_line(&self, line: &str);
	/// Brings the accumulated log in front of the user.
	fn show(&self);
	fn clear(&self);
}

/// Status line on stderr.
pub struct TerminalStatus;

impl StatusIndicator for TerminalStatus {
	fn show(&self, text: &str, tooltip: &str) {
		tracing::debug!(status = text, tooltip, "status");
		eprintln!("{text} {tooltip}");
	}

	fn hide(&self) {}
}

/// Buffered log; echoes lines to stderr as they arrive in verbose mode.
pub struct OutputChannel {
	lines: Mutex<Vec<String>>,
	verbose: bool,
}

impl OutputChannel {
	pub fn new(verbose: bool) -> Self {
		Self {
			lines: Mutex::new(Vec::new()),
			verbose,
		}
	}

	pub fn lines(&self) -> Vec<String> {
		self.lines.lock().map(|l| l.clone()).unwrap_or_default()
	}
}

impl DiagnosticLog for OutputChannel {
	fn append_line(&self, line: &str) {
		tracing::trace!(target: "em2f::log", "{line}");
		if self.verbose {
			eprintln!("{line}");
		}
		if let Ok(mut lines) = self.lines.lock() {
			lines.push(line.to_string());
		}
	}

	fn show(&self) {
		// Already on screen.
		if self.verbose {
			return;
		}
		for line in self.lines() {
			eprintln!("{line}");
		}
	}

	fn clear(&self) {
		if let Ok(mut lines) = self.lines.lock() {
			lines.clear();
		}
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn output_channel_buffers_until_cleared() {
		let channel = OutputChannel::new(false);
		channel.append_line("Starting export process...");
		channel.append_line("Output: done");
		assert_eq!(channel.lines(), vec!["Starting export process...", "Output: done"]);

		channel.clear();
		assert!(channel.lines().is_empty());
	}
}

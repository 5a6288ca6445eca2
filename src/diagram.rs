use clap::ValueEnum;
use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::CONFIG_FILE_NAME;
use crate::error::ExportError;

const MERMAID_INFO: &str = "mermaid";

/// Artifact format requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
	#[default]
	Svg,
	Pdf,
	Png,
}

impl OutputKind {
	/// Order offered in the format prompt.
	pub const ALL: [OutputKind; 3] = [OutputKind::Svg, OutputKind::Pdf, OutputKind::Png];

	pub fn extension(self) -> &'static str {
		match self {
			OutputKind::Svg => "svg",
			OutputKind::Pdf => "pdf",
			OutputKind::Png => "png",
		}
	}
}

impl fmt::Display for OutputKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.extension())
	}
}

impl FromStr for OutputKind {
	type Err = ExportError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"svg" => Ok(OutputKind::Svg),
			"pdf" => Ok(OutputKind::Pdf),
			"png" => Ok(OutputKind::Png),
			other => Err(ExportError::InvalidOption(format!(
				"unknown output format '{other}' (expected svg, pdf or png)"
			))),
		}
	}
}

/// Number of fenced code blocks tagged `mermaid` in the text.
pub fn count_mermaid_fences(text: &str) -> usize {
	Parser::new(text)
		.filter(|event| match event {
			Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
				info.split_whitespace().next() == Some(MERMAID_INFO)
			}
			_ => false,
		})
		.count()
}

pub fn contains_mermaid_fence(text: &str) -> bool {
	count_mermaid_fences(text) > 0
}

/// 1-based, inclusive line range standing in for an editor selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
	pub start: usize,
	pub end: usize,
}

impl FromStr for LineRange {
	type Err = ExportError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let invalid = || ExportError::InvalidOption(format!("invalid line range '{s}' (expected START:END)"));

		let (start, end) = s.split_once(':').ok_or_else(invalid)?;
		let start: usize = start.trim().parse().map_err(|_| invalid())?;
		let end: usize = end.trim().parse().map_err(|_| invalid())?;

		if start == 0 || end < start {
			return Err(invalid());
		}

		Ok(Self { start, end })
	}
}

/// The selected lines, or the whole text when nothing is selected.
pub fn select_text(text: &str, range: Option<LineRange>) -> String {
	match range {
		None => text.to_string(),
		Some(range) => text
			.lines()
			.skip(range.start - 1)
			.take(range.end - range.start + 1)
			.collect::<Vec<_>>()
			.join("\n"),
	}
}

/// `<dir>/<stem>.<kind>` next to the source document.
pub fn default_output_path(document: &Path, kind: OutputKind) -> PathBuf {
	document.with_extension(kind.extension())
}

/// Nearest ancestor of the document that looks like a project root.
pub fn find_workspace_root(document: &Path) -> Option<PathBuf> {
	document
		.parent()?
		.ancestors()
		.find(|dir| dir.join(CONFIG_FILE_NAME).is_file() || dir.join(".git").exists())
		.map(Path::to_path_buf)
}

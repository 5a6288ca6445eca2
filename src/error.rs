use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::rasterize::RasterizeError;

/// Everything that can end an export before the artifact is in place.
#[derive(Error, Debug)]
pub enum ExportError {
	#[error("No active document: {path} ({source})")]
	NoActiveDocument { path: PathBuf, source: io::Error },

	#[error("No Mermaid diagram found; include the ```mermaid markers in the selection")]
	NoDiagramFound,

	#[error("Export cancelled")]
	UserCancelled,

	#[error("Invalid option: {0}")]
	InvalidOption(String),

	#[error("Mermaid renderer could not be started ({program}): {source}")]
	RendererUnavailable { program: String, source: io::Error },

	#[error("Renderer exited with code {}", display_code(.exit_code))]
	RenderProcessFailed {
		exit_code: Option<i32>,
		stderr: Vec<String>,
	},

	#[error("Renderer reported success but did not produce {0}")]
	OutputNotProduced(PathBuf),

	#[error("Failed to move {from} to {to}: {source}")]
	FileRenameFailed {
		from: PathBuf,
		to: PathBuf,
		source: io::Error,
	},

	#[error(transparent)]
	Rasterize(#[from] RasterizeError),

	#[error("I/O error: {0}")]
	Io(#[from] io::Error),
}

impl ExportError {
	/// Cancellation ends the flow quietly; everything else is reported.
	pub fn is_cancellation(&self) -> bool {
		matches!(self, ExportError::UserCancelled)
	}
}

fn display_code(code: &Option<i32>) -> String {
	match code {
		Some(code) => code.to_string(),
		None => "none (terminated by signal)".to_string(),
	}
}

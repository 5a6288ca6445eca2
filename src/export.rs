use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::diagram::{self, OutputKind};
use crate::error::ExportError;
use crate::rasterize::PdfPrinter;
use crate::renderer::{self, PngOptions, RenderInvocation};
use crate::reporter::{DiagnosticLog, StatusIndicator};

/// One export, fully resolved from document, prompts and configuration.
#[derive(Debug, Clone)]
pub struct ExportRequest {
	pub document: PathBuf,
	/// Selected text, or the whole document.
	pub text: String,
	pub output: PathBuf,
	pub kind: OutputKind,
	pub theme: String,
	pub png: PngOptions,
	pub workspace_root: Option<PathBuf>,
}

impl ExportRequest {
	/// Same request with every path anchored at the current directory, since
	/// the renderer resolves its arguments from the workspace root instead.
	pub fn resolved(&self) -> io::Result<Self> {
		Ok(Self {
			document: std::path::absolute(&self.document)?,
			output: std::path::absolute(&self.output)?,
			workspace_root: self
				.workspace_root
				.as_deref()
				.map(std::path::absolute)
				.transpose()?,
			..self.clone()
		})
	}

	/// Where the renderer runs.
	pub fn working_dir(&self) -> PathBuf {
		self.workspace_root
			.clone()
			.or_else(|| self.document.parent().map(Path::to_path_buf))
			.filter(|dir| !dir.as_os_str().is_empty())
			.unwrap_or_else(|| PathBuf::from("."))
	}
}

/// `<dir>/<stem>.temp.svg` beside the requested output.
pub fn intermediate_svg_path(output: &Path) -> PathBuf {
	let stem = output
		.file_stem()
		.map(|s| s.to_string_lossy().into_owned())
		.unwrap_or_default();
	output.with_file_name(format!("{stem}.temp.svg"))
}

pub struct Exporter {
	renderer_command: Vec<String>,
	printer: Arc<dyn PdfPrinter>,
	status: Arc<dyn StatusIndicator>,
	log: Arc<dyn DiagnosticLog>,
}

impl Exporter {
	pub fn new(
		renderer_command: Vec<String>,
		printer: Arc<dyn PdfPrinter>,
		status: Arc<dyn StatusIndicator>,
		log: Arc<dyn DiagnosticLog>,
	) -> Self {
		Self {
			renderer_command,
			printer,
			status,
			log,
		}
	}

	/// Renders the document's diagram and leaves it at `request.output`.
	pub async fn export(&self, request: &ExportRequest) -> Result<PathBuf, ExportError> {
		let result = self.run(request).await;
		self.status.hide();

		match &result {
			Ok(path) => {
				self.log.append_line("Export completed successfully");
				info!(output = %path.display(), kind = %request.kind, "Export completed");
			}
			Err(err) if err.is_cancellation() => {}
			Err(err) => {
				self.log.append_line(&format!("Error: {err}"));
				if let ExportError::RenderProcessFailed { stderr, .. } = err {
					for line in stderr {
						self.log.append_line(&format!("  {line}"));
					}
				}
				warn!(error = %err, "Export failed");
			}
		}
		result
	}

	async fn run(&self, request: &ExportRequest) -> Result<PathBuf, ExportError> {
		let request = &request.resolved()?;
		self.log.append_line(&format!("File being processed: {}", request.document.display()));
		self.log.append_line(&format!(
			"Selected/Full text length: {} characters",
			request.text.chars().count()
		));

		let diagrams = diagram::count_mermaid_fences(&request.text);
		if diagrams == 0 {
			return Err(ExportError::NoDiagramFound);
		}
		if diagrams > 1 {
			self.log.append_line(&format!(
				"Found {diagrams} Mermaid diagrams; only the first is exported"
			));
		}

		let render_target = match request.kind {
			OutputKind::Pdf => intermediate_svg_path(&request.output),
			OutputKind::Svg | OutputKind::Png => request.output.clone(),
		};
		let png = (request.kind == OutputKind::Png).then_some(&request.png);
		let invocation = RenderInvocation::new(
			&self.renderer_command,
			&request.theme,
			&request.document,
			&render_target,
			png,
		)?;

		self.log.append_line(&format!("Selected output file: {}", request.output.display()));
		self.status
			.show("Exporting", &format!("{}...", request.output.display()));

		let rendered = renderer::run(&invocation, &request.working_dir(), Arc::clone(&self.log)).await?;

		match request.kind {
			OutputKind::Svg | OutputKind::Png => {
				self.move_into_place(&rendered.produced, &request.output)?;
			}
			OutputKind::Pdf => {
				self.status
					.show("Converting", &format!("{} to PDF...", rendered.produced.display()));
				let converted = self.rasterize(&rendered.produced, &request.output).await;
				if let Err(err) = fs::remove_file(&rendered.produced) {
					warn!(path = %rendered.produced.display(), error = %err, "Failed to remove intermediate SVG");
					self.log.append_line(&format!(
						"Could not remove intermediate file {}: {err}",
						rendered.produced.display()
					));
				}
				converted?;
			}
		}

		Ok(request.output.clone())
	}

	async fn rasterize(&self, svg: &Path, pdf: &Path) -> Result<(), ExportError> {
		let printer = Arc::clone(&self.printer);
		let (svg, pdf) = (svg.to_path_buf(), pdf.to_path_buf());

		let dimensions = tokio::task::spawn_blocking(move || printer.print_pdf(&svg, &pdf))
			.await
			.map_err(|err| ExportError::Io(io::Error::other(err)))??;

		let (width_pt, height_pt) = dimensions.points();
		self.log.append_line(&format!(
			"PDF page: {}x{} px ({width_pt:.1}x{height_pt:.1} pt)",
			dimensions.width, dimensions.height
		));
		Ok(())
	}

	/// Renames, or copies when the rename fails (e.g. across filesystems).
	/// Once the copy is in place a leftover source is only worth a warning.
	fn move_into_place(&self, from: &Path, to: &Path) -> Result<(), ExportError> {
		let Err(rename_err) = fs::rename(from, to) else {
			return Ok(());
		};
		debug!(error = %rename_err, "rename failed, copying instead");

		fs::copy(from, to).map_err(|source| ExportError::FileRenameFailed {
			from: from.to_path_buf(),
			to: to.to_path_buf(),
			source,
		})?;
		if let Err(err) = fs::remove_file(from) {
			warn!(path = %from.display(), error = %err, "Failed to remove renderer output after copy");
			self.log.append_line(&format!("Could not remove {}: {err}", from.display()));
		}
		Ok(())
	}
}

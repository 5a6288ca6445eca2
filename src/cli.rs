use anyhow::Result;
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{Config, CONFIG_FILE_NAME};
use crate::diagram::{self, LineRange, OutputKind};
use crate::error::ExportError;
use crate::export::{ExportRequest, Exporter};
use crate::rasterize::{BrowserLocator, Rasterizer};
use crate::renderer::PngOptions;
use crate::reporter::{DiagnosticLog, OutputChannel, StatusIndicator, TerminalStatus};

#[derive(Parser)]
#[command(name = "em2f")]
#[command(about = "Export Mermaid diagrams from documents to SVG, PNG or PDF")]
#[command(version)]
pub struct Cli {
	/// Echo the diagnostic log while running
	#[arg(short, long, global = true)]
	pub verbose: bool,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Export the Mermaid diagram in a document
	Export {
		/// Document containing a ```mermaid block
		document: PathBuf,

		/// Output format (prompted when omitted)
		#[arg(short, long, value_enum)]
		format: Option<OutputKind>,

		/// Output file (prompted when omitted)
		#[arg(short, long)]
		output: Option<PathBuf>,

		/// Only consider these lines, e.g. 10:24
		#[arg(short, long)]
		lines: Option<LineRange>,

		/// Mermaid theme
		#[arg(short, long)]
		theme: Option<String>,

		/// PNG scale factor
		#[arg(long)]
		png_scale: Option<f64>,

		/// PNG background color
		#[arg(long)]
		png_background: Option<String>,

		/// Project root the renderer runs in (detected when omitted)
		#[arg(short, long)]
		workspace: Option<PathBuf>,

		/// Configuration file
		#[arg(short, long)]
		config: Option<PathBuf>,

		/// Accept defaults instead of prompting
		#[arg(short, long)]
		yes: bool,
	},

	/// Write a default em2f.toml
	Init {
		/// Directory to initialize
		#[arg(default_value = ".")]
		dir: PathBuf,
	},
}

/// Values of an `export` invocation before prompting.
struct ExportArgs {
	document: PathBuf,
	format: Option<OutputKind>,
	output: Option<PathBuf>,
	lines: Option<LineRange>,
	theme: Option<String>,
	png_scale: Option<f64>,
	png_background: Option<String>,
	workspace: Option<PathBuf>,
	config: Option<PathBuf>,
	yes: bool,
}

impl Cli {
	pub async fn run(self) -> Result<()> {
		match self.command {
			Commands::Export {
				document,
				format,
				output,
				lines,
				theme,
				png_scale,
				png_background,
				workspace,
				config,
				yes,
			} => {
				let args = ExportArgs {
					document,
					format,
					output,
					lines,
					theme,
					png_scale,
					png_background,
					workspace,
					config,
					yes,
				};
				run_export(args, self.verbose).await
			}
			Commands::Init { dir } => {
				fs::create_dir_all(&dir)?;
				let path = dir.join(CONFIG_FILE_NAME);
				if path.exists() {
					anyhow::bail!("{} already exists", path.display());
				}
				Config::default().save(&path)?;
				println!("Initialized {}", path.display());
				Ok(())
			}
		}
	}
}

async fn run_export(args: ExportArgs, verbose: bool) -> Result<()> {
	let log = Arc::new(OutputChannel::new(verbose));
	let status: Arc<dyn StatusIndicator> = Arc::new(TerminalStatus);
	log.clear();
	log.append_line("Starting export process...");

	let outcome = prepare_and_export(args, Arc::clone(&status), log.clone()).await;
	match outcome {
		Ok(path) => {
			println!("Export completed: {}", path.display());
			Ok(())
		}
		Err(err) if err.is_cancellation() => {
			tracing::debug!("export cancelled by user");
			Ok(())
		}
		Err(err) => {
			log.show();
			Err(err.into())
		}
	}
}

async fn prepare_and_export(
	args: ExportArgs,
	status: Arc<dyn StatusIndicator>,
	log: Arc<OutputChannel>,
) -> Result<PathBuf, ExportError> {
	let text = fs::read_to_string(&args.document).map_err(|source| ExportError::NoActiveDocument {
		path: args.document.clone(),
		source,
	})?;
	let text = diagram::select_text(&text, args.lines);
	let document = std::path::absolute(&args.document)?;

	// Checked before prompting so the user is not asked for nothing.
	if !diagram::contains_mermaid_fence(&text) {
		log.append_line(&format!("File being processed: {}", args.document.display()));
		return Err(ExportError::NoDiagramFound);
	}

	let workspace_root = match &args.workspace {
		Some(dir) => Some(std::path::absolute(dir)?),
		None => diagram::find_workspace_root(&document),
	};
	let config = Config::load(args.config.as_deref(), workspace_root.as_deref())
		.map_err(|err| ExportError::InvalidOption(format!("{err:#}")))?;

	let (kind, output_path) = {
		let stdin = io::stdin();
		let mut input = stdin.lock();
		let mut output = io::stderr();

		let kind = match args.format {
			Some(kind) => kind,
			None if args.yes => config.output_type,
			None => prompt_format(&mut input, &mut output, config.output_type)?,
		};
		let output_path = match args.output {
			Some(path) => path,
			None => {
				let default = diagram::default_output_path(&document, kind);
				if args.yes {
					default
				} else {
					prompt_path(&mut input, &mut output, &default)?
				}
			}
		};
		(kind, output_path)
	};

	let request = ExportRequest {
		document,
		text,
		output: output_path,
		kind,
		theme: args.theme.unwrap_or(config.theme),
		png: PngOptions {
			background: args.png_background.unwrap_or(config.png_background),
			scale: args.png_scale.unwrap_or(config.png_scale),
		},
		workspace_root,
	};

	let log: Arc<dyn DiagnosticLog> = log;
	let printer = Rasterizer::new(BrowserLocator::new(config.browser_path), Arc::clone(&log));
	let exporter = Exporter::new(config.renderer_command, Arc::new(printer), status, log);
	exporter.export(&request).await
}

/// Reads one answer; an empty line keeps `default`, `q` or EOF cancels.
fn ask<R: BufRead, W: Write>(
	input: &mut R,
	output: &mut W,
	question: &str,
	default: &str,
) -> Result<String, ExportError> {
	write!(output, "{question} [{default}]: ")?;
	output.flush()?;

	let mut answer = String::new();
	if input.read_line(&mut answer)? == 0 {
		return Err(ExportError::UserCancelled);
	}
	match answer.trim() {
		"q" | "quit" => Err(ExportError::UserCancelled),
		"" => Ok(default.to_string()),
		other => Ok(other.to_string()),
	}
}

pub fn prompt_format<R: BufRead, W: Write>(
	input: &mut R,
	output: &mut W,
	default: OutputKind,
) -> Result<OutputKind, ExportError> {
	let choices: Vec<&str> = OutputKind::ALL.iter().map(|k| k.extension()).collect();
	loop {
		let answer = ask(
			input,
			output,
			&format!("Select output format ({})", choices.join("|")),
			default.extension(),
		)?;
		match answer.parse() {
			Ok(kind) => return Ok(kind),
			Err(err) => writeln!(output, "{err}")?,
		}
	}
}

pub fn prompt_path<R: BufRead, W: Write>(
	input: &mut R,
	output: &mut W,
	default: &Path,
) -> Result<PathBuf, ExportError> {
	let answer = ask(input, output, "Enter output filename", &default.to_string_lossy())?;
	Ok(PathBuf::from(answer))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	#[test]
	fn empty_answer_keeps_default_format() {
		let mut input = Cursor::new("\n");
		let mut output = Vec::new();
		let kind = prompt_format(&mut input, &mut output, OutputKind::Png).expect("kind");
		assert_eq!(kind, OutputKind::Png);
		assert!(String::from_utf8(output).unwrap().contains("svg|pdf|png"));
	}

	#[test]
	fn invalid_format_is_asked_again() {
		let mut input = Cursor::new("gif\npdf\n");
		let mut output = Vec::new();
		let kind = prompt_format(&mut input, &mut output, OutputKind::Svg).expect("kind");
		assert_eq!(kind, OutputKind::Pdf);
		assert!(String::from_utf8(output).unwrap().contains("unknown output format 'gif'"));
	}

	#[test]
	fn eof_and_quit_cancel() {
		let mut output = Vec::new();
		let err = prompt_format(&mut Cursor::new(""), &mut output, OutputKind::Svg).expect_err("eof");
		assert!(err.is_cancellation());

		let err = prompt_path(&mut Cursor::new("q\n"), &mut output, Path::new("a.svg")).expect_err("quit");
		assert!(err.is_cancellation());
	}

	#[test]
	fn custom_path_overrides_default() {
		let mut output = Vec::new();
		let path = prompt_path(&mut Cursor::new("out/chart.svg\n"), &mut output, Path::new("doc.svg"))
			.expect("path");
		assert_eq!(path, PathBuf::from("out/chart.svg"));
	}

	#[test]
	fn parses_export_flags() {
		let cli = Cli::try_parse_from([
			"em2f", "export", "doc.md", "--format", "png", "--png-scale", "2", "--lines", "3:9", "--yes",
		])
		.expect("parse");

		match cli.command {
			Commands::Export {
				format,
				png_scale,
				lines,
				yes,
				..
			} => {
				assert_eq!(format, Some(OutputKind::Png));
				assert_eq!(png_scale, Some(2.0));
				assert_eq!(lines, Some(LineRange { start: 3, end: 9 }));
				assert!(yes);
			}
			Commands::Init { .. } => panic!("expected export"),
		}
	}
}

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::ExportError;
use crate::reporter::DiagnosticLog;

/// Extra arguments only PNG output takes.
#[derive(Debug, Clone, PartialEq)]
pub struct PngOptions {
	pub background: String,
	pub scale: f64,
}

/// One fully resolved renderer command line.
#[derive(Debug, Clone)]
pub struct RenderInvocation {
	program: String,
	args: Vec<OsString>,
	output: PathBuf,
}

impl RenderInvocation {
	/// `<command...> -t <theme> -i <input> -o <output> [-b <background> -s <scale>]`
	pub fn new(
		command: &[String],
		theme: &str,
		input: &Path,
		output: &Path,
		png: Option<&PngOptions>,
	) -> Result<Self, ExportError> {
		let (program, leading) = command.split_first().ok_or_else(|| {
			ExportError::InvalidOption("rendererCommand must name a program".to_string())
		})?;

		let mut args: Vec<OsString> = leading.iter().map(OsString::from).collect();
		args.push("-t".into());
		args.push(theme.into());
		args.push("-i".into());
		args.push(input.into());
		args.push("-o".into());
		args.push(output.into());

		if let Some(png) = png {
			if !png.scale.is_finite() || png.scale <= 0.0 {
				return Err(ExportError::InvalidOption(format!(
					"pngScale must be a positive number, got {}",
					png.scale
				)));
			}
			args.push("-b".into());
			args.push(png.background.as_str().into());
			args.push("-s".into());
			args.push(png.scale.to_string().into());
		}

		Ok(Self {
			program: program.clone(),
			args,
			output: output.to_path_buf(),
		})
	}

	/// Path handed to the renderer with `-o`.
	pub fn output(&self) -> &Path {
		&self.output
	}

	/// Command line as logged, paths quoted.
	pub fn display(&self) -> String {
		let mut line = self.program.clone();
		for arg in &self.args {
			let arg = arg.to_string_lossy();
			line.push(' ');
			if arg.contains(char::is_whitespace) || Path::new(arg.as_ref()).is_absolute() {
				line.push('"');
				line.push_str(&arg);
				line.push('"');
			} else {
				line.push_str(&arg);
			}
		}
		line
	}
}

/// What the renderer left behind after a zero exit.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutput {
	pub produced: PathBuf,
}

/// The renderer numbers each diagram it writes: asked for `out.svg`, it
/// writes `out-1.svg`. Only the first diagram is ever collected.
pub fn page_suffixed(path: &Path) -> PathBuf {
	let stem = path
		.file_stem()
		.map(|s| s.to_string_lossy().into_owned())
		.unwrap_or_default();
	let name = match path.extension() {
		Some(ext) => format!("{stem}-1.{}", ext.to_string_lossy()),
		None => format!("{stem}-1"),
	};
	path.with_file_name(name)
}

/// Runs the renderer in `cwd`, streaming its output into `log`.
pub async fn run(
	invocation: &RenderInvocation,
	cwd: &Path,
	log: Arc<dyn DiagnosticLog>,
) -> Result<RenderOutput, ExportError> {
	let started_at = Instant::now();
	log.append_line(&format!("Executing command: {}", invocation.display()));

	let mut child = Command::new(&invocation.program)
		.args(&invocation.args)
		.current_dir(cwd)
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.kill_on_drop(true)
		.spawn()
		.map_err(|err| {
			warn!(program = %invocation.program, error = %err, "Failed to spawn renderer");
			if err.kind() == ErrorKind::NotFound {
				log.append_line(&format!("Renderer not found on PATH: {}", invocation.program));
			}
			ExportError::RendererUnavailable {
				program: invocation.program.clone(),
				source: err,
			}
		})?;

	let stdout = child.stdout.take().map(|out| {
		let log = Arc::clone(&log);
		tokio::spawn(forward_lines(out, "Output", log))
	});
	let stderr = child.stderr.take().map(|err| {
		let log = Arc::clone(&log);
		tokio::spawn(forward_lines(err, "Error", log))
	});

	let status = child.wait().await?;

	if let Some(task) = stdout {
		let _ = task.await;
	}
	let stderr = match stderr {
		Some(task) => task.await.unwrap_or_default(),
		None => Vec::new(),
	};

	if !status.success() {
		let exit_code = status.code();
		warn!(
			exit_code = exit_code.unwrap_or(-1),
			elapsed_ms = started_at.elapsed().as_millis() as u64,
			"Renderer invocation failed"
		);
		return Err(ExportError::RenderProcessFailed { exit_code, stderr });
	}

	let produced = page_suffixed(invocation.output());
	let non_empty = produced.metadata().map(|m| m.is_file() && m.len() > 0).unwrap_or(false);
	if !non_empty {
		log.append_line(&format!("Expected renderer output missing: {}", produced.display()));
		return Err(ExportError::OutputNotProduced(produced));
	}

	info!(
		elapsed_ms = started_at.elapsed().as_millis() as u64,
		produced = %produced.display(),
		"Renderer finished"
	);
	Ok(RenderOutput { produced })
}

/// Copies each line into the log, returning what was seen. Reads until EOF
/// whatever the bytes are, so the child never blocks on a full pipe.
async fn forward_lines<R>(reader: R, label: &'static str, log: Arc<dyn DiagnosticLog>) -> Vec<String>
where
	R: AsyncRead + Unpin,
{
	let mut seen = Vec::new();
	let mut reader = BufReader::new(reader);
	let mut buf = Vec::new();
	loop {
		buf.clear();
		match reader.read_until(b'\n', &mut buf).await {
			Ok(0) => break,
			Ok(_) => {
				let line = String::from_utf8_lossy(&buf);
				let line = line.trim_end_matches(['\n', '\r']).to_string();
				log.append_line(&format!("{label}: {line}"));
				seen.push(line);
			}
			Err(err) => {
				warn!(stream = label, error = %err, "Failed to read renderer output");
				break;
			}
		}
	}
	seen
}

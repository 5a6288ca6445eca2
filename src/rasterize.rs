//! SVG to PDF through a headless browser.
//!
//! The SVG is loaded as the only content of a blank page, its root element
//! is measured, and the page is printed onto a sheet of exactly that size.

use base64::Engine;
use headless_chrome::types::{Bounds, PrintToPdfOptions};
use headless_chrome::{Browser, LaunchOptions};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use crate::reporter::DiagnosticLog;

/// CSS pixels per inch; the print API takes paper sizes in inches.
const PIXELS_PER_INCH: f64 = 96.0;

const MEASURE_SVG: &str = r#"(() => {
	const svg = document.querySelector('svg');
	if (!svg) return 'null';
	const rect = svg.getBoundingClientRect();
	return JSON.stringify({ width: rect.width, height: rect.height });
})()"#;

#[derive(Debug, Error)]
pub enum RasterizeError {
	#[error("Input SVG file not readable at {path}: {source}")]
	InputUnreadable {
		path: PathBuf,
		source: std::io::Error,
	},

	#[error("Could not find a Chrome installation. Please install Google Chrome or set browserPath")]
	BrowserNotFound,

	#[error("Browser failed while trying to {step}: {message}")]
	Browser { step: &'static str, message: String },

	#[error("Failed to get SVG dimensions")]
	DimensionMeasurementFailed,

	#[error("PDF file was not created at {0}")]
	PdfNotProduced(PathBuf),

	#[error("Failed to write PDF to {path}: {source}")]
	Write {
		path: PathBuf,
		source: std::io::Error,
	},
}

impl RasterizeError {
	fn browser(step: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
		move |err| RasterizeError::Browser {
			step,
			message: format!("{err:#}"),
		}
	}
}

/// Whole-pixel size of the rendered SVG root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
	pub width: u32,
	pub height: u32,
}

impl Dimensions {
	/// Rounds fractional layout sizes up; an empty box is no measurement.
	pub fn from_layout(width: f64, height: f64) -> Option<Self> {
		if !width.is_finite() || !height.is_finite() || width <= 0.0 || height <= 0.0 {
			return None;
		}
		Some(Self {
			width: width.ceil() as u32,
			height: height.ceil() as u32,
		})
	}

	pub fn width_inches(&self) -> f64 {
		f64::from(self.width) / PIXELS_PER_INCH
	}

	pub fn height_inches(&self) -> f64 {
		f64::from(self.height) / PIXELS_PER_INCH
	}

	/// PDF page size in points (1/72 in).
	pub fn points(&self) -> (f64, f64) {
		(
			f64::from(self.width) * 72.0 / PIXELS_PER_INCH,
			f64::from(self.height) * 72.0 / PIXELS_PER_INCH,
		)
	}
}

#[derive(Deserialize)]
struct LayoutBox {
	width: f64,
	height: f64,
}

/// Finds a browser executable by probing well-known install locations.
#[derive(Debug, Clone)]
pub struct BrowserLocator {
	candidates: Vec<PathBuf>,
}

impl BrowserLocator {
	/// Platform install locations, preceded by `preferred` if configured.
	pub fn new(preferred: Option<PathBuf>) -> Self {
		let mut candidates: Vec<PathBuf> = preferred.into_iter().collect();
		candidates.extend(platform_candidates());
		Self::with_candidates(candidates)
	}

	pub fn with_candidates(candidates: Vec<PathBuf>) -> Self {
		Self { candidates }
	}

	pub fn locate(&self) -> Result<PathBuf, RasterizeError> {
		self.candidates
			.iter()
			.find(|path| path.is_file())
			.cloned()
			.ok_or(RasterizeError::BrowserNotFound)
	}
}

fn platform_candidates() -> Vec<PathBuf> {
	if cfg!(target_os = "windows") {
		let mut paths = vec![
			PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
			PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
		];
		if let Some(local) = std::env::var_os("LOCALAPPDATA") {
			paths.push(PathBuf::from(local).join(r"Google\Chrome\Application\chrome.exe"));
		}
		paths
	} else if cfg!(target_os = "macos") {
		vec![
			PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
			PathBuf::from("/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"),
		]
	} else {
		vec![
			PathBuf::from("/usr/bin/google-chrome"),
			PathBuf::from("/usr/bin/chromium"),
			PathBuf::from("/usr/bin/chromium-browser"),
			PathBuf::from("/usr/bin/microsoft-edge"),
		]
	}
}

/// Owns the browser process; dropping it shuts the browser down.
struct BrowserSession {
	browser: Browser,
	log: Arc<dyn DiagnosticLog>,
}

impl BrowserSession {
	fn launch(executable: &Path, log: Arc<dyn DiagnosticLog>) -> Result<Self, RasterizeError> {
		let options = LaunchOptions::default_builder()
			.path(Some(executable.to_path_buf()))
			.headless(true)
			.build()
			.map_err(|err| RasterizeError::Browser {
				step: "configure launch",
				message: err.to_string(),
			})?;
		let browser = Browser::new(options).map_err(RasterizeError::browser("launch"))?;
		Ok(Self { browser, log })
	}
}

impl Drop for BrowserSession {
	fn drop(&mut self) {
		// The process is killed when `browser` drops right after this.
		self.log.append_line("Closing browser");
		debug!("browser session closed");
	}
}

/// Minimal page whose only content is the SVG at its natural size.
pub fn html_document(svg: &str) -> String {
	format!(
		r#"<!DOCTYPE html>
<html>
	<head>
		<style>
			body, html {{
				margin: 0;
				padding: 0;
				height: 100%;
				overflow: hidden;
			}}
			svg {{
				display: block;
				max-width: 100%;
				height: auto;
			}}
		</style>
	</head>
	<body>{svg}</body>
</html>"#
	)
}

fn data_url(html: &str) -> String {
	let encoded = base64::engine::general_purpose::STANDARD.encode(html);
	format!("data:text/html;base64,{encoded}")
}

/// Turns an SVG file into a PDF file; the exporter only sees this seam.
pub trait PdfPrinter: Send + Sync {
	fn print_pdf(&self, svg_path: &Path, pdf_path: &Path) -> Result<Dimensions, RasterizeError>;
}

pub struct Rasterizer {
	locator: BrowserLocator,
	log: Arc<dyn DiagnosticLog>,
}

impl Rasterizer {
	pub fn new(locator: BrowserLocator, log: Arc<dyn DiagnosticLog>) -> Self {
		Self { locator, log }
	}

	/// Prints the SVG at `svg_path` to a single-page PDF at `pdf_path`.
	pub fn rasterize(&self, svg_path: &Path, pdf_path: &Path) -> Result<Dimensions, RasterizeError> {
		let started_at = Instant::now();
		self.log.append_line("Starting SVG to PDF conversion...");

		let svg = fs::read_to_string(svg_path).map_err(|source| RasterizeError::InputUnreadable {
			path: svg_path.to_path_buf(),
			source,
		})?;
		self.log.append_line(&format!("Read SVG content: {} bytes", svg.len()));

		let executable = self.locator.locate()?;
		self.log.append_line(&format!("Using Chrome at: {}", executable.display()));

		let session = BrowserSession::launch(&executable, Arc::clone(&self.log))?;
		let dimensions = self.print(&session, &svg, pdf_path)?;
		drop(session);

		info!(
			width = dimensions.width,
			height = dimensions.height,
			elapsed_ms = started_at.elapsed().as_millis() as u64,
			pdf = %pdf_path.display(),
			"PDF conversion completed"
		);
		self.log.append_line("PDF conversion completed successfully");
		Ok(dimensions)
	}

	fn print(&self, session: &BrowserSession, svg: &str, pdf_path: &Path) -> Result<Dimensions, RasterizeError> {
		let tab = session
			.browser
			.new_tab()
			.map_err(RasterizeError::browser("open a tab"))?;

		tab.navigate_to(&data_url(&html_document(svg)))
			.map_err(RasterizeError::browser("load the SVG page"))?;
		tab.wait_until_navigated()
			.map_err(RasterizeError::browser("wait for the page to load"))?;
		tab.wait_for_element("svg")
			.map_err(|_| RasterizeError::DimensionMeasurementFailed)?;

		let measured = tab
			.evaluate(MEASURE_SVG, false)
			.map_err(RasterizeError::browser("measure the SVG"))?;
		let dimensions = measured
			.value
			.as_ref()
			.and_then(|value| value.as_str())
			.and_then(|json| serde_json::from_str::<Option<LayoutBox>>(json).ok())
			.flatten()
			.and_then(|layout| Dimensions::from_layout(layout.width, layout.height))
			.ok_or(RasterizeError::DimensionMeasurementFailed)?;
		self.log.append_line(&format!(
			"Measured SVG: {}x{} px",
			dimensions.width, dimensions.height
		));

		tab.set_bounds(Bounds::Normal {
			left: Some(0),
			top: Some(0),
			width: Some(f64::from(dimensions.width)),
			height: Some(f64::from(dimensions.height)),
		})
		.map_err(RasterizeError::browser("resize the viewport"))?;

		let pdf = tab
			.print_to_pdf(Some(PrintToPdfOptions {
				print_background: Some(true),
				paper_width: Some(dimensions.width_inches()),
				paper_height: Some(dimensions.height_inches()),
				margin_top: Some(0.0),
				margin_bottom: Some(0.0),
				margin_left: Some(0.0),
				margin_right: Some(0.0),
				page_ranges: Some("1".to_string()),
				..Default::default()
			}))
			.map_err(RasterizeError::browser("print to PDF"))?;

		fs::write(pdf_path, &pdf).map_err(|source| RasterizeError::Write {
			path: pdf_path.to_path_buf(),
			source,
		})?;

		let written = fs::metadata(pdf_path).map(|m| m.len()).unwrap_or(0);
		if written == 0 {
			return Err(RasterizeError::PdfNotProduced(pdf_path.to_path_buf()));
		}

		Ok(dimensions)
	}
}

impl PdfPrinter for Rasterizer {
	fn print_pdf(&self, svg_path: &Path, pdf_path: &Path) -> Result<Dimensions, RasterizeError> {
		self.rasterize(svg_path, pdf_path)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::reporter::recording::Recorder;
	use tempfile::TempDir;

	#[test]
	fn dimensions_round_up_to_whole_pixels() {
		let dims = Dimensions::from_layout(200.2, 99.9).expect("dims");
		assert_eq!(dims, Dimensions { width: 201, height: 100 });
		assert_eq!(Dimensions::from_layout(96.0, 48.0).unwrap().width_inches(), 1.0);
		assert!(Dimensions::from_layout(0.0, 10.0).is_none());
		assert!(Dimensions::from_layout(f64::NAN, 10.0).is_none());
	}

	#[test]
	fn page_points_follow_pixels() {
		let dims = Dimensions { width: 400, height: 300 };
		assert_eq!(dims.points(), (300.0, 225.0));
	}

	#[test]
	fn html_wraps_svg_verbatim() {
		let html = html_document("<svg id=\"d\"></svg>");
		assert!(html.contains("<body><svg id=\"d\"></svg></body>"));
		assert!(html.contains("display: block"));
		assert!(data_url(&html).starts_with("data:text/html;base64,"));
	}

	#[test]
	fn locator_takes_first_existing_candidate() {
		let dir = TempDir::new().expect("temp dir");
		let chrome = dir.path().join("chrome");
		let edge = dir.path().join("edge");
		fs::write(&chrome, "").expect("chrome");
		fs::write(&edge, "").expect("edge");

		let locator = BrowserLocator::with_candidates(vec![dir.path().join("missing"), chrome.clone(), edge]);
		assert_eq!(locator.locate().expect("found"), chrome);
	}

	#[test]
	fn missing_browser_fails_before_launch() {
		let dir = TempDir::new().expect("temp dir");
		let svg = dir.path().join("d.svg");
		fs::write(&svg, "<svg width=\"10\" height=\"10\"></svg>").expect("svg");
		let log = Arc::new(Recorder::default());

		let rasterizer = Rasterizer::new(BrowserLocator::with_candidates(Vec::new()), log.clone());
		let err = rasterizer
			.rasterize(&svg, &dir.path().join("d.pdf"))
			.expect_err("no browser");

		assert!(matches!(err, RasterizeError::BrowserNotFound));
		assert!(!log.log_text().contains("Closing browser"));
		assert!(!dir.path().join("d.pdf").exists());
	}

	#[test]
	#[ignore = "needs a local Chrome or Chromium install"]
	fn prints_pdf_sized_to_svg() {
		let dir = TempDir::new().expect("temp dir");
		let svg = dir.path().join("d.svg");
		let pdf = dir.path().join("d.pdf");
		fs::write(
			&svg,
			r#"<svg xmlns="http://www.w3.org/2000/svg" width="300" height="150"><rect width="300" height="150" fill="red"/></svg>"#,
		)
		.expect("svg");
		let log = Arc::new(Recorder::default());

		let dims = Rasterizer::new(BrowserLocator::new(None), log.clone())
			.rasterize(&svg, &pdf)
			.expect("pdf");

		assert_eq!(dims, Dimensions { width: 300, height: 150 });
		assert!(log.log_text().contains("Closing browser"));

		let bytes = fs::read(&pdf).expect("pdf exists");
		let (width_pt, height_pt) = media_box_size(&bytes).expect("MediaBox in pdf");
		assert!((width_pt - 225.0).abs() < 1.0, "page width {width_pt}pt");
		assert!((height_pt - 112.5).abs() < 1.0, "page height {height_pt}pt");
	}

	/// Width and height of the first `/MediaBox [x0 y0 x1 y1]` in the file.
	fn media_box_size(pdf: &[u8]) -> Option<(f64, f64)> {
		let text = String::from_utf8_lossy(pdf);
		let start = text.find("/MediaBox")?;
		let rest = &text[start..];
		let open = rest.find('[')?;
		let close = rest.find(']')?;
		let numbers: Vec<f64> = rest[open + 1..close]
			.split_whitespace()
			.filter_map(|n| n.parse().ok())
			.collect();
		match numbers.as_slice() {
			[x0, y0, x1, y1] => Some((x1 - x0, y1 - y0)),
			_ => None,
		}
	}

	#[test]
	fn reads_media_box_size() {
		let pdf = b"%PDF-1.4\n1 0 obj << /Type /Page /MediaBox [0 0 225 112.5] >> endobj";
		assert_eq!(media_box_size(pdf), Some((225.0, 112.5)));
		assert_eq!(media_box_size(b"%PDF-1.4"), None);
	}
}

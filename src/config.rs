use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::diagram::OutputKind;
use crate::error::ExportError;

pub const CONFIG_FILE_NAME: &str = "em2f.toml";

/// User settings, read once per invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	/// Format preselected in the format prompt.
	pub output_type: OutputKind,
	/// Mermaid theme passed to the renderer.
	pub theme: String,
	pub png_scale: f64,
	pub png_background: String,
	/// Program and leading arguments used to start the renderer.
	pub renderer_command: Vec<String>,
	/// Browser executable tried before the built-in install locations.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub browser_path: Option<PathBuf>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			output_type: OutputKind::Svg,
			theme: "default".to_string(),
			png_scale: 1.0,
			png_background: "white".to_string(),
			renderer_command: vec![
				"npx".to_string(),
				"--package=@mermaid-js/mermaid-cli@latest".to_string(),
				"mmdc".to_string(),
			],
			browser_path: None,
		}
	}
}

impl Config {
	/// Loads `path` when given, else `em2f.toml` in `workspace`, else defaults.
	pub fn load(path: Option<&Path>, workspace: Option<&Path>) -> Result<Self> {
		let candidate = match path {
			Some(path) => Some(path.to_path_buf()),
			None => workspace
				.map(|dir| dir.join(CONFIG_FILE_NAME))
				.filter(|file| file.is_file()),
		};

		let config = match candidate {
			Some(file) => {
				let content = fs::read_to_string(&file)
					.with_context(|| format!("Failed to read config: {}", file.display()))?;
				toml::from_str::<Config>(&content)
					.with_context(|| format!("Failed to parse config: {}", file.display()))?
			}
			None => Config::default(),
		};

		config.validate()?;
		Ok(config)
	}

	pub fn save(&self, path: &Path) -> Result<()> {
		let content = toml::to_string_pretty(self)?;
		fs::write(path, content)
			.with_context(|| format!("Failed to write config: {}", path.display()))?;
		Ok(())
	}

	pub fn validate(&self) -> Result<(), ExportError> {
		if !self.png_scale.is_finite() || self.png_scale <= 0.0 {
			return Err(ExportError::InvalidOption(format!(
				"pngScale must be a positive number, got {}",
				self.png_scale
			)));
		}
		if self.renderer_command.is_empty() {
			return Err(ExportError::InvalidOption(
				"rendererCommand must name a program".to_string(),
			));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn missing_file_yields_defaults() {
		let dir = TempDir::new().expect("temp dir");
		let config = Config::load(None, Some(dir.path())).expect("config");
		assert_eq!(config, Config::default());
		assert_eq!(config.theme, "default");
		assert_eq!(config.png_background, "white");
		assert_eq!(config.png_scale, 1.0);
	}

	#[test]
	fn reads_camel_case_keys_from_workspace() {
		let dir = TempDir::new().expect("temp dir");
		fs::write(
			dir.path().join(CONFIG_FILE_NAME),
			"outputType = \"png\"\ntheme = \"dark\"\npngScale = 2\npngBackground = \"black\"\n",
		)
		.expect("write config");

		let config = Config::load(None, Some(dir.path())).expect("config");
		assert_eq!(config.output_type, OutputKind::Png);
		assert_eq!(config.theme, "dark");
		assert_eq!(config.png_scale, 2.0);
		assert_eq!(config.png_background, "black");
		assert_eq!(config.renderer_command, Config::default().renderer_command);
	}

	#[test]
	fn rejects_non_positive_scale() {
		let dir = TempDir::new().expect("temp dir");
		let file = dir.path().join("custom.toml");
		fs::write(&file, "pngScale = 0\n").expect("write config");

		let err = Config::load(Some(&file), None).expect_err("scale must be positive");
		assert!(err.to_string().contains("pngScale"));
	}

	#[test]
	fn save_round_trips_through_load() {
		let dir = TempDir::new().expect("temp dir");
		let file = dir.path().join(CONFIG_FILE_NAME);
		let config = Config {
			browser_path: Some(PathBuf::from("/opt/chrome/chrome")),
			..Config::default()
		};
		config.save(&file).expect("save");

		assert_eq!(Config::load(Some(&file), None).expect("load"), config);
	}
}

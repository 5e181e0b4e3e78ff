use crate::utils::multipart::PartNaming;
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
	pub telemetry: TelemetryConfig,
	pub import: ImportConfig,
	pub pacs: PacsConfig,
}

impl AppConfig {
	/// Loads the configuration from the embedded defaults, an optional `config.toml` in the
	/// working directory and `DICOM_INGEST_*` environment variables (in that order).
	pub fn new() -> Result<Self, config::ConfigError> {
		use config::Config;
		let s = Config::builder()
			.add_source(config::File::from_str(
				include_str!("defaults.toml"),
				config::FileFormat::Toml,
			))
			.add_source(config::File::with_name("config.toml").required(false))
			.add_source(
				config::Environment::with_prefix("DICOM_INGEST")
					.prefix_separator("_")
					.separator("__"),
			)
			.build()?;

		s.try_deserialize()
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
	// Configurable logging level. Also configurable via env vars RUST_LOG and DICOM_INGEST_TELEMETRY__LEVEL
	pub level: String,
	/// Sentry DSN. An empty string disables Sentry.
	pub sentry: Option<String>,
}

impl TelemetryConfig {
	pub fn level_filter(&self) -> LevelFilter {
		LevelFilter::from_str(&self.level).unwrap_or(LevelFilter::INFO)
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
	/// Root folder that relative instance paths are resolved against.
	pub folder: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PacsConfig {
	/// Timeout for a single WADO request in milliseconds.
	pub timeout: u64,
	pub multipart_naming: PartNaming,
}

impl Default for PacsConfig {
	fn default() -> Self {
		Self {
			timeout: 60_000,
			multipart_naming: PartNaming::default(),
		}
	}
}

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use dicom_ingest::config::AppConfig;
use dicom_ingest::dicom::splitter::InstanceResolver;
use dicom_ingest::import::{Importer, TracingPublisher};
use dicom_ingest::model::{Event, Patient};
use dicom_ingest::wado::{Artifact, DatasetContext, WadoClient};
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use url::Url;
use zip::ZipWriter;

#[derive(Parser)]
#[command(name = "dicom-ingest", version)]
#[command(about = "Analyze imported DICOM series and retrieve instances from a PACS", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Split the series of an import manifest into images and complete their metadata
	Import {
		/// JSON manifest (patients, studies, series, instances)
		manifest: PathBuf,
		/// Import root, defaults to `import.folder` from the configuration
		#[arg(short, long)]
		folder: Option<PathBuf>,
		/// Instances were stored by a PACS as `<seriesUID>/<sopInstanceUID>.dcm`
		#[arg(long)]
		pacs: bool,
		/// Where to write the enriched manifest, stdout if omitted
		#[arg(short, long)]
		output: Option<PathBuf>,
	},
	/// Download instances through WADO-RS or WADO-URI
	Download {
		#[arg(required = true)]
		urls: Vec<Url>,
		/// Target folder
		#[arg(short, long, conflicts_with = "zip")]
		output: Option<PathBuf>,
		/// Target zip archive
		#[arg(long)]
		zip: Option<PathBuf>,
		#[arg(long, default_value = "")]
		subject: String,
		/// Acquisition date (YYYY-MM-DD)
		#[arg(long)]
		date: Option<NaiveDate>,
		#[arg(long, default_value = "")]
		description: String,
		/// Folder of the dataset inside the zip archive
		#[arg(long)]
		dataset_folder: Option<String>,
	},
	/// Print the DICOM JSON metadata of an instance
	Metadata {
		url: Url,
		/// Metadata of the whole study instead
		#[arg(long)]
		study: bool,
	},
}

fn init_logger(level: LevelFilter) {
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::fmt::layer()
				.compact()
				.with_ansi(true)
				.with_file(false)
				.with_line_number(false)
				.with_target(false)
				.with_writer(std::io::stderr),
		)
		.with(
			EnvFilter::builder()
				.with_default_directive(level.into())
				.from_env_lossy(),
		)
		.with(sentry::integrations::tracing::layer())
		.init();
}

fn init_sentry(config: &AppConfig) -> sentry::ClientInitGuard {
	let dsn = config
		.telemetry
		.sentry
		.as_deref()
		.filter(|dsn| !dsn.is_empty());
	let guard = sentry::init((
		// An empty string will disable Sentry
		dsn.unwrap_or_default(),
		sentry::ClientOptions {
			release: sentry::release_name!(),
			traces_sample_rate: 1.0,
			..Default::default()
		},
	));

	if let Some(dsn) = dsn {
		info!(dsn, "Enabled Sentry for tracing and error tracking");
	}

	guard
}

fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	let config = AppConfig::new()?;
	init_logger(config.telemetry.level_filter());

	// Manually create the Tokio runtime because the Sentry client needs to be created *before* the
	// Tokio runtime, which prevents us from using the #[tokio::main] macro.
	// See https://docs.sentry.io/platforms/rust/#async-main-function
	let _sentry = init_sentry(&config);

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()?
		.block_on(async move {
			let result = run(config, cli.command).await;
			if let Err(error) = &result {
				error!("Failed due to error: {error:#}");
			}
			result
		})
}

async fn run(config: AppConfig, command: Command) -> anyhow::Result<()> {
	match command {
		Command::Import {
			manifest,
			folder,
			pacs,
			output,
		} => {
			let root = folder.unwrap_or(config.import.folder);
			let resolver = if pacs {
				InstanceResolver::Pacs { root }
			} else {
				InstanceResolver::Filesystem { root }
			};
			import(&manifest, &resolver, output).await
		}
		Command::Download {
			urls,
			output,
			zip,
			subject,
			date,
			description,
			dataset_folder,
		} => {
			let client = WadoClient::new(&config.pacs)?;
			let context = DatasetContext {
				subject_name: subject,
				acquisition_date: date,
				description,
				folder: dataset_folder,
			};
			let artifacts = match zip {
				Some(path) => {
					let file = std::fs::File::create(&path)
						.with_context(|| format!("Failed to create {}", path.display()))?;
					let mut zip = ZipWriter::new(file);
					let artifacts = client.download_to_zip(&urls, &mut zip, &context).await?;
					zip.finish()?;
					artifacts
				}
				None => {
					let folder = output.unwrap_or_else(|| PathBuf::from("."));
					client.download_to_folder(&urls, &folder, &context).await?
				}
			};
			for artifact in artifacts {
				match artifact {
					Artifact::Dicom(name) => println!("{name}"),
					Artifact::Placeholder(name) => println!("{name} (failed)"),
				}
			}
			Ok(())
		}
		Command::Metadata { url, study } => {
			let client = WadoClient::new(&config.pacs)?;
			let metadata = if study {
				client.download_study_metadata(&url).await?
			} else {
				client.download_metadata(&url).await?
			};
			println!("{metadata}");
			Ok(())
		}
	}
}

async fn import(
	manifest: &Path,
	resolver: &InstanceResolver,
	output: Option<PathBuf>,
) -> anyhow::Result<()> {
	let json = tokio::fs::read_to_string(manifest)
		.await
		.with_context(|| format!("Failed to read manifest {}", manifest.display()))?;
	let mut patients: Vec<Patient> = serde_json::from_str(&json)?;

	// Reading DICOM files is blocking
	let resolver = resolver.clone();
	let patients = tokio::task::spawn_blocking(move || {
		let mut event = Event::new("importDicom", None);
		Importer::new(TracingPublisher)
			.run(&mut patients, &resolver, Some(&mut event))
			.map(|()| patients)
	})
	.await??;

	let json = serde_json::to_string_pretty(&patients)?;
	match output {
		Some(path) => tokio::fs::write(&path, json).await?,
		None => println!("{json}"),
	}
	Ok(())
}

use crate::config::PacsConfig;
use crate::dicom::DicomAttributes;
use crate::utils::multipart::{
	collect_parts, extract_parts, parse_boundary, sniff_boundary, DicomMultipart, MultipartError,
	PartNaming,
};
use crate::wado::url::{metadata_url, output_name, study_metadata_url, WadoUrl, WadoUrlError};
use bytes::Bytes;
use chrono::NaiveDate;
use dicom::object::InMemDicomObject;
use dicom_json::DicomJson;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const ACCEPT_MULTIPART_DICOM: &str = "multipart/related; type=application/dicom";
const ACCEPT_JSON: &str = "application/json";
const ERROR_PREFIX: &str = "0000_ERROR_";
const PLACEHOLDER_MESSAGE: &str = "An error occurred during the download of this DICOM file, \
	please contact an administrator if necessary.";

#[derive(Debug, Error)]
pub enum DownloadError {
	#[error(transparent)]
	Url(#[from] WadoUrlError),
	#[error("Failed to contact PACS: {0}")]
	Http(#[from] reqwest::Error),
	#[error("Download did not work: wrong status code {status} received from {url}")]
	Status { url: String, status: StatusCode },
	#[error(transparent)]
	Multipart(#[from] MultipartError),
	#[error("Invalid DICOM JSON metadata: {0}")]
	Json(#[from] serde_json::Error),
	#[error("Failed to write zip archive: {0}")]
	Zip(#[from] zip::result::ZipError),
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl DownloadError {
	/// Errors that abort a whole batch instead of being replaced by a placeholder: the PACS or the
	/// stored URLs violate the WADO contract, or the output itself is broken.
	pub const fn is_fatal(&self) -> bool {
		matches!(
			self,
			Self::Url(_) | Self::Multipart(MultipartError::NonDicom(_)) | Self::Zip(_)
		)
	}
}

/// Describes the dataset a batch of instances belongs to, used to name the downloaded files.
#[derive(Debug, Clone, Default)]
pub struct DatasetContext {
	pub subject_name: String,
	pub acquisition_date: Option<NaiveDate>,
	pub description: String,
	/// Folder of the dataset inside a zip archive.
	pub folder: Option<String>,
}

impl DatasetContext {
	fn output_name(&self, instance_uid: &str) -> String {
		output_name(
			&self.subject_name,
			self.acquisition_date,
			&self.description,
			instance_uid,
		)
	}

	fn entry_name(&self, name: &str) -> String {
		match &self.folder {
			Some(folder) => format!("{folder}/{name}"),
			None => name.to_owned(),
		}
	}
}

/// Outcome of one URL of a batch download: the file or zip entry written for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
	Dicom(String),
	Placeholder(String),
}

fn placeholder_name(failure: usize, name: &str) -> String {
	format!("{ERROR_PREFIX}{failure}_{name}.txt")
}

/// WADO-RS / WADO-URI client of a PACS.
#[derive(Debug, Clone)]
pub struct WadoClient {
	http: reqwest::Client,
	naming: PartNaming,
}

impl WadoClient {
	pub fn new(config: &PacsConfig) -> Result<Self, DownloadError> {
		let http = reqwest::Client::builder()
			.timeout(Duration::from_millis(config.timeout))
			.build()?;
		Ok(Self {
			http,
			naming: config.multipart_naming,
		})
	}

	async fn get(&self, url: &str, accept: &str) -> Result<reqwest::Response, DownloadError> {
		debug!(url, accept, "Sending WADO request");
		let response = self.http.get(url).header(ACCEPT, accept).send().await?;
		match response.status() {
			StatusCode::OK => Ok(response),
			status => Err(DownloadError::Status {
				url: url.to_owned(),
				status,
			}),
		}
	}

	/// Downloads a single instance into `folder`, `<instance UID>.dcm` for a WADO-URI URL and the
	/// extracted parts for a WADO-RS URL. Any failure is returned to the caller.
	#[instrument(skip_all, fields(url = %url))]
	pub async fn download_file(&self, url: &Url, folder: &Path) -> Result<Vec<PathBuf>, DownloadError> {
		let url = WadoUrl::parse(url.as_str())?;
		let file_name = format!("{}.dcm", url.instance_uid());
		self.download_into(&url, folder, &file_name).await
	}

	async fn download_into(
		&self,
		url: &WadoUrl,
		folder: &Path,
		file_name: &str,
	) -> Result<Vec<PathBuf>, DownloadError> {
		let response = self.get(url.as_str(), ACCEPT_MULTIPART_DICOM).await?;
		match url {
			WadoUrl::Rs { instance_uid, .. } => {
				let multipart = multipart(response).await?;
				Ok(extract_parts(multipart, instance_uid, folder, self.naming).await?)
			}
			WadoUrl::Uri { .. } => {
				let path = folder.join(file_name);
				write_body(response.bytes_stream(), &path).await?;
				Ok(vec![path])
			}
		}
	}

	/// Downloads every URL into `folder`.
	///
	/// WADO-RS responses are extracted under their instance UID, WADO-URI responses are named after
	/// the dataset. A failed download leaves a `0000_ERROR_<n>_<name>.txt` placeholder and the
	/// batch goes on. URLs in neither WADO dialect abort the batch before anything is downloaded.
	#[instrument(skip_all, fields(folder = %folder.display(), urls = urls.len()))]
	pub async fn download_to_folder(
		&self,
		urls: &[Url],
		folder: &Path,
		context: &DatasetContext,
	) -> Result<Vec<Artifact>, DownloadError> {
		let urls = parse_all(urls)?;
		tokio::fs::create_dir_all(folder).await?;

		let mut artifacts = Vec::with_capacity(urls.len());
		let mut failures = 0;
		for url in &urls {
			let name = context.output_name(url.instance_uid());
			let result = self
				.download_into(url, folder, &format!("{name}.dcm"))
				.await;

			match result {
				Ok(paths) => artifacts.extend(paths.iter().map(|path| {
					Artifact::Dicom(file_name(path))
				})),
				Err(err) if err.is_fatal() => return Err(err),
				Err(err) => {
					error!("A DICOM file could not be downloaded from the PACS: {err}");
					let placeholder = placeholder_name(failures, &name);
					tokio::fs::write(folder.join(&placeholder), PLACEHOLDER_MESSAGE).await?;
					failures += 1;
					artifacts.push(Artifact::Placeholder(placeholder));
				}
			}
		}

		info!(
			files = artifacts.len() - failures,
			failures, "Downloaded DICOM files"
		);
		Ok(artifacts)
	}

	/// Downloads every URL as entries of `zip`, inside the dataset folder if one is given.
	///
	/// Same failure policy as [`Self::download_to_folder`]. Entries of a WADO-RS response with
	/// several parts are always numbered by part index, an archive cannot hold two entries with the
	/// same name.
	#[instrument(skip_all, fields(urls = urls.len()))]
	pub async fn download_to_zip<W: Write + Seek>(
		&self,
		urls: &[Url],
		zip: &mut ZipWriter<W>,
		context: &DatasetContext,
	) -> Result<Vec<Artifact>, DownloadError> {
		let urls = parse_all(urls)?;
		let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

		let mut artifacts = Vec::with_capacity(urls.len());
		let mut failures = 0;
		for url in &urls {
			let name = context.output_name(url.instance_uid());
			match self.download_parts(url).await {
				Ok(parts) => {
					let names = PartNaming::Index.file_names(&name, parts.len());
					for (part, entry) in parts.iter().zip(names) {
						let entry = context.entry_name(&entry);
						zip.start_file(entry.as_str(), options)?;
						zip.write_all(part)?;
						artifacts.push(Artifact::Dicom(entry));
					}
				}
				Err(err) if err.is_fatal() => return Err(err),
				Err(err) => {
					error!("A DICOM file could not be downloaded from the PACS: {err}");
					let entry = context.entry_name(&placeholder_name(failures, &name));
					zip.start_file(entry.as_str(), options)?;
					zip.write_all(PLACEHOLDER_MESSAGE.as_bytes())?;
					failures += 1;
					artifacts.push(Artifact::Placeholder(entry));
				}
			}
		}

		info!(
			entries = artifacts.len() - failures,
			failures, "Downloaded DICOM files into archive"
		);
		Ok(artifacts)
	}

	/// The DICOM payloads of one URL, in memory.
	async fn download_parts(&self, url: &WadoUrl) -> Result<Vec<Bytes>, DownloadError> {
		let response = self.get(url.as_str(), ACCEPT_MULTIPART_DICOM).await?;
		match url {
			WadoUrl::Rs { .. } => Ok(collect_parts(multipart(response).await?).await?),
			WadoUrl::Uri { .. } => Ok(vec![response.bytes().await?]),
		}
	}

	/// DICOM JSON metadata of the instance addressed by `url`.
	#[instrument(skip_all, fields(url = %url))]
	pub async fn download_metadata(&self, url: &Url) -> Result<String, DownloadError> {
		let url = metadata_url(url.as_str());
		Ok(self.get(&url, ACCEPT_JSON).await?.text().await?)
	}

	/// DICOM JSON metadata of the whole study containing the instance addressed by `url`.
	#[instrument(skip_all, fields(url = %url))]
	pub async fn download_study_metadata(&self, url: &Url) -> Result<String, DownloadError> {
		let url = study_metadata_url(url.as_str());
		Ok(self.get(&url, ACCEPT_JSON).await?.text().await?)
	}

	/// Attributes of a dataset, read from the metadata of its first instance.
	/// Returns `None` if the dataset has no URL or the PACS answered with no object.
	pub async fn dataset_attributes(
		&self,
		urls: &[Url],
	) -> Result<Option<DicomAttributes>, DownloadError> {
		let Some(url) = urls.first() else {
			warn!("Could not find DICOM attributes: no PACS URL for this dataset");
			return Ok(None);
		};

		let json = self.download_metadata(url).await?;
		let objects: Vec<DicomJson<InMemDicomObject>> = serde_json::from_str(&json)?;
		let attributes = objects
			.into_iter()
			.next()
			.map(|object| DicomAttributes::from_object(object.into_inner(), None));
		if attributes.is_none() {
			warn!(%url, "Could not find DICOM attributes in PACS metadata");
		}
		Ok(attributes)
	}
}

fn parse_all(urls: &[Url]) -> Result<Vec<WadoUrl>, WadoUrlError> {
	urls.iter().map(|url| WadoUrl::parse(url.as_str())).collect()
}

fn file_name(path: &Path) -> String {
	path.file_name()
		.map(|name| name.to_string_lossy().into_owned())
		.unwrap_or_default()
}

/// Decodes a `multipart/related` response. PACS that do not announce the boundary in the
/// Content-Type header get it read from the first line of the body.
async fn multipart(response: reqwest::Response) -> Result<DicomMultipart<'static>, MultipartError> {
	let announced = response
		.headers()
		.get(CONTENT_TYPE)
		.and_then(|value| value.to_str().ok())
		.map(parse_boundary);
	let mut stream = Box::pin(response.bytes_stream());

	match announced {
		Some(Ok(boundary)) => Ok(DicomMultipart::new(stream, boundary)),
		other => {
			let first = match stream.next().await {
				Some(chunk) => chunk.map_err(|err| multer::Error::StreamReadFailed(err.into()))?,
				None => Bytes::new(),
			};
			let boundary = sniff_boundary(&first).ok_or_else(|| {
				MultipartError::InvalidBoundary(match other {
					Some(Err(err)) => err,
					_ => multer::Error::NoBoundary,
				})
			})?;
			debug!(%boundary, "Read multipart boundary from body");
			let stream = futures::stream::once(async move { Ok(first) }).chain(stream);
			Ok(DicomMultipart::new(stream, boundary))
		}
	}
}

/// Streams a response body to `path`, removing the partial file on error.
async fn write_body(
	stream: impl Stream<Item = reqwest::Result<Bytes>>,
	path: &Path,
) -> Result<(), DownloadError> {
	let result = async {
		let mut file = tokio::fs::File::create(path).await?;
		let mut stream = std::pin::pin!(stream);
		while let Some(chunk) = stream.next().await {
			file.write_all(&chunk?).await?;
		}
		file.flush().await?;
		Ok::<_, DownloadError>(())
	}
	.await;

	if result.is_err() {
		if let Err(err) = tokio::fs::remove_file(path).await {
			debug!(path = %path.display(), "No partial file to remove: {err}");
		}
	}
	result
}

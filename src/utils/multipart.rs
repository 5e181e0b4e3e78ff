//! Decoding of `multipart/related` WADO-RS responses into DICOM files.

use bytes::Bytes;
use futures::Stream;
use mime::Mime;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

const DICOM: &str = "dicom";
const DCM: &str = "dcm";

/// How the parts of a response carrying several parts are named on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartNaming {
	/// `<uid>_<part count>.dcm`. Every part gets the same name, so a response with several parts
	/// cannot be extracted.
	Count,
	/// `<uid>_<part index>.dcm`, starting at 1.
	#[default]
	Index,
}

impl PartNaming {
	/// File names (without folder) for `count` parts of the response for `instance_uid`.
	pub fn file_names(self, instance_uid: &str, count: usize) -> Vec<String> {
		match count {
			1 => vec![format!("{instance_uid}.{DCM}")],
			_ => (1..=count)
				.map(|index| {
					let suffix = match self {
						Self::Count => count,
						Self::Index => index,
					};
					format!("{instance_uid}_{suffix}.{DCM}")
				})
				.collect(),
		}
	}
}

#[derive(Debug, Error)]
pub enum MultipartError {
	#[error("Invalid `boundary` for `multipart/related` response: {0}")]
	InvalidBoundary(#[source] multer::Error),
	#[error("Answer contains non-DICOM content ({})", .0.as_ref().map_or("no content type", |mime| mime.essence_str()))]
	NonDicom(Option<Mime>),
	#[error("Failed to read multipart stream: {0}")]
	Stream(#[from] multer::Error),
	#[error("File already exists: {}", .0.display())]
	FileExists(PathBuf),
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// This implementation is based on [`multer::parse_boundary`],
/// but with multipart/related instead of multipart/form-data.
pub fn parse_boundary(content_type: &str) -> multer::Result<String> {
	let mime = content_type
		.parse::<Mime>()
		.map_err(multer::Error::DecodeContentType)?;

	// The `multer` crate expects multipart/form-data here, but in DICOM multipart/related is used.
	if !(mime.type_() == mime::MULTIPART && mime.subtype().as_str() == "related") {
		return Err(multer::Error::NoMultipart);
	}

	mime.get_param(mime::BOUNDARY)
		.map(|name| name.as_str().to_owned())
		.ok_or(multer::Error::NoBoundary)
}

/// Reads the boundary from the first delimiter line of a body, for PACS that do not announce it
/// in the Content-Type header.
pub fn sniff_boundary(body: &[u8]) -> Option<String> {
	let line = body
		.trim_ascii_start()
		.split(|byte| *byte == b'\n')
		.next()?;
	let boundary = line.strip_prefix(b"--")?.trim_ascii_end();
	if boundary.is_empty() {
		return None;
	}
	std::str::from_utf8(boundary).ok().map(str::to_owned)
}

/// A body part of a WADO-RS response, classified by its declared content type.
pub enum DicomPart<'a> {
	/// `application/dicom`
	Dicom(multer::Field<'a>),
	/// `application/dicom+xml`
	DicomXml(multer::Field<'a>),
	/// Anything else, with the declared content type if there was one.
	Rejected(Option<Mime>),
}

impl<'a> DicomPart<'a> {
	pub fn classify(field: multer::Field<'a>) -> Self {
		let Some(mime) = field.content_type().cloned() else {
			return Self::Rejected(None);
		};
		if mime.type_() != mime::APPLICATION || mime.subtype().as_str() != DICOM {
			return Self::Rejected(Some(mime));
		}
		match mime.suffix() {
			None => Self::Dicom(field),
			Some(suffix) if suffix == mime::XML => Self::DicomXml(field),
			Some(_) => Self::Rejected(Some(mime)),
		}
	}

	/// The payload of a DICOM part, or the error rejecting the whole response.
	pub fn into_field(self) -> Result<multer::Field<'a>, MultipartError> {
		match self {
			Self::Dicom(field) | Self::DicomXml(field) => Ok(field),
			Self::Rejected(mime) => Err(MultipartError::NonDicom(mime)),
		}
	}
}

/// Iterates over the DICOM parts of a `multipart/related` body.
/// This uses the `multer` crate with a boundary taken from a multipart/related Content-Type.
pub struct DicomMultipart<'a>(multer::Multipart<'a>);

impl<'a> DicomMultipart<'a> {
	pub fn new<S, O, E>(stream: S, boundary: impl Into<String>) -> Self
	where
		S: Stream<Item = Result<O, E>> + Send + 'a,
		O: Into<Bytes> + 'static,
		E: Into<Box<dyn std::error::Error + Send + Sync>> + 'a,
	{
		Self(multer::Multipart::new(stream, boundary))
	}

	/// Returns the next part. Any part that is not DICOM is an error.
	pub async fn next_part(&mut self) -> Result<Option<multer::Field<'a>>, MultipartError> {
		match self.0.next_field().await? {
			Some(field) => DicomPart::classify(field).into_field().map(Some),
			None => Ok(None),
		}
	}
}

/// Streams every part of the response into `folder`, one part in memory at a time.
///
/// Parts are written under temporary names first since their final names depend on the number of
/// parts. On error, files written so far are removed.
#[instrument(skip_all, fields(instance_uid, folder = %folder.display()))]
pub async fn extract_parts(
	mut multipart: DicomMultipart<'_>,
	instance_uid: &str,
	folder: &Path,
	naming: PartNaming,
) -> Result<Vec<PathBuf>, MultipartError> {
	let mut temporary = Vec::new();
	let result = write_parts(&mut multipart, instance_uid, folder, &mut temporary).await;
	if let Err(err) = result {
		remove_all(&temporary).await;
		return Err(err);
	}

	let targets: Vec<PathBuf> = naming
		.file_names(instance_uid, temporary.len())
		.into_iter()
		.map(|name| folder.join(name))
		.collect();
	if let Err(err) = check_targets(&targets).await {
		remove_all(&temporary).await;
		return Err(err);
	}

	let mut extracted = Vec::with_capacity(targets.len());
	for (source, target) in temporary.iter().zip(targets) {
		if let Err(err) = tokio::fs::rename(source, &target).await {
			remove_all(&temporary).await;
			return Err(err.into());
		}
		extracted.push(target);
	}

	debug!(parts = extracted.len(), "Extracted DICOM parts");
	Ok(extracted)
}

/// Parts never replace an existing file, nor each other.
async fn check_targets(targets: &[PathBuf]) -> Result<(), MultipartError> {
	let mut seen = HashSet::with_capacity(targets.len());
	for target in targets {
		if !seen.insert(target) || tokio::fs::try_exists(target).await? {
			return Err(MultipartError::FileExists(target.clone()));
		}
	}
	Ok(())
}

async fn write_parts(
	multipart: &mut DicomMultipart<'_>,
	instance_uid: &str,
	folder: &Path,
	written: &mut Vec<PathBuf>,
) -> Result<(), MultipartError> {
	while let Some(mut field) = multipart.next_part().await? {
		let path = folder.join(format!(".{instance_uid}.{}.part", written.len()));
		let mut file = File::create(&path).await?;
		written.push(path);
		while let Some(chunk) = field.chunk().await? {
			file.write_all(&chunk).await?;
		}
		file.flush().await?;
	}
	Ok(())
}

async fn remove_all(paths: &[PathBuf]) {
	for path in paths {
		if let Err(err) = tokio::fs::remove_file(path).await {
			if err.kind() != std::io::ErrorKind::NotFound {
				warn!(path = %path.display(), "Failed to remove partial file: {err}");
			}
		}
	}
}

/// Collects the payload of every part in memory.
pub async fn collect_parts(mut multipart: DicomMultipart<'_>) -> Result<Vec<Bytes>, MultipartError> {
	let mut parts = Vec::new();
	while let Some(field) = multipart.next_part().await? {
		parts.push(field.bytes().await?);
	}
	Ok(parts)
}

use crate::dicom::{classifier, DicomAttributes};
use crate::model::{EchoTime, Image, Instance, NonImage, Series};
use crate::types::UI;
use dicom::dictionary_std::tags;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, instrument, trace};

const DCM: &str = "dcm";

#[derive(Debug, Error)]
pub enum ResolveError {
	#[error("Instance {sop_instance_uid} has no referenced file ID")]
	MissingFileId { sop_instance_uid: UI },
	#[error("Missing instance file: {}", path.display())]
	FileNotFound { path: PathBuf },
}

/// Locates the file of an instance below the import folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceResolver {
	/// Upload of a DICOM archive: instances are referenced by the path segments of their
	/// DICOMDIR Referenced File ID.
	Filesystem { root: PathBuf },
	/// Import from a PACS: the store SCP writes `<root>/<seriesInstanceUID>/<sopInstanceUID>.dcm`.
	Pacs { root: PathBuf },
}

impl InstanceResolver {
	pub fn root(&self) -> &Path {
		match self {
			Self::Filesystem { root } | Self::Pacs { root } => root,
		}
	}

	/// Builds the absolute path of an instance file and checks that it exists.
	pub fn resolve(
		&self,
		series_instance_uid: &str,
		instance: &Instance,
	) -> Result<PathBuf, ResolveError> {
		let path = match self {
			Self::Filesystem { root } => {
				let segments = instance
					.referenced_file_id
					.as_deref()
					.filter(|segments| !segments.is_empty())
					.ok_or_else(|| ResolveError::MissingFileId {
						sop_instance_uid: instance.sop_instance_uid.clone(),
					})?;
				// Only plain names are kept, the file must stay below the import root
				let mut path = root.clone();
				path.extend(
					segments
						.iter()
						.flat_map(|segment| Path::new(segment).components())
						.filter_map(|component| match component {
							Component::Normal(name) => Some(name),
							_ => None,
						}),
				);
				path
			}
			// UIDs contain dots, so the extension is appended rather than set
			Self::Pacs { root } => root
				.join(series_instance_uid)
				.join(format!("{}.{DCM}", instance.sop_instance_uid)),
		};

		if path.try_exists().unwrap_or(false) {
			Ok(path)
		} else {
			Err(ResolveError::FileNotFound { path })
		}
	}

	/// Path of `path` relative to the import root, with `/` separators, so that stored image
	/// paths do not depend on where the import folder lives.
	pub fn relative_path(&self, path: &Path) -> String {
		let relative = path.strip_prefix(self.root()).unwrap_or(path);
		relative
			.components()
			.filter_map(|component| match component {
				Component::Normal(segment) => Some(segment.to_string_lossy()),
				_ => None,
			})
			.collect::<Vec<_>>()
			.join("/")
	}
}

/// Reads every instance file of the series and replaces the raw instances with images.
///
/// A missing file aborts the split. A file that cannot be decoded is logged and skipped.
/// Instances of an ignored SOP class become neither image nor non-image.
#[instrument(skip_all, fields(series = %series.series_instance_uid))]
pub fn split_series(series: &mut Series, resolver: &InstanceResolver) -> Result<(), ResolveError> {
	let mut images = Vec::with_capacity(series.instances.len());
	// Non-images are not produced yet
	let non_images: Vec<NonImage> = Vec::new();

	for instance in &series.instances {
		let path = resolver.resolve(&series.series_instance_uid, instance)?;
		match DicomAttributes::open(&path) {
			Ok(attributes) if classifier::is_ignored(&attributes) => {
				trace!(
					sop_instance_uid = %instance.sop_instance_uid,
					sop_class_uid = ?attributes.sop_class_uid(),
					"Ignoring instance"
				);
			}
			Ok(attributes) => {
				images.push(create_image(resolver.relative_path(&path), &attributes));
			}
			Err(err) => error!("Error during DICOM file processing: {err}"),
		}
	}

	debug!(
		instances = series.instances.len(),
		images = images.len(),
		"Split series"
	);
	series.set_split(images, non_images);
	Ok(())
}

/// Creates an image with the attributes used to separate datasets within a series.
pub fn create_image(path: String, attributes: &DicomAttributes) -> Image {
	let attributes = attributes.image_attributes();
	let image_orientation_patient = attributes.doubles(tags::IMAGE_ORIENTATION_PATIENT);
	if image_orientation_patient.is_none() {
		debug!(%path, "No Image Orientation (Patient) in file");
	}

	Image {
		acquisition_number: attributes.int(tags::ACQUISITION_NUMBER).unwrap_or(0),
		image_orientation_patient,
		repetition_time: attributes.double(tags::REPETITION_TIME).unwrap_or(0.0),
		inversion_time: attributes.double(tags::INVERSION_TIME).unwrap_or(0.0),
		flip_angle: attributes
			.string(tags::FLIP_ANGLE)
			.unwrap_or_else(|| String::from("0")),
		echo_times: vec![EchoTime {
			echo_number: attributes.int(tags::ECHO_NUMBERS).unwrap_or(0),
			echo_time: attributes.double(tags::ECHO_TIME).unwrap_or(0.0),
		}],
		path,
	}
}

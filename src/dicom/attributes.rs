use crate::types::{DS, FRAME_EXTRACTION_SOP_CLASS, IS, UI};
use chrono::NaiveDate;
use dicom::core::{DataElement, Tag, VR};
use dicom::dicom_value;
use dicom::dictionary_std::tags;
use dicom::object::mem::InMemElement;
use dicom::object::{InMemDicomObject, OpenFileOptions, ReadError};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{instrument, trace};

#[derive(Debug, Error)]
pub enum AttributeError {
	#[error("Failed to read DICOM file {}: {source}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: ReadError,
	},
}

/// Typed, read-only view of the data set of a single DICOM file.
///
/// Files are read up to (excluding) the Pixel Data element, only metadata is kept in memory.
#[derive(Debug, Clone)]
pub struct DicomAttributes {
	dataset: InMemDicomObject,
	transfer_syntax: Option<UI>,
}

impl DicomAttributes {
	/// Opens a DICOM file and decodes its metadata.
	/// The file handle is released before returning, on success and on error.
	#[instrument(skip_all, fields(path = %path.as_ref().display()))]
	pub fn open(path: impl AsRef<Path>) -> Result<Self, AttributeError> {
		let path = path.as_ref();
		let file = OpenFileOptions::new()
			.read_until(tags::PIXEL_DATA)
			.open_file(path)
			.map_err(|source| AttributeError::Read {
				path: path.to_path_buf(),
				source,
			})?;

		let transfer_syntax = file.meta().transfer_syntax().to_owned();
		trace!(transfer_syntax, "Read DICOM metadata");
		Ok(Self::from_object(file.into_inner(), Some(transfer_syntax)))
	}

	pub const fn from_object(dataset: InMemDicomObject, transfer_syntax: Option<UI>) -> Self {
		Self {
			dataset,
			transfer_syntax,
		}
	}

	pub const fn dataset(&self) -> &InMemDicomObject {
		&self.dataset
	}

	fn element(&self, tag: Tag) -> Option<&InMemElement> {
		self.dataset.get(tag)
	}

	/// Returns the trimmed string value, `None` if the attribute is absent or blank.
	pub fn string(&self, tag: Tag) -> Option<String> {
		self.element(tag)
			.and_then(|element| element.to_str().ok())
			.map(|value| value.trim().to_owned())
			.filter(|value| !value.is_empty())
	}

	pub fn int(&self, tag: Tag) -> Option<IS> {
		self.element(tag)
			.and_then(|element| element.to_int::<IS>().ok())
	}

	pub fn double(&self, tag: Tag) -> Option<DS> {
		self.element(tag)
			.and_then(|element| element.to_float64().ok())
	}

	/// Returns all values of a multi-valued numeric attribute, `None` if absent or empty.
	pub fn doubles(&self, tag: Tag) -> Option<Vec<DS>> {
		self.element(tag)
			.and_then(|element| element.to_multi_float64().ok())
			.filter(|values| !values.is_empty())
	}

	/// Parses a DA attribute (`YYYYMMDD`).
	pub fn date(&self, tag: Tag) -> Option<NaiveDate> {
		self.string(tag)
			.and_then(|value| NaiveDate::parse_from_str(&value, "%Y%m%d").ok())
	}

	pub fn sop_class_uid(&self) -> Option<UI> {
		self.string(tags::SOP_CLASS_UID)
	}

	/// Transfer Syntax UID from the file meta group, falling back to the data set itself.
	pub fn transfer_syntax_uid(&self) -> Option<UI> {
		self.transfer_syntax
			.as_deref()
			.map(|uid| uid.trim_end_matches(['\0', ' ']).to_owned())
			.filter(|uid| !uid.is_empty())
			.or_else(|| self.string(tags::TRANSFER_SYNTAX_UID))
	}

	pub fn number_of_frames(&self) -> Option<IS> {
		self.int(tags::NUMBER_OF_FRAMES)
	}

	/// Attributes describing a single image. Enhanced multi-frame objects store geometry and
	/// timing in functional groups, those are flattened for frame 0.
	pub fn image_attributes(&self) -> Cow<'_, Self> {
		if self.sop_class_uid().as_deref() == Some(FRAME_EXTRACTION_SOP_CLASS) {
			Cow::Owned(self.frame(0))
		} else {
			Cow::Borrowed(self)
		}
	}

	/// Flattens the Shared and the Per-frame Functional Groups (item `index`) into the top
	/// level. Per-frame values take precedence over shared values.
	pub fn frame(&self, index: usize) -> Self {
		let mut dataset = self.dataset.clone();
		dataset.remove_element(tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE);
		dataset.remove_element(tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE);

		let shared = self
			.items(tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE)
			.and_then(|items| items.first());
		let per_frame = self
			.items(tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE)
			.and_then(|items| items.get(index));

		for group in shared.into_iter().chain(per_frame) {
			for functional_group in group.iter() {
				match functional_group.items() {
					// A functional group macro is a sequence with a single item
					Some(items) => {
						for element in items.iter().take(1).flat_map(|item| item.iter()) {
							dataset.put(element.clone());
						}
					}
					None => {
						dataset.put(functional_group.clone());
					}
				}
			}
		}

		if dataset.get(tags::ECHO_TIME).is_none() {
			if let Some(effective) = dataset.get(tags::EFFECTIVE_ECHO_TIME) {
				let echo_time = DataElement::new(
					tags::ECHO_TIME,
					effective.vr(),
					effective.value().clone(),
				);
				dataset.put(echo_time);
			}
		}

		if dataset.get(tags::INVERSION_TIME).is_none() {
			let first_inversion_time = dataset
				.get(tags::INVERSION_TIMES)
				.and_then(|element| element.to_multi_float64().ok())
				.and_then(|values| values.first().copied());
			if let Some(inversion_time) = first_inversion_time {
				dataset.put(DataElement::new(
					tags::INVERSION_TIME,
					VR::FD,
					dicom_value!(F64, [inversion_time]),
				));
			}
		}

		Self {
			dataset,
			transfer_syntax: self.transfer_syntax.clone(),
		}
	}

	fn items(&self, tag: Tag) -> Option<&[InMemDicomObject]> {
		self.element(tag).and_then(InMemElement::items)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dicom::testing::{enhanced_mr, mr_image, write_file};
	use dicom::dictionary_std::uids;

	#[test]
	fn read_typed_values() {
		let dir = tempfile::tempdir().unwrap();
		let mut object = mr_image("1.2.3.1");
		object.put_str(tags::SERIES_DATE, VR::DA, "20240131");
		object.put_str(tags::SERIES_DESCRIPTION, VR::LO, "  ");
		let path = write_file(dir.path(), "IM1", object, uids::EXPLICIT_VR_LITTLE_ENDIAN);

		let attributes = DicomAttributes::open(&path).unwrap();

		assert_eq!(attributes.sop_class_uid().as_deref(), Some(uids::MR_IMAGE_STORAGE));
		assert_eq!(
			attributes.transfer_syntax_uid().as_deref(),
			Some(uids::EXPLICIT_VR_LITTLE_ENDIAN)
		);
		assert_eq!(attributes.int(tags::ACQUISITION_NUMBER), Some(3));
		assert_eq!(attributes.double(tags::ECHO_TIME), Some(2.5));
		assert_eq!(
			attributes.doubles(tags::IMAGE_ORIENTATION_PATIENT),
			Some(vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0])
		);
		assert_eq!(
			attributes.date(tags::SERIES_DATE),
			NaiveDate::from_ymd_opt(2024, 1, 31)
		);
		assert_eq!(attributes.string(tags::SERIES_DESCRIPTION), None);
		assert_eq!(attributes.string(tags::PATIENT_SEX).as_deref(), Some("F"));
		assert!(matches!(attributes.image_attributes(), Cow::Borrowed(_)));
	}

	#[test]
	fn unreadable_file_is_an_error() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("garbage.dcm");
		std::fs::write(&path, b"definitely not DICOM").unwrap();

		let result = DicomAttributes::open(&path);
		assert!(matches!(result, Err(AttributeError::Read { .. })));
	}

	#[test]
	fn enhanced_frame_zero_uses_functional_groups() {
		let attributes = DicomAttributes::from_object(enhanced_mr(), None);

		// The top-level attributes are absent in enhanced objects
		assert_eq!(attributes.doubles(tags::IMAGE_ORIENTATION_PATIENT), None);
		assert_eq!(attributes.double(tags::ECHO_TIME), None);

		let frame = attributes.image_attributes();
		assert!(matches!(frame, Cow::Owned(_)));
		assert_eq!(
			frame.doubles(tags::IMAGE_ORIENTATION_PATIENT),
			Some(vec![0.0, 1.0, 0.0, 0.0, 0.0, -1.0])
		);
		assert_eq!(frame.double(tags::REPETITION_TIME), Some(2300.0));
		assert_eq!(frame.string(tags::FLIP_ANGLE).as_deref(), Some("9"));
		assert_eq!(frame.double(tags::ECHO_TIME), Some(2.98));
		assert_eq!(frame.double(tags::INVERSION_TIME), Some(900.0));
		assert_eq!(frame.number_of_frames(), Some(2));
		assert!(frame
			.dataset()
			.get(tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE)
			.is_none());
	}

	#[test]
	fn per_frame_values_override_shared_values() {
		let attributes = DicomAttributes::from_object(enhanced_mr(), None);

		// Frame 1 carries its own echo time
		let frame = attributes.frame(1);
		assert_eq!(frame.double(tags::ECHO_TIME), Some(7.5));
		// Shared groups still apply
		assert_eq!(frame.double(tags::REPETITION_TIME), Some(2300.0));
	}
}

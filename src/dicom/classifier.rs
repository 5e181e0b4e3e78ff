use crate::dicom::DicomAttributes;
use crate::model::{Equipment, Institution, Patient, Series, SeriesMetadata};
use crate::types::{
	ENHANCED_SOP_CLASSES, IGNORED_SOP_CLASSES, JPEG_TRANSFER_SYNTAX_ROOT, SPECTROSCOPY_SOP_CLASS,
};
use dicom::dictionary_std::tags;
use tracing::debug;

/// Value of Patient Identity Removed (0012,0062) for de-identified data.
const IDENTITY_REMOVED: &str = "YES";

impl SeriesMetadata {
	/// Completes the metadata with values found in `attributes`.
	///
	/// Every field is first-writer-wins: a value that is already set (from the DICOMDIR, the
	/// PACS query or a file read earlier) is kept as is, so merging twice is a no-op.
	#[must_use]
	pub fn merge(self, attributes: &DicomAttributes) -> Self {
		let sop_class_uid = present(self.sop_class_uid).or_else(|| attributes.sop_class_uid());
		let series_description = present(self.series_description)
			.or_else(|| attributes.string(tags::SERIES_DESCRIPTION));
		let protocol_name =
			present(self.protocol_name).or_else(|| attributes.string(tags::PROTOCOL_NAME));
		let series_date = self
			.series_date
			.or_else(|| attributes.date(tags::SERIES_DATE));
		let is_compressed = self.is_compressed.or_else(|| Some(is_compressed(attributes)));
		let is_enhanced = self.is_enhanced.or_else(|| Some(is_enhanced(attributes)));
		let is_spectroscopy = self
			.is_spectroscopy
			.or_else(|| Some(is_spectroscopy(attributes)));

		// Depends on the enhanced flag, which has to be settled first
		let (is_multi_frame, multi_frame_count) = match self.is_multi_frame {
			Some(is_multi_frame) => (Some(is_multi_frame), self.multi_frame_count),
			None => multi_frame(is_enhanced == Some(true), attributes),
		};

		let equipment = match self.equipment {
			Some(equipment) if equipment.is_complete() => Some(equipment),
			_ => Some(equipment(attributes)),
		};
		let institution = self.institution.or_else(|| Some(institution(attributes)));

		Self {
			sop_class_uid,
			series_description,
			protocol_name,
			series_date,
			is_compressed,
			is_enhanced,
			is_multi_frame,
			multi_frame_count,
			is_spectroscopy,
			equipment,
			institution,
		}
	}
}

/// Completes the series-level metadata, see [`SeriesMetadata::merge`].
pub fn classify_series(series: &mut Series, attributes: &DicomAttributes) {
	series.metadata = std::mem::take(&mut series.metadata).merge(attributes);
	debug!(
		series = %series.series_instance_uid,
		enhanced = ?series.metadata.is_enhanced,
		multi_frame = ?series.metadata.is_multi_frame,
		compressed = ?series.metadata.is_compressed,
		"Classified series"
	);
}

/// Completes missing patient data. Values from the DICOMDIR are never overwritten.
pub fn classify_patient(patient: &mut Patient, attributes: &DicomAttributes) {
	if patient.patient_birth_date.is_none() {
		patient.patient_birth_date = attributes.date(tags::PATIENT_BIRTH_DATE);
	}
	if patient
		.patient_sex
		.as_deref()
		.is_none_or(|sex| sex.trim().is_empty())
	{
		patient.patient_sex = attributes.string(tags::PATIENT_SEX);
	}
	if attributes.string(tags::PATIENT_IDENTITY_REMOVED).as_deref() == Some(IDENTITY_REMOVED) {
		patient.patient_identity_removed = true;
		patient.de_identification_method = attributes.string(tags::DEIDENTIFICATION_METHOD);
	}
}

/// Instances of these SOP classes are dropped during the split, see [`IGNORED_SOP_CLASSES`].
pub fn is_ignored(attributes: &DicomAttributes) -> bool {
	attributes
		.sop_class_uid()
		.is_some_and(|uid| IGNORED_SOP_CLASSES.contains(&uid.as_str()))
}

pub fn is_compressed(attributes: &DicomAttributes) -> bool {
	attributes
		.transfer_syntax_uid()
		.is_some_and(|uid| uid.starts_with(JPEG_TRANSFER_SYNTAX_ROOT))
}

pub fn is_enhanced(attributes: &DicomAttributes) -> bool {
	attributes
		.sop_class_uid()
		.is_some_and(|uid| ENHANCED_SOP_CLASSES.contains(&uid.as_str()))
}

pub fn is_spectroscopy(attributes: &DicomAttributes) -> bool {
	attributes.sop_class_uid().as_deref() == Some(SPECTROSCOPY_SOP_CLASS)
}

/// An enhanced object is multi-frame by construction and its frame count is the Number of
/// Frames. Other objects only count as multi-frame with more than one frame.
fn multi_frame(enhanced: bool, attributes: &DicomAttributes) -> (Option<bool>, Option<u32>) {
	let frames = attributes
		.number_of_frames()
		.and_then(|frames| u32::try_from(frames).ok())
		.filter(|frames| *frames > 0);

	match frames {
		Some(frames) if enhanced || frames > 1 => (Some(true), Some(frames)),
		_ => (Some(false), None),
	}
}

fn equipment(attributes: &DicomAttributes) -> Equipment {
	Equipment {
		manufacturer: attributes.string(tags::MANUFACTURER),
		manufacturer_model_name: attributes.string(tags::MANUFACTURER_MODEL_NAME),
		device_serial_number: attributes.string(tags::DEVICE_SERIAL_NUMBER),
	}
}

fn institution(attributes: &DicomAttributes) -> Institution {
	Institution {
		institution_name: attributes.string(tags::INSTITUTION_NAME),
		institution_address: attributes.string(tags::INSTITUTION_ADDRESS),
	}
}

/// Empty strings coming from a DICOMDIR count as absent.
fn present(value: Option<String>) -> Option<String> {
	value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dicom::testing::{enhanced_mr, mr_image};
	use chrono::NaiveDate;
	use dicom::core::VR;
	use dicom::dictionary_std::uids;

	fn attributes(object: dicom::object::InMemDicomObject, transfer_syntax: &str) -> DicomAttributes {
		DicomAttributes::from_object(object, Some(transfer_syntax.to_owned()))
	}

	#[test]
	fn fills_absent_series_fields() {
		let mut object = mr_image("1.2.3.1");
		object.put_str(tags::SERIES_DESCRIPTION, VR::LO, "t1 sag");
		object.put_str(tags::SERIES_DATE, VR::DA, "20230405");
		let attributes = attributes(object, uids::EXPLICIT_VR_LITTLE_ENDIAN);

		let metadata = SeriesMetadata::default().merge(&attributes);

		assert_eq!(metadata.sop_class_uid.as_deref(), Some(uids::MR_IMAGE_STORAGE));
		assert_eq!(metadata.series_description.as_deref(), Some("t1 sag"));
		assert_eq!(metadata.protocol_name.as_deref(), Some("T1_MPRAGE"));
		assert_eq!(metadata.series_date, NaiveDate::from_ymd_opt(2023, 4, 5));
		assert_eq!(metadata.is_compressed, Some(false));
		assert_eq!(metadata.is_enhanced, Some(false));
		assert_eq!(metadata.is_multi_frame, Some(false));
		assert_eq!(metadata.multi_frame_count, None);
		assert_eq!(metadata.is_spectroscopy, Some(false));
		assert!(metadata.equipment.as_ref().is_some_and(Equipment::is_complete));
		assert_eq!(
			metadata.institution.and_then(|i| i.institution_name).as_deref(),
			Some("CHU Rennes")
		);
	}

	#[test]
	fn existing_values_win() {
		let existing = SeriesMetadata {
			series_description: Some(String::from("from DICOMDIR")),
			protocol_name: Some(String::from("DIR_PROTOCOL")),
			is_compressed: Some(true),
			institution: Some(Institution::default()),
			..SeriesMetadata::default()
		};
		let attributes = attributes(mr_image("1.2.3.1"), uids::EXPLICIT_VR_LITTLE_ENDIAN);

		let merged = existing.clone().merge(&attributes);
		assert_eq!(merged.series_description, existing.series_description);
		assert_eq!(merged.protocol_name, existing.protocol_name);
		assert_eq!(merged.is_compressed, Some(true));
		assert_eq!(merged.institution, Some(Institution::default()));

		// Merging again changes nothing
		assert_eq!(merged.clone().merge(&attributes), merged);
	}

	#[test]
	fn blank_values_are_replaced() {
		let existing = SeriesMetadata {
			protocol_name: Some(String::from("  ")),
			..SeriesMetadata::default()
		};
		let attributes = attributes(mr_image("1.2.3.1"), uids::EXPLICIT_VR_LITTLE_ENDIAN);

		assert_eq!(
			existing.merge(&attributes).protocol_name.as_deref(),
			Some("T1_MPRAGE")
		);
	}

	#[test]
	fn compressed_iff_jpeg_family() {
		let compressed = |transfer_syntax: &str| {
			is_compressed(&attributes(mr_image("1.2.3.1"), transfer_syntax))
		};

		assert!(compressed("1.2.840.10008.1.2.4.50"));
		assert!(compressed("1.2.840.10008.1.2.4.90"));
		assert!(!compressed(uids::EXPLICIT_VR_LITTLE_ENDIAN));
		assert!(!compressed(uids::IMPLICIT_VR_LITTLE_ENDIAN));
		assert!(!compressed("1.2.840.10008.1.2.5"));
		assert!(!is_compressed(&DicomAttributes::from_object(mr_image("1"), None)));
	}

	#[test]
	fn enhanced_series_is_multi_frame() {
		let attributes = attributes(enhanced_mr(), uids::EXPLICIT_VR_LITTLE_ENDIAN);

		let metadata = SeriesMetadata::default().merge(&attributes);

		assert_eq!(metadata.is_enhanced, Some(true));
		assert_eq!(metadata.is_multi_frame, Some(true));
		assert_eq!(metadata.multi_frame_count, Some(2));
	}

	#[test]
	fn single_frame_enhanced_object_counts_as_multi_frame() {
		let mut object = enhanced_mr();
		object.put_str(tags::NUMBER_OF_FRAMES, VR::IS, "1");
		let enhanced = attributes(object, uids::EXPLICIT_VR_LITTLE_ENDIAN);

		let mut object = mr_image("1.2.3.1");
		object.put_str(tags::NUMBER_OF_FRAMES, VR::IS, "1");
		let classic = attributes(object, uids::EXPLICIT_VR_LITTLE_ENDIAN);

		let enhanced = SeriesMetadata::default().merge(&enhanced);
		assert_eq!(enhanced.is_multi_frame, Some(true));
		assert_eq!(enhanced.multi_frame_count, Some(1));

		let classic = SeriesMetadata::default().merge(&classic);
		assert_eq!(classic.is_multi_frame, Some(false));
	}

	#[test]
	fn detects_spectroscopy() {
		let mut object = mr_image("1.2.3.1");
		object.put_str(tags::SOP_CLASS_UID, VR::UI, SPECTROSCOPY_SOP_CLASS);
		let attributes = attributes(object, uids::EXPLICIT_VR_LITTLE_ENDIAN);

		assert!(is_spectroscopy(&attributes));
		assert_eq!(
			SeriesMetadata::default().merge(&attributes).is_spectroscopy,
			Some(true)
		);
	}

	#[test]
	fn incomplete_equipment_is_replaced() {
		let existing = SeriesMetadata {
			equipment: Some(Equipment {
				manufacturer: Some(String::from("GE")),
				..Equipment::default()
			}),
			..SeriesMetadata::default()
		};
		let attributes = attributes(mr_image("1.2.3.1"), uids::EXPLICIT_VR_LITTLE_ENDIAN);

		let equipment = existing.merge(&attributes).equipment.unwrap();
		assert_eq!(equipment.manufacturer.as_deref(), Some("SIEMENS"));
		assert_eq!(equipment.device_serial_number.as_deref(), Some("166038"));
	}

	#[test]
	fn ignores_raw_data() {
		let mut object = mr_image("1.2.3.1");
		assert!(!is_ignored(&attributes(object.clone(), uids::EXPLICIT_VR_LITTLE_ENDIAN)));

		object.put_str(tags::SOP_CLASS_UID, VR::UI, uids::RAW_DATA_STORAGE);
		assert!(is_ignored(&attributes(object, uids::EXPLICIT_VR_LITTLE_ENDIAN)));
	}

	#[test]
	fn completes_patient() {
		let mut object = mr_image("1.2.3.1");
		object.put_str(tags::PATIENT_IDENTITY_REMOVED, VR::CS, "YES");
		object.put_str(tags::DEIDENTIFICATION_METHOD, VR::LO, "Basic Application Confidentiality Profile");
		let attributes = attributes(object, uids::EXPLICIT_VR_LITTLE_ENDIAN);

		let mut patient = Patient {
			patient_sex: Some(String::from("M")),
			..Patient::default()
		};
		classify_patient(&mut patient, &attributes);

		assert_eq!(patient.patient_birth_date, NaiveDate::from_ymd_opt(1980, 1, 1));
		assert_eq!(patient.patient_sex.as_deref(), Some("M"));
		assert!(patient.patient_identity_removed);
		assert_eq!(
			patient.de_identification_method.as_deref(),
			Some("Basic Application Confidentiality Profile")
		);
	}

	#[test]
	fn classify_series_in_place() {
		let mut series = Series {
			series_instance_uid: String::from("1.2.3"),
			..Series::default()
		};
		let attributes = attributes(mr_image("1.2.3.1"), "1.2.840.10008.1.2.4.70");

		classify_series(&mut series, &attributes);
		assert_eq!(series.metadata.is_compressed, Some(true));
		assert_eq!(series.label(), "T1_MPRAGE");
	}
}

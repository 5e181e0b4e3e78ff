//! The patient → study → series → instance tree handed over by the DICOMDIR or PACS query
//! reader, together with the images produced while analyzing the instance files.
//!
//! The tree is (de)serialized with the same camel-cased field names the upstream reader uses.

use crate::types::{DS, IS, UI};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Patient {
	#[serde(rename = "patientID")]
	pub patient_id: Option<String>,
	pub patient_name: Option<String>,
	pub patient_birth_date: Option<NaiveDate>,
	pub patient_sex: Option<String>,
	pub patient_identity_removed: bool,
	pub de_identification_method: Option<String>,
	pub studies: Vec<Study>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Study {
	#[serde(rename = "studyInstanceUID")]
	pub study_instance_uid: UI,
	pub study_description: Option<String>,
	pub study_date: Option<NaiveDate>,
	pub series: Vec<Series>,
}

/// Series-level descriptive fields. Every field is optional: a value present here came from an
/// earlier, more authoritative source (DICOMDIR, PACS query or a previously read file) and is
/// never overwritten.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SeriesMetadata {
	#[serde(rename = "sopClassUID")]
	pub sop_class_uid: Option<UI>,
	pub series_description: Option<String>,
	pub protocol_name: Option<String>,
	pub series_date: Option<NaiveDate>,
	pub is_compressed: Option<bool>,
	pub is_enhanced: Option<bool>,
	pub is_multi_frame: Option<bool>,
	pub multi_frame_count: Option<u32>,
	pub is_spectroscopy: Option<bool>,
	pub equipment: Option<Equipment>,
	pub institution: Option<Institution>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Series {
	#[serde(rename = "seriesInstanceUID")]
	pub series_instance_uid: UI,
	#[serde(flatten)]
	pub metadata: SeriesMetadata,
	/// Raw instances as listed by the upstream reader. Emptied once the series is split.
	pub instances: Vec<Instance>,
	pub images: Vec<Image>,
	pub non_images: Vec<NonImage>,
	pub images_number: usize,
	pub non_images_number: usize,
}

impl Series {
	/// Label used in progress messages: the protocol name if known, the series UID otherwise.
	pub fn label(&self) -> &str {
		self.metadata
			.protocol_name
			.as_deref()
			.unwrap_or(&self.series_instance_uid)
	}

	/// Replaces the raw instances with the split result and keeps the counters in sync.
	pub fn set_split(&mut self, images: Vec<Image>, non_images: Vec<NonImage>) {
		self.instances.clear();
		self.images_number = images.len();
		self.non_images_number = non_images.len();
		self.images = images;
		self.non_images = non_images;
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Instance {
	#[serde(rename = "sopInstanceUID")]
	pub sop_instance_uid: UI,
	pub instance_number: Option<String>,
	/// Path segments of the file relative to the import root (DICOMDIR Referenced File ID).
	#[serde(rename = "referencedFileID")]
	pub referenced_file_id: Option<Vec<String>>,
}

/// An instance confirmed to be pixel data, with the attributes used later on to separate
/// datasets within the same series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
	/// Path relative to the import root, always `/`-separated.
	pub path: String,
	pub acquisition_number: IS,
	pub image_orientation_patient: Option<Vec<DS>>,
	pub repetition_time: DS,
	pub inversion_time: DS,
	pub flip_angle: String,
	pub echo_times: Vec<EchoTime>,
}

impl Image {
	pub fn new(path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			acquisition_number: 0,
			image_orientation_patient: None,
			repetition_time: 0.0,
			inversion_time: 0.0,
			flip_angle: String::from("0"),
			echo_times: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EchoTime {
	pub echo_number: IS,
	pub echo_time: DS,
}

/// Placeholder for instances that are not images. Nothing produces them yet, the collection is
/// kept so that consumers can rely on its presence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonImage {
	pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Equipment {
	pub manufacturer: Option<String>,
	pub manufacturer_model_name: Option<String>,
	pub device_serial_number: Option<String>,
}

impl Equipment {
	pub const fn is_complete(&self) -> bool {
		self.manufacturer.is_some()
			&& self.manufacturer_model_name.is_some()
			&& self.device_serial_number.is_some()
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Institution {
	pub institution_name: Option<String>,
	pub institution_address: Option<String>,
}

/// Progress notice handed to an [`crate::import::EventPublisher`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
	pub event_type: String,
	pub object_id: Option<String>,
	pub message: String,
	pub progress: f32,
}

impl Event {
	pub fn new(event_type: impl Into<String>, object_id: Option<String>) -> Self {
		Self {
			event_type: event_type.into(),
			object_id,
			message: String::new(),
			progress: 0.0,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn deserialize_manifest() {
		let json = r#"[{
			"patientID": "P1",
			"patientName": "DOE^JOHN",
			"studies": [{
				"studyInstanceUID": "1.2.3",
				"series": [{
					"seriesInstanceUID": "1.2.3.4",
					"protocolName": "T1_MPRAGE",
					"instances": [
						{ "sopInstanceUID": "1.2.3.4.1", "referencedFileID": ["DICOM", "IM1"] },
						{ "sopInstanceUID": "1.2.3.4.2" }
					]
				}]
			}]
		}]"#;

		let patients: Vec<Patient> = serde_json::from_str(json).unwrap();
		let series = &patients[0].studies[0].series[0];
		assert_eq!(series.label(), "T1_MPRAGE");
		assert_eq!(series.instances.len(), 2);
		assert_eq!(
			series.instances[0].referenced_file_id,
			Some(vec![String::from("DICOM"), String::from("IM1")])
		);
		assert_eq!(series.instances[1].referenced_file_id, None);
		assert!(series.images.is_empty());
		assert_eq!(patients[0].patient_birth_date, None);
	}

	#[test]
	fn label_falls_back_to_series_uid() {
		let series = Series {
			series_instance_uid: String::from("1.2.3.4"),
			..Series::default()
		};
		assert_eq!(series.label(), "1.2.3.4");
	}

	#[test]
	fn split_keeps_counters_in_sync() {
		let mut series = Series {
			instances: vec![Instance::default(), Instance::default()],
			..Series::default()
		};
		series.set_split(vec![Image::new("a.dcm")], Vec::new());

		assert!(series.instances.is_empty());
		assert_eq!(series.images_number, series.images.len());
		assert_eq!(series.non_images_number, series.non_images.len());
		assert_eq!(series.images[0].flip_angle, "0");
	}

	#[test]
	fn equipment_completeness() {
		let mut equipment = Equipment {
			manufacturer: Some(String::from("SIEMENS")),
			manufacturer_model_name: Some(String::from("Prisma")),
			device_serial_number: None,
		};
		assert!(!equipment.is_complete());
		equipment.device_serial_number = Some(String::from("1234"));
		assert!(equipment.is_complete());
	}
}

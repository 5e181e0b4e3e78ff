//! Pure string handling of WADO-RS and WADO-URI download URLs.

use crate::types::UI;
use chrono::NaiveDate;
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;
use thiserror::Error;

const WADO_RS_INSTANCES: &str = "/instances/";
const WADO_URI_OBJECT_UID: &str = "objectUID=";
const WADO_URI_STUDY_UID: &str = "studyUID=";
const CONTENT_TYPE_PARAM: &str = "&contentType";
const SERIES_PATH: &str = "/series/";
const METADATA_PATH: &str = "/metadata/";

static OBJECT_UID_BEFORE_CONTENT_TYPE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"objectUID=(\S+)&contentType").expect("constant pattern is valid")
});
static OBJECT_UID: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"objectUID=(\S+)").expect("constant pattern is valid"));
static FORBIDDEN_CHARACTERS: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9.\-]").expect("constant pattern is valid"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WadoUrlError {
	#[error("URL for download is neither in WADO-RS nor in WADO-URI format: {0}")]
	UnknownDialect(String),
	#[error("No instance UID in WADO-URI URL: {0}")]
	MissingInstanceUid(String),
}

/// A download URL, classified by its WADO dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WadoUrl {
	/// `.../studies/{study}/series/{series}/instances/{instance}`, answered with a
	/// `multipart/related` body.
	Rs { url: String, instance_uid: UI },
	/// `...wado?requestType=WADO&studyUID=..&seriesUID=..&objectUID=..&contentType=application/dicom`,
	/// answered with a single DICOM payload.
	Uri { url: String, instance_uid: UI },
}

impl WadoUrl {
	/// Detects the dialect of `url`. `/instances/` is looked up first, so a URL matching both
	/// dialects is WADO-RS.
	pub fn parse(url: &str) -> Result<Self, WadoUrlError> {
		if let Some(index) = url.rfind(WADO_RS_INSTANCES).filter(|index| *index > 0) {
			return Ok(Self::Rs {
				url: url.to_owned(),
				instance_uid: url[index + WADO_RS_INSTANCES.len()..].to_owned(),
			});
		}

		if url.rfind(WADO_URI_OBJECT_UID).is_some_and(|index| index > 0) {
			let pattern = if url.contains(CONTENT_TYPE_PARAM) {
				&*OBJECT_UID_BEFORE_CONTENT_TYPE
			} else {
				&*OBJECT_UID
			};
			let instance_uid = pattern
				.captures(url)
				.and_then(|captures| captures.get(1))
				.map(|uid| uid.as_str().to_owned())
				.ok_or_else(|| WadoUrlError::MissingInstanceUid(url.to_owned()))?;
			return Ok(Self::Uri {
				url: url.to_owned(),
				instance_uid,
			});
		}

		Err(WadoUrlError::UnknownDialect(url.to_owned()))
	}

	pub fn as_str(&self) -> &str {
		match self {
			Self::Rs { url, .. } | Self::Uri { url, .. } => url,
		}
	}

	pub fn instance_uid(&self) -> &str {
		match self {
			Self::Rs { instance_uid, .. } | Self::Uri { instance_uid, .. } => instance_uid,
		}
	}

	pub const fn is_rs(&self) -> bool {
		matches!(self, Self::Rs { .. })
	}
}

/// Rewrites a WADO-URI URL into the equivalent WADO-RS path.
pub fn wado_uri_to_wado_rs(url: &str) -> String {
	url.replace("wado?requestType=WADO", "rs")
		.replace("&studyUID=", "/studies/")
		.replace("&seriesUID=", "/series/")
		.replace("&objectUID=", "/instances/")
		.replace("&contentType=application/dicom&", "")
}

/// Rewrites WADO-URI URLs to WADO-RS and strips the content type parameter.
fn rs_base(url: &str) -> Cow<'_, str> {
	let url = if url.contains(WADO_URI_STUDY_UID) {
		Cow::Owned(wado_uri_to_wado_rs(url))
	} else {
		Cow::Borrowed(url)
	};
	match url.find(CONTENT_TYPE_PARAM) {
		Some(end) => Cow::Owned(url[..end].to_owned()),
		None => url,
	}
}

/// WADO-RS metadata URL of the instance addressed by `url`.
pub fn metadata_url(url: &str) -> String {
	format!("{}{METADATA_PATH}", rs_base(url))
}

/// WADO-RS metadata URL of the whole study containing the instance addressed by `url`.
pub fn study_metadata_url(url: &str) -> String {
	let base = rs_base(url);
	let study = base.split_once(SERIES_PATH).map_or(&*base, |(study, _)| study);
	format!("{study}{METADATA_PATH}")
}

/// Replaces every character outside `[a-zA-Z0-9.-]` with `_`.
pub fn sanitize_name(name: &str) -> Cow<'_, str> {
	FORBIDDEN_CHARACTERS.replace_all(name, "_")
}

/// Human-readable, filesystem-safe name (without extension) of a downloaded instance:
/// `<subject>_<YYYYMMDD>_<description>_<instance UID>`.
pub fn output_name(
	subject_name: &str,
	acquisition_date: Option<NaiveDate>,
	description: &str,
	instance_uid: &str,
) -> String {
	let date = acquisition_date
		.map(|date| date.format("%Y%m%d").to_string())
		.unwrap_or_default();
	let name = format!("{subject_name}_{date}_{description}_{instance_uid}");
	sanitize_name(&name).into_owned()
}

#[cfg(test)]
mod tests {
	use super::*;

	const RS: &str = "http://pacs:8081/dcm4chee-arc/aets/AS_RECEIVED/rs/studies/1.2.3/series/1.2.3.4/instances/1.2.3.4.5";
	const URI: &str = "http://pacs:8081/dcm4chee-arc/aets/AS_RECEIVED/wado?requestType=WADO&studyUID=1.2.3&seriesUID=1.2.3.4&objectUID=1.2.3.4.5&contentType=application/dicom";

	#[test]
	fn parse_wado_rs() {
		let url = WadoUrl::parse(RS).unwrap();
		assert!(url.is_rs());
		assert_eq!(url.instance_uid(), "1.2.3.4.5");
		assert_eq!(url.as_str(), RS);
	}

	#[test]
	fn parse_wado_uri() {
		let url = WadoUrl::parse(URI).unwrap();
		assert!(!url.is_rs());
		assert_eq!(url.instance_uid(), "1.2.3.4.5");

		let without_content_type = URI.replace("&contentType=application/dicom", "");
		let url = WadoUrl::parse(&without_content_type).unwrap();
		assert_eq!(url.instance_uid(), "1.2.3.4.5");
	}

	#[test]
	fn wado_rs_takes_precedence() {
		let url = "http://pacs/rs/studies/1/series/2/instances/3?objectUID=4";
		let parsed = WadoUrl::parse(url).unwrap();
		assert!(parsed.is_rs());
		assert_eq!(parsed.instance_uid(), "3?objectUID=4");
	}

	#[test]
	fn unknown_dialect_is_an_error() {
		assert_eq!(
			WadoUrl::parse("http://pacs/studies/1.2.3"),
			Err(WadoUrlError::UnknownDialect(String::from(
				"http://pacs/studies/1.2.3"
			)))
		);
		// A match at the very start does not count
		assert!(WadoUrl::parse("/instances/1.2.3").is_err());
		assert_eq!(
			WadoUrl::parse("http://pacs/wado?objectUID="),
			Err(WadoUrlError::MissingInstanceUid(String::from(
				"http://pacs/wado?objectUID="
			)))
		);
	}

	#[test]
	fn rewrite_wado_uri_to_wado_rs() {
		let uri = "http://pacs/aets/A/wado?requestType=WADO&studyUID=1.2.3&seriesUID=1.2.3.4&objectUID=1.2.3.4.5&contentType=application/dicom&transferSyntax=*";
		assert_eq!(
			wado_uri_to_wado_rs(uri),
			"http://pacs/aets/A/rs/studies/1.2.3/series/1.2.3.4/instances/1.2.3.4.5transferSyntax=*"
		);
		// The content type parameter is only dropped when followed by another parameter
		assert_eq!(
			wado_uri_to_wado_rs(URI),
			format!("{RS}&contentType=application/dicom")
		);
	}

	#[test]
	fn metadata_urls() {
		assert_eq!(metadata_url(RS), format!("{RS}/metadata/"));
		assert_eq!(metadata_url(URI), format!("{RS}/metadata/"));
		assert_eq!(
			study_metadata_url(URI),
			"http://pacs:8081/dcm4chee-arc/aets/AS_RECEIVED/rs/studies/1.2.3/metadata/"
		);
	}

	#[test]
	fn sanitized_names_are_filesystem_safe() {
		assert_eq!(sanitize_name("DOE^JOHN T1 (3D)/é"), "DOE_JOHN_T1__3D___");
		assert!(matches!(sanitize_name("1.2.3-a"), Cow::Borrowed(_)));
	}

	#[test]
	fn output_names() {
		let date = NaiveDate::from_ymd_opt(2023, 12, 31);
		assert_eq!(
			output_name("Subject 01", date, "T1 MPRAGE", "1.2.3"),
			"Subject_01_20231231_T1_MPRAGE_1.2.3"
		);
		// A missing date leaves an empty segment
		assert_eq!(output_name("S", None, "T1", "1.2.3"), "S__T1_1.2.3");
	}
}

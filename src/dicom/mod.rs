//! Analysis of the DICOM files of an import:
//! - [`attributes`] decodes the metadata of a single file.
//! - [`classifier`] completes series and patient metadata from a decoded file.
//! - [`splitter`] resolves the instance files of a series and turns them into images.

pub mod attributes;
pub mod classifier;
pub mod splitter;

pub use attributes::{AttributeError, DicomAttributes};

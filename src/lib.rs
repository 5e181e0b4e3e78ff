//! Analysis of imported DICOM series and retrieval of their instances from a PACS.
//!
//! - [`import`] splits the series of an import manifest into images and completes their
//!   metadata from the DICOM files.
//! - [`wado`] downloads instances through WADO-RS and WADO-URI, into folders or zip archives.

pub mod config;
pub mod dicom;
pub mod import;
pub mod model;
pub mod types;
pub mod utils;
pub mod wado;

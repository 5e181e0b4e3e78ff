//! Retrieval of instances from a PACS through WADO-RS and WADO-URI.

pub mod client;
pub mod url;

pub use client::{Artifact, DatasetContext, DownloadError, WadoClient};
pub use url::{WadoUrl, WadoUrlError};

//! Drives the analysis of an import: every series of every study of every patient is split into
//! images, then classified from its first image.

use crate::dicom::splitter::{split_series, InstanceResolver, ResolveError};
use crate::dicom::{classifier, DicomAttributes};
use crate::model::{Event, Patient, Study};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum ImportError {
	#[error("Import aborted for series {series_instance_uid}: {source}")]
	Resolve {
		series_instance_uid: String,
		#[source]
		source: ResolveError,
	},
}

/// Sink for progress events. Publishing is fire-and-forget: errors are logged by the caller and
/// never abort the import.
pub trait EventPublisher: Send + Sync {
	fn publish(&self, event: &Event) -> anyhow::Result<()>;
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
	fn publish(&self, _event: &Event) -> anyhow::Result<()> {
		Ok(())
	}
}

/// Logs every event at INFO level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

impl EventPublisher for TracingPublisher {
	fn publish(&self, event: &Event) -> anyhow::Result<()> {
		info!(
			event_type = %event.event_type,
			object_id = ?event.object_id,
			progress = event.progress,
			"{}",
			event.message
		);
		Ok(())
	}
}

pub struct Importer<P = TracingPublisher> {
	publisher: P,
}

impl Default for Importer {
	fn default() -> Self {
		Self::new(TracingPublisher)
	}
}

impl<P: EventPublisher> Importer<P> {
	pub const fn new(publisher: P) -> Self {
		Self { publisher }
	}

	/// Splits and classifies every series, depth-first.
	///
	/// A missing instance file aborts the whole import. When an `event` is given, it is updated
	/// and published once per processed series.
	#[instrument(skip_all, fields(root = %resolver.root().display()))]
	pub fn run(
		&self,
		patients: &mut [Patient],
		resolver: &InstanceResolver,
		mut event: Option<&mut Event>,
	) -> Result<(), ImportError> {
		let total = patients
			.iter()
			.flat_map(|patient| &patient.studies)
			.map(|study| study.series.len())
			.sum::<usize>();
		let mut processed = 0usize;

		for patient in patients.iter_mut() {
			// Detach the studies so that the patient can be completed while walking its series
			let mut studies = std::mem::take(&mut patient.studies);
			let result = self.run_studies(
				patient,
				&mut studies,
				resolver,
				&mut event,
				&mut processed,
				total,
			);
			patient.studies = studies;
			result?;
		}

		info!(series = total, "Analyzed DICOM files");
		Ok(())
	}

	fn run_studies(
		&self,
		patient: &mut Patient,
		studies: &mut [Study],
		resolver: &InstanceResolver,
		event: &mut Option<&mut Event>,
		processed: &mut usize,
		total: usize,
	) -> Result<(), ImportError> {
		for study in studies {
			let count = study.series.len();
			for (index, series) in study.series.iter_mut().enumerate() {
				split_series(series, resolver).map_err(|source| ImportError::Resolve {
					series_instance_uid: series.series_instance_uid.clone(),
					source,
				})?;

				// Only the first image feeds the series and patient metadata
				if let Some(image) = series.images.first() {
					match DicomAttributes::open(resolver.root().join(&image.path)) {
						Ok(attributes) => {
							classifier::classify_series(series, &attributes);
							classifier::classify_patient(patient, &attributes);
						}
						Err(err) => error!("Error during DICOM file processing: {err}"),
					}
				}

				*processed += 1;
				if let Some(event) = event.as_deref_mut() {
					event.message = format!(
						"Creating images and analyzing DICOM files for series [{}] {}/{}",
						series.label(),
						index + 1,
						count
					);
					event.progress = *processed as f32 / total as f32;
					if let Err(err) = self.publisher.publish(event) {
						warn!("Failed to publish import progress: {err:#}");
					}
				}
			}
		}
		Ok(())
	}
}
